//! Error types for flashpatch

use thiserror::Error;

/// Errors parsing resource locators
#[derive(Debug, Error)]
pub enum LocatorError {
    #[error("locator {0:?} is not a partition locator")]
    NotPartition(String),

    #[error("partition locator {0:?} names no partition")]
    MissingName(String),

    #[error("partition locator {0:?} carries no (size, digest) candidates")]
    NoCandidates(String),

    #[error("partition locator {0:?} has an odd number of candidate fields")]
    UnbalancedFields(String),

    #[error("bad candidate size {field:?} in locator {locator:?}")]
    BadSize { locator: String, field: String },

    #[error("bad candidate digest {field:?} in locator {locator:?}")]
    BadDigest { locator: String, field: String },
}

/// Errors accessing raw flash partitions
#[derive(Debug, Error)]
pub enum MtdError {
    #[error("locator error: {0}")]
    Locator(#[from] LocatorError),

    #[error("partition {0:?} not found")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors loading a named resource into memory
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("locator error: {0}")]
    Locator(#[from] LocatorError),

    #[error("partition error: {0}")]
    Mtd(#[from] MtdError),

    #[error("short read of {path:?} ({got} bytes of {want})")]
    ShortRead {
        path: String,
        want: usize,
        got: usize,
    },

    #[error("contents of partition {0:?} matched no candidate digest")]
    NoDigestMatch(String),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors pushing decoded output into a sink
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("output overflows buffer ({len} bytes with {remaining} remaining)")]
    Overflow { len: usize, remaining: usize },

    #[error("short write ({done} bytes of {len})")]
    ShortWrite { done: usize, len: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the patch decoders
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("corrupt patch: {0}")]
    Corrupt(&'static str),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level errors applying a patch to a target
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("load error: {0}")]
    Load(#[from] LoadError),

    #[error("partition error: {0}")]
    Mtd(#[from] MtdError),

    #[error("failed to parse digest {0:?}")]
    MalformedDigest(String),

    #[error("neither source nor cached copy matched a patch digest")]
    CorruptSource,

    #[error("unknown patch format")]
    UnknownPatchFormat,

    #[error("not enough free space for target")]
    InsufficientSpace,

    #[error("patch produced digest {actual} instead of {expected}")]
    DigestMismatch { expected: String, actual: String },

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
