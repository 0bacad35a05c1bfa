//! Flashpatch Core - Crash-safe binary patching for OTA updates
//!
//! This crate transforms one version of a file (or raw flash partition)
//! into another by applying a pre-computed binary patch. It is built to
//! tolerate interruption at any instruction: a power loss mid-update
//! leaves the system in a state from which the next invocation either
//! finishes the update or confirms it is already done.
//!
//! The two load-bearing pieces are the patch orchestrator ([`apply`]),
//! which triages source material, stages output, and commits atomically,
//! and the partition loader ([`loader`]), which reads from length-less
//! raw partitions by probing prioritized (size, digest) candidates.

pub mod apply;
pub mod bsdiff;
pub mod error;
pub mod hash;
pub mod imgdiff;
pub mod loader;
pub mod mtd;
pub mod sink;
pub mod space;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export commonly used types
pub use apply::{apply_patch, check_patchable, PatchEntry};
pub use error::{ApplyError, DecodeError, LoadError, LocatorError, MtdError, SinkError};
pub use hash::{find_matching_digest, parse_sha1, sha1_digest, sha1_to_hex, SHA1_DIGEST_SIZE};
pub use loader::{load_contents, load_file, save_contents, FileContents, FileStat, PartitionSpec};
pub use mtd::{FileBackend, FlashBackend, FlashWrite, PartitionDriver, PartitionInfo};
pub use sink::{FileSink, MemorySink, Sink};
pub use space::{free_space_for, Cache, CacheReclaimer, EvictOldest};
