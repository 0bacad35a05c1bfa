//! Fuzz target for patch application
//!
//! Tests decoder robustness against malformed patch blobs: errors are
//! fine, panics and overruns are not.

#![no_main]

use arbitrary::Arbitrary;
use flashpatch_core::{bsdiff, imgdiff, MemorySink};
use libfuzzer_sys::fuzz_target;
use sha1::{Digest, Sha1};

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    /// Source bytes the patch is applied against
    source: Vec<u8>,
    /// Patch blob, usually malformed
    patch: Vec<u8>,
}

fuzz_target!(|input: FuzzInput| {
    let mut sink = MemorySink::with_capacity(1 << 16);
    let mut hasher = Sha1::new();
    let _ = bsdiff::apply(&input.source, &input.patch, &mut sink, &mut hasher);

    let mut sink = MemorySink::with_capacity(1 << 16);
    let mut hasher = Sha1::new();
    let _ = imgdiff::apply(&input.source, &input.patch, &mut sink, &mut hasher);
});
