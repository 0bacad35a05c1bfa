//! Fuzz target for locator and digest parsing
//!
//! Locators arrive from updater scripts; malformed ones must be
//! rejected without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|input: &str| {
    let _ = flashpatch_core::PartitionSpec::parse(input);
    let _ = flashpatch_core::parse_sha1(input);
});
