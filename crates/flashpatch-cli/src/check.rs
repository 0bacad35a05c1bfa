//! `flashpatch check` command implementation

use anyhow::Result;
use flashpatch_core::{check_patchable, Cache, PartitionDriver};

pub fn run(
    driver: &PartitionDriver,
    cache: &Cache,
    file: &str,
    sha1s: &[String],
) -> Result<()> {
    check_patchable(driver, cache, file, sha1s)?;
    println!("\"{}\" is patchable", file);
    Ok(())
}
