//! `flashpatch space` command implementation

use anyhow::{Context, Result};
use flashpatch_core::{CacheReclaimer, EvictOldest};
use std::path::Path;

pub fn run(cache_dir: &Path, bytes: u64) -> Result<()> {
    EvictOldest::new(cache_dir)
        .make_free_space(bytes)
        .with_context(|| {
            format!(
                "unable to make {} bytes available on {}",
                bytes,
                cache_dir.display()
            )
        })?;
    println!("{} bytes available", bytes);
    Ok(())
}
