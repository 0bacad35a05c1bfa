//! `flashpatch apply` command implementation

use anyhow::{Context, Result};
use flashpatch_core::{apply_patch, Cache, PartitionDriver, PatchEntry};
use std::fs;

pub fn run(
    driver: &PartitionDriver,
    cache: &Cache,
    source: &str,
    target: &str,
    target_sha1: &str,
    target_size: usize,
    patch_args: &[String],
) -> Result<()> {
    let mut patches = Vec::with_capacity(patch_args.len());
    for arg in patch_args {
        let (sha1, path) = arg
            .split_once(':')
            .with_context(|| format!("expected <sha1>:<patch-file>, got {:?}", arg))?;
        let data =
            fs::read(path).with_context(|| format!("failed to read patch file {:?}", path))?;
        patches.push(PatchEntry {
            source_sha1: sha1.to_string(),
            data,
        });
    }

    apply_patch(
        driver,
        cache,
        source,
        target,
        target_sha1,
        target_size,
        &patches,
    )?;
    println!("patch applied");
    Ok(())
}
