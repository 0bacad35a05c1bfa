//! Flashpatch CLI - crash-safe binary patching for OTA updates

mod apply;
mod check;
mod space;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flashpatch_core::{Cache, EvictOldest, FileBackend, PartitionDriver};
use std::path::{Path, PathBuf};

/// File name of the in-flight source backup under the cache directory
const BACKUP_FILE: &str = "saved.file";

#[derive(Parser)]
#[command(name = "flashpatch")]
#[command(author, version, about = "Crash-safe binary patching for OTA updates")]
#[command(long_about = "Flashpatch applies pre-vetted binary patches to files and raw flash \
partitions. It tolerates interruption at any point: a later run either \
finishes the update or confirms it is already complete.")]
struct Cli {
    /// Directory of partition images backing MTD: locators
    #[arg(long, global = true, default_value = "/dev/flash")]
    flash_dir: PathBuf,

    /// Cache directory holding the in-flight source backup
    #[arg(long, global = true, default_value = "/cache")]
    cache_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a patch, transforming the source into the target
    Apply {
        /// Source file path or MTD:<name>:<size>:<sha1>... locator
        source: String,

        /// Target file path or MTD:<name> locator ("-" means the source)
        target: String,

        /// Expected SHA-1 of the patched target
        target_sha1: String,

        /// Size of the patched target in bytes
        target_size: usize,

        /// Candidate patches as <source-sha1>:<patch-file> pairs
        #[arg(value_name = "SHA1:FILE")]
        patches: Vec<String>,
    },

    /// Check that a file (or its cached copy) matches one of the digests
    Check {
        /// File path or MTD:<name>:<size>:<sha1>... locator
        file: String,

        /// Acceptable SHA-1 digests (each may carry a :tag suffix)
        sha1s: Vec<String>,
    },

    /// Make free space available on the cache filesystem
    Space {
        /// Bytes that must be free
        bytes: u64,
    },
}

/// Scan the flash directory once and set up the cache spool.
fn session(flash_dir: &Path, cache_dir: &Path) -> Result<(PartitionDriver, Cache)> {
    let driver = PartitionDriver::new(Box::new(FileBackend::new(flash_dir)))
        .context("failed to scan partitions")?;
    let cache = Cache::new(
        cache_dir.join(BACKUP_FILE),
        Box::new(EvictOldest::new(cache_dir)),
    );
    Ok((driver, cache))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Apply {
            source,
            target,
            target_sha1,
            target_size,
            patches,
        } => {
            let (driver, cache) = session(&cli.flash_dir, &cli.cache_dir)?;
            apply::run(
                &driver,
                &cache,
                &source,
                &target,
                &target_sha1,
                target_size,
                &patches,
            )
        }

        Commands::Check { file, sha1s } => {
            let (driver, cache) = session(&cli.flash_dir, &cli.cache_dir)?;
            check::run(&driver, &cache, &file, &sha1s)
        }

        Commands::Space { bytes } => space::run(&cli.cache_dir, bytes),
    }
}
