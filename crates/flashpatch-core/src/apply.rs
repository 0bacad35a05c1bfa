//! The patch application state machine
//!
//! `apply_patch` transforms a source file or partition into the target
//! version in a way that is safe (the target is never touched until the
//! verified replacement exists) and idempotent (running it again after
//! success, or after an interruption at any instruction, converges on
//! the same result).
//!
//! Crash-safety rests on three artifacts: the staging file
//! `<target>.patch`, renamed over a filesystem target as the atomic
//! commit; the cache backup, a pristine copy of the source parked while
//! a partition write or a source deletion is in flight; and the digest
//! probing done by the loader, which recognizes whichever version an
//! interrupted run left behind.

use crate::bsdiff;
use crate::error::ApplyError;
use crate::hash::{find_matching_digest, parse_sha1, sha1_to_hex};
use crate::imgdiff;
use crate::loader::{load_contents, load_file, save_contents};
use crate::mtd::{self, PartitionDriver};
use crate::sink::{FileSink, MemorySink, Sink};
use crate::space::{free_space_for, Cache};
use sha1::{Digest, Sha1};
use std::fs::{self, OpenOptions};
use std::os::unix::fs::{chown, OpenOptionsExt, PermissionsExt};
use std::path::Path;

/// Minimum free space demanded on the target filesystem, on top of the
/// 1.5x target-size margin
const MIN_FREE_SPACE: u64 = 256 * 1024;

/// A cached copy is only accepted when it matches an entry at or past
/// this index; a match at index 0 is rejected. See DESIGN.md.
const CACHE_MATCH_MIN_INDEX: usize = 1;

/// A candidate patch keyed by the digest of the source it applies to
pub struct PatchEntry {
    pub source_sha1: String,
    pub data: Vec<u8>,
}

/// Output staged by one pass of the apply loop
enum StagedOutput {
    /// Partition targets decode into memory and commit afterwards
    Partition(MemorySink),
    /// Filesystem targets decode into the staging file
    File(FileSink),
}

/// Filesystem a path lives on, taken as its top-level directory
/// ("/system/app/Foo.apk" -> "/system")
fn filesystem_root(path: &str) -> &str {
    if path.len() < 2 {
        return path;
    }
    match path[1..].find('/') {
        Some(i) => &path[..i + 1],
        None => path,
    }
}

/// Apply one of `patches` to `source_locator`, producing
/// `target_locator` with digest `target_sha1_str` and size
/// `target_size`.
///
/// If the target already has the expected digest, nothing is written.
/// Otherwise the patch whose entry matches the source digest is
/// decoded, verified, and committed: by atomic rename for filesystem
/// targets, by a cache-backed partition write for partition targets.
/// `target_locator` may be `"-"` to mean the source locator.
pub fn apply_patch(
    driver: &PartitionDriver,
    cache: &Cache,
    source_locator: &str,
    target_locator: &str,
    target_sha1_str: &str,
    target_size: usize,
    patches: &[PatchEntry],
) -> Result<(), ApplyError> {
    println!("applying patch to {}", source_locator);

    let target_locator = if target_locator == "-" {
        source_locator
    } else {
        target_locator
    };

    let target_sha1 = parse_sha1(target_sha1_str)
        .ok_or_else(|| ApplyError::MalformedDigest(target_sha1_str.to_string()))?;

    // The patch may already have been applied by an earlier run.
    let mut source = match load_contents(target_locator, driver) {
        Ok(contents) => {
            if contents.sha1 == target_sha1 {
                println!("\"{}\" is already target; no patch needed", target_locator);
                return Ok(());
            }
            Some(contents)
        }
        Err(_) => None,
    };

    if source.is_none() || target_locator != source_locator {
        // Either the target would not load, or what we loaded is the
        // target's bytes rather than the source's.
        source = load_contents(source_locator, driver).ok();
    }

    let digests: Vec<&str> = patches.iter().map(|p| p.source_sha1.as_str()).collect();

    let (source_file, patch_entry, using_source) = match source
        .take()
        .and_then(|contents| {
            find_matching_digest(&contents.sha1, &digests).map(|i| (contents, &patches[i]))
        }) {
        Some((contents, entry)) => (contents, entry, true),
        None => {
            println!("source file is bad; trying copy");
            let contents = load_file(cache.backup_path()).map_err(|e| {
                println!("failed to read copy file: {}", e);
                ApplyError::CorruptSource
            })?;
            let index = find_matching_digest(&contents.sha1, &digests)
                .filter(|&i| i >= CACHE_MATCH_MIN_INDEX)
                .ok_or_else(|| {
                    println!("copy file doesn't match any source sha1");
                    ApplyError::CorruptSource
                })?;
            (contents, &patches[index], false)
        }
    };

    let target_is_partition = mtd::is_partition(target_locator);
    let target_fs = filesystem_root(target_locator);
    let staging = format!("{}.patch", target_locator);

    let mut made_copy = false;
    let mut retry = true;
    let mut hasher;

    // One spare pass: if decoding fails while a retry is still banked,
    // the second pass frees space by parking the source in cache and
    // deleting it, then tries once more.
    let patched: Option<Vec<u8>> = loop {
        let mut output = if target_is_partition {
            // The partition write is not atomic; park the pristine
            // source in cache first so an interrupted write is
            // recoverable.
            cache.make_free_space(source_file.size() as u64).map_err(|e| {
                println!("failed to make room on cache: {}", e);
                ApplyError::Io(e)
            })?;
            save_contents(cache.backup_path(), &source_file).map_err(|e| {
                println!("failed to back up source file: {}", e);
                e
            })?;
            made_copy = true;
            retry = false;
            StagedOutput::Partition(MemorySink::with_capacity(target_size))
        } else {
            let mut enough_space = false;
            if retry {
                let free_space = match free_space_for(Path::new(target_fs)) {
                    Ok(n) => n,
                    Err(e) => {
                        // Unknown counts as sufficient: assuming zero
                        // would delete the source over a transient stat
                        // failure.
                        println!("failed to stat filesystem {}: {}", target_fs, e);
                        u64::MAX
                    }
                };
                enough_space = free_space > MIN_FREE_SPACE
                    && free_space > (target_size as u64).saturating_mul(3) / 2;
                println!(
                    "target {} bytes; free space {} bytes; retry {}; enough {}",
                    target_size, free_space, retry, enough_space
                );
            }

            if !enough_space {
                retry = false;
            }

            if !enough_space && using_source {
                // Make room by deleting the source, once it is safely
                // parked in cache. Impossible when the source is a
                // partition.
                if mtd::is_partition(source_locator) {
                    println!("not enough free space for target but source is a partition");
                    return Err(ApplyError::InsufficientSpace);
                }

                cache.make_free_space(source_file.size() as u64).map_err(|e| {
                    println!("failed to make room on cache: {}", e);
                    ApplyError::Io(e)
                })?;
                save_contents(cache.backup_path(), &source_file).map_err(|e| {
                    println!("failed to back up source file: {}", e);
                    e
                })?;
                made_copy = true;
                let _ = fs::remove_file(source_locator);

                if let Ok(free_space) = free_space_for(Path::new(target_fs)) {
                    println!("(now {} bytes free for target)", free_space);
                }
            }

            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&staging)
                .map_err(|e| {
                    println!("failed to open output file {}: {}", staging, e);
                    ApplyError::Io(e)
                })?;
            StagedOutput::File(FileSink::new(file))
        };

        hasher = Sha1::new();
        let sink: &mut dyn Sink = match &mut output {
            StagedOutput::Partition(sink) => sink,
            StagedOutput::File(sink) => sink,
        };

        let decode_result = if bsdiff::is_bsdiff(&patch_entry.data) {
            bsdiff::apply(&source_file.data, &patch_entry.data, sink, &mut hasher)
        } else if imgdiff::is_imgdiff(&patch_entry.data) {
            imgdiff::apply(&source_file.data, &patch_entry.data, sink, &mut hasher)
        } else {
            println!("unknown patch file format");
            if !target_is_partition {
                let _ = fs::remove_file(&staging);
            }
            return Err(ApplyError::UnknownPatchFormat);
        };

        if let StagedOutput::File(sink) = &mut output {
            // Push the staged bytes to disk before judging the result;
            // a success must be durable before the rename.
            let _ = sink.sync();
        }

        match decode_result {
            Ok(()) => {
                break match output {
                    StagedOutput::Partition(sink) => Some(sink.into_inner()),
                    StagedOutput::File(_) => None,
                };
            }
            Err(e) => {
                if !target_is_partition {
                    let _ = fs::remove_file(&staging);
                }
                if !retry {
                    println!("failed to apply patch: {}", e);
                    return Err(e.into());
                }
                println!("failed to apply patch; retrying");
                retry = false;
            }
        }
    };

    let actual: [u8; 20] = hasher.finalize().into();
    if actual != target_sha1 {
        println!("patch did not produce expected sha1");
        if !target_is_partition {
            let _ = fs::remove_file(&staging);
        }
        return Err(ApplyError::DigestMismatch {
            expected: sha1_to_hex(&target_sha1),
            actual: sha1_to_hex(&actual),
        });
    }

    match patched {
        Some(data) => {
            mtd::write_to_partition(driver, target_locator, &data).map_err(|e| {
                println!("write of patched data to {} failed: {}", target_locator, e);
                e
            })?;
        }
        None => {
            // Give the staging file the source's owner, group, and
            // mode, then atomically move it over the target.
            fs::set_permissions(&staging, fs::Permissions::from_mode(source_file.stat.mode))
                .map_err(|e| {
                    println!("failed to chmod {}: {}", staging, e);
                    ApplyError::Io(e)
                })?;
            chown(
                &staging,
                Some(source_file.stat.uid),
                Some(source_file.stat.gid),
            )
            .map_err(|e| {
                println!("failed to chown {}: {}", staging, e);
                ApplyError::Io(e)
            })?;
            fs::rename(&staging, target_locator).map_err(|e| {
                println!("failed to rename {} to {}: {}", staging, target_locator, e);
                ApplyError::Io(e)
            })?;
        }
    }

    // Only the backup this run created is ours to delete.
    if made_copy {
        let _ = fs::remove_file(cache.backup_path());
    }

    Ok(())
}

/// Check whether `locator` (or, failing that, the cache backup) loads
/// and matches one of `sha1s`.
///
/// An empty digest list passes on a successful load alone; partition
/// locators carry their digests in the locator itself, so there is no
/// need to state them twice. The cache fallback always requires a
/// match.
pub fn check_patchable(
    driver: &PartitionDriver,
    cache: &Cache,
    locator: &str,
    sha1s: &[String],
) -> Result<(), ApplyError> {
    let matches = match load_contents(locator, driver) {
        Ok(contents) => sha1s.is_empty() || find_matching_digest(&contents.sha1, sha1s).is_some(),
        Err(_) => false,
    };
    if matches {
        return Ok(());
    }

    println!(
        "file \"{}\" doesn't have any of expected sha1 sums; checking cache",
        locator
    );

    // The file may have been mid-patch when this process was last
    // killed; the pristine copy parked in cache still satisfies the
    // check.
    let copy = load_file(cache.backup_path()).map_err(|e| {
        println!("failed to load cache file: {}", e);
        e
    })?;

    match find_matching_digest(&copy.sha1, sha1s) {
        Some(_) => Ok(()),
        None => {
            println!("cache bits don't match any sha1 for \"{}\"", locator);
            Err(ApplyError::CorruptSource)
        }
    }
}
