//! Shared fixtures for the scenario tests

use bzip2::write::BzEncoder;
use bzip2::Compression;
use flashpatch_core::{sha1_digest, sha1_to_hex, Cache, EvictOldest, FileBackend, PartitionDriver};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tempfile::TempDir;

/// Hex SHA-1 of a byte string
pub fn hex(data: &[u8]) -> String {
    sha1_to_hex(&sha1_digest(data))
}

fn pack_off(v: i64) -> [u8; 8] {
    if v < 0 {
        (((-v) as u64) | (1 << 63)).to_le_bytes()
    } else {
        (v as u64).to_le_bytes()
    }
}

fn bz(data: &[u8]) -> Vec<u8> {
    let mut encoder = BzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Build a single-control-entry bsdiff patch transforming `old` into
/// `new`: add over the common prefix, copy the tail from the extra
/// block.
pub fn make_bsdiff_patch(old: &[u8], new: &[u8]) -> Vec<u8> {
    let add_len = old.len().min(new.len());
    let mut ctrl = Vec::new();
    ctrl.extend_from_slice(&pack_off(add_len as i64));
    ctrl.extend_from_slice(&pack_off((new.len() - add_len) as i64));
    ctrl.extend_from_slice(&pack_off(0));

    let diff: Vec<u8> = new[..add_len]
        .iter()
        .zip(&old[..add_len])
        .map(|(n, o)| n.wrapping_sub(*o))
        .collect();
    let extra = &new[add_len..];

    let (ctrl, diff, extra) = (bz(&ctrl), bz(&diff), bz(extra));
    let mut patch = Vec::new();
    patch.extend_from_slice(b"BSDIFF40");
    patch.extend_from_slice(&pack_off(ctrl.len() as i64));
    patch.extend_from_slice(&pack_off(diff.len() as i64));
    patch.extend_from_slice(&pack_off(new.len() as i64));
    patch.extend_from_slice(&ctrl);
    patch.extend_from_slice(&diff);
    patch.extend_from_slice(&extra);
    patch
}

/// A scratch tree with a simulated flash directory and a cache spool
pub struct Fixture {
    pub dir: TempDir,
    pub flash: PathBuf,
    pub backup: PathBuf,
    pub driver: PartitionDriver,
    pub cache: Cache,
}

impl Fixture {
    /// Partition images must exist before the driver scans, so they are
    /// passed up front.
    pub fn with_partitions(partitions: &[(&str, &[u8])]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let flash = dir.path().join("flash");
        let cache_dir = dir.path().join("cache");
        fs::create_dir(&flash).unwrap();
        fs::create_dir(&cache_dir).unwrap();

        for (name, image) in partitions {
            fs::write(flash.join(name), image).unwrap();
        }

        let backup = cache_dir.join("saved.file");
        let driver = PartitionDriver::new(Box::new(FileBackend::new(&flash))).unwrap();
        let cache = Cache::new(&backup, Box::new(EvictOldest::new(&cache_dir)));

        Self {
            dir,
            flash,
            backup,
            driver,
            cache,
        }
    }

    pub fn new() -> Self {
        Self::with_partitions(&[])
    }

    /// Path under the scratch tree, as a locator string
    pub fn path(&self, name: &str) -> String {
        self.dir.path().join(name).display().to_string()
    }
}
