//! Free-space queries and the cache spool
//!
//! The cache filesystem is where the pristine source is parked while a
//! destructive step is in flight. Eviction policy belongs to the
//! platform; [`CacheReclaimer`] is the seam and [`EvictOldest`] the
//! built-in policy.

use std::ffi::CString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Default location of the in-flight source backup
pub const DEFAULT_BACKUP_PATH: &str = "/cache/saved.file";

/// Free bytes on the filesystem containing `path`
pub fn free_space_for(path: &Path) -> io::Result<u64> {
    let path_cstr = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let result = unsafe { libc::statvfs(path_cstr.as_ptr(), &mut stat) };
    if result != 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(stat.f_bsize as u64 * stat.f_bfree as u64)
}

/// Makes room on the cache filesystem
pub trait CacheReclaimer {
    /// Ensure at least `bytes` are free on the cache filesystem.
    fn make_free_space(&self, bytes: u64) -> io::Result<()>;
}

/// Deletes regular files under a directory, oldest first, until the
/// requested space is available
pub struct EvictOldest {
    root: PathBuf,
}

impl EvictOldest {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl CacheReclaimer for EvictOldest {
    fn make_free_space(&self, bytes: u64) -> io::Result<()> {
        if free_space_for(&self.root)? >= bytes {
            return Ok(());
        }

        let mut victims: Vec<(SystemTime, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            victims.push((mtime, entry.path()));
        }
        victims.sort();

        for (_, path) in victims {
            fs::remove_file(&path)?;
            if free_space_for(&self.root)? >= bytes {
                return Ok(());
            }
        }

        Err(io::Error::other(format!(
            "unable to make {} bytes available in {}",
            bytes,
            self.root.display()
        )))
    }
}

/// The cache spool: backup path plus the eviction hook used to make
/// room for it
pub struct Cache {
    backup_path: PathBuf,
    reclaimer: Box<dyn CacheReclaimer>,
}

impl Cache {
    pub fn new(backup_path: impl Into<PathBuf>, reclaimer: Box<dyn CacheReclaimer>) -> Self {
        Self {
            backup_path: backup_path.into(),
            reclaimer,
        }
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    /// Ask the reclaimer for `bytes` free on the cache filesystem.
    pub fn make_free_space(&self, bytes: u64) -> io::Result<()> {
        self.reclaimer.make_free_space(bytes)
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new(
            DEFAULT_BACKUP_PATH,
            Box::new(EvictOldest::new("/cache")),
        )
    }
}
