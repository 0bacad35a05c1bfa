//! Raw flash partition access
//!
//! Flash partitions are addressed by name and carry no end-of-file
//! marker, so reads and writes are framed by the caller. Device access
//! goes through the [`FlashBackend`] seam: the production backend wraps
//! the kernel MTD driver, while [`FileBackend`] backs each partition
//! with an image file so the rest of the crate can be exercised on a
//! development host.

use crate::error::{LocatorError, MtdError};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::PathBuf;

/// Locator prefix selecting a raw partition instead of a file path
pub const MTD_PREFIX: &str = "MTD:";

/// Value flash cells hold after an erase
pub const ERASED_BYTE: u8 = 0xff;

/// Whether a locator names a raw partition
pub fn is_partition(locator: &str) -> bool {
    locator.starts_with(MTD_PREFIX)
}

/// Extract the partition name from a `MTD:<name>[:...]` locator.
/// Everything past the name is ignored here; writers only need the name.
pub fn partition_name(locator: &str) -> Result<&str, LocatorError> {
    let rest = locator
        .strip_prefix(MTD_PREFIX)
        .ok_or_else(|| LocatorError::NotPartition(locator.to_string()))?;
    let name = rest.split(':').next().unwrap_or("");
    if name.is_empty() {
        return Err(LocatorError::MissingName(locator.to_string()));
    }
    Ok(name)
}

/// One entry of the scanned partition table
#[derive(Debug, Clone)]
pub struct PartitionInfo {
    pub name: String,
    pub size: u64,
}

/// Sequential writer over one partition
pub trait FlashWrite: Write {
    /// Erase everything past the write cursor, through the end of the
    /// partition. Erased flash reads back as [`ERASED_BYTE`].
    fn erase_remaining(&mut self) -> io::Result<()>;

    /// Flush device buffers and release the partition.
    fn close(self: Box<Self>) -> io::Result<()>;
}

/// Device access seam
pub trait FlashBackend {
    fn scan(&self) -> io::Result<Vec<PartitionInfo>>;
    fn open_read(&self, partition: &PartitionInfo) -> io::Result<Box<dyn Read>>;
    fn open_write(&self, partition: &PartitionInfo) -> io::Result<Box<dyn FlashWrite>>;
}

/// Handle over a scanned partition table.
///
/// Constructing the driver scans the backend exactly once; every loader
/// and writer borrows the same handle for the life of the process.
pub struct PartitionDriver {
    backend: Box<dyn FlashBackend>,
    partitions: Vec<PartitionInfo>,
}

impl PartitionDriver {
    pub fn new(backend: Box<dyn FlashBackend>) -> io::Result<Self> {
        let partitions = backend.scan()?;
        Ok(Self {
            backend,
            partitions,
        })
    }

    pub fn find(&self, name: &str) -> Option<&PartitionInfo> {
        self.partitions.iter().find(|p| p.name == name)
    }

    pub fn open_read(&self, partition: &PartitionInfo) -> io::Result<Box<dyn Read>> {
        self.backend.open_read(partition)
    }

    pub fn open_write(&self, partition: &PartitionInfo) -> io::Result<Box<dyn FlashWrite>> {
        self.backend.open_write(partition)
    }
}

/// Write `data` to the partition named by a `MTD:<name>[:...]` locator,
/// erase the tail, and close the device. Any failure aborts; partition
/// writes are not atomic, which is why the orchestrator parks a source
/// backup in cache before calling this.
pub fn write_to_partition(
    driver: &PartitionDriver,
    locator: &str,
    data: &[u8],
) -> Result<(), MtdError> {
    let name = partition_name(locator)?;
    let partition = driver
        .find(name)
        .ok_or_else(|| MtdError::NotFound(name.to_string()))?
        .clone();

    let mut writer = driver.open_write(&partition)?;
    writer.write_all(data)?;
    writer.erase_remaining()?;
    writer.close()?;
    Ok(())
}

/// Simulated flash: a directory where each regular file is one
/// partition image of fixed size. A missing directory scans as an empty
/// partition table.
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FlashBackend for FileBackend {
    fn scan(&self) -> io::Result<Vec<PartitionInfo>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut partitions = Vec::new();
        for entry in entries {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            partitions.push(PartitionInfo {
                name,
                size: meta.len(),
            });
        }
        partitions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(partitions)
    }

    fn open_read(&self, partition: &PartitionInfo) -> io::Result<Box<dyn Read>> {
        Ok(Box::new(File::open(self.root.join(&partition.name))?))
    }

    fn open_write(&self, partition: &PartitionInfo) -> io::Result<Box<dyn FlashWrite>> {
        let file = OpenOptions::new()
            .write(true)
            .open(self.root.join(&partition.name))?;
        Ok(Box::new(FileFlashWrite {
            file,
            written: 0,
            size: partition.size,
        }))
    }
}

struct FileFlashWrite {
    file: File,
    written: u64,
    size: u64,
}

impl Write for FileFlashWrite {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let remaining = (self.size - self.written) as usize;
        if remaining == 0 && !buf.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "write past end of partition",
            ));
        }
        let n = self.file.write(&buf[..buf.len().min(remaining)])?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl FlashWrite for FileFlashWrite {
    fn erase_remaining(&mut self) -> io::Result<()> {
        let block = [ERASED_BYTE; 4096];
        let mut remaining = self.size - self.written;
        while remaining > 0 {
            let n = remaining.min(block.len() as u64) as usize;
            self.file.write_all(&block[..n])?;
            remaining -= n as u64;
        }
        self.written = self.size;
        Ok(())
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        self.file.sync_all()
    }
}
