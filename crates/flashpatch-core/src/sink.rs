//! Byte sinks fed by the patch decoders
//!
//! A decoder produces the patched output incrementally and pushes each
//! run of bytes into a [`Sink`]: a file sink when the target lives on a
//! filesystem, a bounded memory sink when the target is a raw partition
//! (the partition is written in one pass after verification).

use crate::error::SinkError;
use sha1::{Digest, Sha1};
use std::fs::File;
use std::io::{ErrorKind, Write};

/// Receives decoded output bytes
pub trait Sink {
    fn push(&mut self, data: &[u8]) -> Result<(), SinkError>;
}

/// Writes through to an open file, retrying short writes
pub struct FileSink {
    file: File,
}

impl FileSink {
    pub fn new(file: File) -> Self {
        Self { file }
    }

    /// Flush the file to stable storage. Must happen before a staging
    /// file is renamed over its target.
    pub fn sync(&mut self) -> Result<(), SinkError> {
        self.file.sync_all()?;
        Ok(())
    }
}

impl Sink for FileSink {
    fn push(&mut self, data: &[u8]) -> Result<(), SinkError> {
        let mut done = 0;
        while done < data.len() {
            match self.file.write(&data[done..]) {
                Ok(0) => {
                    return Err(SinkError::ShortWrite {
                        done,
                        len: data.len(),
                    })
                }
                Ok(n) => done += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(SinkError::Io(e)),
            }
        }
        Ok(())
    }
}

/// Collects output in a fixed-capacity buffer, failing on overflow
pub struct MemorySink {
    buf: Vec<u8>,
    capacity: usize,
}

impl MemorySink {
    /// `capacity` is an upper bound, not a preallocation; patch blobs
    /// state their own output sizes, so storage only grows as bytes
    /// actually arrive.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

impl Sink for MemorySink {
    fn push(&mut self, data: &[u8]) -> Result<(), SinkError> {
        let remaining = self.capacity - self.buf.len();
        if data.len() > remaining {
            return Err(SinkError::Overflow {
                len: data.len(),
                remaining,
            });
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }
}

/// Push `data` into the sink and fold it into the running target digest.
pub fn emit(sink: &mut dyn Sink, hasher: &mut Sha1, data: &[u8]) -> Result<(), SinkError> {
    hasher.update(data);
    sink.push(data)
}
