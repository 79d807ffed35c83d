//! The block I/O trait.
//!
//! [`BlockIo`] abstracts one log file: positioned read, append, size, and
//! sync. Two implementations share the contract: [`FileIo`] for normal
//! operation and [`MmapIo`] for read-only startup scans. The storage layer
//! selects one through [`open_block_io`] and may replace a file's handle
//! at runtime (mmap at startup, standard I/O afterwards).

use std::path::Path;

use crate::{FileIo, IoError, MmapIo};

/// Which I/O implementation to open a file with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoKind {
    /// Standard positioned file I/O. Read-write, created if absent.
    #[default]
    File,
    /// Read-only memory map. Appends are refused.
    Mmap,
}

/// Abstraction over a single append-only log file.
///
/// Implementations must tolerate reads past end-of-file by returning a
/// short (possibly zero-length) read; callers interpret those as
/// end-of-stream, not as errors.
pub trait BlockIo: Send + Sync {
    /// Reads up to `buf.len()` bytes at the given byte offset.
    ///
    /// Returns the number of bytes read, which is less than `buf.len()`
    /// when the file ends inside the requested range.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, IoError>;

    /// Appends the whole buffer at the end of the file.
    ///
    /// Returns the number of bytes written (always `buf.len()` on success).
    fn append(&mut self, buf: &[u8]) -> Result<usize, IoError>;

    /// Returns the current file size in bytes.
    fn size(&self) -> Result<u64, IoError>;

    /// Flushes file data and metadata to disk.
    fn sync(&self) -> Result<(), IoError>;
}

/// Opens `path` with the selected I/O implementation.
pub fn open_block_io(path: &Path, kind: IoKind) -> Result<Box<dyn BlockIo>, IoError> {
    match kind {
        IoKind::File => Ok(Box::new(FileIo::open(path)?)),
        IoKind::Mmap => Ok(Box::new(MmapIo::open(path)?)),
    }
}
