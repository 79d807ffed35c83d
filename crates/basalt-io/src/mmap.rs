//! Read-only memory-mapped I/O.
//!
//! Used only while rebuilding the index at startup: sequential scans of
//! sealed log files are considerably faster through a map than through
//! repeated `pread` calls. The engine replaces every [`MmapIo`] handle
//! with a [`crate::FileIo`] before a file becomes active or receives any
//! write.

use std::fs::OpenOptions;
use std::path::Path;

use memmap2::Mmap;

use crate::IoError;
use crate::backend::BlockIo;

/// Read-only memory map over a log file.
#[derive(Debug)]
pub struct MmapIo {
    // None for a zero-length file: mapping an empty file fails on some
    // platforms, and there is nothing to read anyway.
    map: Option<Mmap>,
    len: u64,
}

impl MmapIo {
    /// Maps the file at `path` read-only, creating it if absent.
    #[allow(unsafe_code)]
    pub fn open(path: &Path) -> Result<Self, IoError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let len = file.metadata()?.len();
        let map = if len == 0 {
            None
        } else {
            // SAFETY: the map is read-only and the engine holds the
            // directory lock, so no other process mutates the file; the
            // engine itself never appends to a file while it is mapped.
            Some(unsafe { Mmap::map(&file)? })
        };
        Ok(Self { map, len })
    }
}

impl BlockIo for MmapIo {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, IoError> {
        let Some(map) = &self.map else { return Ok(0) };
        if offset >= self.len {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(map.len() - start);
        buf[..n].copy_from_slice(&map[start..start + n]);
        Ok(n)
    }

    fn append(&mut self, _buf: &[u8]) -> Result<usize, IoError> {
        Err(IoError::ReadOnly)
    }

    fn size(&self) -> Result<u64, IoError> {
        Ok(self.len)
    }

    fn sync(&self) -> Result<(), IoError> {
        Ok(())
    }
}
