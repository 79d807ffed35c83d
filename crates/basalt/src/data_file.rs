//! Numbered append-only data files.
//!
//! A [`DataFile`] wraps a block I/O handle with a file id and a write
//! offset. Data files are named `%09d.data`; the hint file, the
//! merge-completion marker, and the persisted sequence counter reuse the
//! same record framing under fixed names.
//!
//! Sequential scans iterate `offset = 0; loop { read; offset += size }`
//! until [`DataFile::read_record`] reports end-of-stream.

use std::path::{Path, PathBuf};

use basalt_io::{BlockIo, IoKind, open_block_io};

use crate::error::{Error, Result};
use crate::record::{
    self, CRC_SIZE, LogRecord, MAX_HEADER_SIZE, Position, RecordKind, encode_position,
};

pub(crate) const DATA_FILE_SUFFIX: &str = ".data";
pub(crate) const HINT_FILE_NAME: &str = "hint-index";
pub(crate) const MERGE_FINISHED_FILE_NAME: &str = "merge-finished";
pub(crate) const SEQ_NO_FILE_NAME: &str = "seq-no";

/// One append-only log file.
pub(crate) struct DataFile {
    file_id: u32,
    write_offset: u64,
    io: Box<dyn BlockIo>,
    // Retained so the handle can be swapped from mmap back to standard
    // I/O after recovery.
    path: PathBuf,
}

impl DataFile {
    /// Opens (or creates) `%09d.data` in `dir`.
    ///
    /// The write offset starts at zero; the engine sets it explicitly
    /// during recovery.
    pub(crate) fn open(dir: &Path, file_id: u32, kind: IoKind) -> Result<Self> {
        Self::at_path(data_file_path(dir, file_id), file_id, kind)
    }

    /// Opens the hint file in `dir`.
    pub(crate) fn hint_file(dir: &Path) -> Result<Self> {
        Self::at_path(dir.join(HINT_FILE_NAME), 0, IoKind::File)
    }

    /// Opens the merge-completion marker in `dir`.
    pub(crate) fn merge_finished_file(dir: &Path) -> Result<Self> {
        Self::at_path(dir.join(MERGE_FINISHED_FILE_NAME), 0, IoKind::File)
    }

    /// Opens the persisted sequence-counter file in `dir`.
    pub(crate) fn seq_no_file(dir: &Path) -> Result<Self> {
        Self::at_path(dir.join(SEQ_NO_FILE_NAME), 0, IoKind::File)
    }

    fn at_path(path: PathBuf, file_id: u32, kind: IoKind) -> Result<Self> {
        let io = open_block_io(&path, kind)?;
        Ok(Self {
            file_id,
            write_offset: 0,
            io,
            path,
        })
    }

    pub(crate) fn file_id(&self) -> u32 {
        self.file_id
    }

    pub(crate) fn write_offset(&self) -> u64 {
        self.write_offset
    }

    pub(crate) fn set_write_offset(&mut self, offset: u64) {
        self.write_offset = offset;
    }

    /// Current on-disk size in bytes.
    pub(crate) fn size(&self) -> Result<u64> {
        Ok(self.io.size()?)
    }

    /// Appends raw encoded bytes and advances the write offset.
    pub(crate) fn append(&mut self, buf: &[u8]) -> Result<usize> {
        let n = self.io.append(buf)?;
        self.write_offset += n as u64;
        Ok(n)
    }

    /// Appends a hint record: the real key with a varint-encoded
    /// [`Position`] as its value.
    pub(crate) fn write_hint(&mut self, key: &[u8], pos: Position) -> Result<()> {
        let record = LogRecord {
            key: key.to_vec(),
            value: encode_position(pos),
            kind: RecordKind::Normal,
        };
        self.append(&record.encode())?;
        Ok(())
    }

    pub(crate) fn sync(&self) -> Result<()> {
        Ok(self.io.sync()?)
    }

    /// Replaces the I/O handle, used to swap mmap back to standard I/O
    /// after startup. The write offset is preserved.
    pub(crate) fn set_io_kind(&mut self, kind: IoKind) -> Result<()> {
        self.io = open_block_io(&self.path, kind)?;
        Ok(())
    }

    /// Reads the record starting at `offset`.
    ///
    /// Returns the decoded record and its total on-disk size, or `None`
    /// when the offset is at or past the end of the readable stream.
    pub(crate) fn read_record(&self, offset: u64) -> Result<Option<(LogRecord, u64)>> {
        let file_size = self.io.size()?;
        if offset >= file_size {
            return Ok(None);
        }

        // Phase one: up to MAX_HEADER_SIZE bytes, truncated at EOF.
        let want = MAX_HEADER_SIZE.min((file_size - offset) as usize);
        let mut header_buf = vec![0u8; want];
        let n = self.io.read_at(&mut header_buf, offset)?;
        let Some(header) = record::decode_header(&header_buf[..n])? else {
            return Ok(None);
        };

        // Phase two: key and value immediately after the header.
        let kv_len = header.key_len + header.value_len;
        let mut kv = vec![0u8; kv_len];
        if kv_len > 0 {
            let n = self.io.read_at(&mut kv, offset + header.size as u64)?;
            if n < kv_len {
                // Torn tail: the header landed but the payload did not.
                return Ok(None);
            }
        }

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header_buf[CRC_SIZE..header.size]);
        hasher.update(&kv);
        if hasher.finalize() != header.crc {
            return Err(Error::CorruptRecord {
                reason: format!(
                    "crc mismatch at offset {offset} of data file {:09}",
                    self.file_id
                ),
            });
        }

        let value = kv.split_off(header.key_len);
        Ok(Some((
            LogRecord {
                key: kv,
                value,
                kind: header.kind,
            },
            (header.size + kv_len) as u64,
        )))
    }
}

/// Path of `%09d.data` inside `dir`.
pub(crate) fn data_file_path(dir: &Path, file_id: u32) -> PathBuf {
    dir.join(format!("{file_id:09}{DATA_FILE_SUFFIX}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::NON_TXN_SEQ_NO;

    fn record(key: &[u8], value: &[u8]) -> LogRecord {
        LogRecord {
            key: key.to_vec(),
            value: value.to_vec(),
            kind: RecordKind::Normal,
        }
    }

    #[test]
    fn data_file_name_is_zero_padded() {
        let path = data_file_path(Path::new("/db"), 42);
        assert_eq!(path, PathBuf::from("/db/000000042.data"));
    }

    #[test]
    fn append_advances_write_offset() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = DataFile::open(dir.path(), 0, IoKind::File).unwrap();
        assert_eq!(file.write_offset(), 0);

        let encoded = record(b"a", b"1").encode();
        file.append(&encoded).unwrap();
        assert_eq!(file.write_offset(), encoded.len() as u64);

        file.append(&encoded).unwrap();
        assert_eq!(file.write_offset(), 2 * encoded.len() as u64);
    }

    #[test]
    fn sequential_scan_reads_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = DataFile::open(dir.path(), 3, IoKind::File).unwrap();

        let records = [
            record(b"alpha", b"one"),
            record(b"beta", b""),
            LogRecord {
                key: b"gamma".to_vec(),
                value: Vec::new(),
                kind: RecordKind::Tombstone,
            },
        ];
        for r in &records {
            file.append(&r.encode()).unwrap();
        }

        let mut offset = 0;
        let mut seen = Vec::new();
        while let Some((r, size)) = file.read_record(offset).unwrap() {
            offset += size;
            seen.push(r);
        }
        assert_eq!(seen, records);
        assert_eq!(offset, file.write_offset());
    }

    #[test]
    fn read_past_end_is_end_of_stream() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = DataFile::open(dir.path(), 0, IoKind::File).unwrap();
        assert!(file.read_record(0).unwrap().is_none());

        file.append(&record(b"k", b"v").encode()).unwrap();
        assert!(file.read_record(file.write_offset()).unwrap().is_none());
        assert!(file.read_record(9999).unwrap().is_none());
    }

    #[test]
    fn flipped_byte_fails_crc() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = DataFile::open(dir.path(), 0, IoKind::File).unwrap();

        let mut encoded = record(b"key", b"value").encode();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xff;
        file.append(&encoded).unwrap();

        assert!(matches!(
            file.read_record(0),
            Err(Error::CorruptRecord { .. })
        ));
    }

    #[test]
    fn hint_record_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut hint = DataFile::hint_file(dir.path()).unwrap();

        let pos = Position {
            file_id: 2,
            offset: 512,
            size: 64,
        };
        hint.write_hint(b"user-key", pos).unwrap();

        let (read, _) = hint.read_record(0).unwrap().unwrap();
        assert_eq!(read.key, b"user-key");
        assert_eq!(record::decode_position(&read.value).unwrap(), pos);
    }

    #[test]
    fn mmap_scan_matches_file_scan() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = DataFile::open(dir.path(), 0, IoKind::File).unwrap();
        for i in 0..10 {
            let r = LogRecord {
                key: record::key_with_seq_no(format!("key-{i:03}").as_bytes(), NON_TXN_SEQ_NO),
                value: vec![b'v'; i],
                kind: RecordKind::Normal,
            };
            writer.append(&r.encode()).unwrap();
        }
        writer.sync().unwrap();

        let mapped = DataFile::open(dir.path(), 0, IoKind::Mmap).unwrap();
        let mut offset = 0;
        let mut count = 0;
        while let Some((r, size)) = mapped.read_record(offset).unwrap() {
            let (seq_no, key) = record::parse_seq_no_key(&r.key).unwrap();
            assert_eq!(seq_no, NON_TXN_SEQ_NO);
            assert_eq!(key, format!("key-{count:03}").into_bytes());
            offset += size;
            count += 1;
        }
        assert_eq!(count, 10);
        assert_eq!(offset, writer.write_offset());
    }

    #[test]
    fn io_kind_swap_preserves_offset_and_contents() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = DataFile::open(dir.path(), 0, IoKind::File).unwrap();
        let encoded = record(b"swap", b"me").encode();
        file.append(&encoded).unwrap();
        file.sync().unwrap();

        let mut reopened = DataFile::open(dir.path(), 0, IoKind::Mmap).unwrap();
        reopened.set_write_offset(reopened.size().unwrap());
        reopened.set_io_kind(IoKind::File).unwrap();
        assert_eq!(reopened.write_offset(), encoded.len() as u64);

        let (r, _) = reopened.read_record(0).unwrap().unwrap();
        assert_eq!(r.key, b"swap");

        reopened.append(&record(b"more", b"data").encode()).unwrap();
        assert!(reopened.read_record(encoded.len() as u64).unwrap().is_some());
    }
}
