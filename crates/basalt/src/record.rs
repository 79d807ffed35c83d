//! Log record codec.
//!
//! Every mutation is appended as one record. On disk a record is:
//!
//! ```text
//! [crc32:4 LE][kind:1][key_len:varint][value_len:varint][key][value]
//! ```
//!
//! The CRC covers everything after itself (kind, sizes, key, value) and
//! is stored little-endian. Key and value sizes are zig-zag signed
//! varints; the transaction-sequence prefix embedded in keys is an
//! unsigned varint. Hint records reuse the same framing with a
//! varint-encoded [`Position`] as their value.

use prost::encoding::{decode_varint, encode_varint, encoded_len_varint};

use crate::error::{Error, Result};

/// Width of the stored CRC.
pub(crate) const CRC_SIZE: usize = 4;

/// Upper bound of an encoded header: crc(4) + kind(1) plus two zig-zag
/// varints of a 32-bit size, at most 5 bytes each.
pub(crate) const MAX_HEADER_SIZE: usize = CRC_SIZE + 1 + 2 * 5;

/// Sequence number tagging non-transactional writes.
pub(crate) const NON_TXN_SEQ_NO: u64 = 0;

/// The type tag of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordKind {
    /// A live key/value pair.
    Normal,
    /// Logical deletion of a key.
    Tombstone,
    /// Terminal marker making a batch's records visible.
    TxnCommit,
}

impl RecordKind {
    pub(crate) fn as_byte(self) -> u8 {
        match self {
            RecordKind::Normal => 0,
            RecordKind::Tombstone => 1,
            RecordKind::TxnCommit => 2,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(RecordKind::Normal),
            1 => Some(RecordKind::Tombstone),
            2 => Some(RecordKind::TxnCommit),
            _ => None,
        }
    }
}

/// Locates one record on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Position {
    pub file_id: u32,
    pub offset: u64,
    pub size: u32,
}

/// One record of the append log, before encoding / after decoding.
///
/// The key carries the unsigned-varint sequence prefix while on disk;
/// in-memory copies held by the index and batch buffers use the bare
/// user key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LogRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub kind: RecordKind,
}

impl LogRecord {
    /// Encodes the record into a contiguous buffer, CRC first.
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&[0u8; CRC_SIZE]);
        buf.push(self.kind.as_byte());
        encode_varint(zigzag_encode(self.key.len() as i64), &mut buf);
        encode_varint(zigzag_encode(self.value.len() as i64), &mut buf);
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);

        let crc = crc32fast::hash(&buf[CRC_SIZE..]);
        buf[..CRC_SIZE].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Exact on-disk size of the encoded record.
    pub(crate) fn encoded_len(&self) -> usize {
        CRC_SIZE
            + 1
            + encoded_len_varint(zigzag_encode(self.key.len() as i64))
            + encoded_len_varint(zigzag_encode(self.value.len() as i64))
            + self.key.len()
            + self.value.len()
    }
}

/// A parsed record header.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RecordHeader {
    pub crc: u32,
    pub kind: RecordKind,
    pub key_len: usize,
    pub value_len: usize,
    /// Encoded length of the header itself.
    pub size: usize,
}

/// Parses a record header from the bytes at a scan position.
///
/// `buf` holds up to [`MAX_HEADER_SIZE`] bytes, truncated at the end of
/// the file. Returns `Ok(None)` for end-of-stream: the buffer is too
/// short to hold a header, or CRC, key size and value size are all zero.
pub(crate) fn decode_header(buf: &[u8]) -> Result<Option<RecordHeader>> {
    // crc(4) + kind(1) + one byte per varint is the smallest header
    if buf.len() < CRC_SIZE + 3 {
        return Ok(None);
    }

    let crc = u32::from_le_bytes(buf[..CRC_SIZE].try_into().expect("slice is 4 bytes"));
    let kind_byte = buf[CRC_SIZE];

    let mut rest: &[u8] = &buf[CRC_SIZE + 1..];
    let avail = rest.len();
    let (key_len, value_len) = match (decode_varint(&mut rest), decode_varint(&mut rest)) {
        (Ok(k), Ok(v)) => (zigzag_decode(k), zigzag_decode(v)),
        _ if buf.len() < MAX_HEADER_SIZE => return Ok(None),
        _ => {
            return Err(Error::CorruptRecord {
                reason: "unparseable size varints in record header".to_string(),
            });
        }
    };

    if crc == 0 && key_len == 0 && value_len == 0 {
        return Ok(None);
    }
    if key_len < 0 || value_len < 0 {
        return Err(Error::CorruptRecord {
            reason: format!("negative record sizes (key {key_len}, value {value_len})"),
        });
    }
    let kind = RecordKind::from_byte(kind_byte).ok_or_else(|| Error::CorruptRecord {
        reason: format!("unknown record kind byte {kind_byte:#04x}"),
    })?;

    Ok(Some(RecordHeader {
        crc,
        kind,
        key_len: key_len as usize,
        value_len: value_len as usize,
        size: CRC_SIZE + 1 + (avail - rest.len()),
    }))
}

/// Encodes a [`Position`] as three zig-zag varints (file id, offset,
/// size), the value payload of a hint record.
pub(crate) fn encode_position(pos: Position) -> Vec<u8> {
    let mut buf = Vec::with_capacity(3 * 10);
    encode_varint(zigzag_encode(i64::from(pos.file_id)), &mut buf);
    encode_varint(zigzag_encode(pos.offset as i64), &mut buf);
    encode_varint(zigzag_encode(i64::from(pos.size)), &mut buf);
    buf
}

/// Decodes a varint-encoded [`Position`].
pub(crate) fn decode_position(buf: &[u8]) -> Result<Position> {
    let mut rest = buf;
    let mut next = || {
        decode_varint(&mut rest)
            .map(zigzag_decode)
            .map_err(|_| Error::CorruptRecord {
                reason: "unparseable position encoding".to_string(),
            })
    };
    let file_id = next()?;
    let offset = next()?;
    let size = next()?;
    Ok(Position {
        file_id: file_id as u32,
        offset: offset as u64,
        size: size as u32,
    })
}

/// Prefixes a user key with an unsigned-varint sequence number.
pub(crate) fn key_with_seq_no(key: &[u8], seq_no: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len_varint(seq_no) + key.len());
    encode_varint(seq_no, &mut out);
    out.extend_from_slice(key);
    out
}

/// Splits a stored key into its sequence number and the real user key.
pub(crate) fn parse_seq_no_key(key: &[u8]) -> Result<(u64, Vec<u8>)> {
    let mut rest = key;
    let seq_no = decode_varint(&mut rest).map_err(|_| Error::CorruptRecord {
        reason: "unparseable sequence prefix in record key".to_string(),
    })?;
    Ok((seq_no, rest.to_vec()))
}

fn zigzag_encode(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

fn zigzag_decode(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn header_of(encoded: &[u8]) -> RecordHeader {
        decode_header(&encoded[..encoded.len().min(MAX_HEADER_SIZE)])
            .unwrap()
            .expect("header present")
    }

    #[test]
    fn encode_layout_and_crc() {
        let record = LogRecord {
            key: b"name".to_vec(),
            value: b"prince hamlet".to_vec(),
            kind: RecordKind::Normal,
        };
        let encoded = record.encode();
        assert_eq!(encoded.len(), record.encoded_len());

        let header = header_of(&encoded);
        assert_eq!(header.kind, RecordKind::Normal);
        assert_eq!(header.key_len, 4);
        assert_eq!(header.value_len, 13);
        assert_eq!(header.size, CRC_SIZE + 1 + 2);

        let stored = u32::from_le_bytes(encoded[..4].try_into().unwrap());
        assert_eq!(header.crc, stored);
        assert_eq!(stored, crc32fast::hash(&encoded[4..]));
    }

    #[test]
    fn encode_tombstone_and_commit_kinds() {
        for kind in [RecordKind::Tombstone, RecordKind::TxnCommit] {
            let record = LogRecord {
                key: b"k".to_vec(),
                value: Vec::new(),
                kind,
            };
            let header = header_of(&record.encode());
            assert_eq!(header.kind, kind);
            assert_eq!(header.value_len, 0);
        }
    }

    #[test]
    fn corrupted_payload_changes_crc() {
        let record = LogRecord {
            key: b"key".to_vec(),
            value: b"value".to_vec(),
            kind: RecordKind::Normal,
        };
        let mut encoded = record.encode();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xff;

        let header = header_of(&encoded);
        assert_ne!(header.crc, crc32fast::hash(&encoded[4..]));
    }

    #[test]
    fn short_buffer_is_end_of_stream() {
        assert!(decode_header(&[]).unwrap().is_none());
        assert!(decode_header(&[1, 2, 3]).unwrap().is_none());
        assert!(decode_header(&[0, 0, 0, 0, 0, 0]).unwrap().is_none());
    }

    #[test]
    fn all_zero_header_is_end_of_stream() {
        assert!(decode_header(&[0u8; MAX_HEADER_SIZE]).unwrap().is_none());
    }

    #[test]
    fn unknown_kind_byte_is_corrupt() {
        let record = LogRecord {
            key: b"key".to_vec(),
            value: b"value".to_vec(),
            kind: RecordKind::Normal,
        };
        let mut encoded = record.encode();
        encoded[4] = 9;
        assert!(matches!(
            decode_header(&encoded[..MAX_HEADER_SIZE.min(encoded.len())]),
            Err(Error::CorruptRecord { .. })
        ));
    }

    #[test]
    fn position_roundtrip() {
        let pos = Position {
            file_id: 7,
            offset: 1 << 40,
            size: 4096,
        };
        let decoded = decode_position(&encode_position(pos)).unwrap();
        assert_eq!(decoded, pos);
    }

    #[test]
    fn position_decode_rejects_garbage() {
        // A lone continuation byte is not a complete varint
        assert!(decode_position(&[0x80]).is_err());
    }

    #[test]
    fn seq_no_key_roundtrip() {
        for seq_no in [0u64, 1, 127, 128, u64::from(u32::MAX), u64::MAX] {
            let wrapped = key_with_seq_no(b"user-key", seq_no);
            let (parsed, real) = parse_seq_no_key(&wrapped).unwrap();
            assert_eq!(parsed, seq_no);
            assert_eq!(real, b"user-key");
        }
    }

    #[test]
    fn non_txn_prefix_is_one_byte() {
        let wrapped = key_with_seq_no(b"k", NON_TXN_SEQ_NO);
        assert_eq!(wrapped.len(), 2);
        assert_eq!(wrapped[0], 0);
    }

    proptest! {
        #[test]
        fn header_parses_back_what_encode_wrote(
            key in proptest::collection::vec(any::<u8>(), 1..256),
            value in proptest::collection::vec(any::<u8>(), 0..1024),
        ) {
            let record = LogRecord { key: key.clone(), value: value.clone(), kind: RecordKind::Normal };
            let encoded = record.encode();
            let header = decode_header(&encoded[..encoded.len().min(MAX_HEADER_SIZE)])
                .unwrap()
                .expect("header present");
            prop_assert_eq!(header.key_len, key.len());
            prop_assert_eq!(header.value_len, value.len());
            prop_assert_eq!(header.size + key.len() + value.len(), encoded.len());
            prop_assert_eq!(header.crc, crc32fast::hash(&encoded[4..]));
        }
    }
}
