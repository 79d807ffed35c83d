//! Persistent on-disk B+tree index backend.
//!
//! Entries survive restarts in a `jammdb` single-file B+tree, so the
//! engine skips the log scan at startup when this variant is selected.
//! Back-end failures here mean the index file itself is broken or the
//! filesystem is failing underneath an already-open database; they abort
//! the process rather than masquerade as per-key errors.

use std::path::Path;

use jammdb::{DB, Data};

use crate::error::Result;
use crate::record::{Position, decode_position, encode_position};

use super::{IndexIterator, Indexer, SnapshotIter};

/// Name of the B+tree file inside the database directory.
pub(crate) const BPTREE_INDEX_FILE_NAME: &str = "bptree-index";

const INDEX_BUCKET: &str = "basalt-index";

pub(crate) struct BPlusTreeIndex {
    db: DB,
}

impl BPlusTreeIndex {
    /// Opens (or creates) the index file inside `dir`.
    pub(crate) fn open(dir: &Path) -> Result<Self> {
        let db = DB::open(dir.join(BPTREE_INDEX_FILE_NAME))?;
        let tx = db.tx(true)?;
        tx.get_or_create_bucket(INDEX_BUCKET)?;
        tx.commit()?;
        Ok(Self { db })
    }
}

impl Indexer for BPlusTreeIndex {
    fn get(&self, key: &[u8]) -> Option<Position> {
        let tx = self.db.tx(false).expect("open read transaction on index file");
        let bucket = tx.get_bucket(INDEX_BUCKET).expect("index bucket exists");
        bucket
            .get_kv(key)
            .map(|kv| decode_position(kv.value()).expect("valid position in index file"))
    }

    fn put(&self, key: Vec<u8>, pos: Position) -> Option<Position> {
        let tx = self.db.tx(true).expect("open write transaction on index file");
        let bucket = tx.get_bucket(INDEX_BUCKET).expect("index bucket exists");
        let prev = bucket
            .get_kv(key.as_slice())
            .map(|kv| decode_position(kv.value()).expect("valid position in index file"));
        bucket
            .put(key, encode_position(pos))
            .expect("write index entry");
        tx.commit().expect("commit index write");
        prev
    }

    fn delete(&self, key: &[u8]) -> Option<Position> {
        let tx = self.db.tx(true).expect("open write transaction on index file");
        let bucket = tx.get_bucket(INDEX_BUCKET).expect("index bucket exists");
        let prev = bucket
            .get_kv(key)
            .map(|kv| decode_position(kv.value()).expect("valid position in index file"));
        if prev.is_none() {
            return None;
        }
        bucket.delete(key).expect("delete index entry");
        tx.commit().expect("commit index delete");
        prev
    }

    fn len(&self) -> usize {
        let tx = self.db.tx(false).expect("open read transaction on index file");
        let bucket = tx.get_bucket(INDEX_BUCKET).expect("index bucket exists");
        bucket
            .cursor()
            .filter(|data| matches!(data, Data::KeyValue(_)))
            .count()
    }

    fn iter(&self, reverse: bool) -> Box<dyn IndexIterator> {
        let tx = self.db.tx(false).expect("open read transaction on index file");
        let bucket = tx.get_bucket(INDEX_BUCKET).expect("index bucket exists");
        let mut entries = Vec::new();
        for data in bucket.cursor() {
            if let Data::KeyValue(kv) = data {
                entries.push((
                    kv.key().to_vec(),
                    decode_position(kv.value()).expect("valid position in index file"),
                ));
            }
        }
        Box::new(SnapshotIter::new(entries, reverse))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let pos = Position {
            file_id: 1,
            offset: 42,
            size: 9,
        };

        {
            let index = BPlusTreeIndex::open(dir.path()).unwrap();
            index.put(b"durable".to_vec(), pos);
        }

        let index = BPlusTreeIndex::open(dir.path()).unwrap();
        assert_eq!(index.get(b"durable"), Some(pos));
        assert_eq!(index.len(), 1);
    }
}
