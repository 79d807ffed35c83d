//! Atomic write batches.
//!
//! A batch buffers mutations in memory, keyed by user key (last write
//! wins within the batch). `commit` allocates one transaction sequence
//! number, appends every buffered record tagged with it, and finishes
//! with a `TxnCommit` marker; only after the marker is appended does the
//! in-memory index change. Recovery applies the same rule, so a reader
//! observes either none or all of a batch.

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::db::Db;
use crate::error::{Error, Result};
use crate::options::{IndexKind, WriteBatchOptions};
use crate::record::{self, LogRecord, RecordKind};

/// Key of the terminal record that commits a batch.
const TXN_FINISHED_KEY: &[u8] = b"txn-finished";

/// A buffered group of mutations committed atomically.
pub struct WriteBatch<'a> {
    db: &'a Db,
    opts: WriteBatchOptions,
    pending: Mutex<HashMap<Vec<u8>, LogRecord>>,
}

impl Db {
    /// Creates an empty write batch.
    ///
    /// With the persistent B+tree index the engine never scans the log,
    /// so the sequence counter is only trustworthy if `seq-no` was
    /// persisted by the previous shutdown; otherwise fresh batches could
    /// reuse sequence numbers and are refused.
    pub fn new_write_batch(&self, opts: WriteBatchOptions) -> Result<WriteBatch<'_>> {
        if self.opts.index_kind == IndexKind::BPlusTree
            && !self.seq_file_exists()
            && !self.is_initial()
        {
            return Err(Error::BatchNotAvailable);
        }
        Ok(WriteBatch {
            db: self,
            opts,
            pending: Mutex::new(HashMap::new()),
        })
    }
}

impl WriteBatch<'_> {
    /// Buffers a put. The key must be non-empty.
    pub fn put(&self, key: Bytes, value: Bytes) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyEmpty);
        }
        self.pending.lock().insert(
            key.to_vec(),
            LogRecord {
                key: key.to_vec(),
                value: value.to_vec(),
                kind: RecordKind::Normal,
            },
        );
        Ok(())
    }

    /// Buffers a delete.
    ///
    /// A key absent from both the index and the buffer is a no-op; a key
    /// present only in the buffer is simply un-buffered.
    pub fn delete(&self, key: Bytes) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyEmpty);
        }
        let mut pending = self.pending.lock();
        if self.db.index.get(&key).is_none() {
            pending.remove(key.as_ref());
            return Ok(());
        }
        pending.insert(
            key.to_vec(),
            LogRecord {
                key: key.to_vec(),
                value: Vec::new(),
                kind: RecordKind::Tombstone,
            },
        );
        Ok(())
    }

    /// Number of buffered mutations.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether the batch holds no mutations.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Appends every buffered mutation under one sequence number,
    /// terminates the group with a commit record, then updates the
    /// index. Clears the buffer on success.
    pub fn commit(&self) -> Result<()> {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return Ok(());
        }
        if pending.len() > self.opts.max_batch_num {
            return Err(Error::BatchTooLarge {
                size: pending.len(),
                max: self.opts.max_batch_num,
            });
        }

        // One engine lock span covers the appends, the commit record,
        // the optional sync, and the index updates.
        let mut state = self.db.state.write();
        let seq_no = self.db.seq_no.fetch_add(1, Ordering::SeqCst) + 1;

        let mut positions: HashMap<Vec<u8>, record::Position> =
            HashMap::with_capacity(pending.len());
        for (key, pending_record) in pending.iter() {
            let tagged = LogRecord {
                key: record::key_with_seq_no(key, seq_no),
                value: pending_record.value.clone(),
                kind: pending_record.kind,
            };
            let pos = self.db.append_record_locked(&mut state, &tagged)?;
            positions.insert(key.clone(), pos);
        }

        let commit_record = LogRecord {
            key: record::key_with_seq_no(TXN_FINISHED_KEY, seq_no),
            value: Vec::new(),
            kind: RecordKind::TxnCommit,
        };
        self.db.append_record_locked(&mut state, &commit_record)?;

        if self.opts.sync_writes {
            state.active.sync()?;
        }

        // Commit record is durable; mutations may become visible
        for (key, pending_record) in pending.iter() {
            let pos = positions[key];
            match pending_record.kind {
                RecordKind::Normal => {
                    if let Some(old) = self.db.index.put(key.clone(), pos) {
                        state.reclaimable += u64::from(old.size);
                    }
                }
                RecordKind::Tombstone => {
                    state.reclaimable += u64::from(pos.size);
                    if let Some(old) = self.db.index.delete(key) {
                        state.reclaimable += u64::from(old.size);
                    }
                }
                RecordKind::TxnCommit => {}
            }
        }

        pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;

    fn open_at(dir: &std::path::Path) -> Db {
        Db::open(Options::new(dir)).unwrap()
    }

    #[test]
    fn mutations_invisible_until_commit_then_visible() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_at(dir.path());
        db.put("b".into(), "old".into()).unwrap();

        let batch = db.new_write_batch(WriteBatchOptions::default()).unwrap();
        batch.put("a".into(), "1".into()).unwrap();
        batch.delete("b".into()).unwrap();

        assert!(matches!(db.get("a".into()), Err(Error::KeyNotFound)));
        assert_eq!(db.get("b".into()).unwrap(), Bytes::from("old"));

        batch.commit().unwrap();
        assert_eq!(db.get("a".into()).unwrap(), Bytes::from("1"));
        assert!(matches!(db.get("b".into()), Err(Error::KeyNotFound)));
    }

    #[test]
    fn committed_batch_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = open_at(dir.path());
            db.put("b".into(), "old".into()).unwrap();
            let batch = db.new_write_batch(WriteBatchOptions::default()).unwrap();
            batch.put("a".into(), "1".into()).unwrap();
            batch.delete("b".into()).unwrap();
            batch.commit().unwrap();
            db.close().unwrap();
        }
        let db = open_at(dir.path());
        assert_eq!(db.get("a".into()).unwrap(), Bytes::from("1"));
        assert!(matches!(db.get("b".into()), Err(Error::KeyNotFound)));
    }

    #[test]
    fn uncommitted_records_are_discarded_on_recovery() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = open_at(dir.path());
            // A batch whose commit record never made it to the log
            let torn = LogRecord {
                key: record::key_with_seq_no(b"ghost", 42),
                value: b"partial".to_vec(),
                kind: RecordKind::Normal,
            };
            db.append_record(&torn).unwrap();
            db.sync().unwrap();
            db.close().unwrap();
        }
        let db = open_at(dir.path());
        assert!(matches!(db.get("ghost".into()), Err(Error::KeyNotFound)));
        assert_eq!(db.stat().unwrap().key_count, 0);
    }

    #[test]
    fn empty_commit_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_at(dir.path());
        let batch = db.new_write_batch(WriteBatchOptions::default()).unwrap();
        batch.commit().unwrap();
        assert_eq!(db.stat().unwrap().key_count, 0);
    }

    #[test]
    fn oversized_batch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_at(dir.path());
        let batch = db
            .new_write_batch(WriteBatchOptions {
                max_batch_num: 2,
                sync_writes: false,
            })
            .unwrap();
        for i in 0..3 {
            batch.put(format!("k{i}").into(), "v".into()).unwrap();
        }
        assert!(matches!(
            batch.commit(),
            Err(Error::BatchTooLarge { size: 3, max: 2 })
        ));
    }

    #[test]
    fn empty_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_at(dir.path());
        let batch = db.new_write_batch(WriteBatchOptions::default()).unwrap();
        assert!(matches!(batch.put("".into(), "x".into()), Err(Error::KeyEmpty)));
        assert!(matches!(batch.delete("".into()), Err(Error::KeyEmpty)));
    }

    #[test]
    fn last_write_wins_within_a_batch() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_at(dir.path());
        let batch = db.new_write_batch(WriteBatchOptions::default()).unwrap();
        batch.put("k".into(), "first".into()).unwrap();
        batch.put("k".into(), "second".into()).unwrap();
        assert_eq!(batch.len(), 1);
        batch.commit().unwrap();
        assert_eq!(db.get("k".into()).unwrap(), Bytes::from("second"));
    }

    #[test]
    fn delete_of_buffered_key_unbuffers_it() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_at(dir.path());
        let batch = db.new_write_batch(WriteBatchOptions::default()).unwrap();
        batch.put("k".into(), "v".into()).unwrap();
        batch.delete("k".into()).unwrap();
        assert!(batch.is_empty());
        batch.commit().unwrap();
        assert!(matches!(db.get("k".into()), Err(Error::KeyNotFound)));
    }

    #[test]
    fn batch_reuse_after_commit() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_at(dir.path());
        let batch = db.new_write_batch(WriteBatchOptions::default()).unwrap();
        batch.put("one".into(), "1".into()).unwrap();
        batch.commit().unwrap();
        batch.put("two".into(), "2".into()).unwrap();
        batch.commit().unwrap();
        assert_eq!(db.get("one".into()).unwrap(), Bytes::from("1"));
        assert_eq!(db.get("two".into()).unwrap(), Bytes::from("2"));
    }

    #[test]
    fn bptree_without_persisted_seq_no_refuses_batches() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = Options::new(dir.path());
        opts.index_kind = IndexKind::BPlusTree;

        {
            let db = Db::open(opts.clone()).unwrap();
            // Fresh store: batches are fine
            let batch = db.new_write_batch(WriteBatchOptions::default()).unwrap();
            batch.put("k".into(), "v".into()).unwrap();
            batch.commit().unwrap();
            db.close().unwrap();
        }

        // Simulate an unclean shutdown by removing the persisted counter
        std::fs::remove_file(dir.path().join("seq-no")).unwrap();

        let db = Db::open(opts).unwrap();
        assert!(matches!(
            db.new_write_batch(WriteBatchOptions::default()),
            Err(Error::BatchNotAvailable)
        ));
    }

    #[test]
    fn sequence_numbers_increase_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = open_at(dir.path());
            let batch = db.new_write_batch(WriteBatchOptions::default()).unwrap();
            batch.put("a".into(), "1".into()).unwrap();
            batch.commit().unwrap();
            assert_eq!(db.seq_no.load(Ordering::SeqCst), 1);
            db.close().unwrap();
        }
        let db = open_at(dir.path());
        // Recovery re-derives the counter from the scanned log
        assert_eq!(db.seq_no.load(Ordering::SeqCst), 1);
        let batch = db.new_write_batch(WriteBatchOptions::default()).unwrap();
        batch.put("b".into(), "2".into()).unwrap();
        batch.commit().unwrap();
        assert_eq!(db.seq_no.load(Ordering::SeqCst), 2);
    }
}
