//! In-memory key→position index.
//!
//! An ordered map from raw key bytes (lexicographic) to the on-disk
//! [`Position`] of the key's latest record. Three backends implement the
//! same capability set behind [`Indexer`]; iteration always goes through
//! a materialized snapshot ([`SnapshotIter`]), so concurrent mutations
//! after iterator creation are never observed.

mod bptree;
mod btree;
mod skiplist;

use std::path::Path;

pub(crate) use bptree::BPTREE_INDEX_FILE_NAME;

use crate::error::Result;
use crate::options::IndexKind;
use crate::record::Position;

/// Capability set shared by all index backends.
///
/// Mutating operations are guarded by the backend's own exclusion; the
/// engine adds its coarser write lock on top for write/batch atomicity.
pub(crate) trait Indexer: Send + Sync {
    /// Current position for `key`, if live.
    fn get(&self, key: &[u8]) -> Option<Position>;

    /// Inserts or replaces; returns the superseded position if any.
    fn put(&self, key: Vec<u8>, pos: Position) -> Option<Position>;

    /// Removes; returns the removed position if a removal happened.
    fn delete(&self, key: &[u8]) -> Option<Position>;

    /// Number of live keys.
    fn len(&self) -> usize;

    /// Snapshot iterator over the current key set.
    fn iter(&self, reverse: bool) -> Box<dyn IndexIterator>;

    /// Releases backend resources.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Navigation over one index snapshot.
///
/// `key`/`value` may only be called while [`IndexIterator::valid`]
/// returns true.
pub(crate) trait IndexIterator: Send {
    /// Back to the first element in the iteration direction.
    fn rewind(&mut self);

    /// Positions at the first key `>= key` (forward) or `<= key`
    /// (reverse).
    fn seek(&mut self, key: &[u8]);

    /// Advances one element.
    fn next(&mut self);

    /// Whether the cursor points at an element.
    fn valid(&self) -> bool;

    fn key(&self) -> &[u8];

    fn value(&self) -> Position;
}

/// Constructs the configured index backend.
pub(crate) fn new_indexer(kind: IndexKind, dir: &Path) -> Result<Box<dyn Indexer>> {
    match kind {
        IndexKind::BTree => Ok(Box::new(btree::BTreeIndex::new())),
        IndexKind::SkipList => Ok(Box::new(skiplist::SkipListIndex::new())),
        IndexKind::BPlusTree => Ok(Box::new(bptree::BPlusTreeIndex::open(dir)?)),
    }
}

/// Snapshot-backed iterator shared by every backend.
///
/// Holds the ordered key/position list materialized at creation; the
/// reverse direction is the same list traversed from the end. Seeks are
/// binary searches on the snapshot.
pub(crate) struct SnapshotIter {
    /// Ascending by key.
    entries: Vec<(Vec<u8>, Position)>,
    reverse: bool,
    /// Logical cursor in iteration direction.
    cursor: usize,
}

impl SnapshotIter {
    pub(crate) fn new(entries: Vec<(Vec<u8>, Position)>, reverse: bool) -> Self {
        debug_assert!(
            entries.windows(2).all(|w| w[0].0 < w[1].0),
            "index snapshot must be strictly ascending"
        );
        Self {
            entries,
            reverse,
            cursor: 0,
        }
    }

    fn physical(&self, logical: usize) -> usize {
        if self.reverse {
            self.entries.len() - 1 - logical
        } else {
            logical
        }
    }
}

impl IndexIterator for SnapshotIter {
    fn rewind(&mut self) {
        self.cursor = 0;
    }

    fn seek(&mut self, key: &[u8]) {
        if self.reverse {
            // First descending element with key <= target
            let le = self.entries.partition_point(|(k, _)| k.as_slice() <= key);
            self.cursor = self.entries.len() - le;
        } else {
            // First ascending element with key >= target
            self.cursor = self.entries.partition_point(|(k, _)| k.as_slice() < key);
        }
    }

    fn next(&mut self) {
        self.cursor = self.cursor.saturating_add(1);
    }

    fn valid(&self) -> bool {
        self.cursor < self.entries.len()
    }

    fn key(&self) -> &[u8] {
        &self.entries[self.physical(self.cursor)].0
    }

    fn value(&self) -> Position {
        self.entries[self.physical(self.cursor)].1
    }
}
