//! Lock-free skip-list index backend.
//!
//! Trades the balanced tree's single lock for a concurrent ordered map;
//! point reads never block behind writers. The replace-and-return-old
//! contract is composed from a read followed by an insert, which is safe
//! because the engine serializes all index writes behind its own write
//! lock.

use crossbeam_skiplist::SkipMap;

use crate::record::Position;

use super::{IndexIterator, Indexer, SnapshotIter};

pub(crate) struct SkipListIndex {
    map: SkipMap<Vec<u8>, Position>,
}

impl SkipListIndex {
    pub(crate) fn new() -> Self {
        Self {
            map: SkipMap::new(),
        }
    }
}

impl Indexer for SkipListIndex {
    fn get(&self, key: &[u8]) -> Option<Position> {
        self.map.get(key).map(|entry| *entry.value())
    }

    fn put(&self, key: Vec<u8>, pos: Position) -> Option<Position> {
        let prev = self.map.get(key.as_slice()).map(|entry| *entry.value());
        self.map.insert(key, pos);
        prev
    }

    fn delete(&self, key: &[u8]) -> Option<Position> {
        self.map.remove(key).map(|entry| *entry.value())
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn iter(&self, reverse: bool) -> Box<dyn IndexIterator> {
        let entries = self
            .map
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        Box::new(SnapshotIter::new(entries, reverse))
    }
}
