//! Balanced-tree index backend, the default.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::record::Position;

use super::{IndexIterator, Indexer, SnapshotIter};

/// Ordered map over `std::collections::BTreeMap` behind a read/write
/// lock.
pub(crate) struct BTreeIndex {
    tree: RwLock<BTreeMap<Vec<u8>, Position>>,
}

impl BTreeIndex {
    pub(crate) fn new() -> Self {
        Self {
            tree: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Indexer for BTreeIndex {
    fn get(&self, key: &[u8]) -> Option<Position> {
        self.tree.read().get(key).copied()
    }

    fn put(&self, key: Vec<u8>, pos: Position) -> Option<Position> {
        self.tree.write().insert(key, pos)
    }

    fn delete(&self, key: &[u8]) -> Option<Position> {
        self.tree.write().remove(key)
    }

    fn len(&self) -> usize {
        self.tree.read().len()
    }

    fn iter(&self, reverse: bool) -> Box<dyn IndexIterator> {
        let entries = self
            .tree
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        Box::new(SnapshotIter::new(entries, reverse))
    }
}
