//! Engine-level iteration over live keys.
//!
//! [`DbIterator`] wraps an index snapshot taken at creation; mutations
//! after that point are not observed. Values are read on demand through
//! the engine's read lock. With a prefix configured, every navigation
//! step fast-forwards past keys that do not match.

use bytes::Bytes;

use crate::db::Db;
use crate::error::Result;
use crate::index::IndexIterator;
use crate::options::IteratorOptions;

/// Snapshot iterator over the store's live keys.
pub struct DbIterator<'a> {
    db: &'a Db,
    inner: Box<dyn IndexIterator>,
    opts: IteratorOptions,
}

impl Db {
    /// Creates an iterator positioned at the first matching key.
    pub fn iterator(&self, opts: IteratorOptions) -> DbIterator<'_> {
        let mut iter = DbIterator {
            inner: self.index.iter(opts.reverse),
            db: self,
            opts,
        };
        iter.skip_to_next();
        iter
    }

    /// All live keys in ascending order.
    pub fn list_keys(&self) -> Vec<Bytes> {
        let mut it = self.index.iter(false);
        let mut keys = Vec::with_capacity(self.index.len());
        while it.valid() {
            keys.push(Bytes::copy_from_slice(it.key()));
            it.next();
        }
        keys
    }

    /// Visits every live key/value pair in ascending key order until
    /// `visit` returns false.
    pub fn fold<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(Bytes, Bytes) -> bool,
    {
        let mut it = self.index.iter(false);
        while it.valid() {
            let key = Bytes::copy_from_slice(it.key());
            let value = {
                let state = self.state.read();
                self.read_value_at(&state, it.value())?
            };
            if !visit(key, value) {
                break;
            }
            it.next();
        }
        Ok(())
    }
}

impl DbIterator<'_> {
    /// Back to the first matching key in the iteration direction.
    pub fn rewind(&mut self) {
        self.inner.rewind();
        self.skip_to_next();
    }

    /// Positions at the first matching key `>=` (forward) or `<=`
    /// (reverse) the given key.
    pub fn seek(&mut self, key: &[u8]) {
        self.inner.seek(key);
        self.skip_to_next();
    }

    /// Advances to the next matching key.
    pub fn next(&mut self) {
        self.inner.next();
        self.skip_to_next();
    }

    /// Whether the iterator points at a key.
    pub fn valid(&self) -> bool {
        self.inner.valid()
    }

    /// The current key. Only meaningful while [`Self::valid`] is true.
    pub fn key(&self) -> Bytes {
        Bytes::copy_from_slice(self.inner.key())
    }

    /// Reads the current key's value from disk.
    pub fn value(&self) -> Result<Bytes> {
        let pos = self.inner.value();
        let state = self.db.state.read();
        self.db.read_value_at(&state, pos)
    }

    fn skip_to_next(&mut self) {
        let prefix = &self.opts.prefix;
        if prefix.is_empty() {
            return;
        }
        while self.inner.valid() {
            let key = self.inner.key();
            if key.len() >= prefix.len() && key[..prefix.len()] == prefix[..] {
                break;
            }
            self.inner.next();
        }
    }
}
