//! # basalt: a Bitcask-model embedded key/value store
//!
//! Basalt keeps every write in an append-only log on disk and every live
//! key in an ordered in-memory index that maps the key to the byte
//! location of its latest record. Reads are one index lookup plus one
//! positioned disk read; writes are an append plus an index update.
//! Multi-key batches commit atomically through a transaction-sequence
//! tag, and an offline merge pass rewrites live data into a fresh set of
//! files plus a hint file that accelerates the next index rebuild.
//!
//! # File Layout
//!
//! ```text
//! {dir}/
//! ├── 000000000.data   <- sealed data file (immutable)
//! ├── 000000001.data   <- active data file (receives appends)
//! ├── hint-index       <- optional, written by merge
//! ├── merge-finished   <- optional, marks the last completed merge
//! ├── seq-no           <- optional, persisted txn counter (B+tree index)
//! └── flock            <- advisory directory lock
//! {dir}-merge/         <- transient sibling, only during/after a merge
//! ```
//!
//! # Example
//!
//! ```no_run
//! use basalt::{Db, Options};
//!
//! let db = Db::open(Options::new("/tmp/basalt-demo"))?;
//! db.put("hello".into(), "world".into())?;
//! assert_eq!(&db.get("hello".into())?[..], b"world");
//! db.delete("hello".into())?;
//! # Ok::<(), basalt::Error>(())
//! ```

mod batch;
mod data_file;
mod db;
mod error;
mod index;
mod iterator;
mod merge;
mod options;
mod record;
mod util;

pub use batch::WriteBatch;
pub use db::{Db, Stat};
pub use error::{Error, Result};
pub use iterator::DbIterator;
pub use options::{IndexKind, IteratorOptions, Options, WriteBatchOptions};
