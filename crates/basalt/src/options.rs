//! Engine, iterator, and write-batch configuration.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Default maximum data file size before rollover (256 MiB).
const DEFAULT_DATA_FILE_SIZE: u64 = 256 * 1024 * 1024;

/// Default reclaimable-bytes ratio that gates a merge.
const DEFAULT_MERGE_RATIO: f32 = 0.5;

/// Default cap on pending writes in one batch.
const DEFAULT_MAX_BATCH_NUM: usize = 10_000;

/// Which in-memory (or on-disk) index backs the key→position mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexKind {
    /// Balanced ordered tree (`std::collections::BTreeMap`). The default.
    #[default]
    BTree,
    /// Lock-free ordered skip list (`crossbeam-skiplist`).
    SkipList,
    /// Persistent on-disk B+tree (`jammdb`). With this variant the engine
    /// skips the log scan at startup and persists the transaction
    /// counter in the `seq-no` file on close.
    BPlusTree,
}

/// Engine configuration, passed to [`crate::Db::open`].
#[derive(Debug, Clone)]
pub struct Options {
    /// Directory holding the data files. Required.
    pub dir_path: PathBuf,
    /// Maximum size of one data file in bytes; the active file rolls
    /// over once an append would exceed it. Must be greater than zero.
    pub data_file_size: u64,
    /// Index backend variant.
    pub index_kind: IndexKind,
    /// Fsync the active file after every write.
    pub sync_writes: bool,
    /// Fsync once this many bytes have been written since the last sync.
    /// Zero disables threshold-based syncing.
    pub bytes_per_sync: u32,
    /// Open data files through read-only memory maps while rebuilding
    /// the index at startup.
    pub mmap_at_startup: bool,
    /// Fraction of the directory that must be reclaimable before
    /// [`crate::Db::merge`] will run, in `[0, 1]`.
    pub data_file_merge_ratio: f32,
}

impl Options {
    /// Options with defaults for everything except the directory.
    pub fn new(dir_path: impl Into<PathBuf>) -> Self {
        Self {
            dir_path: dir_path.into(),
            ..Self::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.dir_path.as_os_str().is_empty() {
            return Err(Error::Config {
                reason: "directory path is empty",
            });
        }
        if self.data_file_size == 0 {
            return Err(Error::Config {
                reason: "data file size must be greater than zero",
            });
        }
        if !(0.0..=1.0).contains(&self.data_file_merge_ratio) {
            return Err(Error::Config {
                reason: "data file merge ratio must be between 0 and 1",
            });
        }
        Ok(())
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dir_path: std::env::temp_dir().join("basalt"),
            data_file_size: DEFAULT_DATA_FILE_SIZE,
            index_kind: IndexKind::default(),
            sync_writes: false,
            bytes_per_sync: 0,
            mmap_at_startup: false,
            data_file_merge_ratio: DEFAULT_MERGE_RATIO,
        }
    }
}

/// Configuration for [`crate::Db::iterator`].
#[derive(Debug, Clone, Default)]
pub struct IteratorOptions {
    /// Only yield keys starting with this prefix. Empty matches all.
    pub prefix: Vec<u8>,
    /// Traverse in descending key order.
    pub reverse: bool,
}

impl IteratorOptions {
    /// Forward iteration over keys starting with `prefix`.
    pub fn prefixed(prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            prefix: prefix.into(),
            reverse: false,
        }
    }
}

/// Configuration for [`crate::Db::new_write_batch`].
#[derive(Debug, Clone)]
pub struct WriteBatchOptions {
    /// Maximum number of pending writes one batch may hold.
    pub max_batch_num: usize,
    /// Fsync the active file when the batch commits.
    pub sync_writes: bool,
}

impl Default for WriteBatchOptions {
    fn default() -> Self {
        Self {
            max_batch_num: DEFAULT_MAX_BATCH_NUM,
            sync_writes: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = Options::default();
        assert_eq!(opts.data_file_size, 256 * 1024 * 1024);
        assert_eq!(opts.index_kind, IndexKind::BTree);
        assert!(!opts.sync_writes);
        assert_eq!(opts.bytes_per_sync, 0);
        assert!((opts.data_file_merge_ratio - 0.5).abs() < f32::EPSILON);

        let batch = WriteBatchOptions::default();
        assert_eq!(batch.max_batch_num, 10_000);
        assert!(batch.sync_writes);
    }

    #[test]
    fn rejects_empty_dir_path() {
        let opts = Options::new("");
        assert!(matches!(opts.validate(), Err(Error::Config { .. })));
    }

    #[test]
    fn rejects_zero_file_size() {
        let mut opts = Options::new("/tmp/basalt-opts");
        opts.data_file_size = 0;
        assert!(matches!(opts.validate(), Err(Error::Config { .. })));
    }

    #[test]
    fn rejects_out_of_range_merge_ratio() {
        let mut opts = Options::new("/tmp/basalt-opts");
        opts.data_file_merge_ratio = 1.5;
        assert!(matches!(opts.validate(), Err(Error::Config { .. })));
    }
}
