//! Error taxonomy for the storage engine.

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the storage engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The key of a Put/Get/Delete was empty.
    #[error("key is empty")]
    KeyEmpty,

    /// No live record exists for the key.
    #[error("key not found")]
    KeyNotFound,

    /// The index referenced a data file that is not open.
    #[error("data file {file_id:09} not found")]
    DataFileNotFound { file_id: u32 },

    /// A record failed its CRC check or is otherwise unreadable.
    #[error("corrupt record: {reason}")]
    CorruptRecord { reason: String },

    /// An index removal found nothing where an entry was expected.
    #[error("failed to update index")]
    IndexUpdateFailed,

    /// Another process holds the directory lock.
    #[error("database directory is in use by another process")]
    DirInUse,

    /// The directory contains files the engine cannot interpret.
    #[error("database directory corrupted: {reason}")]
    DirCorrupted { reason: String },

    /// A batch holds more pending writes than its configured maximum.
    #[error("write batch holds {size} pending writes, exceeding the limit of {max}")]
    BatchTooLarge { size: usize, max: usize },

    /// The sequence counter was not persisted on the last shutdown, so
    /// fresh batch sequence numbers cannot be allocated safely.
    #[error("write batches unavailable: sequence counter was not persisted on last shutdown")]
    BatchNotAvailable,

    /// A merge is already running.
    #[error("merge is already in progress")]
    MergeInProgress,

    /// The reclaimable fraction of the directory is below the threshold.
    #[error("reclaimable ratio {ratio:.2} does not reach the merge threshold {threshold:.2}")]
    MergeRatioUnreached { ratio: f32, threshold: f32 },

    /// The filesystem lacks room for the rewritten data set.
    #[error("not enough disk space for merge: {required} bytes required, {available} available")]
    MergeNoSpace { required: u64, available: u64 },

    /// Rejected configuration.
    #[error("invalid configuration: {reason}")]
    Config { reason: &'static str },

    /// Index back-end failure (persistent B+tree).
    #[error("index backend error: {reason}")]
    IndexBackend { reason: String },

    /// Passthrough OS I/O error.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Passthrough block I/O error.
    #[error("block I/O error: {source}")]
    BlockIo {
        #[from]
        source: basalt_io::IoError,
    },
}

impl From<jammdb::Error> for Error {
    fn from(err: jammdb::Error) -> Self {
        Error::IndexBackend {
            reason: err.to_string(),
        }
    }
}
