//! I/O error types.

/// Errors from the block I/O layer.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// Underlying OS I/O error.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Append attempted on a read-only handle.
    #[error("append on read-only memory-mapped handle")]
    ReadOnly,
}
