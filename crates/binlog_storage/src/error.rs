//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of storage.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// An in-place write would extend past the end of storage.
    #[error("in-place write beyond end of storage: offset {offset}, len {len}, size {size}")]
    WritePastEnd {
        /// The requested write offset.
        offset: u64,
        /// The requested write length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// Truncation target lies beyond the current size.
    #[error("cannot truncate to {requested}: storage is only {size} bytes")]
    TruncatePastEnd {
        /// Requested new size.
        requested: u64,
        /// Current size.
        size: u64,
    },

    /// The backend was opened read-only.
    #[error("storage opened read-only")]
    ReadOnly,

    /// A file that must be new already exists.
    #[error("file already exists: {}", .0.display())]
    AlreadyExists(PathBuf),
}

impl StorageError {
    /// Returns true if the error means "not enough bytes yet".
    ///
    /// Readers tailing an active log treat this as end-of-data rather
    /// than corruption.
    #[must_use]
    pub fn is_short_read(&self) -> bool {
        matches!(self, Self::ReadPastEnd { .. })
    }
}
