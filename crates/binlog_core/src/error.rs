//! Error types for the binary log core.

use binlog_codec::CodecError;
use binlog_storage::StorageError;
use std::fmt;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// The I/O step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    /// Opening or creating a file.
    Open,
    /// Reading from a file.
    Read,
    /// Appending or overwriting.
    Write,
    /// Flushing to durable storage.
    Sync,
}

impl fmt::Display for IoOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Open => "open",
            Self::Read => "read",
            Self::Write => "write",
            Self::Sync => "sync",
        })
    }
}

/// Which of a session's two caches an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheScope {
    /// Changes to non-transactional objects, flushed at statement end.
    Statement,
    /// Changes flushed at transaction commit.
    Transaction,
}

impl fmt::Display for CacheScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Statement => "statement",
            Self::Transaction => "transaction",
        })
    }
}

/// Errors raised by the log manager, caches and readers.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A storage operation failed.
    #[error("I/O error during {op}: {source}")]
    Io {
        /// The failing step.
        op: IoOp,
        /// Underlying error.
        #[source]
        source: StorageError,
    },

    /// A record could not be decoded or encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A session cache grew past its configured limit.
    #[error("{scope} cache exceeded its limit of {limit} bytes")]
    CapacityExceeded {
        /// Which cache overflowed.
        scope: CacheScope,
        /// Configured limit.
        limit: u64,
    },

    /// The index and the files on disk disagree.
    #[error("inconsistent log: {message}")]
    Inconsistent {
        /// Description of the inconsistency.
        message: String,
    },

    /// A reader asked for a position that does not exist.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the bad request.
        message: String,
    },

    /// Logging is disabled after an irrecoverable failure.
    #[error("binary logging disabled: {message}")]
    Fatal {
        /// The failure that disabled logging.
        message: String,
    },

    /// A flush observer vetoed the flush.
    #[error("flush aborted by observer: {message}")]
    HookAborted {
        /// Reason given by the observer.
        message: String,
    },

    /// Another manager holds the log directory.
    #[error("log directory locked: another process is writing this log")]
    Locked,

    /// The log has been closed.
    #[error("binary log is closed")]
    Closed,

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Wraps a storage error with the step that produced it.
    pub fn io(op: IoOp, source: impl Into<StorageError>) -> Self {
        Self::Io {
            op,
            source: source.into(),
        }
    }

    /// Returns a closure that wraps a storage error; for `map_err`.
    pub fn io_at<E: Into<StorageError>>(op: IoOp) -> impl FnOnce(E) -> Self {
        move |e| Self::io(op, e)
    }

    /// Creates an inconsistency error.
    pub fn inconsistent(message: impl Into<String>) -> Self {
        Self::Inconsistent {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a fatal error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if this error disabled logging.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }
}
