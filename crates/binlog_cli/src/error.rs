//! CLI error type.

use binlog_codec::CodecError;
use binlog_core::CoreError;
use binlog_replication::ReplicationError;
use binlog_storage::StorageError;
use thiserror::Error;

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// Plain I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage failure while reading a file.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Malformed record.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Failure from the log manager or a reader.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Failure talking to a dump server.
    #[error(transparent)]
    Replication(#[from] ReplicationError),

    /// JSON output failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Bad arguments or missing files.
    #[error("{0}")]
    Usage(String),

    /// `verify` found problems.
    #[error("verification failed with {0} problem(s)")]
    VerifyFailed(usize),
}

impl CliError {
    /// Creates a usage error.
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }
}
