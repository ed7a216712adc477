//! Error types for replica streaming.

use binlog_codec::CodecError;
use binlog_core::CoreError;
use thiserror::Error;

/// Result type for replication operations.
pub type ReplicationResult<T> = Result<T, ReplicationError>;

/// Errors raised while serving or consuming a dump stream.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// The request cannot be served, e.g. an unknown start file or an
    /// offset past the end of the file.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A record could not be read or re-framed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The log returned an error.
    #[error("log error: {0}")]
    Core(#[from] CoreError),

    /// The peer reported an error and ended the stream.
    #[error("remote error: {0}")]
    Remote(String),

    /// The connection went away while streaming.
    #[error("peer disconnected")]
    Disconnected,

    /// The server is at its connection limit.
    #[error("connection limit of {0} reached")]
    TooManyConnections(usize),

    /// A server task failed.
    #[error("internal error: {0}")]
    Internal(String),

    /// Socket error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReplicationError {
    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Returns true if the stream ended because the peer left, which is a
    /// normal way for a dump session to end.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Disconnected => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnect_classification() {
        assert!(ReplicationError::Disconnected.is_disconnect());
        let reset = std::io::Error::from(std::io::ErrorKind::ConnectionReset);
        assert!(ReplicationError::from(reset).is_disconnect());
        assert!(!ReplicationError::protocol("bad start").is_disconnect());
    }

    #[test]
    fn core_errors_convert() {
        let err: ReplicationError = CoreError::protocol("log file x is not in the index").into();
        assert!(err.to_string().contains("not in the index"));
    }
}
