//! Error types for record encoding and decoding.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while framing or parsing log records.
///
/// Every malformed input maps to one of these; decoding never panics on
/// hostile bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The file does not start with the binary log magic.
    #[error("bad magic: expected fe62696e, found {found:02x?}")]
    BadMagic {
        /// The bytes found where the magic should be.
        found: Vec<u8>,
    },

    /// Fewer bytes are available than the structure needs.
    #[error("truncated record: needed {needed} bytes, {available} available")]
    Truncated {
        /// Bytes required.
        needed: usize,
        /// Bytes present.
        available: usize,
    },

    /// The stored checksum does not match the computed one.
    #[error("checksum mismatch: stored {stored:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// Checksum stored in the record footer.
        stored: u32,
        /// Checksum computed over the record bytes.
        computed: u32,
    },

    /// The type tag is not a known record kind.
    #[error("unknown record type {0:#04x}")]
    UnknownType(u8),

    /// The record is larger than any record this log accepts.
    #[error("record of {len} bytes exceeds the {max} byte limit")]
    OversizeRecord {
        /// Length of the record.
        len: u64,
        /// Maximum accepted length.
        max: u64,
    },

    /// The record body is internally inconsistent.
    #[error("malformed record: {0}")]
    Malformed(String),
}

impl CodecError {
    /// Creates a malformed-record error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    /// Creates a truncation error.
    #[must_use]
    pub fn truncated(needed: usize, available: usize) -> Self {
        Self::Truncated { needed, available }
    }
}
