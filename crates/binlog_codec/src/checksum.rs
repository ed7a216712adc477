//! Record checksums.
//!
//! The checksum is CRC-32 (IEEE) over every byte of the record except the
//! 4-byte footer that holds it. The algorithm is chosen once per file and
//! stamped into the file's format description record, which always carries
//! a footer so it can be validated before the algorithm is known.
//!
//! The in-use bit of a format description record is masked to zero while
//! computing its checksum. Clearing the bit on clean close therefore does
//! not invalidate the record.

use crate::error::{CodecError, CodecResult};
use crate::event_type::EventType;
use crate::header::{EventFlags, FLAGS_OFFSET, HEADER_LEN};

/// Length of the checksum footer.
pub const CHECKSUM_LEN: usize = 4;

/// Checksum algorithm negotiated per file or per replica session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ChecksumAlg {
    /// No checksum footer.
    Off = 0,
    /// CRC-32 footer.
    #[default]
    Crc32 = 1,
}

impl ChecksumAlg {
    /// Converts the stored byte to an algorithm.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Malformed`] for unknown algorithm ids.
    pub fn from_byte(b: u8) -> CodecResult<Self> {
        match b {
            0 => Ok(Self::Off),
            1 => Ok(Self::Crc32),
            other => Err(CodecError::malformed(format!(
                "unknown checksum algorithm {other}"
            ))),
        }
    }

    /// Returns the stored byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Length of the footer this algorithm appends to a non-FDE record.
    #[must_use]
    pub const fn footer_len(self) -> usize {
        match self {
            Self::Off => 0,
            Self::Crc32 => CHECKSUM_LEN,
        }
    }
}

impl std::str::FromStr for ChecksumAlg {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" | "OFF" => Ok(Self::Off),
            "CRC32" => Ok(Self::Crc32),
            other => Err(CodecError::malformed(format!(
                "unknown checksum algorithm name {other}"
            ))),
        }
    }
}

/// Computes the checksum over `covered` (a record without its footer).
///
/// `covered` must start with a complete header.
#[must_use]
pub fn compute_checksum(covered: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    if covered.len() >= HEADER_LEN && covered[4] == EventType::FormatDescription.as_byte() {
        let flags = u16::from_le_bytes([covered[FLAGS_OFFSET], covered[FLAGS_OFFSET + 1]]);
        let masked = EventFlags::from_bits(flags).without(EventFlags::BINLOG_IN_USE);
        hasher.update(&covered[..FLAGS_OFFSET]);
        hasher.update(&masked.bits().to_le_bytes());
        hasher.update(&covered[FLAGS_OFFSET + 2..]);
    } else {
        hasher.update(covered);
    }
    hasher.finalize()
}

/// Writes the checksum of `record` into its last four bytes.
///
/// # Errors
///
/// Returns [`CodecError::Truncated`] if the record cannot hold a header and a
/// footer.
pub fn stamp_checksum(record: &mut [u8]) -> CodecResult<()> {
    if record.len() < HEADER_LEN + CHECKSUM_LEN {
        return Err(CodecError::truncated(HEADER_LEN + CHECKSUM_LEN, record.len()));
    }
    let split = record.len() - CHECKSUM_LEN;
    let crc = compute_checksum(&record[..split]);
    record[split..].copy_from_slice(&crc.to_le_bytes());
    Ok(())
}

/// Verifies the footer of a record that carries one.
///
/// # Errors
///
/// Returns [`CodecError::ChecksumMismatch`] if the stored value differs.
pub fn verify_checksum(record: &[u8]) -> CodecResult<()> {
    if record.len() < HEADER_LEN + CHECKSUM_LEN {
        return Err(CodecError::truncated(HEADER_LEN + CHECKSUM_LEN, record.len()));
    }
    let split = record.len() - CHECKSUM_LEN;
    let stored = u32::from_le_bytes([
        record[split],
        record[split + 1],
        record[split + 2],
        record[split + 3],
    ]);
    let computed = compute_checksum(&record[..split]);
    if stored != computed {
        return Err(CodecError::ChecksumMismatch { stored, computed });
    }
    Ok(())
}
