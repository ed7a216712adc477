//! Common record header.
//!
//! ```text
//! | timestamp (4) | type (1) | server_id (4) | event_len (4) | log_pos (4) | flags (2) |
//! ```
//!
//! All fields are little-endian. `event_len` covers header, body and the
//! optional checksum footer. `log_pos` is the absolute offset of the byte
//! after this record in the file it lives in.

use crate::error::{CodecError, CodecResult};
use crate::event_type::EventType;
use bytes::{Buf, BufMut};

/// Magic bytes at offset 0 of every log file.
pub const BINLOG_MAGIC: [u8; 4] = [0xfe, b'b', b'i', b'n'];

/// Length of the magic; also the offset of the first record.
pub const MAGIC_LEN: u64 = 4;

/// Length of the common header.
pub const HEADER_LEN: usize = 19;

/// Largest record the log accepts (1 GiB).
pub const MAX_EVENT_LEN: u64 = 1 << 30;

const EVENT_LEN_OFFSET: usize = 9;
const LOG_POS_OFFSET: usize = 13;
/// Offset of the flags field inside the header.
pub const FLAGS_OFFSET: usize = 17;

/// Flag bits carried in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventFlags(u16);

impl EventFlags {
    /// Set in a file's format description record while the file is open.
    pub const BINLOG_IN_USE: Self = Self(0x0001);
    /// Created by the server for protocol purposes, not by a client.
    pub const ARTIFICIAL: Self = Self(0x0020);
    /// Written by a relay rather than the originating server.
    pub const RELAY_LOG: Self = Self(0x0040);
    /// Consumers that do not understand the type may skip it.
    pub const IGNORABLE: Self = Self(0x0080);
    /// Bypasses replication filters.
    pub const NO_FILTER: Self = Self(0x0100);
    /// The group must be applied in isolation from others.
    pub const ISOLATE_GROUP: Self = Self(0x0200);

    /// No flags.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Builds flags from raw bits; unknown bits are preserved.
    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Returns true if every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns these flags with `other` set.
    #[must_use]
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns these flags with `other` cleared.
    #[must_use]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

/// The fixed 19-byte header shared by every record kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHeader {
    /// Seconds since the epoch when the statement started.
    pub timestamp: u32,
    /// Record kind.
    pub event_type: EventType,
    /// Server that originated the record.
    pub server_id: u32,
    /// Total length including header and checksum footer.
    pub event_len: u32,
    /// Absolute position of the next record.
    pub log_pos: u32,
    /// Flag bits.
    pub flags: EventFlags,
}

impl EventHeader {
    /// Creates a header whose length and position are filled in at encode time.
    #[must_use]
    pub fn new(event_type: EventType, server_id: u32, timestamp: u32) -> Self {
        Self {
            timestamp,
            event_type,
            server_id,
            event_len: 0,
            log_pos: 0,
            flags: EventFlags::empty(),
        }
    }

    /// Writes the header.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.timestamp);
        buf.put_u8(self.event_type.as_byte());
        buf.put_u32_le(self.server_id);
        buf.put_u32_le(self.event_len);
        buf.put_u32_le(self.log_pos);
        buf.put_u16_le(self.flags.bits());
    }

    /// Parses and validates a header.
    ///
    /// # Errors
    ///
    /// - [`CodecError::Truncated`] if fewer than [`HEADER_LEN`] bytes are given
    ///   or `event_len` is smaller than the header itself
    /// - [`CodecError::UnknownType`] for an unknown tag
    /// - [`CodecError::OversizeRecord`] if `event_len` exceeds [`MAX_EVENT_LEN`]
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(CodecError::truncated(HEADER_LEN, bytes.len()));
        }
        let mut buf = &bytes[..HEADER_LEN];
        let timestamp = buf.get_u32_le();
        let event_type = EventType::from_byte(buf.get_u8())?;
        let server_id = buf.get_u32_le();
        let event_len = buf.get_u32_le();
        let log_pos = buf.get_u32_le();
        let flags = EventFlags::from_bits(buf.get_u16_le());

        if (event_len as usize) < HEADER_LEN {
            return Err(CodecError::truncated(HEADER_LEN, event_len as usize));
        }
        if u64::from(event_len) > MAX_EVENT_LEN {
            return Err(CodecError::OversizeRecord {
                len: u64::from(event_len),
                max: MAX_EVENT_LEN,
            });
        }

        Ok(Self {
            timestamp,
            event_type,
            server_id,
            event_len,
            log_pos,
            flags,
        })
    }
}

/// Rewrites the `log_pos` field of an encoded record.
///
/// # Errors
///
/// Returns [`CodecError::Truncated`] if `record` is shorter than a header.
pub fn patch_log_pos(record: &mut [u8], log_pos: u32) -> CodecResult<()> {
    if record.len() < HEADER_LEN {
        return Err(CodecError::truncated(HEADER_LEN, record.len()));
    }
    record[LOG_POS_OFFSET..LOG_POS_OFFSET + 4].copy_from_slice(&log_pos.to_le_bytes());
    Ok(())
}

/// Rewrites the `event_len` field of an encoded record.
///
/// # Errors
///
/// Returns [`CodecError::Truncated`] if `record` is shorter than a header.
pub fn patch_event_len(record: &mut [u8], event_len: u32) -> CodecResult<()> {
    if record.len() < HEADER_LEN {
        return Err(CodecError::truncated(HEADER_LEN, record.len()));
    }
    record[EVENT_LEN_OFFSET..EVENT_LEN_OFFSET + 4].copy_from_slice(&event_len.to_le_bytes());
    Ok(())
}

/// Rewrites the flags field of an encoded record.
///
/// # Errors
///
/// Returns [`CodecError::Truncated`] if `record` is shorter than a header.
pub fn patch_flags(record: &mut [u8], flags: EventFlags) -> CodecResult<()> {
    if record.len() < HEADER_LEN {
        return Err(CodecError::truncated(HEADER_LEN, record.len()));
    }
    record[FLAGS_OFFSET..FLAGS_OFFSET + 2].copy_from_slice(&flags.bits().to_le_bytes());
    Ok(())
}

/// Checks the magic at the start of a file.
///
/// # Errors
///
/// Returns [`CodecError::BadMagic`] if the bytes differ, or
/// [`CodecError::Truncated`] if fewer than four bytes are given.
pub fn check_magic(bytes: &[u8]) -> CodecResult<()> {
    if bytes.len() < BINLOG_MAGIC.len() {
        return Err(CodecError::truncated(BINLOG_MAGIC.len(), bytes.len()));
    }
    if bytes[..BINLOG_MAGIC.len()] != BINLOG_MAGIC {
        return Err(CodecError::BadMagic {
            found: bytes[..BINLOG_MAGIC.len()].to_vec(),
        });
    }
    Ok(())
}
