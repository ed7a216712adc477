//! Whole records: header, body and checksum footer.
//!
//! [`Event`] is the decoded form. [`RawEvent`] keeps the encoded bytes and a
//! parsed header; it is what readers return and what the sender forwards,
//! since most records only need re-framing, not decoding.

use crate::body::EventBody;
use crate::checksum::{stamp_checksum, verify_checksum, ChecksumAlg, CHECKSUM_LEN};
use crate::error::{CodecError, CodecResult};
use crate::event_type::EventType;
use crate::header::{
    patch_event_len, patch_flags, patch_log_pos, EventFlags, EventHeader, HEADER_LEN, MAX_EVENT_LEN,
};

/// Footer length for a record of `event_type` in a file using `alg`.
///
/// Format description records always carry a footer.
#[must_use]
pub fn footer_len(event_type: EventType, alg: ChecksumAlg) -> usize {
    if event_type == EventType::FormatDescription {
        CHECKSUM_LEN
    } else {
        alg.footer_len()
    }
}

/// A decoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Common header.
    pub header: EventHeader,
    /// Type-specific body.
    pub body: EventBody,
}

impl Event {
    /// Creates a record; length and position are filled in by [`Event::encode_at`].
    #[must_use]
    pub fn new(body: EventBody, server_id: u32, timestamp: u32) -> Self {
        Self {
            header: EventHeader::new(body.event_type(), server_id, timestamp),
            body,
        }
    }

    /// Returns the record with the given flags.
    #[must_use]
    pub fn with_flags(mut self, flags: EventFlags) -> Self {
        self.header.flags = flags;
        self
    }

    /// Encodes the record as if written at `position`.
    ///
    /// Sets `event_len` and `log_pos`, and appends the footer `alg`
    /// requires. A format description record gets a zero footer when `alg`
    /// is [`ChecksumAlg::Off`].
    ///
    /// # Errors
    ///
    /// - [`CodecError::OversizeRecord`] if the record exceeds [`MAX_EVENT_LEN`]
    /// - [`CodecError::Malformed`] if the body cannot be encoded or the end
    ///   position does not fit the 32-bit `log_pos` field
    pub fn encode_at(&self, position: u64, alg: ChecksumAlg) -> CodecResult<Vec<u8>> {
        let event_type = self.body.event_type();
        let mut body = Vec::new();
        self.body.encode(&mut body)?;
        let footer = footer_len(event_type, alg);
        let total = (HEADER_LEN + body.len() + footer) as u64;
        if total > MAX_EVENT_LEN {
            return Err(CodecError::OversizeRecord {
                len: total,
                max: MAX_EVENT_LEN,
            });
        }
        let log_pos = end_position(position, total)?;

        let mut header = self.header;
        header.event_type = event_type;
        header.event_len = total as u32;
        header.log_pos = log_pos;

        let mut out = Vec::with_capacity(total as usize);
        header.encode(&mut out);
        out.extend_from_slice(&body);
        out.resize(total as usize, 0);
        if alg == ChecksumAlg::Crc32 {
            stamp_checksum(&mut out)?;
        }
        Ok(out)
    }

    /// Decodes a complete record from a file using `alg`.
    ///
    /// For a format description record, `alg` is ignored and the algorithm
    /// stamped in the record itself decides whether the footer is verified.
    ///
    /// # Errors
    ///
    /// Returns any header, checksum or body error.
    pub fn decode(bytes: &[u8], alg: ChecksumAlg) -> CodecResult<Self> {
        RawEvent::from_bytes(bytes.to_vec())?.decode(alg)
    }
}

fn end_position(position: u64, len: u64) -> CodecResult<u32> {
    let end = position + len;
    u32::try_from(end).map_err(|_| {
        CodecError::malformed(format!(
            "record ending at {end} does not fit the 32-bit position field"
        ))
    })
}

/// An encoded record with its parsed header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    header: EventHeader,
    bytes: Vec<u8>,
}

impl RawEvent {
    /// Wraps the bytes of exactly one record.
    ///
    /// # Errors
    ///
    /// Returns a header error, or [`CodecError::Truncated`] /
    /// [`CodecError::Malformed`] if the byte count disagrees with `event_len`.
    pub fn from_bytes(bytes: Vec<u8>) -> CodecResult<Self> {
        let header = EventHeader::decode(&bytes)?;
        let len = header.event_len as usize;
        if bytes.len() < len {
            return Err(CodecError::truncated(len, bytes.len()));
        }
        if bytes.len() > len {
            return Err(CodecError::malformed(format!(
                "{} bytes given for a {len} byte record",
                bytes.len()
            )));
        }
        Ok(Self { header, bytes })
    }

    /// Returns the parsed header.
    #[must_use]
    pub fn header(&self) -> &EventHeader {
        &self.header
    }

    /// Returns the record type.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        self.header.event_type
    }

    /// Returns the encoded bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the record and returns its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Returns the total length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false; a record holds at least a header.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns the checksum algorithm this record must be verified with.
    ///
    /// For format description records this is read from the body; for the
    /// rest it is `file_alg`.
    ///
    /// # Errors
    ///
    /// Returns an error if a format description body is unreadable.
    pub fn effective_alg(&self, file_alg: ChecksumAlg) -> CodecResult<ChecksumAlg> {
        if self.event_type() != EventType::FormatDescription {
            return Ok(file_alg);
        }
        match self.decode_body(file_alg)? {
            EventBody::FormatDescription(fde) => Ok(fde.checksum_alg),
            _ => Err(CodecError::malformed("format description body expected")),
        }
    }

    /// Verifies the footer if the record carries an active checksum.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::ChecksumMismatch`] on mismatch.
    pub fn verify(&self, file_alg: ChecksumAlg) -> CodecResult<()> {
        if self.effective_alg(file_alg)? == ChecksumAlg::Crc32 {
            verify_checksum(&self.bytes)?;
        }
        Ok(())
    }

    /// Returns the body bytes, excluding header and footer.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Truncated`] if the record cannot hold the footer.
    pub fn body(&self, file_alg: ChecksumAlg) -> CodecResult<&[u8]> {
        let footer = footer_len(self.event_type(), file_alg);
        if self.bytes.len() < HEADER_LEN + footer {
            return Err(CodecError::truncated(HEADER_LEN + footer, self.bytes.len()));
        }
        Ok(&self.bytes[HEADER_LEN..self.bytes.len() - footer])
    }

    fn decode_body(&self, file_alg: ChecksumAlg) -> CodecResult<EventBody> {
        EventBody::decode(self.event_type(), self.body(file_alg)?)
    }

    /// Verifies and decodes the record.
    ///
    /// # Errors
    ///
    /// Returns any checksum or body error.
    pub fn decode(&self, file_alg: ChecksumAlg) -> CodecResult<Event> {
        self.verify(file_alg)?;
        Ok(Event {
            header: self.header,
            body: self.decode_body(file_alg)?,
        })
    }

    /// Rewrites `log_pos` for a record placed at `position`, and restamps
    /// the footer if the record carries one.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Malformed`] if the end position overflows.
    pub fn set_position(&mut self, position: u64, alg: ChecksumAlg) -> CodecResult<()> {
        let log_pos = end_position(position, self.bytes.len() as u64)?;
        self.set_log_pos(log_pos, alg)
    }

    /// Rewrites `log_pos` directly; used to zero the position of records
    /// the replica must not advance on.
    ///
    /// # Errors
    ///
    /// Propagates framing errors.
    pub fn set_log_pos(&mut self, log_pos: u32, alg: ChecksumAlg) -> CodecResult<()> {
        patch_log_pos(&mut self.bytes, log_pos)?;
        self.header.log_pos = log_pos;
        self.restamp(alg)
    }

    /// Rewrites the flags field and restamps the footer.
    ///
    /// # Errors
    ///
    /// Propagates framing errors.
    pub fn set_flags(&mut self, flags: EventFlags, alg: ChecksumAlg) -> CodecResult<()> {
        patch_flags(&mut self.bytes, flags)?;
        self.header.flags = flags;
        self.restamp(alg)
    }

    fn restamp(&mut self, alg: ChecksumAlg) -> CodecResult<()> {
        if self.effective_alg(alg)? == ChecksumAlg::Crc32 {
            stamp_checksum(&mut self.bytes)?;
        }
        Ok(())
    }

    /// Re-frames the record from checksum algorithm `from` to `to`.
    ///
    /// Body bytes are preserved. A non-description record gains or loses its
    /// footer and its `event_len` is adjusted; the checksum is recomputed
    /// under `to`. A format description record keeps its footer and has its
    /// algorithm byte rewritten, so the receiver reads the rest of the
    /// stream with `to`.
    ///
    /// # Errors
    ///
    /// Propagates framing errors.
    pub fn convert_checksum(&self, from: ChecksumAlg, to: ChecksumAlg) -> CodecResult<RawEvent> {
        if self.event_type() == EventType::FormatDescription {
            if self.bytes.len() < HEADER_LEN + 1 + CHECKSUM_LEN {
                return Err(CodecError::truncated(
                    HEADER_LEN + 1 + CHECKSUM_LEN,
                    self.bytes.len(),
                ));
            }
            let mut bytes = self.bytes.clone();
            let alg_offset = bytes.len() - CHECKSUM_LEN - 1;
            bytes[alg_offset] = to.as_byte();
            let footer = bytes.len() - CHECKSUM_LEN;
            bytes[footer..].fill(0);
            if to == ChecksumAlg::Crc32 {
                stamp_checksum(&mut bytes)?;
            }
            return RawEvent::from_bytes(bytes);
        }
        if from == to {
            return Ok(self.clone());
        }

        let body_end = self.bytes.len() - from.footer_len();
        let mut bytes = Vec::with_capacity(body_end + to.footer_len());
        bytes.extend_from_slice(&self.bytes[..body_end]);
        bytes.resize(body_end + to.footer_len(), 0);
        let len = bytes.len() as u32;
        patch_event_len(&mut bytes, len)?;
        let mut header = self.header;
        header.event_len = bytes.len() as u32;
        if to == ChecksumAlg::Crc32 {
            stamp_checksum(&mut bytes)?;
        }
        Ok(RawEvent { header, bytes })
    }

    /// Copies the record from a cache buffer into a file at `position`.
    ///
    /// Cache records are framed with `from` at cache-relative positions;
    /// the copy is framed with `to` and carries the absolute `log_pos`.
    ///
    /// # Errors
    ///
    /// Propagates framing errors.
    pub fn reframe(&self, from: ChecksumAlg, to: ChecksumAlg, position: u64) -> CodecResult<RawEvent> {
        let mut out = self.convert_checksum(from, to)?;
        out.set_position(position, to)?;
        Ok(out)
    }
}

/// Splits a buffer of concatenated records into per-record slices.
///
/// Used to walk the contents of a session cache. Each item is the bytes of
/// one record; a trailing fragment yields [`CodecError::Truncated`].
pub struct RecordSlices<'a> {
    buf: &'a [u8],
    failed: bool,
}

impl<'a> RecordSlices<'a> {
    /// Starts at the beginning of `buf`.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, failed: false }
    }
}

impl<'a> Iterator for RecordSlices<'a> {
    type Item = CodecResult<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.is_empty() || self.failed {
            return None;
        }
        let result = EventHeader::decode(self.buf).and_then(|h| {
            let len = h.event_len as usize;
            if self.buf.len() < len {
                Err(CodecError::truncated(len, self.buf.len()))
            } else {
                Ok(len)
            }
        });
        match result {
            Ok(len) => {
                let (head, tail) = self.buf.split_at(len);
                self.buf = tail;
                Some(Ok(head))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
