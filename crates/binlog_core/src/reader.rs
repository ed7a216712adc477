//! Sequential, seekable reader over one log file.
//!
//! The reader tracks a logical position that is independent of how the
//! bytes are fetched: it sits on a [`StorageBackend`], so any transformation
//! beneath the backend (encryption, compression) is invisible here.
//!
//! Recovery and the replica sender both read through this type. A reader
//! never mutates the file; when tailing the active file it is bounded by a
//! limit the manager publishes after each complete append, so it never
//! observes a partially written record.

use crate::error::{CoreError, CoreResult, IoOp};
use binlog_codec::{
    check_magic, ChecksumAlg, CodecError, EventBody, EventHeader, EventType,
    FormatDescriptionEvent, RawEvent, HEADER_LEN, MAGIC_LEN,
};
use binlog_storage::StorageBackend;

/// Read-ahead chunk size.
const READ_AHEAD: usize = 64 * 1024;

/// A reader over one physical log file.
pub struct BinlogReader {
    backend: Box<dyn StorageBackend>,
    name: String,
    position: u64,
    limit: Option<u64>,
    alg: ChecksumAlg,
    format: Option<FormatDescriptionEvent>,
    /// Read-ahead buffer and the file offset of its first byte.
    buffer: Vec<u8>,
    buffer_start: u64,
}

impl BinlogReader {
    /// Opens a reader, validates the magic and positions after it.
    ///
    /// If the file holds a record after the magic it must be a valid format
    /// description; its checksum algorithm is adopted for every later read.
    ///
    /// # Errors
    ///
    /// - [`CodecError::BadMagic`] or [`CodecError::Truncated`] if the magic is
    ///   missing
    /// - a codec error if the format description is invalid
    pub fn open(backend: Box<dyn StorageBackend>, name: impl Into<String>) -> CoreResult<Self> {
        let mut reader = Self {
            backend,
            name: name.into(),
            position: 0,
            limit: None,
            alg: ChecksumAlg::Off,
            format: None,
            buffer: Vec::new(),
            buffer_start: 0,
        };
        let magic = reader.read(MAGIC_LEN as usize)?;
        check_magic(&magic)?;
        if reader.length()? > MAGIC_LEN {
            reader.load_format_description()?;
        }
        Ok(reader)
    }

    fn load_format_description(&mut self) -> CoreResult<()> {
        let saved = self.position;
        self.position = MAGIC_LEN;
        let event = self.read_raw()?;
        self.position = saved;
        if event.event_type() != EventType::FormatDescription {
            return Err(CodecError::malformed(format!(
                "{}: first record is {}, not a format description",
                self.name,
                event.event_type()
            ))
            .into());
        }
        match event.decode(ChecksumAlg::Off)?.body {
            EventBody::FormatDescription(fde) => {
                self.alg = fde.checksum_alg;
                self.format = Some(fde);
                Ok(())
            }
            _ => Err(CodecError::malformed("format description body expected").into()),
        }
    }

    /// Returns the file name this reader was opened on.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the checksum algorithm of the file.
    #[must_use]
    pub fn checksum_alg(&self) -> ChecksumAlg {
        self.alg
    }

    /// Returns the file's format description, once one has been read.
    #[must_use]
    pub fn format_description(&self) -> Option<&FormatDescriptionEvent> {
        self.format.as_ref()
    }

    /// Returns the logical read position.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Bounds reads to `limit` bytes of the file; `None` reads to the
    /// physical end.
    pub fn set_limit(&mut self, limit: Option<u64>) {
        self.limit = limit;
    }

    /// Returns the logical content length.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the size cannot be determined.
    pub fn length(&mut self) -> CoreResult<u64> {
        let physical = self
            .backend
            .refresh_size()
            .map_err(CoreError::io_at(IoOp::Read))?;
        Ok(self.limit.map_or(physical, |l| l.min(physical)))
    }

    /// Moves the logical position.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Protocol`] if `pos` lies before the first record
    /// or beyond the content length.
    pub fn seek(&mut self, pos: u64) -> CoreResult<()> {
        let len = self.length()?;
        if pos < MAGIC_LEN || pos > len {
            return Err(CoreError::protocol(format!(
                "position {pos} is outside {} (length {len})",
                self.name
            )));
        }
        self.position = pos;
        Ok(())
    }

    /// Reads exactly `n` bytes at the current position and advances.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Truncated`] if fewer than `n` bytes remain.
    pub fn read(&mut self, n: usize) -> CoreResult<Vec<u8>> {
        let bytes = self.bytes_at(self.position, n)?;
        self.position += n as u64;
        Ok(bytes)
    }

    fn bytes_at(&mut self, offset: u64, n: usize) -> CoreResult<Vec<u8>> {
        let buffered_end = self.buffer_start + self.buffer.len() as u64;
        if offset >= self.buffer_start && offset + n as u64 <= buffered_end {
            let start = (offset - self.buffer_start) as usize;
            return Ok(self.buffer[start..start + n].to_vec());
        }

        let len = self.length()?;
        let available = len.saturating_sub(offset);
        if available < n as u64 {
            return Err(CodecError::truncated(n, available as usize).into());
        }
        let want = (n.max(READ_AHEAD) as u64).min(available) as usize;
        self.buffer = self
            .backend
            .read_at(offset, want)
            .map_err(CoreError::io_at(IoOp::Read))?;
        self.buffer_start = offset;
        Ok(self.buffer[..n].to_vec())
    }

    fn read_raw(&mut self) -> CoreResult<RawEvent> {
        let start = self.position;
        let header_bytes = self.bytes_at(start, HEADER_LEN)?;
        let header = EventHeader::decode(&header_bytes)?;
        let bytes = self.bytes_at(start, header.event_len as usize)?;
        let event = RawEvent::from_bytes(bytes)?;
        self.position = start + event.len() as u64;
        Ok(event)
    }

    /// Reads the next record and validates its checksum.
    ///
    /// Returns `Ok(None)` at the end of the content. The position only
    /// advances past records that decoded cleanly.
    ///
    /// # Errors
    ///
    /// Returns a codec error for a torn, oversize or corrupt record.
    pub fn read_event(&mut self) -> CoreResult<Option<RawEvent>> {
        if self.position >= self.length()? {
            return Ok(None);
        }
        let start = self.position;
        let event = match self.read_raw() {
            Ok(event) => event,
            Err(e) => {
                self.position = start;
                return Err(e);
            }
        };
        if let Err(e) = event.verify(self.alg) {
            self.position = start;
            return Err(e.into());
        }
        Ok(Some(event))
    }

    /// Returns an iterator of `(offset, record)` pairs from the current
    /// position. The iterator stops after the first error.
    pub fn events(&mut self) -> EventIter<'_> {
        EventIter {
            reader: self,
            done: false,
        }
    }

    /// Consumes the reader and returns its backend.
    #[must_use]
    pub fn into_backend(self) -> Box<dyn StorageBackend> {
        self.backend
    }
}

/// Iterator returned by [`BinlogReader::events`].
pub struct EventIter<'a> {
    reader: &'a mut BinlogReader,
    done: bool,
}

impl Iterator for EventIter<'_> {
    type Item = CoreResult<(u64, RawEvent)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let offset = self.reader.position();
        match self.reader.read_event() {
            Ok(Some(event)) => Some(Ok((offset, event))),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
