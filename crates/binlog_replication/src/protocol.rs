//! Dump protocol messages and framing.
//!
//! Every message on the wire is one frame:
//!
//! ```text
//! | len (u32 LE) | tag (u8) | payload (len - 1 bytes) |
//! ```
//!
//! | Tag    | Direction        | Payload                         |
//! |--------|------------------|---------------------------------|
//! | `0x12` | replica → source | [`DumpRequest`]                 |
//! | `0x00` | source → replica | one record, exactly as framed   |
//! | `0xFE` | source → replica | empty; the stream is complete   |
//! | `0xFF` | source → replica | UTF-8 error message; terminal   |
//!
//! Request payload, all integers little-endian:
//!
//! ```text
//! | flags (u16) | server_id (u32) | start_offset (u64) | checksum (u8) |
//! | heartbeat_ms (u32) | file_len (u16) | file | gtids_len (u32) | gtids |
//! ```
//!
//! An empty file name asks the source to start at its oldest file. The
//! exclusion set travels in its text form.

use crate::error::{ReplicationError, ReplicationResult};
use binlog_codec::{ChecksumAlg, GtidSet, RawEvent, MAX_EVENT_LEN};
use bytes::{Buf, BufMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Tag of a dump request frame.
pub const TAG_DUMP: u8 = 0x12;
/// Tag of a record frame.
pub const TAG_EVENT: u8 = 0x00;
/// Tag of the end-of-stream frame.
pub const TAG_EOF: u8 = 0xFE;
/// Tag of an error frame.
pub const TAG_ERROR: u8 = 0xFF;

/// Largest frame accepted from a peer.
pub const MAX_FRAME_LEN: u64 = MAX_EVENT_LEN + 1;

/// Request flag: return EOF at the end of the log instead of waiting.
pub const DUMP_NON_BLOCK: u16 = 0x0001;

/// A request to stream the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpRequest {
    /// Server id of the replica, for diagnostics.
    pub server_id: u32,
    /// File to start in; `None` starts at the oldest file.
    pub start_file: Option<String>,
    /// Byte offset in the start file; 0 or 4 start at its beginning.
    pub start_offset: u64,
    /// Transactions the replica already has.
    pub exclude: GtidSet,
    /// Checksum algorithm the replica wants records framed with.
    pub checksum: ChecksumAlg,
    /// Heartbeat interval while idle; `None` uses the server default.
    pub heartbeat: Option<Duration>,
    /// Stop at the end of the log instead of waiting for new data.
    pub non_blocking: bool,
}

impl DumpRequest {
    /// Requests the whole log from the oldest file.
    #[must_use]
    pub fn from_start() -> Self {
        Self {
            server_id: 0,
            start_file: None,
            start_offset: 0,
            exclude: GtidSet::new(),
            checksum: ChecksumAlg::Crc32,
            heartbeat: None,
            non_blocking: false,
        }
    }

    /// Requests the log from `offset` in `file`.
    #[must_use]
    pub fn at(file: impl Into<String>, offset: u64) -> Self {
        Self {
            start_file: Some(file.into()),
            start_offset: offset,
            ..Self::from_start()
        }
    }

    /// Sets the replica's server id.
    #[must_use]
    pub fn with_server_id(mut self, id: u32) -> Self {
        self.server_id = id;
        self
    }

    /// Skips transactions whose GTID is in `set`.
    #[must_use]
    pub fn with_exclude(mut self, set: GtidSet) -> Self {
        self.exclude = set;
        self
    }

    /// Sets the checksum algorithm records are sent with.
    #[must_use]
    pub fn with_checksum(mut self, alg: ChecksumAlg) -> Self {
        self.checksum = alg;
        self
    }

    /// Sets the heartbeat interval.
    #[must_use]
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = Some(interval);
        self
    }

    /// Ends the stream at the end of the log.
    #[must_use]
    pub fn non_blocking(mut self) -> Self {
        self.non_blocking = true;
        self
    }

    /// Encodes the request as a frame.
    #[must_use]
    pub fn to_frame(&self) -> Vec<u8> {
        let file = self.start_file.as_deref().unwrap_or_default();
        let gtids = self.exclude.to_string();
        let heartbeat_ms = self
            .heartbeat
            .map_or(0, |d| u32::try_from(d.as_millis()).unwrap_or(u32::MAX).max(1));

        let mut payload = Vec::with_capacity(25 + file.len() + gtids.len());
        let flags = if self.non_blocking { DUMP_NON_BLOCK } else { 0 };
        payload.put_u16_le(flags);
        payload.put_u32_le(self.server_id);
        payload.put_u64_le(self.start_offset);
        payload.put_u8(self.checksum.as_byte());
        payload.put_u32_le(heartbeat_ms);
        payload.put_u16_le(file.len() as u16);
        payload.put_slice(file.as_bytes());
        payload.put_u32_le(gtids.len() as u32);
        payload.put_slice(gtids.as_bytes());
        encode_frame(TAG_DUMP, &payload)
    }

    /// Decodes a request from a frame's tag and payload.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::Protocol`] for a wrong tag or a
    /// malformed payload.
    pub fn from_frame(tag: u8, payload: &[u8]) -> ReplicationResult<Self> {
        if tag != TAG_DUMP {
            return Err(ReplicationError::protocol(format!(
                "expected a dump request, got frame tag {tag:#04x}"
            )));
        }
        let mut buf = payload;
        need(buf, 19)?;
        let flags = buf.get_u16_le();
        let server_id = buf.get_u32_le();
        let start_offset = buf.get_u64_le();
        let checksum = ChecksumAlg::from_byte(buf.get_u8())?;
        let heartbeat_ms = buf.get_u32_le();

        need(buf, 2)?;
        let file_len = usize::from(buf.get_u16_le());
        let file = utf8(take(&mut buf, file_len)?, "file name")?;

        need(buf, 4)?;
        let gtids_len = buf.get_u32_le() as usize;
        let gtids = utf8(take(&mut buf, gtids_len)?, "GTID set")?;
        if buf.has_remaining() {
            return Err(ReplicationError::protocol(format!(
                "{} trailing bytes after dump request",
                buf.remaining()
            )));
        }

        Ok(Self {
            server_id,
            start_file: (!file.is_empty()).then_some(file),
            start_offset,
            exclude: gtids.parse()?,
            checksum,
            heartbeat: (heartbeat_ms > 0).then(|| Duration::from_millis(u64::from(heartbeat_ms))),
            non_blocking: flags & DUMP_NON_BLOCK != 0,
        })
    }
}

/// One message from the source to the replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// A record framed with the negotiated checksum algorithm.
    Event(RawEvent),
    /// The stream is complete.
    Eof,
    /// The stream failed; no further packets follow.
    Error(String),
}

impl Packet {
    /// Encodes the packet as a frame.
    #[must_use]
    pub fn to_frame(&self) -> Vec<u8> {
        match self {
            Self::Event(event) => encode_frame(TAG_EVENT, event.as_bytes()),
            Self::Eof => encode_frame(TAG_EOF, &[]),
            Self::Error(message) => encode_frame(TAG_ERROR, message.as_bytes()),
        }
    }

    /// Decodes a packet from a frame's tag and payload.
    ///
    /// # Errors
    ///
    /// Returns a codec error for a malformed record, or
    /// [`ReplicationError::Protocol`] for an unknown tag.
    pub fn from_frame(tag: u8, payload: Vec<u8>) -> ReplicationResult<Self> {
        match tag {
            TAG_EVENT => Ok(Self::Event(RawEvent::from_bytes(payload)?)),
            TAG_EOF => Ok(Self::Eof),
            TAG_ERROR => Ok(Self::Error(String::from_utf8_lossy(&payload).into_owned())),
            other => Err(ReplicationError::protocol(format!(
                "unexpected frame tag {other:#04x}"
            ))),
        }
    }

    /// Returns the record, if this is an event packet.
    #[must_use]
    pub fn as_event(&self) -> Option<&RawEvent> {
        match self {
            Self::Event(event) => Some(event),
            _ => None,
        }
    }
}

/// Prefixes `payload` with its length and tag.
#[must_use]
pub fn encode_frame(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(5 + payload.len());
    frame.put_u32_le(payload.len() as u32 + 1);
    frame.put_u8(tag);
    frame.put_slice(payload);
    frame
}

/// Reads one frame.
///
/// Returns `None` if the peer closed the connection between frames.
///
/// # Errors
///
/// Returns an I/O error, [`ReplicationError::Disconnected`] if the peer
/// closed mid-frame, or [`ReplicationError::Protocol`] for an empty or
/// oversized frame.
pub async fn read_frame<R>(reader: &mut R) -> ReplicationResult<Option<(u8, Vec<u8>)>>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    let mut filled = 0;
    while filled < len_bytes.len() {
        let n = reader.read(&mut len_bytes[filled..]).await?;
        if n == 0 {
            return if filled == 0 {
                Ok(None)
            } else {
                Err(ReplicationError::Disconnected)
            };
        }
        filled += n;
    }
    let len = u32::from_le_bytes(len_bytes);
    if len == 0 || u64::from(len) > MAX_FRAME_LEN {
        return Err(ReplicationError::protocol(format!("invalid frame length {len}")));
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ReplicationError::Disconnected
        } else {
            e.into()
        }
    })?;
    let tag = body[0];
    body.remove(0);
    Ok(Some((tag, body)))
}

/// Writes one pre-encoded frame and flushes it.
///
/// # Errors
///
/// Returns an I/O error.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> ReplicationResult<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

fn need(buf: &[u8], n: usize) -> ReplicationResult<()> {
    if buf.remaining() < n {
        return Err(ReplicationError::protocol(format!(
            "dump request truncated: needed {n} bytes, {} available",
            buf.remaining()
        )));
    }
    Ok(())
}

fn take<'a>(buf: &mut &'a [u8], n: usize) -> ReplicationResult<&'a [u8]> {
    need(*buf, n)?;
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

fn utf8(bytes: &[u8], what: &str) -> ReplicationResult<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| ReplicationError::protocol(format!("{what} is not UTF-8")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use binlog_codec::{Event, EventBody, Gtid};
    use uuid::Uuid;

    fn split(frame: &[u8]) -> (u8, Vec<u8>) {
        let len = u32::from_le_bytes(frame[..4].try_into().unwrap()) as usize;
        assert_eq!(len, frame.len() - 4);
        (frame[4], frame[5..].to_vec())
    }

    #[test]
    fn request_frame_carries_every_field() {
        let mut exclude = GtidSet::new();
        exclude.add(Gtid::new(Uuid::from_u128(9), 3));
        let request = DumpRequest::at("binlog.000002", 1234)
            .with_server_id(42)
            .with_exclude(exclude)
            .with_checksum(ChecksumAlg::Off)
            .with_heartbeat(Duration::from_millis(250))
            .non_blocking();

        let (tag, payload) = split(&request.to_frame());
        assert_eq!(DumpRequest::from_frame(tag, &payload).unwrap(), request);
    }

    #[test]
    fn empty_file_name_means_oldest_file() {
        let (tag, payload) = split(&DumpRequest::from_start().to_frame());
        let decoded = DumpRequest::from_frame(tag, &payload).unwrap();
        assert!(decoded.start_file.is_none());
        assert!(decoded.heartbeat.is_none());
        assert!(!decoded.non_blocking);
    }

    #[test]
    fn truncated_request_is_rejected() {
        let (tag, payload) = split(&DumpRequest::at("binlog.000001", 4).to_frame());
        for cut in [0, 10, payload.len() - 1] {
            assert!(matches!(
                DumpRequest::from_frame(tag, &payload[..cut]),
                Err(ReplicationError::Protocol(_))
            ));
        }
        assert!(DumpRequest::from_frame(TAG_EVENT, &payload).is_err());
    }

    #[test]
    fn packets_decode_from_their_frames() {
        let record = Event::new(EventBody::Xid { xid: 5 }, 1, 0)
            .encode_at(4, ChecksumAlg::Crc32)
            .unwrap();
        let packets = [
            Packet::Event(RawEvent::from_bytes(record).unwrap()),
            Packet::Eof,
            Packet::Error("log file binlog.000009 is not in the index".into()),
        ];
        for packet in packets {
            let (tag, payload) = split(&packet.to_frame());
            assert_eq!(Packet::from_frame(tag, payload).unwrap(), packet);
        }
        assert!(Packet::from_frame(0x42, Vec::new()).is_err());
    }

    #[tokio::test]
    async fn frames_survive_a_stream() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            write_frame(&mut a, &Packet::Eof.to_frame()).await.unwrap();
            write_frame(&mut a, &Packet::Error("x".repeat(200)).to_frame())
                .await
                .unwrap();
        });

        let (tag, payload) = read_frame(&mut b).await.unwrap().unwrap();
        assert_eq!(Packet::from_frame(tag, payload).unwrap(), Packet::Eof);
        let (tag, payload) = read_frame(&mut b).await.unwrap().unwrap();
        assert_eq!(
            Packet::from_frame(tag, payload).unwrap(),
            Packet::Error("x".repeat(200))
        );
        writer.await.unwrap();
        assert!(read_frame(&mut b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn zero_length_frame_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(16);
        a.write_all(&[0, 0, 0, 0]).await.unwrap();
        assert!(matches!(
            read_frame(&mut b).await,
            Err(ReplicationError::Protocol(_))
        ));
    }
}
