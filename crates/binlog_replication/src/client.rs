//! Client side of the dump protocol.

use crate::error::{ReplicationError, ReplicationResult};
use crate::protocol::{read_frame, write_frame, DumpRequest, Packet};
use binlog_codec::RawEvent;
use tokio::io::BufReader;
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::debug;

/// Connects to a dump server and reads the stream it sends.
#[derive(Debug)]
pub struct DumpClient {
    stream: BufReader<TcpStream>,
    finished: bool,
}

impl DumpClient {
    /// Connects to `addr`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the connection fails.
    pub async fn connect(addr: impl ToSocketAddrs) -> ReplicationResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream: BufReader::new(stream),
            finished: false,
        })
    }

    /// Connects to `addr` and sends `request`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error.
    pub async fn dump(addr: impl ToSocketAddrs, request: &DumpRequest) -> ReplicationResult<Self> {
        let mut client = Self::connect(addr).await?;
        client.request(request).await?;
        Ok(client)
    }

    /// Sends a dump request.
    ///
    /// # Errors
    ///
    /// Returns an I/O error.
    pub async fn request(&mut self, request: &DumpRequest) -> ReplicationResult<()> {
        debug!(file = ?request.start_file, offset = request.start_offset, "sending dump request");
        write_frame(self.stream.get_mut(), &request.to_frame()).await
    }

    /// Reads the next packet; `None` once the stream has ended.
    ///
    /// # Errors
    ///
    /// Returns an I/O or framing error.
    pub async fn next_packet(&mut self) -> ReplicationResult<Option<Packet>> {
        if self.finished {
            return Ok(None);
        }
        let Some((tag, payload)) = read_frame(&mut self.stream).await? else {
            self.finished = true;
            return Ok(None);
        };
        let packet = Packet::from_frame(tag, payload)?;
        if !matches!(packet, Packet::Event(_)) {
            self.finished = true;
        }
        Ok(Some(packet))
    }

    /// Reads the next record; `None` at end of stream.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::Remote`] if the server reported an error.
    pub async fn next_event(&mut self) -> ReplicationResult<Option<RawEvent>> {
        match self.next_packet().await? {
            Some(Packet::Event(event)) => Ok(Some(event)),
            Some(Packet::Error(message)) => Err(ReplicationError::Remote(message)),
            Some(Packet::Eof) | None => Ok(None),
        }
    }

    /// Reads records until the end of the stream or `limit` records.
    ///
    /// # Errors
    ///
    /// Same as [`DumpClient::next_event`].
    pub async fn collect(&mut self, limit: Option<usize>) -> ReplicationResult<Vec<RawEvent>> {
        let mut events = Vec::new();
        while limit.map_or(true, |l| events.len() < l) {
            match self.next_event().await? {
                Some(event) => events.push(event),
                None => break,
            }
        }
        Ok(events)
    }
}
