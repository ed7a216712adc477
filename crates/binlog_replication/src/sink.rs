//! Destinations for the packets a sender produces.

use crate::error::{ReplicationError, ReplicationResult};
use crate::protocol::Packet;
use tokio::sync::mpsc;

/// Receives the packets of one dump stream, in order.
///
/// A sink that can no longer deliver returns
/// [`ReplicationError::Disconnected`]; the sender then stops.
pub trait EventSink: Send {
    /// Delivers one packet, blocking if the consumer is behind.
    fn send(&mut self, packet: Packet) -> ReplicationResult<()>;
}

/// Collects packets in memory.
#[derive(Debug, Default)]
pub struct VecSink {
    packets: Vec<Packet>,
    limit: Option<usize>,
}

impl VecSink {
    /// Creates an unbounded sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sink that disconnects after `limit` packets.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            packets: Vec::new(),
            limit: Some(limit),
        }
    }

    /// Returns the packets received so far.
    #[must_use]
    pub fn packets(&self) -> &[Packet] {
        &self.packets
    }

    /// Consumes the sink and returns its packets.
    #[must_use]
    pub fn into_packets(self) -> Vec<Packet> {
        self.packets
    }
}

impl EventSink for VecSink {
    fn send(&mut self, packet: Packet) -> ReplicationResult<()> {
        if self.limit.is_some_and(|l| self.packets.len() >= l) {
            return Err(ReplicationError::Disconnected);
        }
        self.packets.push(packet);
        Ok(())
    }
}

/// Forwards packets into a bounded channel.
///
/// Used from a blocking thread; the channel's capacity is the backpressure
/// between the sender and the socket writer.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<Packet>,
}

impl ChannelSink {
    /// Wraps the sending half of a channel.
    #[must_use]
    pub fn new(tx: mpsc::Sender<Packet>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn send(&mut self, packet: Packet) -> ReplicationResult<()> {
        self.tx
            .blocking_send(packet)
            .map_err(|_| ReplicationError::Disconnected)
    }
}
