//! Per-session streaming state.

use binlog_codec::{ChecksumAlg, GtidSet};
use binlog_core::LogPosition;
use std::time::Duration;

/// Where a dump session is and how it frames what it sends.
///
/// Owned by exactly one sender; never shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderCursor {
    /// Next byte to read.
    pub position: LogPosition,
    /// Transactions the replica already has.
    pub exclude: GtidSet,
    /// Checksum algorithm negotiated with the replica.
    pub checksum: ChecksumAlg,
    /// Heartbeat interval while idle.
    pub heartbeat: Option<Duration>,
}

impl SenderCursor {
    /// Creates a cursor at `position` with no exclusions, CRC-32 framing
    /// and no heartbeat.
    #[must_use]
    pub fn new(position: LogPosition) -> Self {
        Self {
            position,
            exclude: GtidSet::new(),
            checksum: ChecksumAlg::Crc32,
            heartbeat: None,
        }
    }

    /// Sets the exclusion set.
    #[must_use]
    pub fn with_exclude(mut self, exclude: GtidSet) -> Self {
        self.exclude = exclude;
        self
    }

    /// Sets the negotiated checksum algorithm.
    #[must_use]
    pub fn with_checksum(mut self, alg: ChecksumAlg) -> Self {
        self.checksum = alg;
        self
    }

    /// Sets the heartbeat interval.
    #[must_use]
    pub fn with_heartbeat(mut self, interval: Option<Duration>) -> Self {
        self.heartbeat = interval;
        self
    }
}
