//! Dump server configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for the dump server.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent dump sessions.
    pub max_connections: usize,
    /// Heartbeat interval for requests that do not ask for one.
    pub default_heartbeat: Option<Duration>,
    /// Longest a sender blocks before re-checking its stop conditions.
    pub poll_interval: Duration,
    /// Packets buffered between a sender thread and its socket writer.
    pub channel_capacity: usize,
}

impl ReplicationConfig {
    /// Creates a configuration bound to `bind_addr`.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_connections: 64,
            default_heartbeat: Some(Duration::from_secs(30)),
            poll_interval: Duration::from_millis(500),
            channel_capacity: 256,
        }
    }

    /// Sets the maximum concurrent dump sessions.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the default heartbeat interval; `None` disables heartbeats.
    pub fn with_default_heartbeat(mut self, interval: Option<Duration>) -> Self {
        self.default_heartbeat = interval;
        self
    }

    /// Sets the stop-condition poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the sender-to-socket channel capacity.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 3307)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ReplicationConfig::default();
        assert_eq!(config.max_connections, 64);
        assert_eq!(config.bind_addr.port(), 3307);
        assert_eq!(config.default_heartbeat, Some(Duration::from_secs(30)));
    }

    #[test]
    fn config_builder() {
        let config = ReplicationConfig::new("0.0.0.0:9000".parse().unwrap())
            .with_max_connections(2)
            .with_default_heartbeat(None)
            .with_poll_interval(Duration::from_millis(20))
            .with_channel_capacity(0);

        assert_eq!(config.max_connections, 2);
        assert!(config.default_heartbeat.is_none());
        assert_eq!(config.poll_interval, Duration::from_millis(20));
        assert_eq!(config.channel_capacity, 1);
    }
}
