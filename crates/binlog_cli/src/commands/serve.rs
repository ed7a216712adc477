//! Serve command implementation.

use crate::error::CliResult;
use binlog_core::{BinlogConfig, LogFileManager, NoopCoordinator};
use binlog_replication::{DumpServer, ReplicationConfig};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Settings for `serve`.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// Address to listen on.
    pub bind: SocketAddr,
    /// Maximum concurrent dump sessions.
    pub max_connections: usize,
    /// Idle heartbeat interval in seconds; 0 disables heartbeats.
    pub heartbeat_secs: u64,
    /// Server id stamped on records this process writes.
    pub server_id: u32,
}

impl ServeOptions {
    /// Builds the server configuration.
    pub fn replication_config(&self) -> ReplicationConfig {
        let heartbeat = (self.heartbeat_secs > 0).then(|| Duration::from_secs(self.heartbeat_secs));
        ReplicationConfig::new(self.bind)
            .with_max_connections(self.max_connections)
            .with_default_heartbeat(heartbeat)
    }
}

/// Runs the serve command until Ctrl-C.
pub fn run(dir: &Path, base_name: &str, options: &ServeOptions) -> CliResult<()> {
    let config = BinlogConfig::new(dir)
        .base_name(base_name)
        .server_id(options.server_id);
    let manager = Arc::new(LogFileManager::open(config, &mut NoopCoordinator)?);
    let server = DumpServer::new(options.replication_config(), Arc::clone(&manager));

    let runtime = tokio::runtime::Runtime::new()?;
    info!(addr = %options.bind, dir = %dir.display(), "serving binary log");
    let served = runtime.block_on(server.run(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown requested");
    }));
    let closed = manager.close();
    served?;
    closed?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_heartbeat_disables_heartbeats() {
        let options = ServeOptions {
            bind: "127.0.0.1:0".parse().unwrap(),
            max_connections: 3,
            heartbeat_secs: 0,
            server_id: 1,
        };
        let config = options.replication_config();
        assert_eq!(config.max_connections, 3);
        assert_eq!(config.default_heartbeat, None);

        let config = ServeOptions {
            heartbeat_secs: 5,
            ..options
        }
        .replication_config();
        assert_eq!(config.default_heartbeat, Some(Duration::from_secs(5)));
    }
}
