//! # Binlog Replication
//!
//! Streams the binary log to replicas.
//!
//! This crate provides:
//! - [`ReplicaSender`], which walks the log from a requested position,
//!   filters transactions the replica already has and waits for new data
//! - the dump protocol ([`DumpRequest`], [`Packet`]) and its framing
//! - [`DumpServer`], a tokio TCP server running one sender per connection
//! - [`DumpClient`] for consuming a stream
//!
//! ## Usage
//!
//! ```no_run
//! use binlog_replication::{DumpClient, DumpRequest};
//!
//! # async fn example() -> binlog_replication::ReplicationResult<()> {
//! let mut client = DumpClient::dump("127.0.0.1:3307", &DumpRequest::from_start().non_blocking()).await?;
//! while let Some(event) = client.next_event().await? {
//!     println!("{} {} bytes", event.event_type(), event.len());
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod client;
mod config;
mod cursor;
mod error;
pub mod protocol;
mod sender;
mod server;
mod sink;

pub use client::DumpClient;
pub use config::ReplicationConfig;
pub use cursor::SenderCursor;
pub use error::{ReplicationError, ReplicationResult};
pub use protocol::{DumpRequest, Packet};
pub use sender::{ReplicaSender, SenderStats, DEFAULT_POLL_INTERVAL};
pub use server::DumpServer;
pub use sink::{ChannelSink, EventSink, VecSink};
