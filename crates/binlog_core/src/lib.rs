//! # Binlog Core
//!
//! Write path, crash recovery and readers for the binary log.
//!
//! This crate provides:
//! - [`BinlogSession`] caches that stage a transaction before commit
//! - [`LogFileManager`], the single append point with group commit,
//!   rotation, purge and crash recovery
//! - [`BoundaryParser`] for finding transaction boundaries in a record stream
//! - [`BinlogReader`] for sequential reads of one file
//!
//! ## Usage
//!
//! ```no_run
//! use binlog_core::{BinlogConfig, BinlogSession, LogFileManager, NoopCoordinator};
//! use std::sync::Arc;
//!
//! let config = BinlogConfig::new("/var/lib/db/binlog").server_id(1);
//! let manager = Arc::new(LogFileManager::open(config, &mut NoopCoordinator)?);
//!
//! let mut session = BinlogSession::new(Arc::clone(&manager), 1);
//! session.log_statement("INSERT INTO t VALUES (1)", true)?;
//! session.end_statement(None)?;
//!
//! manager.close()?;
//! # Ok::<(), binlog_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod boundary;
pub mod cache;
mod config;
pub mod dir;
mod error;
pub mod index;
pub mod manager;
mod notify;
mod reader;
mod types;

pub use boundary::{classify, classify_query, classify_raw, BoundaryParser, BoundaryToken, ParserState};
pub use cache::{BinlogSession, RowsKind, TransactionCache};
pub use config::BinlogConfig;
pub use dir::LogDir;
pub use error::{CacheScope, CoreError, CoreResult, IoOp};
pub use index::{IndexEntry, LogIndex};
pub use manager::{
    BinlogStatus, CacheFlush, CommitMarker, CommitTicket, FlushContext, FlushOutcome, FlushStage,
    LogFileInfo, LogFileManager, NoopCoordinator, PinnedReader, RecoveryReport,
    TransactionCoordinator,
};
pub use notify::{UpdateNotifier, WaitOutcome};
pub use reader::{BinlogReader, EventIter};
pub use types::{LogPosition, TransactionId};
