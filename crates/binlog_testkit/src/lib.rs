//! # Binlog Testkit
//!
//! Test utilities for the binary log.
//!
//! This crate provides:
//! - A temporary log directory fixture with an open manager
//! - Property-based generators using proptest
//! - Helpers that damage log files the way crashes and bad disks do
//! - A concurrent commit stress harness
//!
//! ## Usage
//!
//! ```rust,ignore
//! use binlog_testkit::prelude::*;
//!
//! #[test]
//! fn commits_survive_reopen() {
//!     let log = TempBinlog::new();
//!     log.commit_statement("INSERT INTO t VALUES (1)");
//!     let log = log.reopen();
//!     assert_eq!(log.committed_queries().len(), 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod corrupt;
pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::corrupt::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use corrupt::*;
pub use fixtures::*;
pub use generators::*;
pub use stress::*;
