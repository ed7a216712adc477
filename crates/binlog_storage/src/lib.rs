//! # Binlog Storage
//!
//! Byte-store backends that sit underneath every binary log file and the
//! log index.
//!
//! Backends are **opaque**: they know nothing about record framing, the
//! magic header, or checksums. The log layer owns all format interpretation,
//! which is what lets transport-level transformations (encryption,
//! compression) be slotted in beneath the reader without it noticing.
//!
//! ## Available Backends
//!
//! - [`FileBackend`] - one OS file per log file
//! - [`InMemoryBackend`] - a shareable in-memory buffer for tests
//!
//! ## Example
//!
//! ```rust
//! use binlog_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"\xfebin").unwrap();
//! assert_eq!(offset, 0);
//! assert_eq!(backend.read_at(1, 3).unwrap(), b"bin");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
