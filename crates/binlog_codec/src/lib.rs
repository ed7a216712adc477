//! # Binlog Codec
//!
//! Record framing for the binary log.
//!
//! Every record is a 19-byte little-endian header, a type-specific body and,
//! when the file negotiates checksums, a 4-byte CRC-32 footer:
//!
//! ```text
//! | timestamp | type | server_id | event_len | log_pos | flags | body ... | crc32 |
//! ```
//!
//! Decoding is total: any malformed input yields a [`CodecError`], never a
//! panic.
//!
//! ## Usage
//!
//! ```
//! use binlog_codec::{ChecksumAlg, Event, EventBody};
//!
//! let event = Event::new(EventBody::Xid { xid: 7 }, 1, 0);
//! let bytes = event.encode_at(4, ChecksumAlg::Crc32).unwrap();
//! let decoded = Event::decode(&bytes, ChecksumAlg::Crc32).unwrap();
//! assert_eq!(decoded.body, event.body);
//! assert_eq!(decoded.header.log_pos as usize, 4 + bytes.len());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod body;
mod checksum;
mod error;
mod event;
mod event_type;
mod gtid;
mod header;
mod reader;

pub use body::{
    bitmap_len, EventBody, ExecuteLoadQueryEvent, FormatDescriptionEvent, GtidEvent, QueryEvent,
    RowsEvent, TableMapEvent, UserVarEvent, UserVarValue, XaId, BINLOG_VERSION,
    INCIDENT_LOST_EVENTS, MAX_TABLE_ID, SERVER_VERSION_LEN,
};
pub use checksum::{compute_checksum, stamp_checksum, verify_checksum, ChecksumAlg, CHECKSUM_LEN};
pub use error::{CodecError, CodecResult};
pub use event::{footer_len, Event, RawEvent, RecordSlices};
pub use event_type::EventType;
pub use gtid::{Gtid, GtidSet};
pub use header::{
    check_magic, patch_event_len, patch_flags, patch_log_pos, EventFlags, EventHeader,
    BINLOG_MAGIC, FLAGS_OFFSET, HEADER_LEN, MAGIC_LEN, MAX_EVENT_LEN,
};
