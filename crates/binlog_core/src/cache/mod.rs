//! Per-session staging of records before commit.
//!
//! Records are framed without checksums at cache-relative positions. The
//! manager re-frames them at their file positions when the cache is
//! flushed as one group.

mod session;
mod trx_cache;

pub use session::BinlogSession;
pub use trx_cache::{RowsKind, TransactionCache};
