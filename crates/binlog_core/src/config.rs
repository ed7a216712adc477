//! Binary log configuration.

use binlog_codec::ChecksumAlg;
use std::path::PathBuf;
use uuid::Uuid;

/// Configuration for opening a [`crate::LogFileManager`].
#[derive(Debug, Clone)]
pub struct BinlogConfig {
    /// Directory holding the log files, the index and the lock file.
    pub dir: PathBuf,

    /// File name stem; files are named `<base_name>.000001` and so on.
    pub base_name: String,

    /// Size at which the active file is rotated.
    pub max_file_size: u64,

    /// Checksum algorithm for new files.
    pub checksum: ChecksumAlg,

    /// Id of this server, stamped into every record.
    pub server_id: u32,

    /// Source UUID used when assigning GTIDs.
    pub server_uuid: Uuid,

    /// Version string written into format description records.
    pub server_version: String,

    /// Assign a GTID to every group; anonymous markers are written when off.
    pub gtid_mode: bool,

    /// Flush to durable storage every N commit groups (0 = never, 1 = every commit).
    pub sync_period: u32,

    /// Upper bound on a session's transaction cache.
    pub max_trx_cache_size: u64,

    /// Upper bound on a session's statement cache.
    pub max_stmt_cache_size: u64,

    /// Size cap for coalescing row changes into one record.
    pub max_rows_event_size: usize,

    /// Capture row images; every change goes through the transaction cache.
    pub row_based: bool,

    /// Route non-transactional changes straight to the transaction cache.
    pub direct_non_trans_updates: bool,
}

impl Default for BinlogConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("binlog"),
            base_name: "binlog".to_string(),
            max_file_size: 1024 * 1024 * 1024, // 1 GiB
            checksum: ChecksumAlg::Crc32,
            server_id: 1,
            server_uuid: Uuid::nil(),
            server_version: concat!("binlog-", env!("CARGO_PKG_VERSION")).to_string(),
            gtid_mode: false,
            sync_period: 1,
            max_trx_cache_size: u64::from(u32::MAX),
            max_stmt_cache_size: u64::from(u32::MAX),
            max_rows_event_size: 8 * 1024,
            row_based: true,
            direct_non_trans_updates: false,
        }
    }
}

impl BinlogConfig {
    /// Creates a configuration for a log in `dir` with default settings.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    /// Sets the file name stem.
    #[must_use]
    pub fn base_name(mut self, name: impl Into<String>) -> Self {
        self.base_name = name.into();
        self
    }

    /// Sets the rotation threshold.
    #[must_use]
    pub const fn max_file_size(mut self, size: u64) -> Self {
        self.max_file_size = size;
        self
    }

    /// Sets the checksum algorithm for new files.
    #[must_use]
    pub const fn checksum(mut self, alg: ChecksumAlg) -> Self {
        self.checksum = alg;
        self
    }

    /// Sets the server id.
    #[must_use]
    pub const fn server_id(mut self, id: u32) -> Self {
        self.server_id = id;
        self
    }

    /// Sets the server UUID and turns on GTID assignment.
    #[must_use]
    pub const fn gtid_source(mut self, uuid: Uuid) -> Self {
        self.server_uuid = uuid;
        self.gtid_mode = true;
        self
    }

    /// Turns GTID assignment on or off.
    #[must_use]
    pub const fn gtid_mode(mut self, value: bool) -> Self {
        self.gtid_mode = value;
        self
    }

    /// Sets the sync period in commit groups.
    #[must_use]
    pub const fn sync_period(mut self, groups: u32) -> Self {
        self.sync_period = groups;
        self
    }

    /// Sets the transaction cache limit.
    #[must_use]
    pub const fn max_trx_cache_size(mut self, size: u64) -> Self {
        self.max_trx_cache_size = size;
        self
    }

    /// Sets the statement cache limit.
    #[must_use]
    pub const fn max_stmt_cache_size(mut self, size: u64) -> Self {
        self.max_stmt_cache_size = size;
        self
    }

    /// Sets the row coalescing cap.
    #[must_use]
    pub const fn max_rows_event_size(mut self, size: usize) -> Self {
        self.max_rows_event_size = size;
        self
    }

    /// Selects row-based capture.
    #[must_use]
    pub const fn row_based(mut self, value: bool) -> Self {
        self.row_based = value;
        self
    }

    /// Routes non-transactional changes to the transaction cache.
    #[must_use]
    pub const fn direct_non_trans_updates(mut self, value: bool) -> Self {
        self.direct_non_trans_updates = value;
        self
    }
}
