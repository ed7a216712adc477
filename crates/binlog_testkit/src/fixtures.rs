//! Test fixtures and log helpers.
//!
//! [`TempBinlog`] owns a temporary directory and a manager opened on it.
//! Helpers panic on failure; they are meant for tests.

use binlog_codec::{EventBody, EventType, RawEvent};
use binlog_core::{BinlogConfig, BinlogSession, LogFileManager, LogPosition, NoopCoordinator};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

/// Server id used by fixtures.
pub const TEST_SERVER_ID: u32 = 1;

/// Source UUID used by fixtures opened with GTIDs.
pub const TEST_SOURCE: Uuid = Uuid::from_u128(0x3e11_fa47_71ca_11e1_9e33_c80a_a942_9562);

/// A log directory with an open manager and automatic cleanup.
pub struct TempBinlog {
    /// The open manager.
    pub manager: Arc<LogFileManager>,
    config: BinlogConfig,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: TempDir,
}

impl TempBinlog {
    /// Opens a log with default settings and anonymous groups.
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    /// Opens a log that assigns GTIDs from [`TEST_SOURCE`].
    pub fn with_gtids() -> Self {
        Self::with_config(|config| config.gtid_source(TEST_SOURCE))
    }

    /// Opens a log with settings adjusted by `configure`.
    ///
    /// The directory is always a fresh temporary one.
    pub fn with_config(configure: impl FnOnce(BinlogConfig) -> BinlogConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = BinlogConfig::new(temp_dir.path().join("binlog")).server_id(TEST_SERVER_ID);
        let mut config = configure(base);
        config.dir = temp_dir.path().join("binlog");
        let manager = LogFileManager::open(config.clone(), &mut NoopCoordinator)
            .expect("Failed to open binlog");
        Self {
            manager: Arc::new(manager),
            config,
            _temp_dir: temp_dir,
        }
    }

    /// Returns the configuration the log was opened with.
    pub fn config(&self) -> &BinlogConfig {
        &self.config
    }

    /// Returns the log directory.
    pub fn path(&self) -> PathBuf {
        self.config.dir.clone()
    }

    /// Returns the full path of a log file.
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.config.dir.join(name)
    }

    /// Starts a session on the log.
    pub fn session(&self, thread_id: u32) -> BinlogSession {
        let mut session = BinlogSession::new(Arc::clone(&self.manager), thread_id);
        session.set_schema("test");
        session
    }

    /// Logs `query` as an autocommitted transactional statement and
    /// returns the end position of its group.
    pub fn commit_statement(&self, query: &str) -> LogPosition {
        let mut session = self.session(1);
        session
            .log_statement(query, true)
            .expect("Failed to log statement");
        if let Some(ticket) = session.end_statement(None).expect("Failed to commit") {
            self.manager
                .finish_commit(ticket)
                .expect("Failed to finish commit");
        }
        self.manager.end_position()
    }

    /// Closes the log cleanly and opens it again.
    ///
    /// Panics if another handle to the manager is still alive.
    pub fn reopen(self) -> Self {
        self.manager.close().expect("Failed to close binlog");
        self.reopen_unclean()
    }

    /// Drops the manager without closing it, as a crash would, and opens
    /// the directory again so recovery runs.
    pub fn reopen_unclean(self) -> Self {
        self.crash_with(|_| {})
    }

    /// Drops the manager without closing it, lets `damage` modify the
    /// log directory, then opens it again.
    pub fn crash_with(self, damage: impl FnOnce(&Path)) -> Self {
        let Self {
            manager,
            config,
            _temp_dir,
        } = self;
        drop(manager);
        damage(&config.dir);
        let manager =
            LogFileManager::open(config.clone(), &mut NoopCoordinator).expect("Failed to reopen");
        Self {
            manager: Arc::new(manager),
            config,
            _temp_dir,
        }
    }

    /// Reads every record of one file, including bytes past the published
    /// end.
    pub fn file_events(&self, name: &str) -> Vec<(u64, RawEvent)> {
        let mut reader = self.manager.open_reader(name).expect("Failed to open reader");
        reader.set_limit(None);
        reader
            .events()
            .collect::<Result<Vec<_>, _>>()
            .expect("Failed to read events")
    }

    /// Returns the type tags of one file's records.
    pub fn file_types(&self, name: &str) -> Vec<EventType> {
        self.file_events(name)
            .iter()
            .map(|(_, event)| event.event_type())
            .collect()
    }

    /// Returns the text of every statement in the log, excluding
    /// transaction delimiters.
    pub fn committed_queries(&self) -> Vec<String> {
        let mut queries = Vec::new();
        for entry in self.manager.index_entries() {
            let alg = self
                .manager
                .open_reader(&entry.name)
                .expect("Failed to open reader")
                .checksum_alg();
            for (_, raw) in self.file_events(&entry.name) {
                if raw.event_type() != EventType::Query {
                    continue;
                }
                if let EventBody::Query(q) = raw.decode(alg).expect("Failed to decode").body {
                    if !matches!(q.query.as_str(), "BEGIN" | "COMMIT" | "ROLLBACK") {
                        queries.push(q.query);
                    }
                }
            }
        }
        queries
    }
}

impl Default for TempBinlog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TempBinlog {
    type Target = LogFileManager;

    fn deref(&self) -> &Self::Target {
        &self.manager
    }
}
