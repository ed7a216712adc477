//! The log file manager: the single append point of the binary log.
//!
//! ```text
//!  sessions ──write()──► [log lock] ──append+sync──► binlog.00000N
//!                            │                          │
//!                            ├─ rotate ──► [index lock] ─┤ binlog.index
//!                            └─ publish ──► UpdateNotifier ──► readers
//! ```
//!
//! - **Log lock** serializes appends, rotation and close. A group is built
//!   in memory and appended with one write, so readers bounded by the
//!   published end never see a torn group.
//! - **Index lock** guards the index and is held only for index reads and
//!   mutations, never across an append.
//! - Two-phase groups hand back a [`CommitTicket`]; rotation waits until
//!   every ticket has been released.
//! - An append, sync or rotation failure disables logging for the rest of
//!   the process lifetime. The reason is logged once and returned from
//!   every later write.

mod group_commit;
mod hooks;
mod purge;
mod recovery;

pub use group_commit::{CommitTicket, PreparedCounter};
pub use hooks::{FlushContext, FlushHooks, FlushObserver, FlushStage};
pub use purge::{FilePin, ReaderPins};
pub use recovery::{NoopCoordinator, RecoveryReport, TransactionCoordinator};

use crate::config::BinlogConfig;
use crate::dir::{LogDir, MAX_FILE_SEQUENCE};
use crate::error::{CoreError, CoreResult, IoOp};
use crate::index::{IndexEntry, LogIndex};
use crate::notify::UpdateNotifier;
use crate::reader::BinlogReader;
use crate::types::{unix_now, LogPosition, TransactionId};
use binlog_codec::{
    ChecksumAlg, Event, EventBody, EventFlags, FormatDescriptionEvent, Gtid, GtidEvent, GtidSet,
    RawEvent, RecordSlices, BINLOG_MAGIC, MAGIC_LEN,
};
use binlog_storage::{FileBackend, StorageBackend};
use parking_lot::{Mutex, RwLock};
use std::fs;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, error, info, warn};

/// Record written after a group's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitMarker {
    /// Two-phase end marker carrying the transaction manager's id.
    Xid(TransactionId),
    /// Statement end marker such as `COMMIT` or `ROLLBACK`.
    Query(String),
    /// The content is a single self-terminating statement.
    None,
}

/// One group handed over by a session cache.
#[derive(Debug, Clone)]
pub struct CacheFlush {
    /// Concatenated records, framed without checksums at cache-relative
    /// positions.
    pub content: Vec<u8>,
    /// Record that ends the group.
    pub commit: CommitMarker,
    /// When set, the content is replaced by one incident record carrying
    /// this message.
    pub incident: Option<String>,
}

impl CacheFlush {
    /// A group ending with an Xid marker.
    #[must_use]
    pub fn two_phase(content: Vec<u8>, xid: TransactionId) -> Self {
        Self {
            content,
            commit: CommitMarker::Xid(xid),
            incident: None,
        }
    }

    /// A group ending with a `COMMIT` query.
    #[must_use]
    pub fn committed(content: Vec<u8>) -> Self {
        Self {
            content,
            commit: CommitMarker::Query("COMMIT".to_string()),
            incident: None,
        }
    }

    /// A single statement.
    #[must_use]
    pub fn statement(content: Vec<u8>) -> Self {
        Self {
            content,
            commit: CommitMarker::None,
            incident: None,
        }
    }

    /// An incident in place of lost content.
    #[must_use]
    pub fn incident(message: impl Into<String>) -> Self {
        Self {
            content: Vec::new(),
            commit: CommitMarker::None,
            incident: Some(message.into()),
        }
    }
}

/// Where a flushed group landed.
#[derive(Debug)]
pub struct FlushOutcome {
    /// Offset of the group's first record.
    pub start: LogPosition,
    /// Offset just past the group.
    pub end: LogPosition,
    /// GTID assigned to the group, when GTID mode is on.
    pub gtid: Option<Gtid>,
    /// Held until the engine commit completes; present for Xid groups.
    pub ticket: Option<CommitTicket>,
}

/// One file of the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFileInfo {
    /// File name.
    pub name: String,
    /// Absolute path.
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
}

/// Snapshot of the manager's state.
#[derive(Debug, Clone)]
pub struct BinlogStatus {
    /// Published end of the active file.
    pub active: LogPosition,
    /// Files in the index, oldest first.
    pub files: Vec<String>,
    /// Two-phase groups whose tickets are still held.
    pub prepared: usize,
    /// Why logging is disabled, if it is.
    pub disabled: Option<String>,
    /// Every GTID logged so far.
    pub gtid_executed: GtidSet,
    /// True after [`LogFileManager::close`].
    pub closed: bool,
}

/// A reader that keeps its file from being purged.
pub struct PinnedReader {
    reader: BinlogReader,
    _pin: FilePin,
}

impl Deref for PinnedReader {
    type Target = BinlogReader;

    fn deref(&self) -> &BinlogReader {
        &self.reader
    }
}

impl DerefMut for PinnedReader {
    fn deref_mut(&mut self) -> &mut BinlogReader {
        &mut self.reader
    }
}

#[derive(Debug)]
struct ActiveLog {
    name: String,
    seq: u32,
    backend: FileBackend,
    fde_flags: EventFlags,
    size: u64,
    logged_gtids: GtidSet,
    /// Logical clock of the current file.
    sequence_number: i64,
    unsynced: u32,
    closed: bool,
}

/// The binary log.
pub struct LogFileManager {
    config: BinlogConfig,
    dir: LogDir,
    log: Mutex<ActiveLog>,
    index: Mutex<LogIndex>,
    prepared: Arc<PreparedCounter>,
    notifier: Arc<UpdateNotifier>,
    hooks: FlushHooks,
    fatal: RwLock<Option<String>>,
    rotate_pending: AtomicBool,
    pins: ReaderPins,
    recovery: RecoveryReport,
}

impl std::fmt::Debug for LogFileManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogFileManager")
            .field("dir", &self.dir.path())
            .field("base_name", &self.config.base_name)
            .finish_non_exhaustive()
    }
}

impl LogFileManager {
    /// Opens the log in `config.dir`.
    ///
    /// Finishes any interrupted purge, validates the index against the
    /// files on disk, recovers the newest file if it was left in use, and
    /// starts a new active file.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Locked`] if another manager has the directory
    /// - [`CoreError::Inconsistent`] if the index names a missing file or
    ///   the newest file holds an invalid record sequence
    /// - [`CoreError::Fatal`] if the newest file's format description is
    ///   unreadable
    /// - any error from `coordinator`
    pub fn open(
        config: BinlogConfig,
        coordinator: &mut dyn TransactionCoordinator,
    ) -> CoreResult<Self> {
        let dir = LogDir::open(&config.dir, &config.base_name)?;
        let mut index = LogIndex::open(&dir)?;
        purge::reconcile(&dir, &mut index)?;

        for entry in index.entries() {
            if !entry.path.exists() {
                return Err(CoreError::inconsistent(format!(
                    "index lists {} but the file is missing",
                    entry.name
                )));
            }
        }
        let last_seq = match index.last() {
            Some(entry) => dir.sequence_of(&entry.name).ok_or_else(|| {
                CoreError::inconsistent(format!("unexpected file name {}", entry.name))
            })?,
            None => 0,
        };
        remove_orphans(&dir, &index, last_seq)?;

        let (recovery, logged_gtids) = match index.last() {
            Some(entry) => {
                let backend =
                    FileBackend::open(&entry.path).map_err(CoreError::io_at(IoOp::Open))?;
                recovery::recover_file(Box::new(backend), &entry.name, coordinator)?
            }
            None => (RecoveryReport::default(), GtidSet::new()),
        };

        let seq = next_sequence(last_seq)?;
        let name = dir.file_name(seq);
        let mut backend = FileBackend::create_new(&dir.file_path(&name))
            .map_err(CoreError::io_at(IoOp::Open))?;
        let (size, fde_flags) = write_file_header(&mut backend, &config, &logged_gtids)?;
        index.append(&dir, &name)?;
        dir.sync()?;

        info!(
            dir = %dir.path().display(),
            file = %name,
            recovered = recovery.was_in_use,
            "binary log opened"
        );

        let notifier = Arc::new(UpdateNotifier::new());
        notifier.publish(LogPosition::new(&name, size));
        Ok(Self {
            log: Mutex::new(ActiveLog {
                name,
                seq,
                backend,
                fde_flags,
                size,
                logged_gtids,
                sequence_number: 0,
                unsynced: 0,
                closed: false,
            }),
            index: Mutex::new(index),
            prepared: Arc::new(PreparedCounter::new()),
            notifier,
            hooks: FlushHooks::new(),
            fatal: RwLock::new(None),
            rotate_pending: AtomicBool::new(false),
            pins: ReaderPins::default(),
            recovery,
            config,
            dir,
        })
    }

    /// Returns the configuration the log was opened with.
    #[must_use]
    pub fn config(&self) -> &BinlogConfig {
        &self.config
    }

    /// Returns the log directory.
    #[must_use]
    pub fn dir_path(&self) -> &Path {
        self.dir.path()
    }

    /// Returns what recovery found when the log was opened.
    #[must_use]
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Returns the flush observer list.
    #[must_use]
    pub fn hooks(&self) -> &FlushHooks {
        &self.hooks
    }

    /// Returns the notifier readers wait on.
    #[must_use]
    pub fn notifier(&self) -> &Arc<UpdateNotifier> {
        &self.notifier
    }

    /// Returns the counter of outstanding commit tickets.
    #[must_use]
    pub fn prepared(&self) -> &Arc<PreparedCounter> {
        &self.prepared
    }

    /// Returns the reason logging was disabled, if it was.
    #[must_use]
    pub fn disabled_reason(&self) -> Option<String> {
        self.fatal.read().clone()
    }

    fn check_enabled(&self) -> CoreResult<()> {
        match self.fatal.read().as_ref() {
            Some(message) => Err(CoreError::fatal(message.clone())),
            None => Ok(()),
        }
    }

    /// Disables logging; only the first reason is kept and logged.
    fn disable(&self, message: String) -> CoreError {
        let mut fatal = self.fatal.write();
        match fatal.as_ref() {
            Some(first) => CoreError::fatal(first.clone()),
            None => {
                error!(reason = %message, "binary logging disabled");
                *fatal = Some(message.clone());
                CoreError::fatal(message)
            }
        }
    }

    /// Appends one group and returns where it landed.
    ///
    /// The group is laid out as a Gtid (or anonymous Gtid) record, the
    /// re-framed cache content, and the commit marker, and is written with
    /// a single append. An incident flush writes a lone incident record
    /// and forces a rotation.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Fatal`] if logging is disabled or the append fails
    /// - [`CoreError::HookAborted`] if an observer vetoes or fails
    /// - [`CoreError::Closed`] after [`LogFileManager::close`]
    pub fn write(&self, flush: CacheFlush) -> CoreResult<FlushOutcome> {
        self.check_enabled()?;
        let mut log = self.log.lock();
        if log.closed {
            return Err(CoreError::Closed);
        }
        self.check_enabled()?;

        let incident = flush.incident.is_some();
        let two_phase = !incident && matches!(flush.commit, CommitMarker::Xid(_));
        if !incident && flush.content.is_empty() && flush.commit == CommitMarker::None {
            return Err(CoreError::invalid_operation("empty group"));
        }

        let start = LogPosition::new(&log.name, log.size);
        let mut ctx = FlushContext {
            stage: FlushStage::BeforeFlush,
            start: start.clone(),
            end: start.clone(),
            len: 0,
            two_phase,
            incident,
        };
        self.hooks.run(&ctx)?;

        let (group, gtid) = self.build_group(&log, &flush)?;
        if let Err(e) = log.backend.append(&group) {
            return Err(self.disable(format!("append to {} failed: {e}", log.name)));
        }
        if let Err(e) = log.backend.flush() {
            return Err(self.disable(format!("flush of {} failed: {e}", log.name)));
        }
        log.size += group.len() as u64;
        if !incident {
            log.sequence_number += 1;
        }
        let end = LogPosition::new(&log.name, log.size);

        ctx.stage = FlushStage::AfterFlush;
        ctx.end = end.clone();
        ctx.len = group.len() as u64;
        let mut hook_result = self.hooks.run(&ctx);

        log.unsynced += 1;
        if self.config.sync_period > 0 && log.unsynced >= self.config.sync_period {
            if let Err(e) = log.backend.sync() {
                return Err(self.disable(format!("sync of {} failed: {e}", log.name)));
            }
            log.unsynced = 0;
        }
        ctx.stage = FlushStage::AfterSync;
        if hook_result.is_ok() {
            hook_result = self.hooks.run(&ctx);
        }

        if let Some(gtid) = gtid {
            log.logged_gtids.add(gtid);
        }
        self.notifier.publish(end.clone());
        debug!(file = %log.name, offset = start.offset, len = group.len(), "group flushed");

        let ticket = two_phase.then(|| CommitTicket::new(Arc::clone(&self.prepared), end.clone()));
        if incident {
            warn!(file = %log.name, "incident logged; rotating");
            self.rotate_locked(&mut log)?;
        } else if log.size >= self.config.max_file_size {
            if ticket.is_some() {
                self.rotate_pending.store(true, Ordering::SeqCst);
            } else {
                self.rotate_locked(&mut log)?;
            }
        }
        drop(log);

        hook_result?;
        Ok(FlushOutcome {
            start,
            end,
            gtid,
            ticket,
        })
    }

    fn build_group(&self, log: &ActiveLog, flush: &CacheFlush) -> CoreResult<(Vec<u8>, Option<Gtid>)> {
        let alg = self.config.checksum;
        let server_id = self.config.server_id;
        let now = unix_now();
        let mut out = Vec::with_capacity(flush.content.len() + 128);
        let mut pos = log.size;

        if let Some(message) = &flush.incident {
            let record = Event::new(EventBody::incident(message.clone()), server_id, now)
                .encode_at(pos, alg)?;
            out.extend_from_slice(&record);
            return Ok((out, None));
        }

        let sequence_number = log.sequence_number + 1;
        let (mut marker, gtid) = if self.config.gtid_mode {
            let sid = self.config.server_uuid;
            let gno = log.logged_gtids.last_gno(&sid).unwrap_or(0) + 1;
            let gtid = Gtid::new(sid, gno);
            (EventBody::Gtid(GtidEvent::assigned(gtid)), Some(gtid))
        } else {
            (EventBody::AnonymousGtid(GtidEvent::anonymous()), None)
        };
        if let EventBody::Gtid(g) | EventBody::AnonymousGtid(g) = &mut marker {
            g.sequence_number = sequence_number;
            g.last_committed = sequence_number - 1;
        }
        let record = Event::new(marker, server_id, now).encode_at(pos, alg)?;
        pos += record.len() as u64;
        out.extend_from_slice(&record);

        for slice in RecordSlices::new(&flush.content) {
            let raw = RawEvent::from_bytes(slice?.to_vec())?;
            let framed = raw.reframe(ChecksumAlg::Off, alg, pos)?;
            pos += framed.len() as u64;
            out.extend_from_slice(framed.as_bytes());
        }

        let end_marker = match &flush.commit {
            CommitMarker::Xid(xid) => Some(EventBody::Xid { xid: xid.as_u64() }),
            CommitMarker::Query(text) => Some(EventBody::query("", text.clone())),
            CommitMarker::None => None,
        };
        if let Some(body) = end_marker {
            out.extend_from_slice(&Event::new(body, server_id, now).encode_at(pos, alg)?);
        }
        Ok((out, gtid))
    }

    /// Releases a commit ticket and performs a rotation deferred while
    /// tickets were outstanding.
    ///
    /// # Errors
    ///
    /// Returns a rotation error.
    pub fn finish_commit(&self, ticket: CommitTicket) -> CoreResult<()> {
        drop(ticket);
        if !self.rotate_pending.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let mut log = self.log.lock();
        if log.closed || self.check_enabled().is_err() {
            return Ok(());
        }
        if log.size >= self.config.max_file_size {
            self.rotate_locked(&mut log)?;
        }
        Ok(())
    }

    /// Rotates to a new file. Without `force`, only rotates if the active
    /// file has reached the size limit. Returns true if a rotation happened.
    ///
    /// Blocks until every outstanding commit ticket has been released.
    ///
    /// # Errors
    ///
    /// [`CoreError::Fatal`] if the new file cannot be created.
    pub fn rotate(&self, force: bool) -> CoreResult<bool> {
        self.check_enabled()?;
        let mut log = self.log.lock();
        if log.closed {
            return Err(CoreError::Closed);
        }
        if !force && log.size < self.config.max_file_size {
            return Ok(false);
        }
        self.rotate_locked(&mut log)?;
        Ok(true)
    }

    fn rotate_locked(&self, log: &mut ActiveLog) -> CoreResult<()> {
        self.prepared.wait_drained();
        self.rotate_pending.store(false, Ordering::SeqCst);

        let seq = next_sequence(log.seq).map_err(|e| self.disable(e.to_string()))?;
        let next = self.dir.file_name(seq);
        let rotate = Event::new(
            EventBody::Rotate {
                position: MAGIC_LEN,
                next_file: next.clone(),
            },
            self.config.server_id,
            unix_now(),
        )
        .encode_at(log.size, self.config.checksum)?;

        let closed_old = log
            .backend
            .append(&rotate)
            .and_then(|_| log.backend.sync())
            .map_err(|e| e.to_string())
            .and_then(|()| {
                recovery::clear_in_use(&mut log.backend, log.fde_flags).map_err(|e| e.to_string())
            });
        if let Err(e) = closed_old {
            return Err(self.disable(format!("closing {} failed: {e}", log.name)));
        }
        log.size += rotate.len() as u64;
        let old_end = LogPosition::new(&log.name, log.size);

        let mut backend = match FileBackend::create_new(&self.dir.file_path(&next)) {
            Ok(backend) => backend,
            Err(e) => return Err(self.disable(format!("cannot create {next}: {e}"))),
        };
        let (size, fde_flags) = write_file_header(&mut backend, &self.config, &log.logged_gtids)
            .map_err(|e| self.disable(format!("cannot initialize {next}: {e}")))?;
        let indexed = self
            .index
            .lock()
            .append(&self.dir, &next)
            .and_then(|()| self.dir.sync());
        if let Err(e) = indexed {
            return Err(self.disable(format!("cannot add {next} to the index: {e}")));
        }

        info!(from = %log.name, to = %next, "rotated binary log");
        // Readers of the old file see its final length before the switch.
        self.notifier.publish(old_end);
        log.name = next;
        log.seq = seq;
        log.backend = backend;
        log.fde_flags = fde_flags;
        log.size = size;
        log.sequence_number = 0;
        log.unsynced = 0;
        self.notifier.publish(LogPosition::new(&log.name, log.size));
        Ok(())
    }

    /// Returns the published end of the log.
    #[must_use]
    pub fn end_position(&self) -> LogPosition {
        match self.notifier.snapshot().1 {
            Some(end) => end,
            None => {
                let log = self.log.lock();
                LogPosition::new(&log.name, log.size)
            }
        }
    }

    /// Returns the name of the active file.
    #[must_use]
    pub fn active_file(&self) -> String {
        self.log.lock().name.clone()
    }

    /// Returns every GTID logged so far.
    #[must_use]
    pub fn gtid_executed(&self) -> GtidSet {
        self.log.lock().logged_gtids.clone()
    }

    /// Returns the index entries, oldest first.
    #[must_use]
    pub fn index_entries(&self) -> Vec<IndexEntry> {
        self.index.lock().entries().to_vec()
    }

    /// Returns the oldest file in the index.
    #[must_use]
    pub fn first_file(&self) -> Option<String> {
        self.index.lock().entries().first().map(|e| e.name.clone())
    }

    /// Returns the file after `name` in the index.
    #[must_use]
    pub fn next_file(&self, name: &str) -> Option<String> {
        self.index.lock().next_after(name).map(|e| e.name.clone())
    }

    /// Returns true if `name` is in the index.
    #[must_use]
    pub fn contains_file(&self, name: &str) -> bool {
        self.index.lock().find(name).is_some()
    }

    /// Lists the files in the index with their sizes.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a file cannot be inspected.
    pub fn list_files(&self) -> CoreResult<Vec<LogFileInfo>> {
        self.index_entries()
            .into_iter()
            .map(|entry| {
                let size = fs::metadata(&entry.path)
                    .map_err(CoreError::io_at(IoOp::Read))?
                    .len();
                Ok(LogFileInfo {
                    name: entry.name,
                    path: entry.path,
                    size,
                })
            })
            .collect()
    }

    /// Returns a snapshot of the manager's state.
    #[must_use]
    pub fn status(&self) -> BinlogStatus {
        let (gtid_executed, closed) = {
            let log = self.log.lock();
            (log.logged_gtids.clone(), log.closed)
        };
        BinlogStatus {
            active: self.end_position(),
            files: self.index_entries().into_iter().map(|e| e.name).collect(),
            prepared: self.prepared.current(),
            disabled: self.disabled_reason(),
            gtid_executed,
            closed,
        }
    }

    /// Opens a reader on `name`.
    ///
    /// A reader on the active file is bounded by the published end; call
    /// [`BinlogReader::set_limit`] with a newer [`LogFileManager::end_position`]
    /// to see later groups. The file cannot be purged while the reader lives.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Protocol`] for an unknown file, or an I/O or
    /// codec error.
    pub fn open_reader(&self, name: &str) -> CoreResult<PinnedReader> {
        let pin = self.pins.pin(name);
        let path = self
            .index
            .lock()
            .find(name)
            .map(|e| e.path.clone())
            .ok_or_else(|| CoreError::protocol(format!("log file {name} is not in the index")))?;
        let backend = FileBackend::open_read_only(&path).map_err(CoreError::io_at(IoOp::Open))?;
        let mut reader = BinlogReader::open(Box::new(backend), name)?;
        if let Some(end) = self.notifier.snapshot().1 {
            if end.file == name {
                reader.set_limit(Some(end.offset));
            }
        }
        Ok(PinnedReader { reader, _pin: pin })
    }

    /// Removes files preceding the one that contains `position`.
    ///
    /// Never removes the active file or a file a reader has open; the purge
    /// stops at the first such file. Returns the removed names.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Protocol`] if `position.file` is not in the
    /// index, or an I/O error.
    pub fn purge_before(&self, position: &LogPosition) -> CoreResult<Vec<String>> {
        self.purge_to(&position.file)
    }

    /// Removes every file strictly before `name`.
    ///
    /// # Errors
    ///
    /// Same as [`LogFileManager::purge_before`].
    pub fn purge_to(&self, name: &str) -> CoreResult<Vec<String>> {
        let active = self.active_file();
        let mut index = self.index.lock();
        purge::reconcile(&self.dir, &mut index)?;
        let cutoff = index
            .position_of(name)
            .ok_or_else(|| CoreError::protocol(format!("log file {name} is not in the index")))?;
        let victims = purge::select_victims(index.entries(), cutoff, &active, &self.pins);
        self.run_purge(&mut index, victims)
    }

    /// Removes files last modified before `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error.
    pub fn purge_before_time(&self, cutoff: SystemTime) -> CoreResult<Vec<String>> {
        let active = self.active_file();
        let mut index = self.index.lock();
        purge::reconcile(&self.dir, &mut index)?;
        let count = purge::count_older_than(index.entries(), cutoff)?;
        let victims = purge::select_victims(index.entries(), count, &active, &self.pins);
        self.run_purge(&mut index, victims)
    }

    fn run_purge(&self, index: &mut LogIndex, victims: Vec<String>) -> CoreResult<Vec<String>> {
        if victims.is_empty() {
            return Ok(victims);
        }
        purge::register(&self.dir, &victims)?;
        purge::complete(&self.dir, index, &victims)?;
        Ok(victims)
    }

    /// Closes the log cleanly.
    ///
    /// Waits for outstanding tickets, appends a Stop record, clears the
    /// in-use flag and wakes every waiting reader. Dropping the manager
    /// without calling this leaves the file in use, as a crash would.
    ///
    /// # Errors
    ///
    /// Returns an I/O error; logging is disabled in that case.
    pub fn close(&self) -> CoreResult<()> {
        let mut log = self.log.lock();
        if log.closed {
            return Ok(());
        }
        log.closed = true;
        let result = if self.check_enabled().is_ok() {
            self.write_stop(&mut log)
        } else {
            Ok(())
        };
        self.notifier.shutdown();
        info!(file = %log.name, "binary log closed");
        result
    }

    fn write_stop(&self, log: &mut ActiveLog) -> CoreResult<()> {
        self.prepared.wait_drained();
        let stop = Event::new(EventBody::Stop, self.config.server_id, unix_now())
            .encode_at(log.size, self.config.checksum)?;
        let written = log
            .backend
            .append(&stop)
            .and_then(|_| log.backend.sync())
            .map_err(|e| e.to_string())
            .and_then(|()| {
                recovery::clear_in_use(&mut log.backend, log.fde_flags).map_err(|e| e.to_string())
            });
        if let Err(e) = written {
            return Err(self.disable(format!("closing {} failed: {e}", log.name)));
        }
        log.size += stop.len() as u64;
        self.notifier.publish(LogPosition::new(&log.name, log.size));
        Ok(())
    }
}

fn next_sequence(current: u32) -> CoreResult<u32> {
    if current >= MAX_FILE_SEQUENCE {
        return Err(CoreError::invalid_operation(format!(
            "log file sequence exhausted at {current}"
        )));
    }
    Ok(current + 1)
}

/// Deletes files numbered past the newest index entry: a rotation that
/// crashed before updating the index leaves at most a header in them.
fn remove_orphans(dir: &LogDir, index: &LogIndex, last_seq: u32) -> CoreResult<()> {
    for (seq, name) in dir.files_on_disk()? {
        if seq > last_seq {
            warn!(file = %name, "removing log file missing from the index");
            fs::remove_file(dir.file_path(&name)).map_err(CoreError::io_at(IoOp::Write))?;
        } else if index.find(&name).is_none() {
            debug!(file = %name, "ignoring unindexed log file");
        }
    }
    Ok(())
}

/// Writes the magic, an in-use format description and the PreviousGtids
/// record, and syncs. Returns the resulting size and the description flags.
fn write_file_header(
    backend: &mut FileBackend,
    config: &BinlogConfig,
    previous: &GtidSet,
) -> CoreResult<(u64, EventFlags)> {
    let now = unix_now();
    let flags = EventFlags::BINLOG_IN_USE;
    let mut header = BINLOG_MAGIC.to_vec();
    let fde = Event::new(
        EventBody::FormatDescription(FormatDescriptionEvent::new(
            config.server_version.clone(),
            config.checksum,
        )),
        config.server_id,
        now,
    )
    .with_flags(flags);
    header.extend_from_slice(&fde.encode_at(header.len() as u64, config.checksum)?);
    let gtids = Event::new(EventBody::PreviousGtids(previous.clone()), config.server_id, now);
    header.extend_from_slice(&gtids.encode_at(header.len() as u64, config.checksum)?);

    backend.append(&header).map_err(CoreError::io_at(IoOp::Write))?;
    backend.sync().map_err(CoreError::io_at(IoOp::Sync))?;
    Ok((header.len() as u64, flags))
}
