//! Streams the log to one replica.
//!
//! ```text
//!  validate start ─► [synthetic Rotate] ─► FormatDescription ─► records ─┐
//!                                                ▲                       │
//!                                                └──── next file ◄───────┤ Rotate / Stop
//!                                                                        │
//!                                     wait for publish / heartbeat ◄─────┘ end of log
//! ```
//!
//! The sender runs on a blocking thread. Every wait is bounded by the poll
//! interval so the stop flags are re-checked even if a wakeup is lost.

use crate::cursor::SenderCursor;
use crate::error::{ReplicationError, ReplicationResult};
use crate::protocol::{DumpRequest, Packet};
use crate::sink::EventSink;
use binlog_codec::{
    ChecksumAlg, Event, EventBody, EventFlags, EventType, RawEvent, MAGIC_LEN,
};
use binlog_core::{
    classify_raw, BoundaryParser, BoundaryToken, LogFileManager, LogPosition, ParserState,
    PinnedReader, WaitOutcome,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default bound on a single wait for new data.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Counters for one dump session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SenderStats {
    /// Records sent, synthetic ones included.
    pub events: u64,
    /// Bytes of record data sent.
    pub bytes: u64,
    /// Records withheld because their transaction was excluded.
    pub skipped: u64,
    /// Heartbeats sent while idle.
    pub heartbeats: u64,
}

/// One open file being streamed.
struct OpenFile {
    name: String,
    reader: PinnedReader,
    alg: ChecksumAlg,
    format: RawEvent,
    format_end: u64,
}

/// Streams records from a [`LogFileManager`] to an [`EventSink`].
pub struct ReplicaSender {
    manager: Arc<LogFileManager>,
    cursor: SenderCursor,
    non_blocking: bool,
    poll_interval: Duration,
    stop_flags: Vec<Arc<AtomicBool>>,
    stats: SenderStats,
}

impl std::fmt::Debug for ReplicaSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaSender")
            .field("cursor", &self.cursor)
            .field("non_blocking", &self.non_blocking)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl ReplicaSender {
    /// Creates a sender that starts at the cursor's position.
    #[must_use]
    pub fn new(manager: Arc<LogFileManager>, cursor: SenderCursor) -> Self {
        Self {
            manager,
            cursor,
            non_blocking: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            stop_flags: Vec::new(),
            stats: SenderStats::default(),
        }
    }

    /// Creates a sender for a replica's request.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicationError::Protocol`] if the request asks for the
    /// oldest file of an empty log.
    pub fn from_request(
        manager: Arc<LogFileManager>,
        request: &DumpRequest,
        default_heartbeat: Option<Duration>,
    ) -> ReplicationResult<Self> {
        let file = match &request.start_file {
            Some(file) => file.clone(),
            None => manager
                .first_file()
                .ok_or_else(|| ReplicationError::protocol("the log has no files"))?,
        };
        let cursor = SenderCursor::new(LogPosition::new(file, request.start_offset))
            .with_exclude(request.exclude.clone())
            .with_checksum(request.checksum)
            .with_heartbeat(request.heartbeat.or(default_heartbeat));
        Ok(Self::new(manager, cursor).non_blocking(request.non_blocking))
    }

    /// Ends the stream with EOF at the end of the log instead of waiting.
    #[must_use]
    pub fn non_blocking(mut self, value: bool) -> Self {
        self.non_blocking = value;
        self
    }

    /// Sets the longest single wait for new data.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Adds a flag that stops the sender when set.
    #[must_use]
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop_flags.push(flag);
        self
    }

    /// Returns the cursor; its position is just past the last record read.
    #[must_use]
    pub fn cursor(&self) -> &SenderCursor {
        &self.cursor
    }

    /// Returns the counters so far.
    #[must_use]
    pub fn stats(&self) -> SenderStats {
        self.stats
    }

    /// Streams until the end of the log (non-blocking), a stop flag, log
    /// shutdown or an error.
    ///
    /// Errors other than a disconnect are also sent to the sink as an
    /// error packet before being returned.
    ///
    /// # Errors
    ///
    /// - [`ReplicationError::Protocol`] for an invalid start position
    /// - a codec error for a corrupt or torn record
    /// - [`ReplicationError::Disconnected`] if the sink goes away
    pub fn run(&mut self, sink: &mut dyn EventSink) -> ReplicationResult<SenderStats> {
        info!(
            file = %self.cursor.position.file,
            offset = self.cursor.position.offset,
            excluded = self.cursor.exclude.count(),
            "replica sender started"
        );
        let result = self.stream(sink);
        match &result {
            Ok(()) => info!(
                events = self.stats.events,
                skipped = self.stats.skipped,
                position = %self.cursor.position,
                "replica sender stopped"
            ),
            Err(e) if e.is_disconnect() => debug!(position = %self.cursor.position, "replica disconnected"),
            Err(e) => {
                warn!(position = %self.cursor.position, error = %e, "replica sender failed");
                let _ = sink.send(Packet::Error(e.to_string()));
            }
        }
        result.map(|()| self.stats)
    }

    fn should_stop(&self) -> bool {
        self.stop_flags.iter().any(|f| f.load(Ordering::SeqCst))
    }

    fn stream(&mut self, sink: &mut dyn EventSink) -> ReplicationResult<()> {
        let mut file = self.open_file(&self.cursor.position.file.clone())?;
        let start = self.cursor.position.offset.max(MAGIC_LEN);
        let length = file.reader.length()?;
        if start > length {
            return Err(ReplicationError::protocol(format!(
                "start offset {start} is past the end of {} ({length} bytes)",
                file.name
            )));
        }
        if start > MAGIC_LEN && start < file.format_end {
            return Err(ReplicationError::protocol(format!(
                "start offset {start} is inside the format description of {}",
                file.name
            )));
        }

        let initial = start == MAGIC_LEN;
        let at_end = !initial && start == length;
        let gtids_unknown =
            !self.cursor.exclude.is_empty() && !Self::has_previous_gtids(&mut file)?;
        if initial || at_end || gtids_unknown {
            self.send_rotate(sink, &file.name, start)?;
        }
        self.send_format(sink, &file, !initial)?;
        file.reader.seek(if initial { file.format_end } else { start })?;
        self.cursor.position = LogPosition::new(&file.name, file.reader.position());

        let notifier = Arc::clone(self.manager.notifier());
        let mut parser = BoundaryParser::new();
        let mut skipping = false;
        let mut shutting_down = false;
        let mut last_sent = Instant::now();

        loop {
            if self.should_stop() {
                return Ok(());
            }
            let (generation, _) = notifier.snapshot();
            self.refresh_limit(&mut file);

            if let Some(event) = file.reader.read_event()? {
                self.cursor.position.offset = file.reader.position();
                match event.event_type() {
                    EventType::Rotate => {
                        self.send_event(sink, &event, file.alg)?;
                        let next = match event.decode(file.alg)?.body {
                            EventBody::Rotate { next_file, .. } => next_file,
                            _ => return Err(ReplicationError::protocol("rotate body expected")),
                        };
                        file = self.switch_to(sink, &next, false)?;
                        parser.reset();
                        skipping = false;
                    }
                    EventType::Stop => {
                        self.send_event(sink, &event, file.alg)?;
                        if let Some(next) = self.manager.next_file(&file.name) {
                            file = self.switch_to(sink, &next, true)?;
                            parser.reset();
                            skipping = false;
                        }
                    }
                    _ => {
                        let skip = self.filter(&event, file.alg, &mut parser, &mut skipping)?;
                        if skip {
                            self.stats.skipped += 1;
                        } else {
                            self.send_event(sink, &event, file.alg)?;
                        }
                    }
                }
                last_sent = Instant::now();
                continue;
            }

            // End of the visible content. A file that is no longer active
            // will not grow; anything left in it is now visible.
            if self.manager.active_file() != file.name {
                file.reader.set_limit(None);
                if file.reader.position() < file.reader.length()? {
                    continue;
                }
                if let Some(next) = self.manager.next_file(&file.name) {
                    file = self.switch_to(sink, &next, true)?;
                    parser.reset();
                    skipping = false;
                    continue;
                }
            }

            if self.non_blocking || shutting_down {
                sink.send(Packet::Eof)?;
                return Ok(());
            }

            let timeout = match self.cursor.heartbeat {
                Some(interval) => interval
                    .saturating_sub(last_sent.elapsed())
                    .min(self.poll_interval),
                None => self.poll_interval,
            };
            match notifier.wait_for_change(generation, timeout) {
                WaitOutcome::Advanced(_) => {}
                WaitOutcome::TimedOut => {
                    if let Some(interval) = self.cursor.heartbeat {
                        if last_sent.elapsed() >= interval {
                            self.send_heartbeat(sink, &file)?;
                            last_sent = Instant::now();
                        }
                    }
                }
                // Drain what was published before shutdown, then end.
                WaitOutcome::Shutdown => shutting_down = true,
            }
        }
    }

    /// Decides whether `event` belongs to an excluded transaction.
    fn filter(
        &self,
        event: &RawEvent,
        alg: ChecksumAlg,
        parser: &mut BoundaryParser,
        skipping: &mut bool,
    ) -> ReplicationResult<bool> {
        let token = classify_raw(event, alg)?;
        if token == BoundaryToken::Gtid {
            *skipping = match event.decode(alg)?.body {
                EventBody::Gtid(marker) => marker
                    .gtid()
                    .is_some_and(|gtid| self.cursor.exclude.contains(&gtid)),
                _ => false,
            };
        }
        let skip = *skipping;
        match parser.feed(token) {
            ParserState::None => *skipping = false,
            ParserState::Error => {
                // Started mid-group or the file is unusual; stop filtering.
                parser.reset();
                *skipping = false;
            }
            _ => {}
        }
        Ok(skip)
    }

    fn open_file(&self, name: &str) -> ReplicationResult<OpenFile> {
        let mut reader = self.manager.open_reader(name)?;
        let alg = reader.checksum_alg();
        reader.seek(MAGIC_LEN)?;
        let format = match reader.read_event()? {
            Some(event) if event.event_type() == EventType::FormatDescription => event,
            _ => {
                return Err(ReplicationError::protocol(format!(
                    "{name} has no format description"
                )))
            }
        };
        let format_end = reader.position();
        Ok(OpenFile {
            name: name.to_string(),
            reader,
            alg,
            format,
            format_end,
        })
    }

    fn switch_to(
        &mut self,
        sink: &mut dyn EventSink,
        name: &str,
        announce: bool,
    ) -> ReplicationResult<OpenFile> {
        debug!(file = %name, "sender moving to next file");
        let file = self.open_file(name)?;
        if announce {
            self.send_rotate(sink, name, MAGIC_LEN)?;
        }
        self.send_format(sink, &file, false)?;
        self.cursor.position = LogPosition::new(name, file.format_end);
        Ok(file)
    }

    fn has_previous_gtids(file: &mut OpenFile) -> ReplicationResult<bool> {
        let saved = file.reader.position();
        file.reader.seek(file.format_end)?;
        let found = file
            .reader
            .read_event()?
            .is_some_and(|e| e.event_type() == EventType::PreviousGtids);
        file.reader.seek(saved)?;
        Ok(found)
    }

    /// Bounds the reader by the published end of the log.
    fn refresh_limit(&self, file: &mut OpenFile) {
        let end = self.manager.end_position();
        if end.file == file.name {
            file.reader.set_limit(Some(end.offset));
        } else if end.file > file.name {
            file.reader.set_limit(None);
        }
    }

    fn send_event(
        &mut self,
        sink: &mut dyn EventSink,
        event: &RawEvent,
        file_alg: ChecksumAlg,
    ) -> ReplicationResult<()> {
        let out = if file_alg == self.cursor.checksum {
            event.clone()
        } else {
            event.convert_checksum(file_alg, self.cursor.checksum)?
        };
        self.deliver(sink, out)
    }

    fn deliver(&mut self, sink: &mut dyn EventSink, event: RawEvent) -> ReplicationResult<()> {
        self.stats.events += 1;
        self.stats.bytes += event.len() as u64;
        sink.send(Packet::Event(event))
    }

    /// Sends the file's format description, framed for the replica, with
    /// the in-use flag cleared and, when the replica starts past it, a zero
    /// position.
    fn send_format(
        &mut self,
        sink: &mut dyn EventSink,
        file: &OpenFile,
        zero_position: bool,
    ) -> ReplicationResult<()> {
        let alg = self.cursor.checksum;
        let mut out = file.format.convert_checksum(file.alg, alg)?;
        let flags = out.header().flags.without(EventFlags::BINLOG_IN_USE);
        out.set_flags(flags, alg)?;
        if zero_position {
            out.set_log_pos(0, alg)?;
        }
        self.deliver(sink, out)
    }

    /// Sends a Rotate record that is not in any file, naming `name`.
    fn send_rotate(&mut self, sink: &mut dyn EventSink, name: &str, position: u64) -> ReplicationResult<()> {
        let body = EventBody::Rotate {
            position,
            next_file: name.to_string(),
        };
        let event = self.artificial(body, 0)?;
        self.deliver(sink, event)
    }

    fn send_heartbeat(&mut self, sink: &mut dyn EventSink, file: &OpenFile) -> ReplicationResult<()> {
        let position = u32::try_from(file.reader.position()).unwrap_or(u32::MAX);
        let body = EventBody::Heartbeat {
            log_file: file.name.clone(),
        };
        let event = self.artificial(body, position)?;
        self.stats.heartbeats += 1;
        debug!(file = %file.name, position, "heartbeat");
        self.deliver(sink, event)
    }

    fn artificial(&self, body: EventBody, log_pos: u32) -> ReplicationResult<RawEvent> {
        let alg = self.cursor.checksum;
        let bytes = Event::new(body, self.manager.config().server_id, 0)
            .with_flags(EventFlags::ARTIFICIAL)
            .encode_at(0, alg)?;
        let mut event = RawEvent::from_bytes(bytes)?;
        event.set_log_pos(log_pos, alg)?;
        Ok(event)
    }
}
