//! Per-connection logging context.
//!
//! A [`BinlogSession`] owns the two caches of one connection and is the
//! explicit context every logging call goes through. Caches are created on
//! first use.
//!
//! | Condition                                  | Cache        |
//! |--------------------------------------------|--------------|
//! | row-based capture                          | transaction  |
//! | direct non-transactional updates enabled   | transaction  |
//! | the changed object is transactional        | transaction  |
//! | the transaction cache is already non-empty | transaction  |
//! | otherwise                                  | statement    |
//!
//! The transaction cache always starts with a `BEGIN` query. The statement
//! cache is flushed as its own group at the end of every statement; unless
//! it holds a single statement, that group is wrapped in `BEGIN` and
//! `COMMIT` so readers see where it ends.

use super::trx_cache::{RowsKind, TransactionCache};
use crate::boundary::{classify_raw, BoundaryToken};
use crate::error::{CacheScope, CoreError, CoreResult};
use crate::manager::{CacheFlush, CommitMarker, CommitTicket, FlushOutcome, LogFileManager};
use crate::types::{unix_now, TransactionId};
use binlog_codec::{
    ChecksumAlg, Event, EventBody, QueryEvent, RawEvent, RecordSlices, RowsEvent, TableMapEvent,
};
use std::sync::Arc;
use tracing::debug;

/// Logging context of one connection.
#[derive(Debug)]
pub struct BinlogSession {
    manager: Arc<LogFileManager>,
    thread_id: u32,
    schema: String,
    stmt: Option<TransactionCache>,
    trx: Option<TransactionCache>,
    in_transaction: bool,
}

impl BinlogSession {
    /// Creates a session with empty caches.
    #[must_use]
    pub fn new(manager: Arc<LogFileManager>, thread_id: u32) -> Self {
        Self {
            manager,
            thread_id,
            schema: String::new(),
            stmt: None,
            trx: None,
            in_transaction: false,
        }
    }

    /// Sets the default schema written into query records.
    pub fn set_schema(&mut self, schema: impl Into<String>) {
        self.schema = schema.into();
    }

    /// Returns the manager this session logs to.
    #[must_use]
    pub fn manager(&self) -> &Arc<LogFileManager> {
        &self.manager
    }

    /// Returns true between [`BinlogSession::begin`] and the end of the
    /// transaction.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Returns the transaction cache, if it has been created.
    #[must_use]
    pub fn trx_cache(&self) -> Option<&TransactionCache> {
        self.trx.as_ref()
    }

    /// Returns the statement cache, if it has been created.
    #[must_use]
    pub fn stmt_cache(&self) -> Option<&TransactionCache> {
        self.stmt.as_ref()
    }

    fn query(&self, text: impl Into<String>) -> EventBody {
        let mut query = QueryEvent::new(self.schema.clone(), text);
        query.thread_id = self.thread_id;
        EventBody::Query(query)
    }

    fn routes_to_trx(&self, transactional: bool) -> bool {
        let config = self.manager.config();
        config.row_based
            || config.direct_non_trans_updates
            || transactional
            || self.trx.as_ref().is_some_and(|c| !c.is_empty())
    }

    /// Returns the transaction cache, creating it and writing `BEGIN` if it
    /// is empty.
    fn started_trx(&mut self) -> CoreResult<&mut TransactionCache> {
        let needs_begin = self.trx.as_ref().map_or(true, TransactionCache::is_empty);
        let begin = needs_begin.then(|| self.query("BEGIN"));
        let config = self.manager.config();
        let cache = self.trx.get_or_insert_with(|| {
            TransactionCache::new(
                CacheScope::Transaction,
                config.server_id,
                config.max_trx_cache_size,
                config.max_rows_event_size,
            )
        });
        if let Some(begin) = begin {
            cache.write(begin, unix_now())?;
        }
        Ok(cache)
    }

    fn stmt_cache_mut(&mut self) -> &mut TransactionCache {
        let config = self.manager.config();
        self.stmt.get_or_insert_with(|| {
            TransactionCache::new(
                CacheScope::Statement,
                config.server_id,
                config.max_stmt_cache_size,
                config.max_rows_event_size,
            )
        })
    }

    fn routed_cache(&mut self, transactional: bool) -> CoreResult<&mut TransactionCache> {
        if self.routes_to_trx(transactional) {
            let cache = self.started_trx()?;
            if !transactional {
                cache.mark_non_transactional();
            }
            Ok(cache)
        } else {
            Ok(self.stmt_cache_mut())
        }
    }

    /// Starts an explicit transaction.
    pub fn begin(&mut self) {
        self.in_transaction = true;
    }

    /// Logs one record for a change to a transactional or
    /// non-transactional object.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CapacityExceeded`] if the chosen cache is full.
    pub fn write_event(&mut self, body: EventBody, transactional: bool) -> CoreResult<()> {
        self.routed_cache(transactional)?.write(body, unix_now())
    }

    /// Logs a statement.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CapacityExceeded`] if the chosen cache is full.
    pub fn log_statement(&mut self, query: &str, transactional: bool) -> CoreResult<()> {
        let body = self.query(query);
        self.write_event(body, transactional)
    }

    /// Logs row changes, preceded by the table map on the table's first use
    /// in the group.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CapacityExceeded`] if the chosen cache is full.
    pub fn write_rows(
        &mut self,
        table: &TableMapEvent,
        kind: RowsKind,
        rows: RowsEvent,
        transactional: bool,
    ) -> CoreResult<()> {
        let now = unix_now();
        let cache = self.routed_cache(transactional)?;
        if !cache.is_table_mapped(table.table_id) {
            cache.write(EventBody::TableMap(table.clone()), now)?;
        }
        cache.add_rows(kind, rows, now)
    }

    /// Flags the current transaction as incomplete; its content is
    /// replaced by an incident record when it is flushed.
    pub fn mark_incident(&mut self, message: impl Into<String>) {
        // The cache exists even if writing BEGIN into it failed.
        let _ = self.started_trx();
        if let Some(cache) = self.trx.as_mut() {
            cache.mark_incident(message);
        }
    }

    /// Ends a statement: marks the last row record, flushes the statement
    /// cache as its own group, and commits the transaction cache when not
    /// inside an explicit transaction.
    ///
    /// # Errors
    ///
    /// Returns a flush error or the commit error.
    pub fn end_statement(&mut self, xid: Option<TransactionId>) -> CoreResult<Option<CommitTicket>> {
        if let Some(trx) = self.trx.as_mut() {
            trx.flush_pending(true)?;
        }
        self.flush_stmt_cache()?;
        if self.in_transaction {
            return Ok(None);
        }
        self.commit(xid)
    }

    fn flush_stmt_cache(&mut self) -> CoreResult<()> {
        let Some(stmt) = self.stmt.as_mut() else {
            return Ok(());
        };
        if stmt.is_empty() && stmt.incident().is_none() {
            stmt.reset();
            return Ok(());
        }
        let flush = if let Some(message) = stmt.incident() {
            CacheFlush::incident(message)
        } else {
            let content = stmt.finish()?;
            if is_single_statement(&content)? {
                CacheFlush::statement(content)
            } else {
                let begin = Event::new(self.query("BEGIN"), self.manager.config().server_id, unix_now());
                let mut wrapped = begin.encode_at(0, ChecksumAlg::Off)?;
                wrapped.extend_from_slice(&content);
                CacheFlush::committed(wrapped)
            }
        };
        if let Some(stmt) = self.stmt.as_mut() {
            stmt.reset();
        }
        self.manager.write(flush).map(|_| ())
    }

    /// Commits the transaction cache as one group.
    ///
    /// With an `xid` the group ends in an Xid marker and the returned ticket
    /// must be released (dropped or passed to
    /// [`LogFileManager::finish_commit`]) before this session logs again.
    /// Without one it ends in `COMMIT`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::CapacityExceeded`] if a write to the cache failed and
    ///   no incident was raised; the cache is discarded
    /// - any manager error
    pub fn commit(&mut self, xid: Option<TransactionId>) -> CoreResult<Option<CommitTicket>> {
        self.in_transaction = false;
        self.flush_stmt_cache()?;
        let Some(trx) = self.trx.as_mut() else {
            return Ok(None);
        };
        if trx.is_empty() && trx.incident().is_none() && !trx.has_write_error() {
            return Ok(None);
        }

        let flush = if let Some(message) = trx.incident() {
            CacheFlush::incident(message)
        } else if trx.has_write_error() {
            trx.reset();
            return Err(CoreError::CapacityExceeded {
                scope: CacheScope::Transaction,
                limit: self.manager.config().max_trx_cache_size,
            });
        } else {
            let content = trx.finish()?;
            match xid {
                Some(xid) => CacheFlush::two_phase(content, xid),
                None => CacheFlush::committed(content),
            }
        };
        trx.reset();
        let FlushOutcome { ticket, end, .. } = self.manager.write(flush)?;
        debug!(thread_id = self.thread_id, end = %end, "transaction committed");
        Ok(ticket)
    }

    /// Rolls back the transaction.
    ///
    /// If the cache holds changes to non-transactional objects they have
    /// already happened, so the content is logged followed by `ROLLBACK`.
    /// Otherwise the cache is discarded.
    ///
    /// # Errors
    ///
    /// Returns a manager error.
    pub fn rollback(&mut self) -> CoreResult<()> {
        self.in_transaction = false;
        self.flush_stmt_cache()?;
        let Some(trx) = self.trx.as_mut() else {
            return Ok(());
        };
        let flush = if let Some(message) = trx.incident() {
            Some(CacheFlush::incident(message))
        } else if trx.has_non_transactional() && !trx.has_write_error() {
            Some(CacheFlush {
                content: trx.finish()?,
                commit: CommitMarker::Query("ROLLBACK".to_string()),
                incident: None,
            })
        } else {
            None
        };
        trx.reset();
        if let Some(flush) = flush {
            self.manager.write(flush)?;
        }
        Ok(())
    }

    /// Sets a savepoint in the transaction cache, logging the `SAVEPOINT`
    /// statement first.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CapacityExceeded`] if the cache is full.
    pub fn savepoint(&mut self, name: &str) -> CoreResult<()> {
        let body = self.query(format!("SAVEPOINT `{name}`"));
        let cache = self.started_trx()?;
        cache.write(body, unix_now())?;
        cache.set_savepoint(name)
    }

    /// Rolls back to a savepoint.
    ///
    /// When the transaction has touched non-transactional objects, the
    /// cache is kept and a `ROLLBACK TO` statement is logged so replicas
    /// undo the same transactional work. Otherwise the cache is truncated.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] for an unknown savepoint.
    pub fn rollback_to_savepoint(&mut self, name: &str) -> CoreResult<()> {
        let body = self.query(format!("ROLLBACK TO `{name}`"));
        let cache = self
            .trx
            .as_mut()
            .filter(|c| c.has_savepoint(name))
            .ok_or_else(|| CoreError::invalid_operation(format!("savepoint {name} does not exist")))?;
        if cache.has_non_transactional() {
            cache.write(body, unix_now())
        } else {
            cache.rollback_to_savepoint(name)
        }
    }

    /// Logs a DDL statement. DDL commits any open transaction first and
    /// forms a group of its own.
    ///
    /// # Errors
    ///
    /// Returns a commit or manager error.
    pub fn log_ddl(&mut self, query: &str) -> CoreResult<FlushOutcome> {
        if let Some(ticket) = self.commit(None)? {
            self.manager.finish_commit(ticket)?;
        }
        let record = Event::new(self.query(query), self.manager.config().server_id, unix_now())
            .encode_at(0, ChecksumAlg::Off)?;
        self.manager.write(CacheFlush::statement(record))
    }
}

/// Returns true if `content` is exactly one record that closes its own
/// group.
fn is_single_statement(content: &[u8]) -> CoreResult<bool> {
    let mut records = RecordSlices::new(content);
    let Some(first) = records.next().transpose()? else {
        return Ok(false);
    };
    if records.next().is_some() {
        return Ok(false);
    }
    let record = RawEvent::from_bytes(first.to_vec())?;
    Ok(classify_raw(&record, ChecksumAlg::Off)? == BoundaryToken::Statement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::{BoundaryParser, ParserState};
    use crate::config::BinlogConfig;
    use crate::manager::NoopCoordinator;
    use binlog_codec::EventType;
    use tempfile::{tempdir, TempDir};

    fn manager(tmp: &TempDir, row_based: bool) -> Arc<LogFileManager> {
        let config = BinlogConfig::new(tmp.path()).row_based(row_based);
        Arc::new(LogFileManager::open(config, &mut NoopCoordinator).unwrap())
    }

    fn logged(mgr: &LogFileManager) -> Vec<RawEvent> {
        let mut reader = mgr.open_reader(&mgr.active_file()).unwrap();
        reader.set_limit(Some(mgr.end_position().offset));
        let mut out: Vec<RawEvent> = reader.events().map(|r| r.unwrap().1).collect();
        // Drop the file header.
        out.drain(..2);
        out
    }

    fn texts(events: &[RawEvent]) -> Vec<String> {
        events
            .iter()
            .map(|e| {
                let body = e.decode(ChecksumAlg::Crc32).unwrap().body;
                match body.query_text() {
                    Some(q) => q.to_string(),
                    None => body.event_type().to_string(),
                }
            })
            .collect()
    }

    fn table() -> TableMapEvent {
        TableMapEvent {
            table_id: 11,
            schema: "db".into(),
            table: "t".into(),
            column_types: vec![3],
            metadata: vec![0],
            ..TableMapEvent::default()
        }
    }

    fn rows(data: &[u8]) -> RowsEvent {
        RowsEvent {
            table_id: 11,
            column_count: 1,
            columns: vec![1],
            rows: data.to_vec(),
            ..RowsEvent::default()
        }
    }

    #[test]
    fn explicit_transaction_is_one_group() {
        let tmp = tempdir().unwrap();
        let mgr = manager(&tmp, true);
        let mut s = BinlogSession::new(Arc::clone(&mgr), 3);
        s.set_schema("db");
        s.begin();
        s.write_rows(&table(), RowsKind::Write, rows(b"a"), true).unwrap();
        s.write_rows(&table(), RowsKind::Write, rows(b"b"), true).unwrap();
        assert!(s.end_statement(None).unwrap().is_none());
        s.log_statement("UPDATE t SET a = 2", true).unwrap();
        s.end_statement(None).unwrap();
        assert_eq!(logged(&mgr).len(), 0);

        let ticket = s.commit(Some(TransactionId::new(77))).unwrap().unwrap();
        mgr.finish_commit(ticket).unwrap();

        let events = logged(&mgr);
        let types: Vec<EventType> = events.iter().map(RawEvent::event_type).collect();
        assert_eq!(
            types,
            vec![
                EventType::AnonymousGtid,
                EventType::Query,
                EventType::TableMap,
                EventType::WriteRows,
                EventType::Query,
                EventType::Xid
            ]
        );
        let mut parser = BoundaryParser::new();
        for e in &events {
            parser.feed(classify_raw(e, ChecksumAlg::Crc32).unwrap());
        }
        assert_eq!(parser.state(), ParserState::None);
        assert!(s.trx_cache().unwrap().is_empty());
    }

    #[test]
    fn autocommit_statement_commits_at_statement_end() {
        let tmp = tempdir().unwrap();
        let mgr = manager(&tmp, true);
        let mut s = BinlogSession::new(Arc::clone(&mgr), 1);
        s.log_statement("INSERT INTO t VALUES (1)", true).unwrap();
        assert!(s.end_statement(None).unwrap().is_none());
        assert_eq!(
            texts(&logged(&mgr))[1..],
            ["BEGIN", "INSERT INTO t VALUES (1)", "COMMIT"]
        );
    }

    #[test]
    fn non_transactional_change_uses_statement_cache() {
        let tmp = tempdir().unwrap();
        let mgr = manager(&tmp, false);
        let mut s = BinlogSession::new(Arc::clone(&mgr), 1);
        s.begin();
        s.log_statement("INSERT INTO myisam_t VALUES (1)", false).unwrap();
        assert!(s.stmt_cache().is_some());
        assert!(s.trx_cache().is_none());
        s.end_statement(None).unwrap();
        assert_eq!(
            texts(&logged(&mgr))[1..],
            ["INSERT INTO myisam_t VALUES (1)"]
        );

        // Once the transaction cache has content, everything follows it.
        s.log_statement("INSERT INTO innodb_t VALUES (1)", true).unwrap();
        s.log_statement("INSERT INTO myisam_t VALUES (2)", false).unwrap();
        assert!(s.stmt_cache().unwrap().is_empty());
        assert!(s.trx_cache().unwrap().has_non_transactional());
    }

    #[test]
    fn multi_statement_statement_cache_is_wrapped() {
        let tmp = tempdir().unwrap();
        let mgr = manager(&tmp, false);
        let mut s = BinlogSession::new(Arc::clone(&mgr), 1);
        s.log_statement("INSERT INTO myisam_a VALUES (1)", false).unwrap();
        s.write_event(EventBody::Intvar { kind: 2, value: 7 }, false)
            .unwrap();
        s.log_statement("INSERT INTO myisam_b VALUES (2)", false).unwrap();
        s.end_statement(None).unwrap();

        let events = logged(&mgr);
        let types: Vec<EventType> = events.iter().map(RawEvent::event_type).collect();
        assert_eq!(
            types,
            vec![
                EventType::AnonymousGtid,
                EventType::Query,
                EventType::Query,
                EventType::Intvar,
                EventType::Query,
                EventType::Query
            ]
        );
        let queries: Vec<String> = events
            .iter()
            .filter_map(|e| {
                let body = e.decode(ChecksumAlg::Crc32).unwrap().body;
                body.query_text().map(str::to_string)
            })
            .collect();
        assert_eq!(
            queries,
            [
                "BEGIN",
                "INSERT INTO myisam_a VALUES (1)",
                "INSERT INTO myisam_b VALUES (2)",
                "COMMIT"
            ]
        );

        let mut parser = BoundaryParser::new();
        for (i, e) in events.iter().enumerate() {
            parser.feed(classify_raw(e, ChecksumAlg::Crc32).unwrap());
            assert_eq!(parser.is_inside_transaction(), i + 1 < events.len(), "record {i}");
        }
        assert_eq!(parser.state(), ParserState::None);
    }

    #[test]
    fn single_context_record_is_wrapped() {
        let tmp = tempdir().unwrap();
        let mgr = manager(&tmp, false);
        let mut s = BinlogSession::new(Arc::clone(&mgr), 1);
        s.write_event(EventBody::Rand { seed1: 1, seed2: 2 }, false)
            .unwrap();
        s.end_statement(None).unwrap();

        let types: Vec<EventType> = logged(&mgr).iter().map(RawEvent::event_type).collect();
        assert_eq!(
            types,
            vec![
                EventType::AnonymousGtid,
                EventType::Query,
                EventType::Rand,
                EventType::Query
            ]
        );
    }

    #[test]
    fn rollback_discards_transactional_work() {
        let tmp = tempdir().unwrap();
        let mgr = manager(&tmp, true);
        let before = mgr.end_position();
        let mut s = BinlogSession::new(Arc::clone(&mgr), 1);
        s.begin();
        s.log_statement("INSERT INTO t VALUES (1)", true).unwrap();
        s.rollback().unwrap();
        assert_eq!(mgr.end_position(), before);
        assert!(!s.in_transaction());
    }

    #[test]
    fn rollback_with_non_transactional_changes_is_logged() {
        let tmp = tempdir().unwrap();
        let mgr = manager(&tmp, true);
        let mut s = BinlogSession::new(Arc::clone(&mgr), 1);
        s.begin();
        s.log_statement("INSERT INTO t VALUES (1)", true).unwrap();
        s.log_statement("INSERT INTO myisam_t VALUES (1)", false).unwrap();
        s.rollback().unwrap();
        assert_eq!(
            texts(&logged(&mgr))[1..],
            [
                "BEGIN",
                "INSERT INTO t VALUES (1)",
                "INSERT INTO myisam_t VALUES (1)",
                "ROLLBACK"
            ]
        );
    }

    #[test]
    fn rollback_to_savepoint_truncates_transactional_work() {
        let tmp = tempdir().unwrap();
        let mgr = manager(&tmp, true);
        let mut s = BinlogSession::new(Arc::clone(&mgr), 1);
        s.begin();
        s.log_statement("INSERT INTO t VALUES (1)", true).unwrap();
        s.savepoint("sp1").unwrap();
        let at_savepoint = s.trx_cache().unwrap().contents().to_vec();
        s.log_statement("INSERT INTO t VALUES (2)", true).unwrap();
        s.rollback_to_savepoint("sp1").unwrap();
        assert_eq!(s.trx_cache().unwrap().contents(), &at_savepoint[..]);
        s.commit(None).unwrap();

        assert_eq!(
            texts(&logged(&mgr))[1..],
            ["BEGIN", "INSERT INTO t VALUES (1)", "SAVEPOINT `sp1`", "COMMIT"]
        );
    }

    #[test]
    fn rollback_to_savepoint_with_non_transactional_changes_is_logged() {
        let tmp = tempdir().unwrap();
        let mgr = manager(&tmp, true);
        let mut s = BinlogSession::new(Arc::clone(&mgr), 1);
        s.begin();
        s.log_statement("INSERT INTO myisam_t VALUES (1)", false).unwrap();
        s.savepoint("sp1").unwrap();
        s.log_statement("INSERT INTO t VALUES (2)", true).unwrap();
        s.rollback_to_savepoint("sp1").unwrap();
        s.commit(None).unwrap();

        assert_eq!(
            texts(&logged(&mgr))[1..],
            [
                "BEGIN",
                "INSERT INTO myisam_t VALUES (1)",
                "SAVEPOINT `sp1`",
                "INSERT INTO t VALUES (2)",
                "ROLLBACK TO `sp1`",
                "COMMIT"
            ]
        );
    }

    #[test]
    fn unknown_savepoint_is_rejected() {
        let tmp = tempdir().unwrap();
        let mut s = BinlogSession::new(manager(&tmp, true), 1);
        s.begin();
        assert!(s.rollback_to_savepoint("nope").is_err());
    }

    #[test]
    fn overflow_without_non_transactional_changes_fails_commit() {
        let tmp = tempdir().unwrap();
        let config = BinlogConfig::new(tmp.path()).max_trx_cache_size(200);
        let mgr = Arc::new(LogFileManager::open(config, &mut NoopCoordinator).unwrap());
        let before = mgr.end_position();
        let mut s = BinlogSession::new(Arc::clone(&mgr), 1);
        s.begin();
        s.log_statement("INSERT INTO t VALUES (1)", true).unwrap();
        let big = format!("INSERT INTO t VALUES ('{}')", "x".repeat(300));
        assert!(matches!(
            s.log_statement(&big, true),
            Err(CoreError::CapacityExceeded { .. })
        ));
        assert!(matches!(
            s.commit(None),
            Err(CoreError::CapacityExceeded { .. })
        ));
        assert_eq!(mgr.end_position(), before);

        // The session keeps working.
        s.log_statement("INSERT INTO t VALUES (2)", true).unwrap();
        s.end_statement(None).unwrap();
        assert!(mgr.end_position().offset > before.offset);
    }

    #[test]
    fn overflow_after_non_transactional_change_logs_incident() {
        let tmp = tempdir().unwrap();
        let config = BinlogConfig::new(tmp.path()).max_trx_cache_size(200);
        let mgr = Arc::new(LogFileManager::open(config, &mut NoopCoordinator).unwrap());
        let mut s = BinlogSession::new(Arc::clone(&mgr), 1);
        s.begin();
        s.log_statement("INSERT INTO myisam_t VALUES (1)", false).unwrap();
        let big = format!("INSERT INTO t VALUES ('{}')", "x".repeat(300));
        assert!(s.log_statement(&big, true).is_err());
        assert!(s.commit(None).unwrap().is_none());

        // The incident forces a rotation; it is the last group of the old file.
        let mut reader = mgr.open_reader("binlog.000001").unwrap();
        let types: Vec<EventType> = reader
            .events()
            .map(|r| r.unwrap().1.event_type())
            .collect();
        assert_eq!(types[2..], [EventType::Incident, EventType::Rotate]);
    }

    #[test]
    fn explicit_incident_replaces_transaction() {
        let tmp = tempdir().unwrap();
        let mgr = manager(&tmp, true);
        let mut s = BinlogSession::new(Arc::clone(&mgr), 1);
        s.begin();
        s.log_statement("INSERT INTO t VALUES (1)", true).unwrap();
        s.mark_incident("row image allocation failed");
        s.commit(Some(TransactionId::new(1))).unwrap();
        assert_eq!(mgr.active_file(), "binlog.000002");
    }

    #[test]
    fn ddl_commits_open_transaction_first() {
        let tmp = tempdir().unwrap();
        let mgr = manager(&tmp, true);
        let mut s = BinlogSession::new(Arc::clone(&mgr), 1);
        s.begin();
        s.log_statement("INSERT INTO t VALUES (1)", true).unwrap();
        s.log_ddl("CREATE TABLE u (a INT)").unwrap();
        assert!(!s.in_transaction());
        assert_eq!(
            texts(&logged(&mgr)),
            [
                "Anonymous_Gtid",
                "BEGIN",
                "INSERT INTO t VALUES (1)",
                "COMMIT",
                "Anonymous_Gtid",
                "CREATE TABLE u (a INT)"
            ]
        );
    }
}
