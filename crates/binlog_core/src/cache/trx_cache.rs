//! One session cache: records staged in memory until their group is flushed.
//!
//! Records are framed without checksums at cache-relative positions; the
//! manager re-frames them when it copies the group into a file.
//!
//! Row changes go through a pending slot first. Consecutive changes with
//! the same table, kind, flags, extra data and column bitmaps are merged into one
//! record until it would pass the coalescing cap; anything else flushes
//! the pending record into the buffer before it is appended.

use crate::error::{CacheScope, CoreError, CoreResult};
use binlog_codec::{ChecksumAlg, Event, EventBody, EventType, RowsEvent, HEADER_LEN};
use std::collections::BTreeSet;
use tracing::warn;

/// Kind of row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowsKind {
    /// Inserted rows.
    Write,
    /// Updated rows (before and after images).
    Update,
    /// Deleted rows.
    Delete,
}

impl RowsKind {
    fn into_body(self, rows: RowsEvent) -> EventBody {
        match self {
            Self::Write => EventBody::WriteRows(rows),
            Self::Update => EventBody::UpdateRows(rows),
            Self::Delete => EventBody::DeleteRows(rows),
        }
    }

    /// Record type written for this kind.
    #[must_use]
    pub fn event_type(self) -> EventType {
        match self {
            Self::Write => EventType::WriteRows,
            Self::Update => EventType::UpdateRows,
            Self::Delete => EventType::DeleteRows,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RowsKey {
    table_id: u64,
    kind: RowsKind,
    flags: u16,
    extra: Vec<u8>,
    columns: Vec<u8>,
    columns_after: Vec<u8>,
}

impl RowsKey {
    fn of(kind: RowsKind, rows: &RowsEvent) -> Self {
        Self {
            table_id: rows.table_id,
            kind,
            flags: rows.flags,
            extra: rows.extra.clone(),
            columns: rows.columns.clone(),
            columns_after: rows.columns_after.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct PendingRows {
    key: RowsKey,
    rows: RowsEvent,
    timestamp: u32,
}

impl PendingRows {
    fn encoded_len(&self) -> usize {
        rows_record_len(&self.rows)
    }
}

/// Framed length of a row record, without footer.
fn rows_record_len(rows: &RowsEvent) -> usize {
    HEADER_LEN
        + 6 // table id
        + 2 // flags
        + 2 // extra length
        + rows.extra.len()
        + 4 // column count
        + rows.columns.len()
        + rows.columns_after.len()
        + rows.rows.len()
}

#[derive(Debug, Clone)]
struct Savepoint {
    name: String,
    offset: usize,
    mapped_tables: BTreeSet<u64>,
}

/// A statement-scope or transaction-scope cache.
#[derive(Debug, Clone)]
pub struct TransactionCache {
    scope: CacheScope,
    server_id: u32,
    max_size: u64,
    max_rows_event: usize,
    buf: Vec<u8>,
    pending: Option<PendingRows>,
    savepoints: Vec<Savepoint>,
    mapped_tables: BTreeSet<u64>,
    incident: Option<String>,
    write_error: bool,
    non_transactional: bool,
}

impl TransactionCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(scope: CacheScope, server_id: u32, max_size: u64, max_rows_event: usize) -> Self {
        Self {
            scope,
            server_id,
            max_size,
            max_rows_event,
            buf: Vec::new(),
            pending: None,
            savepoints: Vec::new(),
            mapped_tables: BTreeSet::new(),
            incident: None,
            write_error: false,
            non_transactional: false,
        }
    }

    /// Returns which cache this is.
    #[must_use]
    pub fn scope(&self) -> CacheScope {
        self.scope
    }

    /// Returns true if nothing has been written since the last reset.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty() && self.pending.is_none()
    }

    /// Bytes held, counting the pending row record.
    #[must_use]
    pub fn len(&self) -> u64 {
        (self.buf.len() + self.pending.as_ref().map_or(0, PendingRows::encoded_len)) as u64
    }

    /// Returns the flushed part of the buffer, without the pending record.
    #[must_use]
    pub fn contents(&self) -> &[u8] {
        &self.buf
    }

    /// Returns the incident message, if one was raised.
    #[must_use]
    pub fn incident(&self) -> Option<&str> {
        self.incident.as_deref()
    }

    /// Returns true if a write to this cache has failed.
    #[must_use]
    pub fn has_write_error(&self) -> bool {
        self.write_error
    }

    /// Returns true if the cache holds changes to non-transactional objects.
    #[must_use]
    pub fn has_non_transactional(&self) -> bool {
        self.non_transactional
    }

    /// Records that the cache holds changes that cannot be rolled back.
    pub fn mark_non_transactional(&mut self) {
        self.non_transactional = true;
    }

    /// Flags the content as incomplete. Cannot be undone before a reset.
    pub fn mark_incident(&mut self, message: impl Into<String>) {
        if self.incident.is_none() {
            let message = message.into();
            warn!(scope = %self.scope, reason = %message, "cache marked as incident");
            self.incident = Some(message);
        }
    }

    /// Returns true if row records for `table_id` can follow without a new
    /// table map.
    #[must_use]
    pub fn is_table_mapped(&self, table_id: u64) -> bool {
        self.mapped_tables.contains(&table_id)
    }

    /// Appends one record after flushing the pending row record.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CapacityExceeded`] if the record does not fit,
    /// or a codec error.
    pub fn write(&mut self, body: EventBody, timestamp: u32) -> CoreResult<()> {
        self.flush_pending(false)?;
        let table_id = match &body {
            EventBody::TableMap(map) => Some(map.table_id),
            _ => None,
        };
        let record = Event::new(body, self.server_id, timestamp)
            .encode_at(self.buf.len() as u64, ChecksumAlg::Off)?;
        self.reserve(record.len())?;
        self.buf.extend_from_slice(&record);
        if let Some(id) = table_id {
            self.mapped_tables.insert(id);
        }
        Ok(())
    }

    /// Adds row changes, merging them into the pending record when the key
    /// matches and the result stays under the coalescing cap.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CapacityExceeded`] if the rows do not fit.
    pub fn add_rows(&mut self, kind: RowsKind, rows: RowsEvent, timestamp: u32) -> CoreResult<()> {
        let key = RowsKey::of(kind, &rows);
        if let Some(pending) = &self.pending {
            let merged_len = pending.encoded_len() + rows.rows.len();
            if pending.key == key && merged_len <= self.max_rows_event {
                self.reserve(rows.rows.len())?;
                if let Some(pending) = &mut self.pending {
                    pending.rows.rows.extend_from_slice(&rows.rows);
                }
                return Ok(());
            }
        }
        self.flush_pending(false)?;
        self.reserve(rows_record_len(&rows))?;
        self.pending = Some(PendingRows {
            key,
            rows,
            timestamp,
        });
        Ok(())
    }

    /// Moves the pending row record into the buffer, optionally marking it
    /// as the statement's last.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the record cannot be encoded.
    pub fn flush_pending(&mut self, stmt_end: bool) -> CoreResult<()> {
        let Some(mut pending) = self.pending.take() else {
            return Ok(());
        };
        if stmt_end {
            pending.rows.flags |= RowsEvent::STMT_END;
        }
        let record = Event::new(
            pending.key.kind.into_body(pending.rows),
            self.server_id,
            pending.timestamp,
        )
        .encode_at(self.buf.len() as u64, ChecksumAlg::Off)?;
        self.buf.extend_from_slice(&record);
        Ok(())
    }

    fn reserve(&mut self, additional: usize) -> CoreResult<()> {
        if self.len() + additional as u64 <= self.max_size {
            return Ok(());
        }
        self.write_error = true;
        if self.non_transactional || self.scope == CacheScope::Statement {
            self.mark_incident(format!(
                "{} cache exceeded {} bytes after modifying non-transactional tables",
                self.scope, self.max_size
            ));
        }
        Err(CoreError::CapacityExceeded {
            scope: self.scope,
            limit: self.max_size,
        })
    }

    /// Records a savepoint at the current end of the cache.
    ///
    /// Setting a name that already exists moves it.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the pending record cannot be flushed.
    pub fn set_savepoint(&mut self, name: &str) -> CoreResult<()> {
        self.flush_pending(false)?;
        self.savepoints.retain(|sp| sp.name != name);
        self.savepoints.push(Savepoint {
            name: name.to_string(),
            offset: self.buf.len(),
            mapped_tables: self.mapped_tables.clone(),
        });
        Ok(())
    }

    /// Returns true if `name` is a savepoint of this cache.
    #[must_use]
    pub fn has_savepoint(&self, name: &str) -> bool {
        self.savepoints.iter().any(|sp| sp.name == name)
    }

    /// Truncates the cache back to savepoint `name`.
    ///
    /// Savepoints set after `name` are released; `name` itself remains.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if `name` does not exist.
    pub fn rollback_to_savepoint(&mut self, name: &str) -> CoreResult<()> {
        let idx = self
            .savepoints
            .iter()
            .rposition(|sp| sp.name == name)
            .ok_or_else(|| CoreError::invalid_operation(format!("savepoint {name} does not exist")))?;
        self.savepoints.truncate(idx + 1);
        let savepoint = &self.savepoints[idx];
        self.pending = None;
        self.buf.truncate(savepoint.offset);
        self.mapped_tables = savepoint.mapped_tables.clone();
        Ok(())
    }

    /// Flushes the pending record with the statement-end flag and returns
    /// the complete content.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the pending record cannot be encoded.
    pub fn finish(&mut self) -> CoreResult<Vec<u8>> {
        self.flush_pending(true)?;
        Ok(self.buf.clone())
    }

    /// Empties the cache and clears every flag.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.pending = None;
        self.savepoints.clear();
        self.mapped_tables.clear();
        self.incident = None;
        self.write_error = false;
        self.non_transactional = false;
    }
}
