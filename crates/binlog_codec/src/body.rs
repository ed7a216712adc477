//! Type-specific record bodies.
//!
//! Each record kind has one [`EventBody`] variant. Bodies are encoded
//! without the header and without the checksum footer; framing lives in
//! [`crate::event`]. Row images are opaque byte payloads.

use crate::checksum::ChecksumAlg;
use crate::error::{CodecError, CodecResult};
use crate::event_type::EventType;
use crate::gtid::{Gtid, GtidSet};
use crate::header::HEADER_LEN;
use crate::reader::BodyReader;
use bytes::BufMut;
use std::fmt;
use uuid::Uuid;

/// Binary log format version written into format description records.
pub const BINLOG_VERSION: u16 = 4;

/// Width of the fixed server version field of a format description record.
pub const SERVER_VERSION_LEN: usize = 50;

/// Largest table id that fits the 6-byte field.
pub const MAX_TABLE_ID: u64 = (1 << 48) - 1;

/// Logical timestamp type stamped into GTID records.
const LOGICAL_CLOCK: u8 = 2;

/// A statement, including transaction control statements.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryEvent {
    /// Connection that ran the statement.
    pub thread_id: u32,
    /// Seconds the statement took.
    pub exec_time: u32,
    /// Error code the statement produced on the source, 0 on success.
    pub error_code: u16,
    /// Opaque session status variables.
    pub status_vars: Vec<u8>,
    /// Default schema.
    pub schema: String,
    /// Statement text.
    pub query: String,
}

impl QueryEvent {
    /// Creates a query record with empty context.
    pub fn new(schema: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            query: query.into(),
            ..Self::default()
        }
    }

    fn encode(&self, extra: &[u8], buf: &mut impl BufMut) -> CodecResult<()> {
        let schema_len = u8::try_from(self.schema.len())
            .map_err(|_| CodecError::malformed("schema name longer than 255 bytes"))?;
        let status_len = u16::try_from(self.status_vars.len())
            .map_err(|_| CodecError::malformed("status variables longer than 65535 bytes"))?;
        buf.put_u32_le(self.thread_id);
        buf.put_u32_le(self.exec_time);
        buf.put_u8(schema_len);
        buf.put_u16_le(self.error_code);
        buf.put_u16_le(status_len);
        buf.put_slice(extra);
        buf.put_slice(&self.status_vars);
        buf.put_slice(self.schema.as_bytes());
        buf.put_u8(0);
        buf.put_slice(self.query.as_bytes());
        Ok(())
    }

    /// Parses a query body; `extra_len` bytes of kind-specific post-header
    /// are returned alongside.
    fn decode<'a>(r: &mut BodyReader<'a>, extra_len: usize) -> CodecResult<(Self, &'a [u8])> {
        let thread_id = r.u32()?;
        let exec_time = r.u32()?;
        let schema_len = r.u8()?;
        let error_code = r.u16()?;
        let status_len = r.u16()?;
        let extra = r.bytes(extra_len)?;
        let status_vars = r.bytes(usize::from(status_len))?.to_vec();
        let schema = r.string(usize::from(schema_len))?;
        r.nul()?;
        let query = r.rest_string()?;
        Ok((
            Self {
                thread_id,
                exec_time,
                error_code,
                status_vars,
                schema,
                query,
            },
            extra,
        ))
    }
}

/// First record of every file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescriptionEvent {
    /// Format version, [`BINLOG_VERSION`].
    pub binlog_version: u16,
    /// Version string of the writing server, at most 50 bytes.
    pub server_version: String,
    /// Seconds since the epoch when the file was created.
    pub create_timestamp: u32,
    /// Length of the common header, always 19.
    pub header_len: u8,
    /// Checksum algorithm used by every other record of the file.
    pub checksum_alg: ChecksumAlg,
}

impl FormatDescriptionEvent {
    /// Creates a description for the current format.
    pub fn new(server_version: impl Into<String>, checksum_alg: ChecksumAlg) -> Self {
        Self {
            binlog_version: BINLOG_VERSION,
            server_version: server_version.into(),
            create_timestamp: 0,
            header_len: HEADER_LEN as u8,
            checksum_alg,
        }
    }
}

/// Group start marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GtidEvent {
    /// True when the group may be applied as soon as it is received.
    pub commit_flag: bool,
    /// Source UUID; nil for anonymous groups.
    pub sid: Uuid,
    /// Sequence number; 0 for anonymous groups.
    pub gno: u64,
    /// Sequence number of the last group this one depends on.
    pub last_committed: i64,
    /// Position of this group in the file's logical clock.
    pub sequence_number: i64,
}

impl GtidEvent {
    /// Creates a marker for an identified group.
    #[must_use]
    pub fn assigned(gtid: Gtid) -> Self {
        Self {
            commit_flag: true,
            sid: gtid.sid,
            gno: gtid.gno,
            last_committed: 0,
            sequence_number: 0,
        }
    }

    /// Creates a marker for an anonymous group.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            commit_flag: true,
            sid: Uuid::nil(),
            gno: 0,
            last_committed: 0,
            sequence_number: 0,
        }
    }

    /// Returns the identifier, if this is not an anonymous marker.
    #[must_use]
    pub fn gtid(&self) -> Option<Gtid> {
        (self.gno > 0).then(|| Gtid::new(self.sid, self.gno))
    }
}

/// XA transaction identifier.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct XaId {
    /// Format identifier, -1 for a null XID.
    pub format_id: i32,
    /// Global transaction id, at most 64 bytes.
    pub gtrid: Vec<u8>,
    /// Branch qualifier, at most 64 bytes.
    pub bqual: Vec<u8>,
}

/// Maps a table id to a table definition.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableMapEvent {
    /// Table id referenced by the following row records.
    pub table_id: u64,
    /// Reserved flag bits.
    pub flags: u16,
    /// Schema name.
    pub schema: String,
    /// Table name.
    pub table: String,
    /// One type byte per column.
    pub column_types: Vec<u8>,
    /// Opaque column metadata and null bitmap.
    pub metadata: Vec<u8>,
}

/// Row images for one table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RowsEvent {
    /// Table id from the preceding table map.
    pub table_id: u64,
    /// Row flags, see [`RowsEvent::STMT_END`].
    pub flags: u16,
    /// Opaque extra data.
    pub extra: Vec<u8>,
    /// Number of columns in the table.
    pub column_count: u32,
    /// Bitmap of columns present in the (before) image.
    pub columns: Vec<u8>,
    /// Bitmap of columns present in the after image; update records only.
    pub columns_after: Vec<u8>,
    /// Opaque row images.
    pub rows: Vec<u8>,
}

impl RowsEvent {
    /// Last row record of a statement.
    pub const STMT_END: u16 = 0x0001;

    /// Returns true if the statement-end flag is set.
    #[must_use]
    pub fn is_stmt_end(&self) -> bool {
        self.flags & Self::STMT_END != 0
    }

    fn encode(&self, with_after: bool, buf: &mut impl BufMut) -> CodecResult<()> {
        put_table_id(self.table_id, buf)?;
        buf.put_u16_le(self.flags);
        let extra_len = u16::try_from(self.extra.len() + 2)
            .map_err(|_| CodecError::malformed("rows extra data too long"))?;
        buf.put_u16_le(extra_len);
        buf.put_slice(&self.extra);
        buf.put_u32_le(self.column_count);
        let bitmap_len = bitmap_len(self.column_count);
        if self.columns.len() != bitmap_len || (with_after && self.columns_after.len() != bitmap_len)
        {
            return Err(CodecError::malformed(format!(
                "column bitmap must be {bitmap_len} bytes for {} columns",
                self.column_count
            )));
        }
        buf.put_slice(&self.columns);
        if with_after {
            buf.put_slice(&self.columns_after);
        } else if !self.columns_after.is_empty() {
            return Err(CodecError::malformed("after image bitmap on non-update rows"));
        }
        buf.put_slice(&self.rows);
        Ok(())
    }

    fn decode(r: &mut BodyReader<'_>, with_after: bool) -> CodecResult<Self> {
        let table_id = r.u48()?;
        let flags = r.u16()?;
        let extra_len = usize::from(r.u16()?);
        if extra_len < 2 {
            return Err(CodecError::malformed(format!("rows extra length {extra_len}")));
        }
        let extra = r.bytes(extra_len - 2)?.to_vec();
        let column_count = r.u32()?;
        let bitmap_len = bitmap_len(column_count);
        let columns = r.bytes(bitmap_len)?.to_vec();
        let columns_after = if with_after {
            r.bytes(bitmap_len)?.to_vec()
        } else {
            Vec::new()
        };
        let rows = r.rest().to_vec();
        Ok(Self {
            table_id,
            flags,
            extra,
            column_count,
            columns,
            columns_after,
            rows,
        })
    }
}

/// Returns the byte length of a bitmap covering `columns` columns.
#[must_use]
pub fn bitmap_len(columns: u32) -> usize {
    (columns as usize).div_ceil(8)
}

/// A user variable referenced by the next statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserVarEvent {
    /// Variable name.
    pub name: String,
    /// Value, `None` for SQL NULL.
    pub value: Option<UserVarValue>,
}

/// Non-null value of a user variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserVarValue {
    /// Value type code.
    pub value_type: u8,
    /// Character set id.
    pub charset: u32,
    /// Raw value bytes.
    pub bytes: Vec<u8>,
    /// Value flags (unsigned etc.).
    pub flags: u8,
}

/// Statement that consumes a bulk-load file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecuteLoadQueryEvent {
    /// Statement text and context.
    pub query: QueryEvent,
    /// Bulk-load file id.
    pub file_id: u32,
    /// Start of the file name inside the statement.
    pub start_pos: u32,
    /// End of the file name inside the statement.
    pub end_pos: u32,
    /// Duplicate handling mode.
    pub dup_handling: u8,
}

/// Body of every record kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventBody {
    /// A statement.
    Query(QueryEvent),
    /// Clean shutdown marker.
    Stop,
    /// Names the next file.
    Rotate {
        /// Offset in the next file where reading continues.
        position: u64,
        /// Name of the next file.
        next_file: String,
    },
    /// Auto-increment context.
    Intvar {
        /// 1 = last insert id, 2 = insert id.
        kind: u8,
        /// Value.
        value: u64,
    },
    /// Bulk-load block.
    AppendBlock {
        /// Bulk-load file id.
        file_id: u32,
        /// Data.
        block: Vec<u8>,
    },
    /// Removes a bulk-load file.
    DeleteFile {
        /// Bulk-load file id.
        file_id: u32,
    },
    /// `RAND()` seeds.
    Rand {
        /// First seed.
        seed1: u64,
        /// Second seed.
        seed2: u64,
    },
    /// User variable.
    UserVar(UserVarEvent),
    /// File format description.
    FormatDescription(FormatDescriptionEvent),
    /// Two-phase commit marker.
    Xid {
        /// Transaction id known to the transaction manager.
        xid: u64,
    },
    /// First block of a bulk load.
    BeginLoadQuery {
        /// Bulk-load file id.
        file_id: u32,
        /// Data.
        block: Vec<u8>,
    },
    /// Statement consuming a bulk-load file.
    ExecuteLoadQuery(ExecuteLoadQueryEvent),
    /// Table definition.
    TableMap(TableMapEvent),
    /// Data loss marker.
    Incident {
        /// Incident kind, 1 = lost events.
        kind: u16,
        /// Description, at most 255 bytes.
        message: String,
    },
    /// Replica keep-alive.
    Heartbeat {
        /// File the sender is positioned in.
        log_file: String,
    },
    /// Original statement of the following row records.
    RowsQuery {
        /// Statement text.
        query: String,
    },
    /// Inserted rows.
    WriteRows(RowsEvent),
    /// Updated rows.
    UpdateRows(RowsEvent),
    /// Deleted rows.
    DeleteRows(RowsEvent),
    /// Identified group start.
    Gtid(GtidEvent),
    /// Anonymous group start.
    AnonymousGtid(GtidEvent),
    /// Identifiers logged in earlier files.
    PreviousGtids(GtidSet),
    /// XA prepare marker.
    XaPrepare {
        /// Commit in one phase.
        one_phase: bool,
        /// XA transaction id.
        xid: XaId,
    },
    /// Compressed transaction.
    TransactionPayload {
        /// Compression algorithm id, 0 = none.
        compression: u8,
        /// Size of the payload once uncompressed.
        uncompressed_size: u64,
        /// Payload bytes.
        payload: Vec<u8>,
    },
}

/// Incident kind for lost events.
pub const INCIDENT_LOST_EVENTS: u16 = 1;

impl EventBody {
    /// Convenience constructor for a query record.
    pub fn query(schema: impl Into<String>, query: impl Into<String>) -> Self {
        Self::Query(QueryEvent::new(schema, query))
    }

    /// Convenience constructor for a lost-events incident.
    pub fn incident(message: impl Into<String>) -> Self {
        Self::Incident {
            kind: INCIDENT_LOST_EVENTS,
            message: message.into(),
        }
    }

    /// Returns the type tag for this body.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Query(_) => EventType::Query,
            Self::Stop => EventType::Stop,
            Self::Rotate { .. } => EventType::Rotate,
            Self::Intvar { .. } => EventType::Intvar,
            Self::AppendBlock { .. } => EventType::AppendBlock,
            Self::DeleteFile { .. } => EventType::DeleteFile,
            Self::Rand { .. } => EventType::Rand,
            Self::UserVar(_) => EventType::UserVar,
            Self::FormatDescription(_) => EventType::FormatDescription,
            Self::Xid { .. } => EventType::Xid,
            Self::BeginLoadQuery { .. } => EventType::BeginLoadQuery,
            Self::ExecuteLoadQuery(_) => EventType::ExecuteLoadQuery,
            Self::TableMap(_) => EventType::TableMap,
            Self::Incident { .. } => EventType::Incident,
            Self::Heartbeat { .. } => EventType::Heartbeat,
            Self::RowsQuery { .. } => EventType::RowsQuery,
            Self::WriteRows(_) => EventType::WriteRows,
            Self::UpdateRows(_) => EventType::UpdateRows,
            Self::DeleteRows(_) => EventType::DeleteRows,
            Self::Gtid(_) => EventType::Gtid,
            Self::AnonymousGtid(_) => EventType::AnonymousGtid,
            Self::PreviousGtids(_) => EventType::PreviousGtids,
            Self::XaPrepare { .. } => EventType::XaPrepare,
            Self::TransactionPayload { .. } => EventType::TransactionPayload,
        }
    }

    /// Returns the statement text of query-like records.
    #[must_use]
    pub fn query_text(&self) -> Option<&str> {
        match self {
            Self::Query(q) => Some(&q.query),
            Self::ExecuteLoadQuery(e) => Some(&e.query.query),
            _ => None,
        }
    }

    /// Encodes the body.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Malformed`] if a field does not fit its wire
    /// width.
    pub fn encode(&self, buf: &mut impl BufMut) -> CodecResult<()> {
        match self {
            Self::Query(q) => q.encode(&[], buf)?,
            Self::Stop => {}
            Self::Rotate {
                position,
                next_file,
            } => {
                buf.put_u64_le(*position);
                buf.put_slice(next_file.as_bytes());
            }
            Self::Intvar { kind, value } => {
                buf.put_u8(*kind);
                buf.put_u64_le(*value);
            }
            Self::AppendBlock { file_id, block } | Self::BeginLoadQuery { file_id, block } => {
                buf.put_u32_le(*file_id);
                buf.put_slice(block);
            }
            Self::DeleteFile { file_id } => buf.put_u32_le(*file_id),
            Self::Rand { seed1, seed2 } => {
                buf.put_u64_le(*seed1);
                buf.put_u64_le(*seed2);
            }
            Self::UserVar(uv) => {
                let name_len = u32::try_from(uv.name.len())
                    .map_err(|_| CodecError::malformed("user variable name too long"))?;
                buf.put_u32_le(name_len);
                buf.put_slice(uv.name.as_bytes());
                match &uv.value {
                    None => buf.put_u8(1),
                    Some(v) => {
                        let value_len = u32::try_from(v.bytes.len())
                            .map_err(|_| CodecError::malformed("user variable value too long"))?;
                        buf.put_u8(0);
                        buf.put_u8(v.value_type);
                        buf.put_u32_le(v.charset);
                        buf.put_u32_le(value_len);
                        buf.put_slice(&v.bytes);
                        buf.put_u8(v.flags);
                    }
                }
            }
            Self::FormatDescription(fde) => {
                let version = fde.server_version.as_bytes();
                if version.len() > SERVER_VERSION_LEN {
                    return Err(CodecError::malformed(format!(
                        "server version longer than {SERVER_VERSION_LEN} bytes"
                    )));
                }
                buf.put_u16_le(fde.binlog_version);
                buf.put_slice(version);
                buf.put_bytes(0, SERVER_VERSION_LEN - version.len());
                buf.put_u32_le(fde.create_timestamp);
                buf.put_u8(fde.header_len);
                buf.put_u8(fde.checksum_alg.as_byte());
            }
            Self::Xid { xid } => buf.put_u64_le(*xid),
            Self::ExecuteLoadQuery(e) => {
                let mut extra = Vec::with_capacity(13);
                extra.put_u32_le(e.file_id);
                extra.put_u32_le(e.start_pos);
                extra.put_u32_le(e.end_pos);
                extra.put_u8(e.dup_handling);
                e.query.encode(&extra, buf)?;
            }
            Self::TableMap(tm) => {
                put_table_id(tm.table_id, buf)?;
                buf.put_u16_le(tm.flags);
                put_short_name(&tm.schema, "schema", buf)?;
                put_short_name(&tm.table, "table", buf)?;
                let columns = u32::try_from(tm.column_types.len())
                    .map_err(|_| CodecError::malformed("too many columns"))?;
                let meta_len = u32::try_from(tm.metadata.len())
                    .map_err(|_| CodecError::malformed("table metadata too long"))?;
                buf.put_u32_le(columns);
                buf.put_slice(&tm.column_types);
                buf.put_u32_le(meta_len);
                buf.put_slice(&tm.metadata);
            }
            Self::Incident { kind, message } => {
                let len = u8::try_from(message.len())
                    .map_err(|_| CodecError::malformed("incident message longer than 255 bytes"))?;
                buf.put_u16_le(*kind);
                buf.put_u8(len);
                buf.put_slice(message.as_bytes());
            }
            Self::Heartbeat { log_file } => buf.put_slice(log_file.as_bytes()),
            Self::RowsQuery { query } => buf.put_slice(query.as_bytes()),
            Self::WriteRows(rows) | Self::DeleteRows(rows) => rows.encode(false, buf)?,
            Self::UpdateRows(rows) => rows.encode(true, buf)?,
            Self::Gtid(g) | Self::AnonymousGtid(g) => {
                buf.put_u8(u8::from(g.commit_flag));
                buf.put_slice(g.sid.as_bytes());
                buf.put_u64_le(g.gno);
                buf.put_u8(LOGICAL_CLOCK);
                buf.put_i64_le(g.last_committed);
                buf.put_i64_le(g.sequence_number);
            }
            Self::PreviousGtids(set) => set.encode(buf),
            Self::XaPrepare { one_phase, xid } => {
                if xid.gtrid.len() > 64 || xid.bqual.len() > 64 {
                    return Err(CodecError::malformed("XA id parts are limited to 64 bytes"));
                }
                buf.put_u8(u8::from(*one_phase));
                buf.put_i32_le(xid.format_id);
                buf.put_u32_le(xid.gtrid.len() as u32);
                buf.put_u32_le(xid.bqual.len() as u32);
                buf.put_slice(&xid.gtrid);
                buf.put_slice(&xid.bqual);
            }
            Self::TransactionPayload {
                compression,
                uncompressed_size,
                payload,
            } => {
                buf.put_u8(*compression);
                buf.put_u64_le(*uncompressed_size);
                buf.put_slice(payload);
            }
        }
        Ok(())
    }

    /// Decodes a body of the given type.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Truncated`] or [`CodecError::Malformed`] when
    /// the bytes do not form a valid body of that type.
    pub fn decode(event_type: EventType, body: &[u8]) -> CodecResult<Self> {
        let mut r = BodyReader::new(body);
        let decoded = match event_type {
            EventType::Query => Self::Query(QueryEvent::decode(&mut r, 0)?.0),
            EventType::Stop => Self::Stop,
            EventType::Rotate => Self::Rotate {
                position: r.u64()?,
                next_file: r.rest_string()?,
            },
            EventType::Intvar => Self::Intvar {
                kind: r.u8()?,
                value: r.u64()?,
            },
            EventType::AppendBlock => Self::AppendBlock {
                file_id: r.u32()?,
                block: r.rest().to_vec(),
            },
            EventType::BeginLoadQuery => Self::BeginLoadQuery {
                file_id: r.u32()?,
                block: r.rest().to_vec(),
            },
            EventType::DeleteFile => Self::DeleteFile { file_id: r.u32()? },
            EventType::Rand => Self::Rand {
                seed1: r.u64()?,
                seed2: r.u64()?,
            },
            EventType::UserVar => {
                let name_len = r.u32()? as usize;
                let name = r.string(name_len)?;
                let value = match r.u8()? {
                    1 => None,
                    0 => {
                        let value_type = r.u8()?;
                        let charset = r.u32()?;
                        let len = r.u32()? as usize;
                        let bytes = r.bytes(len)?.to_vec();
                        let flags = r.u8()?;
                        Some(UserVarValue {
                            value_type,
                            charset,
                            bytes,
                            flags,
                        })
                    }
                    other => {
                        return Err(CodecError::malformed(format!(
                            "user variable null marker {other}"
                        )))
                    }
                };
                Self::UserVar(UserVarEvent { name, value })
            }
            EventType::FormatDescription => {
                let binlog_version = r.u16()?;
                let raw = r.bytes(SERVER_VERSION_LEN)?;
                let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
                let server_version = String::from_utf8(raw[..end].to_vec())
                    .map_err(|e| CodecError::malformed(format!("server version: {e}")))?;
                let create_timestamp = r.u32()?;
                let header_len = r.u8()?;
                if usize::from(header_len) != HEADER_LEN {
                    return Err(CodecError::malformed(format!(
                        "unsupported header length {header_len}"
                    )));
                }
                let checksum_alg = ChecksumAlg::from_byte(r.u8()?)?;
                Self::FormatDescription(FormatDescriptionEvent {
                    binlog_version,
                    server_version,
                    create_timestamp,
                    header_len,
                    checksum_alg,
                })
            }
            EventType::Xid => Self::Xid { xid: r.u64()? },
            EventType::ExecuteLoadQuery => {
                let (query, extra) = QueryEvent::decode(&mut r, 13)?;
                let mut er = BodyReader::new(extra);
                Self::ExecuteLoadQuery(ExecuteLoadQueryEvent {
                    query,
                    file_id: er.u32()?,
                    start_pos: er.u32()?,
                    end_pos: er.u32()?,
                    dup_handling: er.u8()?,
                })
            }
            EventType::TableMap => {
                let table_id = r.u48()?;
                let flags = r.u16()?;
                let schema = get_short_name(&mut r)?;
                let table = get_short_name(&mut r)?;
                let columns = r.u32()? as usize;
                let column_types = r.bytes(columns)?.to_vec();
                let meta_len = r.u32()? as usize;
                let metadata = r.bytes(meta_len)?.to_vec();
                Self::TableMap(TableMapEvent {
                    table_id,
                    flags,
                    schema,
                    table,
                    column_types,
                    metadata,
                })
            }
            EventType::Incident => {
                let kind = r.u16()?;
                let len = usize::from(r.u8()?);
                Self::Incident {
                    kind,
                    message: r.string(len)?,
                }
            }
            EventType::Heartbeat => Self::Heartbeat {
                log_file: r.rest_string()?,
            },
            EventType::RowsQuery => Self::RowsQuery {
                query: r.rest_string()?,
            },
            EventType::WriteRows => Self::WriteRows(RowsEvent::decode(&mut r, false)?),
            EventType::UpdateRows => Self::UpdateRows(RowsEvent::decode(&mut r, true)?),
            EventType::DeleteRows => Self::DeleteRows(RowsEvent::decode(&mut r, false)?),
            EventType::Gtid | EventType::AnonymousGtid => {
                let commit_flag = r.u8()? != 0;
                let sid = Uuid::from_bytes(r.array::<16>()?);
                let gno = r.u64()?;
                let lt_type = r.u8()?;
                if lt_type != LOGICAL_CLOCK {
                    return Err(CodecError::malformed(format!(
                        "unknown logical timestamp type {lt_type}"
                    )));
                }
                let g = GtidEvent {
                    commit_flag,
                    sid,
                    gno,
                    last_committed: r.i64()?,
                    sequence_number: r.i64()?,
                };
                if event_type == EventType::Gtid {
                    if gno == 0 {
                        return Err(CodecError::malformed("GTID record with sequence number 0"));
                    }
                    Self::Gtid(g)
                } else {
                    Self::AnonymousGtid(g)
                }
            }
            EventType::PreviousGtids => Self::PreviousGtids(GtidSet::decode(&mut r)?),
            EventType::XaPrepare => {
                let one_phase = r.u8()? != 0;
                let format_id = r.i32()?;
                let gtrid_len = r.u32()? as usize;
                let bqual_len = r.u32()? as usize;
                if gtrid_len > 64 || bqual_len > 64 {
                    return Err(CodecError::malformed("XA id parts are limited to 64 bytes"));
                }
                Self::XaPrepare {
                    one_phase,
                    xid: XaId {
                        format_id,
                        gtrid: r.bytes(gtrid_len)?.to_vec(),
                        bqual: r.bytes(bqual_len)?.to_vec(),
                    },
                }
            }
            EventType::TransactionPayload => Self::TransactionPayload {
                compression: r.u8()?,
                uncompressed_size: r.u64()?,
                payload: r.rest().to_vec(),
            },
        };
        r.finish(event_type.name())?;
        Ok(decoded)
    }
}

fn put_table_id(table_id: u64, buf: &mut impl BufMut) -> CodecResult<()> {
    if table_id > MAX_TABLE_ID {
        return Err(CodecError::malformed(format!(
            "table id {table_id} does not fit 6 bytes"
        )));
    }
    buf.put_uint_le(table_id, 6);
    Ok(())
}

fn put_short_name(name: &str, what: &str, buf: &mut impl BufMut) -> CodecResult<()> {
    let len = u8::try_from(name.len())
        .map_err(|_| CodecError::malformed(format!("{what} name longer than 255 bytes")))?;
    buf.put_u8(len);
    buf.put_slice(name.as_bytes());
    buf.put_u8(0);
    Ok(())
}

fn get_short_name(r: &mut BodyReader<'_>) -> CodecResult<String> {
    let len = usize::from(r.u8()?);
    let name = r.string(len)?;
    r.nul()?;
    Ok(name)
}

impl fmt::Display for EventBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Query(q) => {
                if q.schema.is_empty() {
                    f.write_str(&q.query)
                } else {
                    write!(f, "use `{}`; {}", q.schema, q.query)
                }
            }
            Self::Stop => f.write_str("stop"),
            Self::Rotate {
                position,
                next_file,
            } => write!(f, "{next_file};pos={position}"),
            Self::Intvar { kind, value } => {
                let name = if *kind == 1 { "LAST_INSERT_ID" } else { "INSERT_ID" };
                write!(f, "{name}={value}")
            }
            Self::AppendBlock { file_id, block } | Self::BeginLoadQuery { file_id, block } => {
                write!(f, "file_id={file_id} block_len={}", block.len())
            }
            Self::DeleteFile { file_id } => write!(f, "file_id={file_id}"),
            Self::Rand { seed1, seed2 } => write!(f, "rand_seed1={seed1},rand_seed2={seed2}"),
            Self::UserVar(uv) => match &uv.value {
                None => write!(f, "@`{}`=NULL", uv.name),
                Some(v) => write!(f, "@`{}`=<{} bytes>", uv.name, v.bytes.len()),
            },
            Self::FormatDescription(fde) => write!(
                f,
                "Server ver: {}, Binlog ver: {}, checksum: {:?}",
                fde.server_version, fde.binlog_version, fde.checksum_alg
            ),
            Self::Xid { xid } => write!(f, "COMMIT /* xid={xid} */"),
            Self::ExecuteLoadQuery(e) => write!(f, "{} /* file_id={} */", e.query.query, e.file_id),
            Self::TableMap(tm) => write!(
                f,
                "table_id: {} (`{}`.`{}`)",
                tm.table_id, tm.schema, tm.table
            ),
            Self::Incident { kind, message } => write!(f, "#{kind} ({message})"),
            Self::Heartbeat { log_file } => write!(f, "{log_file}"),
            Self::RowsQuery { query } => write!(f, "# {query}"),
            Self::WriteRows(rows) | Self::UpdateRows(rows) | Self::DeleteRows(rows) => {
                write!(f, "table_id: {}", rows.table_id)?;
                if rows.is_stmt_end() {
                    f.write_str(" flags: STMT_END_F")?;
                }
                Ok(())
            }
            Self::Gtid(g) => write!(
                f,
                "SET @@SESSION.GTID_NEXT= '{}:{}' last_committed={} sequence_number={}",
                g.sid, g.gno, g.last_committed, g.sequence_number
            ),
            Self::AnonymousGtid(g) => write!(
                f,
                "SET @@SESSION.GTID_NEXT= 'ANONYMOUS' last_committed={} sequence_number={}",
                g.last_committed, g.sequence_number
            ),
            Self::PreviousGtids(set) => write!(f, "{set}"),
            Self::XaPrepare { one_phase, xid } => write!(
                f,
                "XA PREPARE format_id={} gtrid_len={} bqual_len={}{}",
                xid.format_id,
                xid.gtrid.len(),
                xid.bqual.len(),
                if *one_phase { " ONE PHASE" } else { "" }
            ),
            Self::TransactionPayload {
                compression,
                uncompressed_size,
                payload,
            } => write!(
                f,
                "compression={compression} size={} uncompressed={uncompressed_size}",
                payload.len()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(body: &EventBody) -> EventBody {
        let mut buf = Vec::new();
        body.encode(&mut buf).unwrap();
        EventBody::decode(body.event_type(), &buf).unwrap()
    }

    #[test]
    fn query_with_status_vars() {
        let body = EventBody::Query(QueryEvent {
            thread_id: 12,
            exec_time: 1,
            error_code: 0,
            status_vars: vec![0, 1, 2, 3],
            schema: "shop".into(),
            query: "INSERT INTO t VALUES (1)".into(),
        });
        assert_eq!(roundtrip(&body), body);
        assert_eq!(body.query_text(), Some("INSERT INTO t VALUES (1)"));
    }

    #[test]
    fn execute_load_query_keeps_extra_header() {
        let body = EventBody::ExecuteLoadQuery(ExecuteLoadQueryEvent {
            query: QueryEvent::new("db", "LOAD DATA INFILE 'x' INTO TABLE t"),
            file_id: 3,
            start_pos: 17,
            end_pos: 20,
            dup_handling: 1,
        });
        assert_eq!(roundtrip(&body), body);
    }

    #[test]
    fn update_rows_carry_after_bitmap() {
        let rows = RowsEvent {
            table_id: MAX_TABLE_ID,
            flags: RowsEvent::STMT_END,
            extra: vec![],
            column_count: 9,
            columns: vec![0xff, 0x01],
            columns_after: vec![0x0f, 0x00],
            rows: vec![1, 2, 3, 4, 5],
        };
        let body = EventBody::UpdateRows(rows.clone());
        assert_eq!(roundtrip(&body), body);

        let mut buf = Vec::new();
        assert!(EventBody::WriteRows(rows).encode(&mut buf).is_err());
    }

    #[test]
    fn table_id_width_enforced() {
        let body = EventBody::TableMap(TableMapEvent {
            table_id: MAX_TABLE_ID + 1,
            ..TableMapEvent::default()
        });
        let mut buf = Vec::new();
        assert!(body.encode(&mut buf).is_err());
    }

    #[test]
    fn fde_pads_server_version() {
        let body = EventBody::FormatDescription(FormatDescriptionEvent::new(
            "8.0.36-binlog",
            ChecksumAlg::Crc32,
        ));
        let mut buf = Vec::new();
        body.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), 2 + SERVER_VERSION_LEN + 4 + 1 + 1);
        assert_eq!(roundtrip(&body), body);
    }

    #[test]
    fn anonymous_gtid_has_no_identifier() {
        let g = GtidEvent::anonymous();
        assert_eq!(g.gtid(), None);
        let body = EventBody::AnonymousGtid(g);
        assert_eq!(roundtrip(&body), body);
    }

    #[test]
    fn gtid_with_zero_gno_rejected() {
        let mut buf = Vec::new();
        EventBody::AnonymousGtid(GtidEvent::anonymous())
            .encode(&mut buf)
            .unwrap();
        assert!(EventBody::decode(EventType::Gtid, &buf).is_err());
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut buf = Vec::new();
        EventBody::Xid { xid: 5 }.encode(&mut buf).unwrap();
        buf.push(0);
        assert!(matches!(
            EventBody::decode(EventType::Xid, &buf),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn truncated_body_is_error() {
        let mut buf = Vec::new();
        EventBody::Rand { seed1: 1, seed2: 2 }
            .encode(&mut buf)
            .unwrap();
        buf.truncate(10);
        assert!(matches!(
            EventBody::decode(EventType::Rand, &buf),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn user_var_null_and_value() {
        let null = EventBody::UserVar(UserVarEvent {
            name: "a".into(),
            value: None,
        });
        let set = EventBody::UserVar(UserVarEvent {
            name: "b".into(),
            value: Some(UserVarValue {
                value_type: 2,
                charset: 33,
                bytes: vec![1, 0, 0, 0, 0, 0, 0, 0],
                flags: 0,
            }),
        });
        assert_eq!(roundtrip(&null), null);
        assert_eq!(roundtrip(&set), set);
    }

    #[test]
    fn display_is_human_readable() {
        assert_eq!(EventBody::Xid { xid: 9 }.to_string(), "COMMIT /* xid=9 */");
        assert_eq!(EventBody::query("", "BEGIN").to_string(), "BEGIN");
    }
}
