//! Record type tags.

use crate::error::{CodecError, CodecResult};

/// Type tag stored in byte 4 of every record header.
///
/// Tag values follow the established binary log numbering so that dumps
/// are recognisable to existing tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum EventType {
    /// A statement, or a transaction control statement such as `BEGIN`.
    Query = 0x02,
    /// Written on clean shutdown.
    Stop = 0x03,
    /// Last record of a file; names the next file.
    Rotate = 0x04,
    /// Auto-increment / last-insert-id context for the next statement.
    Intvar = 0x05,
    /// A block of data for a bulk load.
    AppendBlock = 0x09,
    /// Removes a bulk-load temporary file on the replica.
    DeleteFile = 0x0b,
    /// Seeds for `RAND()` in the next statement.
    Rand = 0x0d,
    /// A user variable referenced by the next statement.
    UserVar = 0x0e,
    /// First record of every file.
    FormatDescription = 0x0f,
    /// Two-phase commit marker.
    Xid = 0x10,
    /// First block of a bulk load.
    BeginLoadQuery = 0x11,
    /// Statement that consumes a bulk-load file.
    ExecuteLoadQuery = 0x12,
    /// Maps a table id to a table definition for the row records that follow.
    TableMap = 0x13,
    /// Data loss marker.
    Incident = 0x1a,
    /// Keep-alive sent to idle replicas; never written to a file.
    Heartbeat = 0x1b,
    /// Original statement text accompanying row records.
    RowsQuery = 0x1d,
    /// Inserted row images.
    WriteRows = 0x1e,
    /// Before/after row images.
    UpdateRows = 0x1f,
    /// Deleted row images.
    DeleteRows = 0x20,
    /// Global transaction identifier of the group that follows.
    Gtid = 0x21,
    /// Group start marker without an identifier.
    AnonymousGtid = 0x22,
    /// Set of identifiers logged in all earlier files.
    PreviousGtids = 0x23,
    /// XA transaction prepared in the log.
    XaPrepare = 0x26,
    /// A compressed transaction.
    TransactionPayload = 0x28,
}

impl EventType {
    /// Every known type, in tag order.
    pub const ALL: [EventType; 24] = [
        Self::Query,
        Self::Stop,
        Self::Rotate,
        Self::Intvar,
        Self::AppendBlock,
        Self::DeleteFile,
        Self::Rand,
        Self::UserVar,
        Self::FormatDescription,
        Self::Xid,
        Self::BeginLoadQuery,
        Self::ExecuteLoadQuery,
        Self::TableMap,
        Self::Incident,
        Self::Heartbeat,
        Self::RowsQuery,
        Self::WriteRows,
        Self::UpdateRows,
        Self::DeleteRows,
        Self::Gtid,
        Self::AnonymousGtid,
        Self::PreviousGtids,
        Self::XaPrepare,
        Self::TransactionPayload,
    ];

    /// Converts a tag byte to a type.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnknownType`] for unrecognised tags.
    pub fn from_byte(b: u8) -> CodecResult<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_byte() == b)
            .ok_or(CodecError::UnknownType(b))
    }

    /// Returns the tag byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Returns true for the three row-image kinds.
    #[must_use]
    pub const fn is_rows(self) -> bool {
        matches!(self, Self::WriteRows | Self::UpdateRows | Self::DeleteRows)
    }

    /// Returns true for group start markers.
    #[must_use]
    pub const fn is_gtid(self) -> bool {
        matches!(self, Self::Gtid | Self::AnonymousGtid)
    }

    /// Returns the display name used by dump tooling.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Query => "Query",
            Self::Stop => "Stop",
            Self::Rotate => "Rotate",
            Self::Intvar => "Intvar",
            Self::AppendBlock => "Append_block",
            Self::DeleteFile => "Delete_file",
            Self::Rand => "RAND",
            Self::UserVar => "User var",
            Self::FormatDescription => "Format_desc",
            Self::Xid => "Xid",
            Self::BeginLoadQuery => "Begin_load_query",
            Self::ExecuteLoadQuery => "Execute_load_query",
            Self::TableMap => "Table_map",
            Self::Incident => "Incident",
            Self::Heartbeat => "Heartbeat",
            Self::RowsQuery => "Rows_query",
            Self::WriteRows => "Write_rows",
            Self::UpdateRows => "Update_rows",
            Self::DeleteRows => "Delete_rows",
            Self::Gtid => "Gtid",
            Self::AnonymousGtid => "Anonymous_Gtid",
            Self::PreviousGtids => "Previous_gtids",
            Self::XaPrepare => "XA_prepare",
            Self::TransactionPayload => "Transaction_payload",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
