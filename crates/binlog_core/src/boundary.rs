//! Transaction boundary detection.
//!
//! A pure state machine over the sequence of record types. It answers "is
//! a transaction in flight" without applying anything, and is shared by
//! recovery, the replica sender and any other scanner.
//!
//! | State   | Accepts                                                        |
//! |---------|----------------------------------------------------------------|
//! | None    | Gtid → SawGtid, BEGIN → InDml, statement → None                |
//! | SawGtid | BEGIN → InDml, statement → None, context → InDdl, XA end → None |
//! | InDdl   | context → InDdl, statement → None                              |
//! | InDml   | statement or context → InDml, end of transaction → None        |
//!
//! Incident records are accepted anywhere and ignored records (format
//! description, rotate, previous GTIDs, stop, heartbeat) never move the
//! state. Any other combination moves to `Error`, which is absorbing until
//! [`BoundaryParser::reset`].

use binlog_codec::{ChecksumAlg, CodecResult, EventBody, EventType, RawEvent};

/// Boundary role of one record, independent of parser state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoundaryToken {
    /// Gtid or anonymous Gtid record.
    Gtid,
    /// `BEGIN` or `XA START`.
    BeginTrx,
    /// `COMMIT`, `ROLLBACK`, Xid or XA prepare.
    EndTrx,
    /// `XA ROLLBACK` or `XA COMMIT`.
    EndXaTrx,
    /// User variable, insert id or rand context for the next statement.
    PreStatement,
    /// Any other statement or row record.
    Statement,
    /// Incident record.
    Incident,
    /// Format description, rotate, previous GTIDs, stop, heartbeat.
    Ignore,
}

/// Parser state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ParserState {
    /// Between transactions.
    #[default]
    None,
    /// After a Gtid record, before the group's first statement.
    SawGtid,
    /// Inside a single-statement group that has seen context records.
    InDdl,
    /// Inside a multi-statement transaction.
    InDml,
    /// An invalid sequence was seen.
    Error,
}

/// Classifies a record by type and, for queries, statement text.
#[must_use]
pub fn classify(event_type: EventType, query: Option<&str>) -> BoundaryToken {
    match event_type {
        EventType::Gtid | EventType::AnonymousGtid => BoundaryToken::Gtid,
        EventType::Query => classify_query(query.unwrap_or_default()),
        EventType::Xid | EventType::XaPrepare => BoundaryToken::EndTrx,
        EventType::UserVar | EventType::Intvar | EventType::Rand => BoundaryToken::PreStatement,
        EventType::Incident => BoundaryToken::Incident,
        EventType::FormatDescription
        | EventType::Rotate
        | EventType::PreviousGtids
        | EventType::Stop
        | EventType::Heartbeat => BoundaryToken::Ignore,
        EventType::ExecuteLoadQuery
        | EventType::TableMap
        | EventType::RowsQuery
        | EventType::WriteRows
        | EventType::UpdateRows
        | EventType::DeleteRows
        | EventType::AppendBlock
        | EventType::BeginLoadQuery
        | EventType::DeleteFile
        | EventType::TransactionPayload => BoundaryToken::Statement,
    }
}

/// Classifies a query record by its statement text.
#[must_use]
pub fn classify_query(query: &str) -> BoundaryToken {
    let words: Vec<String> = query
        .split_ascii_whitespace()
        .take(2)
        .map(str::to_ascii_uppercase)
        .collect();
    let first = words.first().map(String::as_str).unwrap_or_default();
    let second = words.get(1).map(String::as_str);

    match (first, second) {
        ("BEGIN", _) => BoundaryToken::BeginTrx,
        ("COMMIT", _) => BoundaryToken::EndTrx,
        ("ROLLBACK", Some("TO")) => BoundaryToken::Statement,
        ("ROLLBACK", _) => BoundaryToken::EndTrx,
        ("XA", Some("START" | "BEGIN")) => BoundaryToken::BeginTrx,
        ("XA", Some("ROLLBACK" | "COMMIT")) => BoundaryToken::EndXaTrx,
        _ => BoundaryToken::Statement,
    }
}

/// Reads the boundary token of an encoded record.
///
/// Only query records are decoded; the rest are classified by type.
///
/// # Errors
///
/// Returns a codec error if a query body cannot be decoded.
pub fn classify_raw(event: &RawEvent, alg: ChecksumAlg) -> CodecResult<BoundaryToken> {
    if event.event_type() != EventType::Query {
        return Ok(classify(event.event_type(), None));
    }
    let body = EventBody::decode(EventType::Query, event.body(alg)?)?;
    Ok(classify(EventType::Query, body.query_text()))
}

/// Transaction boundary state machine.
#[derive(Debug, Clone, Default)]
pub struct BoundaryParser {
    state: ParserState,
}

impl BoundaryParser {
    /// Creates a parser in the `None` state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Returns true while a group has started but not ended.
    #[must_use]
    pub fn is_inside_transaction(&self) -> bool {
        !matches!(self.state, ParserState::None | ParserState::Error)
    }

    /// Returns true if the parser is in the error state.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.state == ParserState::Error
    }

    /// Returns to `None`, clearing any error.
    pub fn reset(&mut self) {
        self.state = ParserState::None;
    }

    /// Feeds one token and returns the new state.
    pub fn feed(&mut self, token: BoundaryToken) -> ParserState {
        use BoundaryToken as T;
        use ParserState as S;

        self.state = match (self.state, token) {
            (S::Error, _) => S::Error,
            (state, T::Incident | T::Ignore) => state,

            (S::None, T::Gtid) => S::SawGtid,
            (S::None | S::SawGtid, T::BeginTrx) => S::InDml,
            (S::None | S::SawGtid | S::InDdl, T::Statement) => S::None,
            (S::SawGtid | S::InDdl, T::PreStatement) => S::InDdl,
            (S::SawGtid, T::EndXaTrx) => S::None,

            (S::InDml, T::Statement | T::PreStatement) => S::InDml,
            (S::InDml, T::EndTrx | T::EndXaTrx) => S::None,

            _ => S::Error,
        };
        self.state
    }

    /// Classifies and feeds one record.
    pub fn feed_event(&mut self, event_type: EventType, query: Option<&str>) -> ParserState {
        self.feed(classify(event_type, query))
    }
}
