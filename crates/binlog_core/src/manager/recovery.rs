//! Crash recovery for the newest log file.
//!
//! A file whose format description still carries the in-use flag was not
//! closed cleanly. Recovery makes one forward pass over that file only:
//!
//! 1. Feed every record to a [`BoundaryParser`] and remember the end of the
//!    last complete group. Anything after it is a torn fragment.
//! 2. Collect the Xid of every complete two-phase group.
//! 3. Truncate the torn tail, sync, and hand the Xids to the transaction
//!    coordinator exactly once.
//! 4. Clear the in-use flag in place and sync.
//!
//! The same pass rebuilds the set of logged GTIDs from the file's
//! PreviousGtids record and its complete Gtid groups, whether or not the
//! file needs recovery.

use crate::boundary::{classify_raw, BoundaryParser, ParserState};
use crate::error::{CoreError, CoreResult, IoOp};
use crate::reader::BinlogReader;
use crate::types::TransactionId;
use binlog_codec::{
    ChecksumAlg, EventBody, EventFlags, EventType, Gtid, GtidSet, RawEvent, FLAGS_OFFSET,
    MAGIC_LEN,
};
use binlog_storage::StorageBackend;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// The external transaction manager consulted during recovery.
pub trait TransactionCoordinator {
    /// Resolves the transactions whose end markers reached the log.
    ///
    /// The coordinator commits those it also has prepared and ignores the
    /// rest.
    ///
    /// # Errors
    ///
    /// Any error aborts opening the log.
    fn resolve(&mut self, prepared: &BTreeSet<TransactionId>) -> CoreResult<()>;
}

impl<F> TransactionCoordinator for F
where
    F: FnMut(&BTreeSet<TransactionId>) -> CoreResult<()>,
{
    fn resolve(&mut self, prepared: &BTreeSet<TransactionId>) -> CoreResult<()> {
        self(prepared)
    }
}

/// A coordinator with nothing to resolve.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCoordinator;

impl TransactionCoordinator for NoopCoordinator {
    fn resolve(&mut self, _prepared: &BTreeSet<TransactionId>) -> CoreResult<()> {
        Ok(())
    }
}

/// What recovery found in the newest file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// File that was scanned.
    pub file: String,
    /// True if the file had not been closed cleanly.
    pub was_in_use: bool,
    /// Xids handed to the coordinator.
    pub prepared: BTreeSet<TransactionId>,
    /// Bytes removed from a torn tail.
    pub truncated_bytes: u64,
    /// End of the last complete group.
    pub valid_end: u64,
}

/// Result of scanning one file.
#[derive(Debug, Default)]
pub(crate) struct FileScan {
    pub checksum: ChecksumAlg,
    pub in_use: bool,
    pub fde_flags: EventFlags,
    pub has_format: bool,
    pub valid_end: u64,
    pub physical_len: u64,
    pub prepared: BTreeSet<TransactionId>,
    pub logged_gtids: GtidSet,
}

#[derive(Default)]
struct OpenGroup {
    gtid: Option<Gtid>,
    xids: Vec<TransactionId>,
}

/// Scans `backend` from the magic to the first unreadable record.
///
/// # Errors
///
/// - [`CoreError::Fatal`] if the format description cannot be read
/// - [`CoreError::Inconsistent`] if the record sequence is not a valid
///   series of groups
pub(crate) fn scan_file(
    backend: Box<dyn StorageBackend>,
    name: &str,
) -> CoreResult<(FileScan, Box<dyn StorageBackend>)> {
    let mut reader = BinlogReader::open(backend, name)
        .map_err(|e| CoreError::fatal(format!("{name}: unreadable format description: {e}")))?;
    let mut scan = FileScan {
        checksum: reader.checksum_alg(),
        has_format: reader.format_description().is_some(),
        valid_end: MAGIC_LEN,
        physical_len: reader.length()?,
        ..FileScan::default()
    };
    let alg = scan.checksum;

    let mut parser = BoundaryParser::new();
    let mut group = OpenGroup::default();
    for item in reader.events() {
        let (offset, event) = match item {
            Ok(item) => item,
            Err(e) => {
                debug!(file = %name, error = %e, "scan stopped at unreadable record");
                break;
            }
        };
        let end = offset + event.len() as u64;

        if let Err(e) = note_record(&event, alg, &mut scan, &mut group) {
            debug!(file = %name, offset, error = %e, "scan stopped at undecodable record");
            break;
        }
        let token = match classify_raw(&event, alg) {
            Ok(token) => token,
            Err(e) => {
                debug!(file = %name, offset, error = %e, "scan stopped at undecodable query");
                break;
            }
        };
        match parser.feed(token) {
            ParserState::None => {
                scan.valid_end = end;
                if let Some(gtid) = group.gtid.take() {
                    scan.logged_gtids.add(gtid);
                }
                scan.prepared.extend(group.xids.drain(..));
            }
            ParserState::Error => {
                return Err(CoreError::inconsistent(format!(
                    "{name}: record {} at offset {offset} breaks the transaction sequence",
                    event.event_type()
                )));
            }
            _ => {}
        }
    }
    let backend = reader.into_backend();
    Ok((scan, backend))
}

fn note_record(
    event: &RawEvent,
    alg: ChecksumAlg,
    scan: &mut FileScan,
    group: &mut OpenGroup,
) -> CoreResult<()> {
    match event.event_type() {
        EventType::FormatDescription => {
            scan.fde_flags = event.header().flags;
            scan.in_use = event.header().flags.contains(EventFlags::BINLOG_IN_USE);
        }
        EventType::PreviousGtids => {
            if let EventBody::PreviousGtids(set) = event.decode(alg)?.body {
                scan.logged_gtids.union_with(&set);
            }
        }
        EventType::Gtid | EventType::AnonymousGtid => {
            if let EventBody::Gtid(g) | EventBody::AnonymousGtid(g) = event.decode(alg)?.body {
                *group = OpenGroup {
                    gtid: g.gtid(),
                    xids: Vec::new(),
                };
            }
        }
        EventType::Xid => {
            if let EventBody::Xid { xid } = event.decode(alg)?.body {
                group.xids.push(TransactionId::new(xid));
            }
        }
        _ => {}
    }
    Ok(())
}

/// Recovers `name` if it was left in use, and returns the report together
/// with the GTIDs the file records.
///
/// # Errors
///
/// Returns scan errors, I/O errors, or the coordinator's error.
pub(crate) fn recover_file(
    backend: Box<dyn StorageBackend>,
    name: &str,
    coordinator: &mut dyn TransactionCoordinator,
) -> CoreResult<(RecoveryReport, GtidSet)> {
    let (scan, mut backend) = scan_file(backend, name)?;
    let mut report = RecoveryReport {
        file: name.to_string(),
        was_in_use: scan.in_use,
        valid_end: scan.valid_end,
        ..RecoveryReport::default()
    };
    if !scan.in_use {
        return Ok((report, scan.logged_gtids));
    }

    info!(file = %name, xids = scan.prepared.len(), "recovering log left in use");
    if scan.valid_end < scan.physical_len {
        report.truncated_bytes = scan.physical_len - scan.valid_end;
        warn!(
            file = %name,
            offset = scan.valid_end,
            bytes = report.truncated_bytes,
            "truncating incomplete tail"
        );
        backend
            .truncate(scan.valid_end)
            .map_err(CoreError::io_at(IoOp::Write))?;
        backend.sync().map_err(CoreError::io_at(IoOp::Sync))?;
    }

    coordinator.resolve(&scan.prepared)?;
    report.prepared = scan.prepared;

    if scan.has_format {
        clear_in_use(backend.as_mut(), scan.fde_flags)?;
    }
    info!(file = %name, "recovery complete");
    Ok((report, scan.logged_gtids))
}

/// Clears the in-use bit of the format description at the start of a file.
///
/// The checksum of a format description ignores that bit, so the footer
/// stays valid.
pub(crate) fn clear_in_use(backend: &mut dyn StorageBackend, flags: EventFlags) -> CoreResult<()> {
    let cleared = flags.without(EventFlags::BINLOG_IN_USE);
    backend
        .write_at(MAGIC_LEN + FLAGS_OFFSET as u64, &cleared.bits().to_le_bytes())
        .map_err(CoreError::io_at(IoOp::Write))?;
    backend.sync().map_err(CoreError::io_at(IoOp::Sync))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use binlog_codec::{Event, FormatDescriptionEvent, GtidEvent, BINLOG_MAGIC};
    use binlog_storage::InMemoryBackend;
    use uuid::Uuid;

    const ALG: ChecksumAlg = ChecksumAlg::Crc32;

    struct FileBuilder {
        bytes: Vec<u8>,
    }

    impl FileBuilder {
        fn new(in_use: bool) -> Self {
            let mut b = Self {
                bytes: BINLOG_MAGIC.to_vec(),
            };
            let flags = if in_use {
                EventFlags::BINLOG_IN_USE
            } else {
                EventFlags::empty()
            };
            b.push(
                Event::new(
                    EventBody::FormatDescription(FormatDescriptionEvent::new("test", ALG)),
                    1,
                    0,
                )
                .with_flags(flags),
            );
            b
        }

        fn push(&mut self, event: Event) -> &mut Self {
            let bytes = event.encode_at(self.bytes.len() as u64, ALG).unwrap();
            self.bytes.extend_from_slice(&bytes);
            self
        }

        fn body(&mut self, body: EventBody) -> &mut Self {
            self.push(Event::new(body, 1, 0))
        }

        fn trx(&mut self, xid: u64) -> &mut Self {
            self.body(EventBody::AnonymousGtid(GtidEvent::anonymous()))
                .body(EventBody::query("db", "BEGIN"))
                .body(EventBody::query("db", "INSERT INTO t VALUES (1)"))
                .body(EventBody::Xid { xid })
        }

        fn backend(&self) -> Box<dyn StorageBackend> {
            Box::new(InMemoryBackend::with_data(self.bytes.clone()))
        }
    }

    #[test]
    fn resolves_exactly_the_logged_xids() {
        let mut file = FileBuilder::new(true);
        file.body(EventBody::query("db", "CREATE TABLE t (a INT)"))
            .trx(5)
            .body(EventBody::AnonymousGtid(GtidEvent::anonymous()))
            .body(EventBody::Rand { seed1: 1, seed2: 2 })
            .body(EventBody::query("db", "UPDATE m SET a = RAND()"))
            .trx(7)
            .body(EventBody::Heartbeat {
                log_file: "binlog.000001".into(),
            })
            .trx(9);

        let mut calls = Vec::new();
        let mut coordinator = |ids: &BTreeSet<TransactionId>| -> CoreResult<()> {
            calls.push(ids.clone());
            Ok(())
        };
        let (report, _) = recover_file(file.backend(), "binlog.000001", &mut coordinator).unwrap();

        let expected: BTreeSet<TransactionId> =
            [5, 7, 9].into_iter().map(TransactionId::new).collect();
        assert_eq!(calls, vec![expected.clone()]);
        assert_eq!(report.prepared, expected);
        assert!(report.was_in_use);
        assert_eq!(report.truncated_bytes, 0);
    }

    #[test]
    fn torn_tail_is_truncated_and_flag_cleared() {
        let mut file = FileBuilder::new(true);
        file.trx(1);
        let complete = file.bytes.len() as u64;
        file.trx(2);
        // Cut the second transaction's Xid in half.
        let cut = file.bytes.len() - 10;
        file.bytes.truncate(cut);

        let mem = InMemoryBackend::with_data(file.bytes.clone());
        let shared = mem.share();
        let mut seen = BTreeSet::new();
        let mut coordinator = |ids: &BTreeSet<TransactionId>| -> CoreResult<()> {
            seen = ids.clone();
            Ok(())
        };
        let (report, _) = recover_file(Box::new(mem), "binlog.000001", &mut coordinator).unwrap();

        assert_eq!(report.valid_end, complete);
        assert_eq!(report.truncated_bytes, cut as u64 - complete);
        assert_eq!(seen, [TransactionId::new(1)].into_iter().collect());

        let data = shared.data();
        assert_eq!(data.len() as u64, complete);
        let mut reader = BinlogReader::open(Box::new(shared), "binlog.000001").unwrap();
        let fde = reader.read_event().unwrap().unwrap();
        assert!(!fde.header().flags.contains(EventFlags::BINLOG_IN_USE));
        fde.verify(ALG).unwrap();
    }

    #[test]
    fn clean_file_is_left_alone() {
        let mut file = FileBuilder::new(false);
        file.trx(3);
        let mut called = false;
        let mut coordinator = |_: &BTreeSet<TransactionId>| -> CoreResult<()> {
            called = true;
            Ok(())
        };
        let (report, _) = recover_file(file.backend(), "binlog.000001", &mut coordinator).unwrap();
        assert!(!called);
        assert!(!report.was_in_use);
    }

    #[test]
    fn rebuilds_logged_gtids() {
        let sid = Uuid::from_u128(0xabc);
        let mut previous = GtidSet::new();
        previous.add_range(sid, 1, 3);

        let mut file = FileBuilder::new(false);
        file.body(EventBody::PreviousGtids(previous))
            .body(EventBody::Gtid(GtidEvent::assigned(Gtid::new(sid, 4))))
            .body(EventBody::query("db", "CREATE TABLE t (a INT)"))
            .body(EventBody::Gtid(GtidEvent::assigned(Gtid::new(sid, 5))))
            .body(EventBody::query("db", "BEGIN"));

        let (_, gtids) = recover_file(file.backend(), "binlog.000001", &mut NoopCoordinator).unwrap();
        assert_eq!(gtids.to_string(), format!("{sid}:1-4"));
    }

    #[test]
    fn invalid_sequence_is_inconsistent() {
        let mut file = FileBuilder::new(true);
        file.body(EventBody::Xid { xid: 1 });
        let err = recover_file(file.backend(), "binlog.000001", &mut NoopCoordinator).unwrap_err();
        assert!(matches!(err, CoreError::Inconsistent { .. }));
    }

    #[test]
    fn corrupt_format_description_is_fatal() {
        let mut file = FileBuilder::new(true);
        file.bytes[10] ^= 0xff;
        let err = recover_file(file.backend(), "binlog.000001", &mut NoopCoordinator).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn coordinator_error_aborts() {
        let mut file = FileBuilder::new(true);
        file.trx(1);
        let mut coordinator = |_: &BTreeSet<TransactionId>| -> CoreResult<()> {
            Err(CoreError::invalid_operation("engine unavailable"))
        };
        assert!(recover_file(file.backend(), "binlog.000001", &mut coordinator).is_err());
    }
}
