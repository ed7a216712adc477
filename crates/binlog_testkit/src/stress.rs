//! Stress tests for the write path.
//!
//! Several threads run randomized transactions against one manager while
//! rotations are forced in between. Some of the work is autocommitted
//! changes to non-transactional tables, which in statement mode go through
//! the statement cache. [`verify_log`] then checks that every
//! file still parses as a series of complete groups.

use binlog_codec::EventBody;
use binlog_core::{
    classify_raw, BinlogSession, BoundaryParser, CommitTicket, CoreResult, LogFileManager,
    ParserState, TransactionId,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total transactions attempted.
    pub total_ops: usize,
    /// Transactions that were committed.
    pub successful_ops: usize,
    /// Transactions that failed or were rolled back.
    pub failed_ops: usize,
    /// Forced rotations performed.
    pub rotations: usize,
    /// Total duration.
    pub duration: Duration,
    /// Transactions per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, rotations: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            rotations,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total transactions: {}", self.total_ops);
        println!("Committed: {}", self.successful_ops);
        println!("Failed or rolled back: {}", self.failed_ops);
        println!("Rotations: {}", self.rotations);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} trx/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of concurrent sessions.
    pub threads: usize,
    /// Transactions run by each session.
    pub transactions_per_thread: usize,
    /// Upper bound on statements per transaction.
    pub max_statements: usize,
    /// Chance that a transaction ends in rollback instead of commit.
    pub rollback_probability: f64,
    /// Chance that a session forces a rotation after a transaction.
    pub rotate_probability: f64,
    /// Chance that a unit of work is an autocommitted statement against
    /// non-transactional tables instead of a transaction.
    pub non_transactional_probability: f64,
    /// Seed; each thread derives its own generator from it.
    pub seed: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            transactions_per_thread: 250,
            max_statements: 4,
            rollback_probability: 0.1,
            rotate_probability: 0.02,
            non_transactional_probability: 0.2,
            seed: 0x5eed,
        }
    }
}

/// Runs randomized transactions from `config.threads` sessions at once.
///
/// Committed transactions alternate between an Xid marker and `COMMIT`.
/// Every committed unit of work, transactional or not, forms one group.
pub fn stress_concurrent_commits(
    manager: &Arc<LogFileManager>,
    config: &StressConfig,
) -> StressTestResult {
    let committed = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let rotations = Arc::new(AtomicUsize::new(0));
    let next_xid = Arc::new(AtomicU64::new(1));

    let start = Instant::now();
    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let manager = Arc::clone(manager);
            let config = config.clone();
            let committed = Arc::clone(&committed);
            let failed = Arc::clone(&failed);
            let rotations = Arc::clone(&rotations);
            let next_xid = Arc::clone(&next_xid);

            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(t as u64));
                let mut session = BinlogSession::new(Arc::clone(&manager), t as u32 + 1);
                session.set_schema("stress");

                for i in 0..config.transactions_per_thread {
                    let done = if rng.gen_bool(config.non_transactional_probability) {
                        let statements = rng.gen_range(1..=config.max_statements.max(1));
                        let with_context = rng.gen_bool(0.5);
                        non_transactional_statement(&mut session, t, i, statements, with_context)
                            .and_then(|ticket| release(&manager, ticket))
                            .is_ok()
                    } else {
                        run_transaction(&mut rng, &mut session, &manager, &config, &next_xid, t, i)
                    };
                    let counter = if done { &committed } else { &failed };
                    counter.fetch_add(1, Ordering::Relaxed);

                    if rng.gen_bool(config.rotate_probability) && manager.rotate(true).is_ok() {
                        rotations.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        committed.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        rotations.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

fn release(manager: &LogFileManager, ticket: Option<CommitTicket>) -> CoreResult<()> {
    match ticket {
        Some(ticket) => manager.finish_commit(ticket),
        None => Ok(()),
    }
}

/// Logs one autocommitted statement touching `statements` non-transactional
/// tables, optionally preceded by an insert id context record.
fn non_transactional_statement(
    session: &mut BinlogSession,
    t: usize,
    i: usize,
    statements: usize,
    with_context: bool,
) -> CoreResult<Option<CommitTicket>> {
    if with_context {
        session.write_event(EventBody::Intvar { kind: 2, value: i as u64 + 1 }, false)?;
    }
    for s in 0..statements {
        session.log_statement(&format!("INSERT INTO m{t}_{s} VALUES ({i})"), false)?;
    }
    session.end_statement(None)
}

/// Runs one explicit transaction; returns true if it was committed.
fn run_transaction(
    rng: &mut StdRng,
    session: &mut BinlogSession,
    manager: &LogFileManager,
    config: &StressConfig,
    next_xid: &AtomicU64,
    t: usize,
    i: usize,
) -> bool {
    session.begin();
    let statements = rng.gen_range(1..=config.max_statements.max(1));
    let mut ok = true;
    for s in 0..statements {
        let query = format!("INSERT INTO t{t} VALUES ({i}, {s}, {})", rng.gen::<u32>());
        if session.log_statement(&query, true).is_err() {
            ok = false;
            break;
        }
    }

    if !ok || rng.gen_bool(config.rollback_probability) {
        let _ = session.rollback();
        return false;
    }
    let xid = rng
        .gen_bool(0.5)
        .then(|| TransactionId::new(next_xid.fetch_add(1, Ordering::Relaxed)));
    session
        .commit(xid)
        .and_then(|ticket| release(manager, ticket))
        .is_ok()
}

/// Shape of a log as seen by [`verify_log`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSummary {
    /// Files in the index.
    pub files: usize,
    /// Complete groups across all files.
    pub groups: usize,
    /// Records across all files, including file headers.
    pub records: usize,
}

/// Reads every file of the log and checks that each one holds only
/// complete groups.
///
/// # Errors
///
/// Returns a description of the first file that does not parse or that
/// ends inside a group.
pub fn verify_log(manager: &LogFileManager) -> Result<LogSummary, String> {
    let mut summary = LogSummary::default();
    for entry in manager.index_entries() {
        let mut reader = manager
            .open_reader(&entry.name)
            .map_err(|e| format!("{}: {e}", entry.name))?;
        let alg = reader.checksum_alg();
        let mut parser = BoundaryParser::new();
        for item in reader.events() {
            let (offset, event) = item.map_err(|e| format!("{}: {e}", entry.name))?;
            summary.records += 1;
            let token =
                classify_raw(&event, alg).map_err(|e| format!("{}@{offset}: {e}", entry.name))?;
            let before = parser.state();
            match parser.feed(token) {
                ParserState::Error => {
                    return Err(format!(
                        "{}@{offset}: {} breaks the transaction sequence",
                        entry.name,
                        event.event_type()
                    ))
                }
                ParserState::None if before != ParserState::None => summary.groups += 1,
                _ => {}
            }
        }
        if parser.is_inside_transaction() {
            return Err(format!("{} ends inside a group", entry.name));
        }
        summary.files += 1;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{TempBinlog, TEST_SOURCE};

    #[test]
    fn concurrent_commits_form_complete_groups() {
        let log = TempBinlog::with_gtids();
        let config = StressConfig {
            threads: 4,
            transactions_per_thread: 40,
            rotate_probability: 0.05,
            ..StressConfig::default()
        };
        let result = stress_concurrent_commits(&log.manager, &config);
        assert_eq!(result.total_ops, 160);
        assert!(result.successful_ops > 0);

        let summary = verify_log(&log).unwrap();
        assert_eq!(summary.groups, result.successful_ops);
        assert_eq!(log.gtid_executed().count(), result.successful_ops as u64);
        assert_eq!(summary.files, log.list_files().unwrap().len());
        assert_eq!(log.prepared().current(), 0);
    }

    #[test]
    fn committed_work_survives_a_crash() {
        let log = TempBinlog::with_gtids();
        let config = StressConfig {
            threads: 2,
            transactions_per_thread: 30,
            rollback_probability: 0.0,
            ..StressConfig::default()
        };
        let result = stress_concurrent_commits(&log.manager, &config);
        assert_eq!(result.successful_ops, 60);

        let log = log.reopen_unclean();
        assert_eq!(log.gtid_executed().count(), 60);
        assert_eq!(verify_log(&log).unwrap().groups, 60);
    }

    fn statement_mode() -> TempBinlog {
        TempBinlog::with_config(|config| config.gtid_source(TEST_SOURCE).row_based(false))
    }

    #[test]
    fn statement_mode_groups_stay_complete() {
        let log = statement_mode();
        let config = StressConfig {
            threads: 4,
            transactions_per_thread: 40,
            rotate_probability: 0.05,
            non_transactional_probability: 0.5,
            ..StressConfig::default()
        };
        let result = stress_concurrent_commits(&log.manager, &config);
        assert!(result.successful_ops > 0);

        let summary = verify_log(&log).unwrap();
        assert_eq!(summary.groups, result.successful_ops);
        assert_eq!(log.gtid_executed().count(), result.successful_ops as u64);
    }

    #[test]
    fn statement_mode_log_reopens_after_close_and_crash() {
        let log = statement_mode();
        let config = StressConfig {
            threads: 2,
            transactions_per_thread: 30,
            rollback_probability: 0.0,
            non_transactional_probability: 0.5,
            ..StressConfig::default()
        };
        let result = stress_concurrent_commits(&log.manager, &config);
        assert_eq!(result.successful_ops, 60);

        let log = log.reopen();
        assert!(!log.recovery_report().was_in_use);
        assert_eq!(log.gtid_executed().count(), 60);

        let result = stress_concurrent_commits(&log.manager, &config);
        assert_eq!(result.successful_ops, 60);
        let log = log.reopen_unclean();
        assert!(log.recovery_report().was_in_use);
        assert_eq!(log.gtid_executed().count(), 120);
        assert_eq!(verify_log(&log).unwrap().groups, 120);
    }
}
