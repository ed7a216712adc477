//! Purge command implementation.

use crate::error::{CliError, CliResult};
use binlog_core::{BinlogConfig, LogFileManager, NoopCoordinator};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::info;

/// Which files to remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurgeTarget {
    /// Every file before the named one.
    To(String),
    /// Every file last modified before this time.
    Before(SystemTime),
}

impl PurgeTarget {
    /// Builds a target from the command-line flags; exactly one must be set.
    pub fn from_args(to: Option<String>, before: Option<u64>) -> CliResult<Self> {
        match (to, before) {
            (Some(name), None) => Ok(Self::To(name)),
            (None, Some(secs)) => Ok(Self::Before(UNIX_EPOCH + Duration::from_secs(secs))),
            _ => Err(CliError::usage("purge needs exactly one of --to or --before")),
        }
    }
}

/// Runs the purge command.
///
/// Opening the log starts a new file, so the file that was newest before
/// the command can be purged too.
pub fn run(dir: &Path, base_name: &str, target: &PurgeTarget) -> CliResult<()> {
    let config = BinlogConfig::new(dir).base_name(base_name);
    let manager = LogFileManager::open(config, &mut NoopCoordinator)?;
    let removed = purge(&manager, target);
    let closed = manager.close();
    let removed = removed?;
    closed?;

    if removed.is_empty() {
        println!("Nothing to purge");
    } else {
        println!("Purged {} file(s):", removed.len());
        for name in &removed {
            println!("  {name}");
        }
    }
    Ok(())
}

/// Removes the files selected by `target` and returns their names.
pub fn purge(manager: &LogFileManager, target: &PurgeTarget) -> CliResult<Vec<String>> {
    let removed = match target {
        PurgeTarget::To(name) => manager.purge_to(name)?,
        PurgeTarget::Before(cutoff) => manager.purge_before_time(*cutoff)?,
    };
    info!(count = removed.len(), "purged log files");
    Ok(removed)
}
