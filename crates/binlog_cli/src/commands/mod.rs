//! CLI command implementations.
//!
//! `list`, `dump` and `verify` read files directly and never take the
//! directory lock, so they work next to a running server. `purge` and
//! `serve` open a manager and fail if another process holds the lock.

pub mod dump;
pub mod list;
pub mod purge;
pub mod serve;
pub mod verify;

use crate::error::{CliError, CliResult};
use binlog_core::BinlogReader;
use binlog_storage::FileBackend;
use std::path::{Path, PathBuf};

/// Output formats shared by the reporting commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable lines.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Returns the file names listed in the index, oldest first.
pub fn index_files(dir: &Path, base_name: &str) -> CliResult<Vec<String>> {
    let index = dir.join(format!("{base_name}.index"));
    let text = std::fs::read_to_string(&index).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            CliError::usage(format!("no log index at {}", index.display()))
        } else {
            CliError::Io(e)
        }
    })?;
    Ok(text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            PathBuf::from(line.trim())
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
        })
        .collect())
}

/// Opens a log file for reading without locking the directory.
pub fn open_file(dir: &Path, name: &str) -> CliResult<BinlogReader> {
    let backend = FileBackend::open_read_only(&dir.join(name))?;
    Ok(BinlogReader::open(Box::new(backend), name)?)
}
