//! Verify command implementation.

use super::{index_files, open_file};
use crate::error::{CliError, CliResult};
use binlog_codec::{EventFlags, EventType};
use binlog_core::{classify_raw, BoundaryParser, ParserState};
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of files checked.
    pub files_checked: usize,
    /// Number of records checked.
    pub records_checked: usize,
    /// Number of complete groups found.
    pub groups: usize,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(dir: &Path, base_name: &str) -> CliResult<()> {
    println!("Verifying binary log at {:?}", dir);
    println!();

    let result = verify_dir(dir, base_name)?;
    println!("Files checked: {}", result.files_checked);
    println!("Records checked: {}", result.records_checked);
    println!("Complete groups: {}", result.groups);
    for error in &result.errors {
        println!("  - {error}");
    }

    println!();
    if result.is_ok() {
        println!("✓ Binary log verification passed");
        Ok(())
    } else {
        println!("✗ Binary log verification failed");
        Err(CliError::VerifyFailed(result.errors.len()))
    }
}

/// Checks every indexed file: checksums, positions, group structure, and
/// that every file but the newest ends with a rotation or stop record.
pub fn verify_dir(dir: &Path, base_name: &str) -> CliResult<VerifyResult> {
    let files = index_files(dir, base_name)?;
    let mut result = VerifyResult::default();
    for (i, name) in files.iter().enumerate() {
        let newest = i + 1 == files.len();
        if !dir.join(name).exists() {
            result.errors.push(format!("{name}: listed in the index but missing"));
            continue;
        }
        verify_file(dir, name, newest, &mut result);
        result.files_checked += 1;
    }
    Ok(result)
}

fn verify_file(dir: &Path, name: &str, newest: bool, result: &mut VerifyResult) {
    let mut reader = match open_file(dir, name) {
        Ok(reader) => reader,
        Err(e) => {
            result.errors.push(format!("{name}: {e}"));
            return;
        }
    };
    let alg = reader.checksum_alg();
    let mut parser = BoundaryParser::new();
    let mut last = None;
    let mut in_use = false;

    for item in reader.events() {
        let (offset, event) = match item {
            Ok(item) => item,
            Err(e) => {
                result.errors.push(format!("{name}: unreadable record: {e}"));
                return;
            }
        };
        result.records_checked += 1;

        let end = offset + event.len() as u64;
        if u64::from(event.header().log_pos) != end {
            result.errors.push(format!(
                "{name}@{offset}: end_log_pos {} does not match record end {end}",
                event.header().log_pos
            ));
        }
        if event.event_type() == EventType::FormatDescription {
            in_use = event.header().flags.contains(EventFlags::BINLOG_IN_USE);
        } else if let Err(e) = event.decode(alg) {
            result.errors.push(format!("{name}@{offset}: {e}"));
        }

        let token = match classify_raw(&event, alg) {
            Ok(token) => token,
            Err(e) => {
                result.errors.push(format!("{name}@{offset}: {e}"));
                return;
            }
        };
        let before = parser.state();
        match parser.feed(token) {
            ParserState::Error => {
                result.errors.push(format!(
                    "{name}@{offset}: {} breaks the transaction sequence",
                    event.event_type()
                ));
                parser.reset();
            }
            ParserState::None if before != ParserState::None => result.groups += 1,
            _ => {}
        }
        last = Some(event.event_type());
    }

    if parser.is_inside_transaction() {
        result.errors.push(format!("{name}: ends inside a group"));
    }
    let closed = matches!(last, Some(EventType::Rotate | EventType::Stop));
    if !newest && !closed {
        result.errors.push(format!("{name}: ends without a rotation or stop record"));
    }
    if !newest && in_use {
        result.errors.push(format!("{name}: older file still marked in use"));
    }
}
