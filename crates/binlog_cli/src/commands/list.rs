//! List command implementation.

use super::{index_files, open_file, OutputFormat};
use crate::error::CliResult;
use binlog_codec::EventFlags;
use serde::Serialize;
use std::path::Path;
use std::time::UNIX_EPOCH;

/// One log file as shown by `list`.
#[derive(Debug, Serialize)]
pub struct FileInfo {
    /// File name.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// True if the file was not closed cleanly, or is still being written.
    pub in_use: bool,
    /// Checksum algorithm named in the file header.
    pub checksum: String,
    /// Server version named in the file header.
    pub server_version: String,
    /// Last modification, seconds since the epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<u64>,
}

/// Collects information on every indexed file.
pub fn collect(dir: &Path, base_name: &str) -> CliResult<Vec<FileInfo>> {
    let mut files = Vec::new();
    for name in index_files(dir, base_name)? {
        let meta = std::fs::metadata(dir.join(&name))?;
        let mut reader = open_file(dir, &name)?;
        let checksum = format!("{:?}", reader.checksum_alg());
        let server_version = reader
            .format_description()
            .map(|fde| fde.server_version.clone())
            .unwrap_or_default();
        let in_use = reader
            .read_event()?
            .is_some_and(|fde| fde.header().flags.contains(EventFlags::BINLOG_IN_USE));
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs());
        files.push(FileInfo {
            name,
            size: meta.len(),
            in_use,
            checksum,
            server_version,
            modified,
        });
    }
    Ok(files)
}

/// Runs the list command.
pub fn run(dir: &Path, base_name: &str, format: OutputFormat) -> CliResult<()> {
    let files = collect(dir, base_name)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&files)?),
        OutputFormat::Text => {
            println!("Log files in {} ({} total)", dir.display(), files.len());
            println!("================");
            for file in &files {
                println!(
                    "{:20} {:>12} bytes  {:6}{}",
                    file.name,
                    file.size,
                    file.checksum,
                    if file.in_use { "  in use" } else { "" }
                );
            }
            let total: u64 = files.iter().map(|f| f.size).sum();
            println!();
            println!("Total size: {total} bytes");
        }
    }
    Ok(())
}
