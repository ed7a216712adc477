//! Log directory layout and locking.
//!
//! ```text
//! <dir>/
//! ├─ LOCK               # Advisory lock held by the writing manager
//! ├─ binlog.index       # One absolute file path per line
//! ├─ binlog.purge       # Present only while a purge is in progress
//! ├─ binlog.000001
//! └─ binlog.000002      # Active file
//! ```

use crate::error::{CoreError, CoreResult, IoOp};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";

/// Number of digits in a file sequence suffix.
const SEQ_DIGITS: usize = 6;

/// Largest sequence number a file name can carry.
pub const MAX_FILE_SEQUENCE: u32 = 999_999;

/// An open, locked log directory.
///
/// Only one `LogDir` can exist per directory at a time; the lock is released
/// when the value is dropped.
#[derive(Debug)]
pub struct LogDir {
    path: PathBuf,
    base_name: String,
    _lock_file: File,
}

impl LogDir {
    /// Opens (creating if needed) and locks a log directory.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Locked`] if another manager holds the lock, or
    /// an I/O error.
    pub fn open(path: &Path, base_name: &str) -> CoreResult<Self> {
        if base_name.is_empty() || base_name.contains(['/', '\\', '\n']) {
            return Err(CoreError::invalid_operation(format!(
                "invalid log base name {base_name:?}"
            )));
        }
        fs::create_dir_all(path).map_err(CoreError::io_at(IoOp::Open))?;
        let path = fs::canonicalize(path).map_err(CoreError::io_at(IoOp::Open))?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))
            .map_err(CoreError::io_at(IoOp::Open))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::Locked);
        }

        Ok(Self {
            path,
            base_name: base_name.to_string(),
            _lock_file: lock_file,
        })
    }

    /// Returns the absolute directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the file name stem.
    #[must_use]
    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    /// Returns the index file path.
    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.path.join(format!("{}.index", self.base_name))
    }

    /// Returns the path of the purge registry.
    #[must_use]
    pub fn purge_registry_path(&self) -> PathBuf {
        self.path.join(format!("{}.purge", self.base_name))
    }

    /// Returns the name of log file number `seq`.
    #[must_use]
    pub fn file_name(&self, seq: u32) -> String {
        format!("{}.{seq:0width$}", self.base_name, width = SEQ_DIGITS)
    }

    /// Returns the absolute path of a log file.
    #[must_use]
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Parses the sequence number out of a file name of this log.
    #[must_use]
    pub fn sequence_of(&self, name: &str) -> Option<u32> {
        let suffix = name.strip_prefix(&self.base_name)?.strip_prefix('.')?;
        if suffix.len() != SEQ_DIGITS || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        suffix.parse().ok()
    }

    /// Lists log files present on disk, sorted by sequence.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn files_on_disk(&self) -> CoreResult<Vec<(u32, String)>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.path).map_err(CoreError::io_at(IoOp::Read))? {
            let entry = entry.map_err(CoreError::io_at(IoOp::Read))?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if let Some(seq) = self.sequence_of(&name) {
                out.push((seq, name));
            }
        }
        out.sort();
        Ok(out)
    }

    /// Makes directory entry changes (create, rename, delete) durable.
    #[cfg(unix)]
    pub fn sync(&self) -> CoreResult<()> {
        let dir = File::open(&self.path).map_err(CoreError::io_at(IoOp::Sync))?;
        dir.sync_all().map_err(CoreError::io_at(IoOp::Sync))?;
        Ok(())
    }

    /// Makes directory entry changes durable; a no-op where directories
    /// cannot be synced.
    #[cfg(not(unix))]
    pub fn sync(&self) -> CoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_open_is_locked() {
        let tmp = tempdir().unwrap();
        let _first = LogDir::open(tmp.path(), "binlog").unwrap();
        assert!(matches!(
            LogDir::open(tmp.path(), "binlog"),
            Err(CoreError::Locked)
        ));
    }

    #[test]
    fn lock_released_on_drop() {
        let tmp = tempdir().unwrap();
        drop(LogDir::open(tmp.path(), "binlog").unwrap());
        LogDir::open(tmp.path(), "binlog").unwrap();
    }

    #[test]
    fn file_names() {
        let tmp = tempdir().unwrap();
        let dir = LogDir::open(tmp.path(), "binlog").unwrap();
        assert_eq!(dir.file_name(3), "binlog.000003");
        assert_eq!(dir.sequence_of("binlog.000003"), Some(3));
        assert_eq!(dir.sequence_of("binlog.index"), None);
        assert_eq!(dir.sequence_of("relay.000003"), None);
        assert_eq!(dir.sequence_of("binlog.00003"), None);
        assert!(dir.index_path().ends_with("binlog.index"));
    }

    #[test]
    fn lists_files_in_sequence_order() {
        let tmp = tempdir().unwrap();
        let dir = LogDir::open(tmp.path(), "binlog").unwrap();
        for seq in [3, 1, 2] {
            File::create(dir.file_path(&dir.file_name(seq))).unwrap();
        }
        File::create(dir.index_path()).unwrap();
        let seqs: Vec<u32> = dir.files_on_disk().unwrap().into_iter().map(|(s, _)| s).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn bad_base_name_rejected() {
        let tmp = tempdir().unwrap();
        assert!(LogDir::open(tmp.path(), "a/b").is_err());
        assert!(LogDir::open(tmp.path(), "").is_err());
    }
}
