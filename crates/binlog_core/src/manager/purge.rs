//! Two-phase purge of old log files.
//!
//! 1. **Register**: the victim names are written to `<base>.purge` and synced.
//! 2. **Complete**: the index is rewritten without the victims, the files
//!    are deleted, and the registry is removed.
//!
//! A crash at any point after phase 1 leaves a registry behind. The next
//! open (or the next purge) replays phase 2 from it. Every step of phase 2
//! is idempotent, so a replay after a partial completion converges on the
//! same state.

use crate::dir::LogDir;
use crate::error::{CoreError, CoreResult, IoOp};
use crate::index::{IndexEntry, LogIndex};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Files currently open by readers, with a reference count per file.
#[derive(Debug, Default, Clone)]
pub struct ReaderPins {
    pins: Arc<Mutex<HashMap<String, usize>>>,
}

impl ReaderPins {
    /// Pins `name` until the returned guard drops.
    pub fn pin(&self, name: &str) -> FilePin {
        *self.pins.lock().entry(name.to_string()).or_insert(0) += 1;
        FilePin {
            pins: Arc::clone(&self.pins),
            name: name.to_string(),
        }
    }

    /// Returns true if a reader has `name` open.
    #[must_use]
    pub fn is_pinned(&self, name: &str) -> bool {
        self.pins.lock().get(name).is_some_and(|n| *n > 0)
    }
}

/// Keeps a file from being purged while a reader uses it.
#[derive(Debug)]
pub struct FilePin {
    pins: Arc<Mutex<HashMap<String, usize>>>,
    name: String,
}

impl FilePin {
    /// Name of the pinned file.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for FilePin {
    fn drop(&mut self) {
        let mut pins = self.pins.lock();
        if let Some(count) = pins.get_mut(&self.name) {
            *count -= 1;
            if *count == 0 {
                pins.remove(&self.name);
            }
        }
    }
}

/// Picks the files to purge: the prefix of `entries` before `cutoff`,
/// stopping at the active file or the first file a reader has open.
pub(crate) fn select_victims(
    entries: &[IndexEntry],
    cutoff: usize,
    active: &str,
    pins: &ReaderPins,
) -> Vec<String> {
    let mut victims = Vec::new();
    for entry in entries.iter().take(cutoff) {
        if entry.name == active {
            break;
        }
        if pins.is_pinned(&entry.name) {
            debug!(file = %entry.name, "purge stops at file in use by a reader");
            break;
        }
        victims.push(entry.name.clone());
    }
    victims
}

/// Returns how many leading entries were last modified before `cutoff`.
pub(crate) fn count_older_than(entries: &[IndexEntry], cutoff: SystemTime) -> CoreResult<usize> {
    let mut count = 0;
    for entry in entries {
        let modified = fs::metadata(&entry.path)
            .and_then(|m| m.modified())
            .map_err(CoreError::io_at(IoOp::Read))?;
        if modified >= cutoff {
            break;
        }
        count += 1;
    }
    Ok(count)
}

/// Phase 1: durably records the victims.
pub(crate) fn register(dir: &LogDir, victims: &[String]) -> CoreResult<()> {
    let mut content = victims.join("\n");
    content.push('\n');
    let path = dir.purge_registry_path();
    fs::write(&path, content).map_err(CoreError::io_at(IoOp::Write))?;
    fs::File::open(&path)
        .and_then(|f| f.sync_all())
        .map_err(CoreError::io_at(IoOp::Sync))?;
    dir.sync()?;
    debug!(files = victims.len(), "purge registered");
    Ok(())
}

/// Phase 2: removes the victims from the index and the file system, then
/// drops the registry.
pub(crate) fn complete(dir: &LogDir, index: &mut LogIndex, victims: &[String]) -> CoreResult<()> {
    index.remove_names(dir, victims)?;
    for name in victims {
        match fs::remove_file(dir.file_path(name)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(CoreError::io(IoOp::Write, e)),
        }
    }
    match fs::remove_file(dir.purge_registry_path()) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(CoreError::io(IoOp::Write, e)),
    }
    dir.sync()?;
    info!(files = victims.len(), "purged log files");
    Ok(())
}

/// Replays an interrupted purge, if a registry is present.
///
/// Returns the names that were finished.
pub(crate) fn reconcile(dir: &LogDir, index: &mut LogIndex) -> CoreResult<Vec<String>> {
    let path = dir.purge_registry_path();
    let raw = match fs::read(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CoreError::io(IoOp::Read, e)),
    };
    let text = String::from_utf8(raw)
        .map_err(|_| CoreError::inconsistent("purge registry is not UTF-8"))?;
    let victims: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    if let Some(bad) = victims.iter().find(|n| dir.sequence_of(n).is_none()) {
        return Err(CoreError::inconsistent(format!(
            "purge registry names {bad}, which is not a file of this log"
        )));
    }
    warn!(files = victims.len(), "finishing interrupted purge");
    complete(dir, index, &victims)?;
    Ok(victims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn setup(files: u32) -> (tempfile::TempDir, LogDir, LogIndex) {
        let tmp = tempdir().unwrap();
        let dir = LogDir::open(tmp.path(), "binlog").unwrap();
        let mut index = LogIndex::open(&dir).unwrap();
        for seq in 1..=files {
            let name = dir.file_name(seq);
            fs::write(dir.file_path(&name), b"\xfebin").unwrap();
            index.append(&dir, &name).unwrap();
        }
        (tmp, dir, index)
    }

    fn names(index: &LogIndex) -> Vec<String> {
        index.entries().iter().map(|e| e.name.clone()).collect()
    }

    #[test]
    fn victims_stop_at_active_and_pinned() {
        let (_tmp, _dir, index) = setup(4);
        let pins = ReaderPins::default();
        let all = select_victims(index.entries(), 4, "binlog.000004", &pins);
        assert_eq!(all, vec!["binlog.000001", "binlog.000002", "binlog.000003"]);

        let pin = pins.pin("binlog.000002");
        assert_eq!(pin.name(), "binlog.000002");
        let some = select_victims(index.entries(), 4, "binlog.000004", &pins);
        assert_eq!(some, vec!["binlog.000001"]);
        drop(pin);
        assert!(!pins.is_pinned("binlog.000002"));

        let before_cutoff = select_victims(index.entries(), 1, "binlog.000004", &pins);
        assert_eq!(before_cutoff, vec!["binlog.000001"]);
    }

    #[test]
    fn two_phases_remove_files_and_entries() {
        let (_tmp, dir, mut index) = setup(3);
        let victims = vec!["binlog.000001".to_string(), "binlog.000002".to_string()];
        register(&dir, &victims).unwrap();
        assert!(dir.purge_registry_path().exists());
        complete(&dir, &mut index, &victims).unwrap();

        assert_eq!(names(&index), vec!["binlog.000003"]);
        assert!(!dir.file_path("binlog.000001").exists());
        assert!(!dir.purge_registry_path().exists());
        assert_eq!(names(&LogIndex::open(&dir).unwrap()), vec!["binlog.000003"]);
    }

    #[test]
    fn crash_after_register_is_reconciled() {
        let (_tmp, dir, mut index) = setup(3);
        let victims = vec!["binlog.000001".to_string()];
        register(&dir, &victims).unwrap();
        drop(index);

        // A fresh process finds the registry.
        let mut index = LogIndex::open(&dir).unwrap();
        assert_eq!(index.entries().len(), 3);
        let finished = reconcile(&dir, &mut index).unwrap();
        assert_eq!(finished, victims);
        assert_eq!(names(&index), vec!["binlog.000002", "binlog.000003"]);
        assert!(!dir.file_path("binlog.000001").exists());
        assert!(!dir.purge_registry_path().exists());

        assert!(reconcile(&dir, &mut index).unwrap().is_empty());
    }

    #[test]
    fn crash_after_index_rewrite_is_reconciled() {
        let (_tmp, dir, mut index) = setup(3);
        let victims = vec!["binlog.000001".to_string()];
        register(&dir, &victims).unwrap();
        index.remove_names(&dir, &victims).unwrap();

        let finished = reconcile(&dir, &mut index).unwrap();
        assert_eq!(finished, victims);
        assert!(!dir.file_path("binlog.000001").exists());
        assert_eq!(names(&index), vec!["binlog.000002", "binlog.000003"]);
    }

    #[test]
    fn foreign_registry_entry_is_rejected() {
        let (_tmp, dir, mut index) = setup(1);
        fs::write(dir.purge_registry_path(), "../etc/passwd\n").unwrap();
        assert!(matches!(
            reconcile(&dir, &mut index),
            Err(CoreError::Inconsistent { .. })
        ));
    }

    #[test]
    fn age_cutoff_counts_prefix() {
        let (_tmp, _dir, index) = setup(2);
        assert_eq!(count_older_than(index.entries(), SystemTime::UNIX_EPOCH).unwrap(), 0);
        let future = SystemTime::now() + std::time::Duration::from_secs(3600);
        assert_eq!(count_older_than(index.entries(), future).unwrap(), 2);
    }
}
