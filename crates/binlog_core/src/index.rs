//! The log index: the durable list of files that make up the logical log.
//!
//! One absolute path per line, oldest first. Appends happen on rotation;
//! the only rewrite is purge, which writes the surviving lines to a
//! temporary file and renames it over the index.
//!
//! Trailing blank lines are tolerated (a crash can leave padding after the
//! last entry). Blank lines between entries, non-UTF-8 content and paths
//! outside the log directory are reported as inconsistencies.

use crate::dir::LogDir;
use crate::error::{CoreError, CoreResult, IoOp};
use binlog_storage::{FileBackend, StorageBackend};
use std::fs;
use std::path::{Path, PathBuf};

/// One line of the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// File name without directory.
    pub name: String,
    /// Absolute path as stored in the index.
    pub path: PathBuf,
    /// Byte offset of this entry's line within the index file.
    pub index_offset: u64,
}

/// In-memory copy of the index plus the handle used to extend it.
#[derive(Debug)]
pub struct LogIndex {
    path: PathBuf,
    backend: FileBackend,
    entries: Vec<IndexEntry>,
}

impl LogIndex {
    /// Opens the index of `dir`, creating an empty one if missing.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Inconsistent`] for malformed content, or an I/O
    /// error.
    pub fn open(dir: &LogDir) -> CoreResult<Self> {
        let path = dir.index_path();
        let backend = FileBackend::open(&path).map_err(CoreError::io_at(IoOp::Open))?;
        let size = backend.size().map_err(CoreError::io_at(IoOp::Read))?;
        let raw = backend
            .read_at(0, size as usize)
            .map_err(CoreError::io_at(IoOp::Read))?;
        let entries = parse_index(&raw, dir)?;
        Ok(Self {
            path,
            backend,
            entries,
        })
    }

    /// Returns the index path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns every entry, oldest first.
    #[must_use]
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Returns the newest entry.
    #[must_use]
    pub fn last(&self) -> Option<&IndexEntry> {
        self.entries.last()
    }

    /// Returns the entry named `name`.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&IndexEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Returns the ordinal of the entry named `name`.
    #[must_use]
    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    /// Returns the entry following `name`.
    #[must_use]
    pub fn next_after(&self, name: &str) -> Option<&IndexEntry> {
        self.position_of(name).and_then(|i| self.entries.get(i + 1))
    }

    /// Appends a file and makes the index durable.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the write or sync fails.
    pub fn append(&mut self, dir: &LogDir, name: &str) -> CoreResult<()> {
        let path = dir.file_path(name);
        let line = format!("{}\n", path.display());
        // Drop any trailing padding so the new entry follows the last one.
        let content_end = self.entries_end();
        let size = self.backend.size().map_err(CoreError::io_at(IoOp::Read))?;
        if size > content_end {
            self.backend
                .truncate(content_end)
                .map_err(CoreError::io_at(IoOp::Write))?;
        }
        let offset = self
            .backend
            .append(line.as_bytes())
            .map_err(CoreError::io_at(IoOp::Write))?;
        self.backend.sync().map_err(CoreError::io_at(IoOp::Sync))?;
        self.entries.push(IndexEntry {
            name: name.to_string(),
            path,
            index_offset: offset,
        });
        Ok(())
    }

    fn entries_end(&self) -> u64 {
        self.entries.last().map_or(0, |last| {
            last.index_offset + last.path.display().to_string().len() as u64 + 1
        })
    }

    /// Removes the first `count` entries by rewriting the index.
    ///
    /// The surviving lines go to a temporary file that is synced and then
    /// renamed over the index, so a crash leaves either the old or the new
    /// index, never a mix.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if any step fails.
    pub fn remove_first(&mut self, dir: &LogDir, count: usize) -> CoreResult<Vec<IndexEntry>> {
        let count = count.min(self.entries.len());
        let survivors: Vec<IndexEntry> = self.entries[count..].to_vec();
        self.rewrite(dir, &survivors)?;
        let removed = self.entries.drain(..count).collect();
        Ok(removed)
    }

    /// Removes the named entries, wherever they are, by rewriting the index.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if any step fails.
    pub fn remove_names(&mut self, dir: &LogDir, names: &[String]) -> CoreResult<usize> {
        let before = self.entries.len();
        let survivors: Vec<IndexEntry> = self
            .entries
            .iter()
            .filter(|e| !names.contains(&e.name))
            .cloned()
            .collect();
        if survivors.len() == before {
            return Ok(0);
        }
        self.rewrite(dir, &survivors)?;
        Ok(before - self.entries.len())
    }

    fn rewrite(&mut self, dir: &LogDir, survivors: &[IndexEntry]) -> CoreResult<()> {
        let temp = self.path.with_extension("index_tmp");
        match fs::remove_file(&temp) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CoreError::io(IoOp::Write, e)),
        }

        let mut content = String::new();
        let mut rebuilt = Vec::with_capacity(survivors.len());
        for entry in survivors {
            rebuilt.push(IndexEntry {
                index_offset: content.len() as u64,
                ..entry.clone()
            });
            content.push_str(&entry.path.display().to_string());
            content.push('\n');
        }

        let mut tmp = FileBackend::create_new(&temp).map_err(CoreError::io_at(IoOp::Open))?;
        tmp.append(content.as_bytes())
            .map_err(CoreError::io_at(IoOp::Write))?;
        tmp.sync().map_err(CoreError::io_at(IoOp::Sync))?;
        drop(tmp);

        fs::rename(&temp, &self.path).map_err(CoreError::io_at(IoOp::Write))?;
        dir.sync()?;
        self.backend = FileBackend::open(&self.path).map_err(CoreError::io_at(IoOp::Open))?;
        self.entries = rebuilt;
        Ok(())
    }
}

fn parse_index(raw: &[u8], dir: &LogDir) -> CoreResult<Vec<IndexEntry>> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| CoreError::inconsistent(format!("index is not UTF-8: {e}")))?;

    let mut entries = Vec::new();
    let mut offset = 0u64;
    let mut saw_blank = false;
    for line in text.split_inclusive('\n') {
        let line_offset = offset;
        offset += line.len() as u64;
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed.trim().is_empty() {
            saw_blank = true;
            continue;
        }
        if saw_blank {
            return Err(CoreError::inconsistent(format!(
                "blank line before entry {trimmed} in index"
            )));
        }

        let path = PathBuf::from(trimmed);
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| CoreError::inconsistent(format!("index entry {trimmed} has no file name")))?;
        if path.parent() != Some(dir.path()) || dir.sequence_of(&name).is_none() {
            return Err(CoreError::inconsistent(format!(
                "index entry {trimmed} is not a file of this log"
            )));
        }
        if entries.iter().any(|e: &IndexEntry| e.name == name) {
            return Err(CoreError::inconsistent(format!(
                "index lists {name} twice"
            )));
        }
        entries.push(IndexEntry {
            name,
            path,
            index_offset: line_offset,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn append_and_reload() {
        let tmp = tempdir().unwrap();
        let dir = LogDir::open(tmp.path(), "binlog").unwrap();
        let mut index = LogIndex::open(&dir).unwrap();
        assert!(index.entries().is_empty());

        index.append(&dir, "binlog.000001").unwrap();
        index.append(&dir, "binlog.000002").unwrap();

        let reloaded = LogIndex::open(&dir).unwrap();
        let names: Vec<&str> = reloaded.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["binlog.000001", "binlog.000002"]);
        assert_eq!(reloaded.entries()[0].index_offset, 0);
        assert!(reloaded.entries()[0].path.is_absolute());
        assert_eq!(reloaded.next_after("binlog.000001").unwrap().name, "binlog.000002");
    }

    #[test]
    fn trailing_blank_lines_tolerated() {
        let tmp = tempdir().unwrap();
        let dir = LogDir::open(tmp.path(), "binlog").unwrap();
        let mut index = LogIndex::open(&dir).unwrap();
        index.append(&dir, "binlog.000001").unwrap();
        drop(index);

        let mut f = fs::OpenOptions::new().append(true).open(dir.index_path()).unwrap();
        f.write_all(b"\n\n  \n").unwrap();
        drop(f);

        let mut index = LogIndex::open(&dir).unwrap();
        assert_eq!(index.entries().len(), 1);
        index.append(&dir, "binlog.000002").unwrap();
        let reloaded = LogIndex::open(&dir).unwrap();
        assert_eq!(reloaded.entries().len(), 2);
    }

    #[test]
    fn blank_line_between_entries_is_inconsistent() {
        let tmp = tempdir().unwrap();
        let dir = LogDir::open(tmp.path(), "binlog").unwrap();
        let content = format!(
            "{}\n\n{}\n",
            dir.file_path("binlog.000001").display(),
            dir.file_path("binlog.000002").display()
        );
        fs::write(dir.index_path(), content).unwrap();
        assert!(matches!(
            LogIndex::open(&dir),
            Err(CoreError::Inconsistent { .. })
        ));
    }

    #[test]
    fn foreign_path_is_inconsistent() {
        let tmp = tempdir().unwrap();
        let dir = LogDir::open(tmp.path(), "binlog").unwrap();
        fs::write(dir.index_path(), "/elsewhere/binlog.000001\n").unwrap();
        assert!(LogIndex::open(&dir).is_err());
    }

    #[test]
    fn remove_first_rewrites_offsets() {
        let tmp = tempdir().unwrap();
        let dir = LogDir::open(tmp.path(), "binlog").unwrap();
        let mut index = LogIndex::open(&dir).unwrap();
        for seq in 1..=3 {
            index.append(&dir, &dir.file_name(seq)).unwrap();
        }
        let removed = index.remove_first(&dir, 2).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(index.entries()[0].name, "binlog.000003");
        assert_eq!(index.entries()[0].index_offset, 0);

        index.append(&dir, "binlog.000004").unwrap();
        let reloaded = LogIndex::open(&dir).unwrap();
        let names: Vec<&str> = reloaded.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["binlog.000003", "binlog.000004"]);
    }

    #[test]
    fn remove_names_is_idempotent() {
        let tmp = tempdir().unwrap();
        let dir = LogDir::open(tmp.path(), "binlog").unwrap();
        let mut index = LogIndex::open(&dir).unwrap();
        index.append(&dir, "binlog.000001").unwrap();
        index.append(&dir, "binlog.000002").unwrap();
        let names = vec!["binlog.000001".to_string()];
        assert_eq!(index.remove_names(&dir, &names).unwrap(), 1);
        assert_eq!(index.remove_names(&dir, &names).unwrap(), 0);
    }
}
