//! Helpers that damage log files the way crashes and bad disks do.

use std::fs::OpenOptions;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Inverts every bit of the byte at `offset`.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or `offset` is past its
/// end.
pub fn flip_byte(path: &Path, offset: u64) -> io::Result<()> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    if offset >= file.metadata()?.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("offset {offset} is past the end of {}", path.display()),
        ));
    }
    let mut byte = [0u8; 1];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut byte)?;
    byte[0] = !byte[0];
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(&byte)?;
    file.sync_all()
}

/// Cuts the last `bytes` bytes off a file, like a write torn by a crash.
///
/// Returns the new length.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or resized.
pub fn truncate_tail(path: &Path, bytes: u64) -> io::Result<u64> {
    let file = OpenOptions::new().write(true).open(path)?;
    let len = file.metadata()?.len().saturating_sub(bytes);
    file.set_len(len)?;
    file.sync_all()?;
    Ok(len)
}

/// Appends arbitrary bytes to a file, like a partial record.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or written.
pub fn append_garbage(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().append(true).open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TempBinlog;

    #[test]
    fn flip_byte_inverts_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, [0x0f, 0xaa]).unwrap();
        flip_byte(&path, 1).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), vec![0x0f, 0x55]);
        assert!(flip_byte(&path, 2).is_err());
    }

    #[test]
    fn truncate_tail_never_goes_negative() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, [1, 2, 3]).unwrap();
        assert_eq!(truncate_tail(&path, 1).unwrap(), 2);
        assert_eq!(truncate_tail(&path, 10).unwrap(), 0);
    }

    #[test]
    fn damaged_last_group_is_dropped_on_recovery() {
        let log = TempBinlog::new();
        let kept = log.commit_statement("INSERT INTO t VALUES (1)");
        let lost = log.commit_statement("INSERT INTO t VALUES (2)");
        assert_eq!(kept.file, lost.file);

        let file = lost.file.clone();
        let log = log.crash_with(|dir| flip_byte(&dir.join(&file), lost.offset - 1).unwrap());
        assert_eq!(log.recovery_report().truncated_bytes, lost.offset - kept.offset);
        assert_eq!(log.committed_queries(), vec!["INSERT INTO t VALUES (1)"]);
    }

    #[test]
    fn torn_tail_is_cut_back_to_the_last_group() {
        let log = TempBinlog::new();
        let kept = log.commit_statement("INSERT INTO t VALUES (1)");
        let lost = log.commit_statement("INSERT INTO t VALUES (2)");

        let file = lost.file.clone();
        let log = log.crash_with(|dir| {
            truncate_tail(&dir.join(&file), 5).unwrap();
            append_garbage(&dir.join(&file), b"\x01\x02").unwrap();
        });
        assert_eq!(
            log.recovery_report().valid_end,
            kept.offset,
        );
        assert_eq!(log.committed_queries(), vec!["INSERT INTO t VALUES (1)"]);
    }
}
