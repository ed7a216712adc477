//! In-memory storage backend for testing.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// An in-memory backend.
///
/// Handles created with [`InMemoryBackend::share`] see the same buffer, so
/// a test can append through one handle and tail it through another, the
/// same way a replica sender tails the active log file.
///
/// # Example
///
/// ```rust
/// use binlog_storage::{StorageBackend, InMemoryBackend};
///
/// let mut writer = InMemoryBackend::new();
/// let reader = writer.share();
/// writer.append(b"record").unwrap();
/// assert_eq!(reader.size().unwrap(), 6);
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    data: Arc<RwLock<Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates a new empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend with pre-existing bytes.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Returns another handle onto the same buffer.
    #[must_use]
    pub fn share(&self) -> Self {
        self.clone()
    }

    /// Returns a copy of all bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);
        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        Ok(data[offset as usize..end as usize].to_vec())
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> StorageResult<()> {
        let mut data = self.data.write();
        let size = data.len() as u64;
        let end = offset.saturating_add(bytes.len() as u64);
        if end > size {
            return Err(StorageError::WritePastEnd {
                offset,
                len: bytes.len(),
                size,
            });
        }
        data[offset as usize..end as usize].copy_from_slice(bytes);
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let size = data.len() as u64;
        if new_size > size {
            return Err(StorageError::TruncatePastEnd {
                requested: new_size,
                size,
            });
        }
        data.truncate(new_size as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn shared_handles_see_same_bytes() {
        let mut writer = InMemoryBackend::new();
        let reader = writer.share();

        writer.append(b"abc").unwrap();
        assert_eq!(reader.read_at(0, 3).unwrap(), b"abc");

        writer.truncate(1).unwrap();
        assert_eq!(reader.size().unwrap(), 1);
    }

    #[test]
    fn write_at_bounds() {
        let mut backend = InMemoryBackend::with_data(vec![0; 4]);
        backend.write_at(2, &[7, 7]).unwrap();
        assert_eq!(backend.data(), vec![0, 0, 7, 7]);
        assert!(backend.write_at(3, &[1, 1]).is_err());
    }

    #[test]
    fn truncate_past_end_fails() {
        let mut backend = InMemoryBackend::with_data(vec![1, 2]);
        assert!(matches!(
            backend.truncate(3),
            Err(StorageError::TruncatePastEnd { requested: 3, size: 2 })
        ));
    }

    proptest! {
        #[test]
        fn appends_concatenate(chunks in proptest::collection::vec(
            proptest::collection::vec(any::<u8>(), 0..32), 0..16)) {
            let mut backend = InMemoryBackend::new();
            let mut expected = Vec::new();
            for chunk in &chunks {
                let offset = backend.append(chunk).unwrap();
                prop_assert_eq!(offset, expected.len() as u64);
                expected.extend_from_slice(chunk);
            }
            prop_assert_eq!(backend.data(), expected);
        }
    }
}
