//! Storage backend trait definition.

use crate::error::StorageResult;

/// A byte store holding one binary log file (or the index).
///
/// Backends are **opaque**. They append bytes, read them back, and make
/// them durable; the log layer above decides what the bytes mean.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `write_at` never changes the size of the store
/// - `sync` makes all appended data and the file length durable
/// - Backends must be `Send + Sync` so a reader thread can own one
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the range is not fully
    /// inside the store, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the store and returns its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is read-only or an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Overwrites bytes already present in the store.
    ///
    /// Used to patch fixed-width header fields (the in-use flag of a
    /// format description record) without rewriting the file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::WritePastEnd`] if the range is not
    /// fully inside the store.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Pushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Makes all data and metadata durable.
    ///
    /// A commit is only acknowledged after this has returned `Ok`.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the size this handle believes the store has.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Re-reads the size from the underlying medium.
    ///
    /// Read handles opened on a file that another handle appends to must
    /// call this before reading newly appended bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn refresh_size(&mut self) -> StorageResult<u64> {
        self.size()
    }

    /// Truncates the store to `new_size` bytes.
    ///
    /// Recovery uses this to cut a torn transaction off the tail of the
    /// last log file.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is greater than the current size or
    /// the truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}
