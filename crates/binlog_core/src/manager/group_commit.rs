//! In-flight counter for two-phase commits.
//!
//! A transaction that logs an Xid end marker holds a [`CommitTicket`] until
//! the storage engine has finished its own commit. Rotation waits for the
//! counter to drain, so a file that has been rotated away never ends with a
//! transaction whose outcome is still open.

use crate::types::LogPosition;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

/// Counter of prepared-and-logged transactions not yet committed in the engine.
#[derive(Debug, Default)]
pub struct PreparedCounter {
    count: Mutex<usize>,
    drained: Condvar,
}

impl PreparedCounter {
    /// Creates a counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current count.
    #[must_use]
    pub fn current(&self) -> usize {
        *self.count.lock()
    }

    pub(crate) fn increment(&self) {
        *self.count.lock() += 1;
    }

    pub(crate) fn decrement(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.drained.notify_all();
        }
    }

    /// Blocks until the count reaches zero.
    ///
    /// Wakes periodically to re-check, so a lost notification only delays
    /// the caller.
    pub fn wait_drained(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            let _ = self.drained.wait_for(&mut count, Duration::from_millis(100));
        }
    }

    /// Blocks until the count reaches zero or `timeout` elapses; returns
    /// true if drained.
    pub fn wait_drained_for(&self, timeout: Duration) -> bool {
        let mut count = self.count.lock();
        if *count > 0 {
            let _ = self.drained.wait_for(&mut count, timeout);
        }
        *count == 0
    }
}

/// Proof that a transaction's end marker is in the log.
///
/// Dropping the ticket (or passing it to
/// [`crate::LogFileManager::finish_commit`]) tells the log that the engine
/// side of the commit is complete.
#[must_use = "the prepared counter only drains when the ticket is dropped"]
#[derive(Debug)]
pub struct CommitTicket {
    counter: Option<Arc<PreparedCounter>>,
    end: LogPosition,
}

impl CommitTicket {
    pub(crate) fn new(counter: Arc<PreparedCounter>, end: LogPosition) -> Self {
        counter.increment();
        Self {
            counter: Some(counter),
            end,
        }
    }

    /// Position just past the transaction's end marker.
    #[must_use]
    pub fn end(&self) -> &LogPosition {
        &self.end
    }
}

impl Drop for CommitTicket {
    fn drop(&mut self) {
        if let Some(counter) = self.counter.take() {
            counter.decrement();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn ticket_drop_drains() {
        let counter = Arc::new(PreparedCounter::new());
        let a = CommitTicket::new(Arc::clone(&counter), LogPosition::new("binlog.000001", 100));
        let b = CommitTicket::new(Arc::clone(&counter), LogPosition::new("binlog.000001", 200));
        assert_eq!(counter.current(), 2);
        assert_eq!(a.end().offset, 100);
        drop(a);
        assert_eq!(counter.current(), 1);
        drop(b);
        assert_eq!(counter.current(), 0);
        assert!(counter.wait_drained_for(Duration::from_millis(1)));
    }

    #[test]
    fn wait_blocks_until_last_ticket_released() {
        let counter = Arc::new(PreparedCounter::new());
        let ticket = CommitTicket::new(Arc::clone(&counter), LogPosition::new("binlog.000001", 4));

        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            drop(ticket);
        });
        let start = Instant::now();
        counter.wait_drained();
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert_eq!(counter.current(), 0);
        releaser.join().unwrap();
    }

    #[test]
    fn bounded_wait_reports_not_drained() {
        let counter = Arc::new(PreparedCounter::new());
        let _ticket = CommitTicket::new(Arc::clone(&counter), LogPosition::new("binlog.000001", 4));
        assert!(!counter.wait_drained_for(Duration::from_millis(10)));
    }
}
