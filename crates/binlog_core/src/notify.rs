//! New-data notification for readers tailing the active file.
//!
//! The manager publishes the end position after every complete append.
//! Waiters block on a condition variable with their own mutex, never on the
//! log lock, and always with a timeout so they can re-check their own stop
//! conditions even if a wakeup is lost.

use crate::types::LogPosition;
use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// Result of waiting for new data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The end position changed; carries the new generation.
    Advanced(u64),
    /// Nothing was published before the timeout.
    TimedOut,
    /// The log is shutting down.
    Shutdown,
}

#[derive(Debug, Default)]
struct NotifyState {
    generation: u64,
    end: Option<LogPosition>,
    shutdown: bool,
}

/// Broadcasts the durable end of the log to waiting readers.
#[derive(Debug, Default)]
pub struct UpdateNotifier {
    state: Mutex<NotifyState>,
    changed: Condvar,
}

impl UpdateNotifier {
    /// Creates a notifier with nothing published.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a new end position and wakes every waiter.
    pub fn publish(&self, end: LogPosition) {
        let mut state = self.state.lock();
        state.generation += 1;
        state.end = Some(end);
        self.changed.notify_all();
    }

    /// Marks the log as shut down and wakes every waiter.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        self.changed.notify_all();
    }

    /// Returns true once [`UpdateNotifier::shutdown`] has been called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    /// Returns the current generation and the published end.
    #[must_use]
    pub fn snapshot(&self) -> (u64, Option<LogPosition>) {
        let state = self.state.lock();
        (state.generation, state.end.clone())
    }

    /// Waits until the generation moves past `seen`, the log shuts down or
    /// `timeout` elapses.
    pub fn wait_for_change(&self, seen: u64, timeout: Duration) -> WaitOutcome {
        let mut state = self.state.lock();
        if state.shutdown {
            return WaitOutcome::Shutdown;
        }
        if state.generation != seen {
            return WaitOutcome::Advanced(state.generation);
        }
        // Spurious wakeups are fine: callers loop and re-check their own state.
        let _ = self.changed.wait_for(&mut state, timeout);
        if state.shutdown {
            WaitOutcome::Shutdown
        } else if state.generation != seen {
            WaitOutcome::Advanced(state.generation)
        } else {
            WaitOutcome::TimedOut
        }
    }
}
