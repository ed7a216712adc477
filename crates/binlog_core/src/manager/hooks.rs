//! Observers invoked around a group flush.
//!
//! Observers run in registration order while the log lock is held. An
//! error from a `BeforeFlush` observer aborts the flush before any byte is
//! written. Errors at later stages are returned to the committing session,
//! but the group is already in the log.

use crate::error::{CoreError, CoreResult};
use crate::types::LogPosition;
use parking_lot::RwLock;

/// Point in the flush at which an observer runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushStage {
    /// Before the group is appended.
    BeforeFlush,
    /// After the group is appended, before it is synced.
    AfterFlush,
    /// After the sync decision for the group.
    AfterSync,
}

/// What an observer sees.
#[derive(Debug, Clone)]
pub struct FlushContext {
    /// Stage being run.
    pub stage: FlushStage,
    /// Where the group starts.
    pub start: LogPosition,
    /// Where the group ends; equal to `start` before the flush.
    pub end: LogPosition,
    /// Bytes in the group.
    pub len: u64,
    /// True if the group ends with an Xid marker.
    pub two_phase: bool,
    /// True if the group was replaced by an incident record.
    pub incident: bool,
}

/// An observer closure.
pub type FlushObserver = Box<dyn Fn(&FlushContext) -> Result<(), String> + Send + Sync>;

/// Ordered list of flush observers.
#[derive(Default)]
pub struct FlushHooks {
    observers: RwLock<Vec<(FlushStage, FlushObserver)>>,
}

impl std::fmt::Debug for FlushHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushHooks")
            .field("observers", &self.observers.read().len())
            .finish()
    }
}

impl FlushHooks {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `observer` for `stage`.
    pub fn register(&self, stage: FlushStage, observer: FlushObserver) {
        self.observers.write().push((stage, observer));
    }

    /// Returns the number of registered observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    /// Returns true if no observer is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs every observer registered for `ctx.stage`, stopping at the
    /// first error.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::HookAborted`] with the observer's message.
    pub fn run(&self, ctx: &FlushContext) -> CoreResult<()> {
        let observers = self.observers.read();
        for (stage, observer) in observers.iter() {
            if *stage != ctx.stage {
                continue;
            }
            observer(ctx).map_err(|message| CoreError::HookAborted { message })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn ctx(stage: FlushStage) -> FlushContext {
        FlushContext {
            stage,
            start: LogPosition::new("binlog.000001", 4),
            end: LogPosition::new("binlog.000001", 4),
            len: 0,
            two_phase: false,
            incident: false,
        }
    }

    #[test]
    fn runs_only_matching_stage_in_order() {
        let hooks = FlushHooks::new();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            hooks.register(
                FlushStage::BeforeFlush,
                Box::new(move |_| {
                    seen.lock().push(tag);
                    Ok(())
                }),
            );
        }
        let after = Arc::new(AtomicUsize::new(0));
        {
            let after = Arc::clone(&after);
            hooks.register(
                FlushStage::AfterSync,
                Box::new(move |_| {
                    after.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            );
        }

        hooks.run(&ctx(FlushStage::BeforeFlush)).unwrap();
        assert_eq!(*seen.lock(), vec!["first", "second"]);
        assert_eq!(after.load(Ordering::SeqCst), 0);
        assert_eq!(hooks.len(), 3);
    }

    #[test]
    fn error_stops_the_chain() {
        let hooks = FlushHooks::new();
        let later = Arc::new(AtomicUsize::new(0));
        hooks.register(FlushStage::AfterFlush, Box::new(|_| Err("replica lagging".into())));
        {
            let later = Arc::clone(&later);
            hooks.register(
                FlushStage::AfterFlush,
                Box::new(move |_| {
                    later.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            );
        }
        let err = hooks.run(&ctx(FlushStage::AfterFlush)).unwrap_err();
        assert!(matches!(err, CoreError::HookAborted { ref message } if message == "replica lagging"));
        assert_eq!(later.load(Ordering::SeqCst), 0);
    }
}
