//! Lifecycle gating for collectors
//!
//! The gate carries the "may run" signal owned by whoever decides this
//! process is allowed to export (leader election or a standalone start).
//! Sync tracking answers `HasSynced` for a collector with several watches.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Shared "may run" flag. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct LifecycleGate {
    may_run: Arc<AtomicBool>,
}

impl LifecycleGate {
    /// A gate that starts closed
    pub fn new() -> Self {
        Self::default()
    }

    /// A gate that starts open, for single-instance deployments
    pub fn open() -> Self {
        let gate = Self::new();
        gate.may_run.store(true, Ordering::SeqCst);
        gate
    }

    pub fn may_run(&self) -> bool {
        self.may_run.load(Ordering::SeqCst)
    }

    /// Flip the signal. Cached state is kept either way.
    pub fn set_may_run(&self, may_run: bool) {
        let previous = self.may_run.swap(may_run, Ordering::SeqCst);
        if previous != may_run {
            info!(
                event = "lifecycle_changed",
                may_run, "Collector lifecycle gate changed"
            );
        }
    }
}

/// Tracks the initial-list sync of every watch a collector owns
#[derive(Debug, Default)]
pub struct SyncTracker {
    handles: Mutex<Vec<SyncHandle>>,
}

impl SyncTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out a flag for one more watch
    pub fn register(&self) -> SyncHandle {
        let handle = SyncHandle::default();
        self.handles.lock().push(handle.clone());
        handle
    }

    /// True once every registered watch has synced. A tracker with no
    /// watches has nothing to wait for.
    pub fn has_synced(&self) -> bool {
        self.handles.lock().iter().all(SyncHandle::is_synced)
    }
}

/// Per-watch sync flag, set by the watch layer after its first full list
#[derive(Debug, Clone, Default)]
pub struct SyncHandle {
    synced: Arc<AtomicBool>,
}

impl SyncHandle {
    pub fn mark_synced(&self) {
        self.synced.store(true, Ordering::SeqCst);
    }

    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_defaults_closed() {
        let gate = LifecycleGate::new();
        assert!(!gate.may_run());

        let shared = gate.clone();
        gate.set_may_run(true);
        assert!(shared.may_run());
        assert!(LifecycleGate::open().may_run());
    }

    #[test]
    fn test_sync_tracker_waits_for_all_handles() {
        let tracker = SyncTracker::new();
        assert!(tracker.has_synced());

        let first = tracker.register();
        let second = tracker.register();
        assert!(!tracker.has_synced());

        first.mark_synced();
        assert!(!tracker.has_synced());

        second.mark_synced();
        assert!(tracker.has_synced());
    }
}
