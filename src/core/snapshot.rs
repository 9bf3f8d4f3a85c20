//! Snapshot store: an ordered stack of recorded global-state instants for "compare now vs. a previous instant" reads.
//!
//! # Round trip
//! A differential read captures the present instant, reverts the backend to the most recent snapshot, reads, and
//! returns to the captured present. `TimeWarp` owns that round trip: while it is alive the backend is only reachable
//! through `TimeWarp::state()` (shared access, so nothing can mutate the past), and dropping it always returns to the
//! present, including on error and panic paths.
//!
//! # Invariants
//! - Taken snapshots are never consumed by a round trip; several checks may compare against the same snapshot.
//! - Present instants are consumed when returned to. Returns are strict LIFO: only the innermost in-flight present is
//!   accepted. An unknown, consumed or out-of-order id is a programming error (`HarnessError::Snapshot`).

use tracing::debug;

use crate::core::ledger::{SnapshotId, StateControl};
use crate::error::{HarnessError, Result};

#[derive(Debug, Default)]
pub struct SnapshotStore {
    /// Snapshots taken with `take`, oldest first.
    taken: Vec<SnapshotId>,
    /// Present instants captured by `restore_last` and not yet returned to, outermost first.
    in_flight: Vec<SnapshotId>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the current global state and pushes it.
    pub fn take<C: StateControl + ?Sized>(&mut self, control: &mut C) -> SnapshotId {
        let id = control.snapshot();
        self.taken.push(id);
        debug!(snapshot = %id, depth = self.taken.len(), "snapshot taken");
        id
    }

    /// Reverts to the most recent snapshot and returns the id of the instant we left.
    pub fn restore_last<C: StateControl + ?Sized>(&mut self, control: &mut C) -> Result<SnapshotId> {
        let last = *self
            .taken
            .last()
            .ok_or_else(|| HarnessError::Snapshot("no snapshot taken; nothing to compare against".to_string()))?;
        let present = control.snapshot();
        if let Err(e) = control.revert_to(last) {
            control.release(present);
            return Err(HarnessError::Snapshot(format!("cannot revert to {}: {}", last, e)));
        }
        self.in_flight.push(present);
        debug!(past = %last, present = %present, "warped to last snapshot");
        Ok(present)
    }

    /// Returns to the present instant captured by the matching `restore_last`.
    pub fn restore_to<C: StateControl + ?Sized>(&mut self, control: &mut C, id: SnapshotId) -> Result<()> {
        match self.in_flight.last() {
            Some(&top) if top == id => {
                self.in_flight.pop();
                control
                    .revert_to(id)
                    .map_err(|e| HarnessError::Snapshot(format!("cannot return to {}: {}", id, e)))?;
                control.release(id);
                debug!(present = %id, "returned to present");
                Ok(())
            }
            Some(&top) => Err(HarnessError::Snapshot(format!(
                "out-of-order restore: innermost present is {}, got {}",
                top, id
            ))),
            None => Err(HarnessError::Snapshot(format!(
                "restore to {} with no round trip in flight (unknown or already consumed)",
                id
            ))),
        }
    }

    /// Starts a guarded round trip to the most recent snapshot.
    pub fn warp_to_last<'a, C: StateControl>(&'a mut self, control: &'a mut C) -> Result<TimeWarp<'a, C>> {
        let present = self.restore_last(control)?;
        Ok(TimeWarp {
            store: self,
            control,
            present: Some(present),
        })
    }

    /// Discards the most recent snapshot frame and releases it on the backend.
    pub fn pop<C: StateControl + ?Sized>(&mut self, control: &mut C) -> Option<SnapshotId> {
        let id = self.taken.pop()?;
        control.release(id);
        debug!(snapshot = %id, depth = self.taken.len(), "snapshot popped");
        Some(id)
    }

    /// Discards the frame `id` wherever it sits in the stack and releases it. Returns false if it was not taken here.
    pub fn discard<C: StateControl + ?Sized>(&mut self, control: &mut C, id: SnapshotId) -> bool {
        match self.taken.iter().position(|t| *t == id) {
            Some(at) => {
                self.taken.remove(at);
                control.release(id);
                debug!(snapshot = %id, depth = self.taken.len(), "snapshot discarded");
                true
            }
            None => false,
        }
    }

    pub fn last(&self) -> Option<SnapshotId> {
        self.taken.last().copied()
    }

    pub fn depth(&self) -> usize {
        self.taken.len()
    }

    /// Whether a round trip is in flight (state currently reflects the past).
    pub fn is_warped(&self) -> bool {
        !self.in_flight.is_empty()
    }
}

/// Guard for one round trip to the last snapshot. See the module docs.
pub struct TimeWarp<'a, C: StateControl> {
    store: &'a mut SnapshotStore,
    control: &'a mut C,
    present: Option<SnapshotId>,
}

impl<'a, C: StateControl> TimeWarp<'a, C> {
    /// Read-only view of the past state.
    pub fn state(&self) -> &C {
        &*self.control
    }

    /// Returns to the present, reporting failure.
    pub fn finish(mut self) -> Result<()> {
        match self.present.take() {
            Some(id) => self.store.restore_to(&mut *self.control, id),
            None => Ok(()),
        }
    }
}

impl<'a, C: StateControl> Drop for TimeWarp<'a, C> {
    fn drop(&mut self) {
        if let Some(id) = self.present.take() {
            if let Err(e) = self.store.restore_to(&mut *self.control, id) {
                if !std::thread::panicking() {
                    panic!("failed to return to present state {}: {}", id, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ledger::LedgerError;
    use std::collections::HashMap;

    /// Minimal state control over a single counter.
    #[derive(Default)]
    struct Counter {
        value: u64,
        next: u64,
        saved: HashMap<SnapshotId, u64>,
    }

    impl StateControl for Counter {
        fn snapshot(&mut self) -> SnapshotId {
            self.next += 1;
            let id = SnapshotId(self.next);
            self.saved.insert(id, self.value);
            id
        }

        fn revert_to(&mut self, id: SnapshotId) -> std::result::Result<(), LedgerError> {
            self.value = *self.saved.get(&id).ok_or(LedgerError::UnknownSnapshot(id))?;
            Ok(())
        }

        fn release(&mut self, id: SnapshotId) {
            self.saved.remove(&id);
        }

        fn advance_blocks(&mut self, _blocks: u64) {}

        fn advance_time(&mut self, _seconds: u64) {}
    }

    #[test]
    fn test_round_trip_reads_past_and_returns() {
        let mut c = Counter::default();
        let mut store = SnapshotStore::new();
        c.value = 1;
        store.take(&mut c);
        c.value = 5;

        let present = store.restore_last(&mut c).unwrap();
        assert_eq!(c.value, 1);
        assert!(store.is_warped());
        store.restore_to(&mut c, present).unwrap();
        assert_eq!(c.value, 5);
        assert!(!store.is_warped());
    }

    #[test]
    fn test_snapshot_survives_repeated_round_trips() {
        let mut c = Counter::default();
        let mut store = SnapshotStore::new();
        store.take(&mut c);
        c.value = 9;
        for _ in 0..3 {
            let warp = store.warp_to_last(&mut c).unwrap();
            assert_eq!(warp.state().value, 0);
            warp.finish().unwrap();
            assert_eq!(c.value, 9);
        }
    }

    #[test]
    fn test_restore_without_snapshot_is_misuse() {
        let mut c = Counter::default();
        let mut store = SnapshotStore::new();
        assert!(matches!(store.restore_last(&mut c), Err(HarnessError::Snapshot(_))));
    }

    #[test]
    fn test_consumed_present_is_rejected() {
        let mut c = Counter::default();
        let mut store = SnapshotStore::new();
        store.take(&mut c);
        let present = store.restore_last(&mut c).unwrap();
        store.restore_to(&mut c, present).unwrap();
        assert!(matches!(store.restore_to(&mut c, present), Err(HarnessError::Snapshot(_))));
    }

    #[test]
    fn test_out_of_order_restore_is_rejected() {
        let mut c = Counter::default();
        let mut store = SnapshotStore::new();
        store.take(&mut c);
        c.value = 3;
        let outer = store.restore_last(&mut c).unwrap();
        let inner = store.restore_last(&mut c).unwrap();
        assert!(matches!(store.restore_to(&mut c, outer), Err(HarnessError::Snapshot(_))));
        store.restore_to(&mut c, inner).unwrap();
        store.restore_to(&mut c, outer).unwrap();
        assert_eq!(c.value, 3);
    }

    #[test]
    fn test_drop_returns_to_present() {
        let mut c = Counter::default();
        let mut store = SnapshotStore::new();
        store.take(&mut c);
        c.value = 42;
        {
            let warp = store.warp_to_last(&mut c).unwrap();
            assert_eq!(warp.state().value, 0);
        }
        assert_eq!(c.value, 42);
        assert!(!store.is_warped());
    }

    #[test]
    fn test_pop_discards_last_frame() {
        let mut c = Counter::default();
        let mut store = SnapshotStore::new();
        let first = store.take(&mut c);
        store.take(&mut c);
        assert_eq!(store.depth(), 2);
        let second = store.pop(&mut c).unwrap();
        assert_eq!(store.last(), Some(first));
        assert_eq!(c.saved.len(), 1);
        assert!(c.revert_to(second).is_err());
    }

    #[test]
    fn test_discard_releases_inner_frame() {
        let mut c = Counter::default();
        let mut store = SnapshotStore::new();
        let first = store.take(&mut c);
        let second = store.take(&mut c);
        assert!(store.discard(&mut c, first));
        assert!(!store.discard(&mut c, first));
        assert_eq!(store.depth(), 1);
        assert_eq!(store.last(), Some(second));
        assert!(!c.saved.contains_key(&first));
    }

    #[test]
    fn test_failed_revert_releases_present() {
        let mut c = Counter::default();
        let mut store = SnapshotStore::new();
        let id = store.take(&mut c);
        c.release(id);
        assert!(matches!(store.restore_last(&mut c), Err(HarnessError::Snapshot(_))));
        assert!(c.saved.is_empty());
        assert!(!store.is_warped());
    }
}
