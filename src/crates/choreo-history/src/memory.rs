//! In-memory snapshot history
//!
//! [`InMemoryHistory`] is the reference [`HistoryStore`] implementation: a
//! bounded double-ended queue of past snapshots plus a redo stack. It is the
//! backend simulators use when execution history is enabled.
//!
//! # Bounds
//!
//! The store retains at most `max_snapshots` past entries (default
//! [`DEFAULT_MAX_SNAPSHOTS`]). When full, recording evicts the oldest
//! snapshot; stepping back past an evicted snapshot is then no longer
//! possible, which keeps memory proportional to the configured bound rather
//! than the run length.
//!
//! # Examples
//!
//! ```rust
//! use choreo_history::{HistoryStore, InMemoryHistory, Snapshot};
//!
//! let mut history: InMemoryHistory<u32> = InMemoryHistory::new(100);
//!
//! // Two steps recorded their pre-step states 10 and 20; current is 30.
//! history.record(Snapshot::new(0, 10));
//! history.record(Snapshot::new(1, 20));
//!
//! // Rewind one step, then replay it.
//! let back = history.step_back(Snapshot::new(2, 30)).unwrap();
//! assert_eq!(back.state, 20);
//! let fwd = history.step_forward(back.clone()).unwrap();
//! assert_eq!(fwd.state, 30);
//! ```

use std::collections::VecDeque;

use crate::error::{HistoryError, Result};
use crate::snapshot::Snapshot;
use crate::traits::HistoryStore;

/// Default bound on retained snapshots
pub const DEFAULT_MAX_SNAPSHOTS: usize = 1000;

/// Bounded in-memory undo/redo store for simulator snapshots
#[derive(Debug, Clone)]
pub struct InMemoryHistory<S> {
    past: VecDeque<Snapshot<S>>,
    future: Vec<Snapshot<S>>,
    max_snapshots: usize,
}

impl<S> InMemoryHistory<S> {
    /// Create a store retaining at most `max_snapshots` entries
    ///
    /// A bound of 0 is treated as [`DEFAULT_MAX_SNAPSHOTS`].
    pub fn new(max_snapshots: usize) -> Self {
        let max_snapshots = if max_snapshots == 0 {
            DEFAULT_MAX_SNAPSHOTS
        } else {
            max_snapshots
        };
        Self {
            past: VecDeque::new(),
            future: Vec::new(),
            max_snapshots,
        }
    }
}

impl<S> Default for InMemoryHistory<S> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SNAPSHOTS)
    }
}

impl<S: Clone> HistoryStore<S> for InMemoryHistory<S> {
    fn record(&mut self, snapshot: Snapshot<S>) {
        // Recording after a rewind starts a new timeline.
        self.future.clear();
        if self.past.len() == self.max_snapshots {
            self.past.pop_front();
        }
        self.past.push_back(snapshot);
    }

    fn step_back(&mut self, current: Snapshot<S>) -> Result<Snapshot<S>> {
        let snapshot = self.past.pop_back().ok_or(HistoryError::NoEarlierSnapshot)?;
        self.future.push(current);
        Ok(snapshot)
    }

    fn step_forward(&mut self, current: Snapshot<S>) -> Result<Snapshot<S>> {
        let snapshot = self.future.pop().ok_or(HistoryError::NoLaterSnapshot)?;
        self.past.push_back(current);
        Ok(snapshot)
    }

    fn len(&self) -> usize {
        self.past.len()
    }

    fn redo_len(&self) -> usize {
        self.future.len()
    }

    fn capacity(&self) -> usize {
        self.max_snapshots
    }

    fn clear(&mut self) {
        self.past.clear();
        self.future.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(step: u64) -> Snapshot<u64> {
        Snapshot::new(step, step * 10)
    }

    #[test]
    fn test_record_and_len() {
        let mut h = InMemoryHistory::new(10);
        assert!(h.is_empty());
        h.record(snap(0));
        h.record(snap(1));
        assert_eq!(h.len(), 2);
        assert_eq!(h.redo_len(), 0);
    }

    #[test]
    fn test_back_and_forward_round_trip() {
        let mut h = InMemoryHistory::new(10);
        h.record(snap(0)); // pre-state of step 1
        h.record(snap(1)); // pre-state of step 2
        let current = snap(2);

        let back = h.step_back(current.clone()).unwrap();
        assert_eq!(back.step, 1);
        assert_eq!(h.len(), 1);
        assert_eq!(h.redo_len(), 1);

        // Forward restores exactly the state we stepped back from.
        let fwd = h.step_forward(back).unwrap();
        assert_eq!(fwd, current);
        assert_eq!(h.len(), 2);
        assert_eq!(h.redo_len(), 0);
    }

    #[test]
    fn test_double_back_then_forward() {
        let mut h = InMemoryHistory::new(10);
        h.record(snap(0));
        h.record(snap(1));

        let s1 = h.step_back(snap(2)).unwrap();
        let s0 = h.step_back(s1.clone()).unwrap();
        assert_eq!(s0.step, 0);

        let again = h.step_forward(s0).unwrap();
        assert_eq!(again, s1);
    }

    #[test]
    fn test_step_back_on_empty_fails() {
        let mut h: InMemoryHistory<u64> = InMemoryHistory::new(10);
        assert_eq!(
            h.step_back(snap(0)).unwrap_err(),
            HistoryError::NoEarlierSnapshot
        );
    }

    #[test]
    fn test_step_forward_without_undo_fails() {
        let mut h = InMemoryHistory::new(10);
        h.record(snap(0));
        assert_eq!(
            h.step_forward(snap(1)).unwrap_err(),
            HistoryError::NoLaterSnapshot
        );
    }

    #[test]
    fn test_record_clears_redo_entries() {
        let mut h = InMemoryHistory::new(10);
        h.record(snap(0));
        h.record(snap(1));
        h.step_back(snap(2)).unwrap();
        assert_eq!(h.redo_len(), 1);

        // A new timeline invalidates the undone snapshot.
        h.record(snap(3));
        assert_eq!(h.redo_len(), 0);
        assert_eq!(h.step_back(snap(4)).unwrap().step, 3);
    }

    #[test]
    fn test_oldest_snapshot_evicted_at_capacity() {
        let mut h = InMemoryHistory::new(3);
        for step in 0..5 {
            h.record(snap(step));
        }
        assert_eq!(h.len(), 3);

        // Steps 0 and 1 were evicted; the earliest reachable snapshot is 2.
        let mut current = snap(5);
        let mut earliest = 0;
        while let Ok(s) = h.step_back(current) {
            earliest = s.step;
            current = s;
        }
        assert_eq!(earliest, 2);
    }

    #[test]
    fn test_zero_capacity_uses_default() {
        let h: InMemoryHistory<u64> = InMemoryHistory::new(0);
        assert_eq!(h.capacity(), DEFAULT_MAX_SNAPSHOTS);
    }

    #[test]
    fn test_clear_discards_everything() {
        let mut h = InMemoryHistory::new(10);
        h.record(snap(0));
        h.record(snap(1));
        h.step_back(snap(2)).unwrap();
        h.clear();
        assert!(h.is_empty());
        assert_eq!(h.redo_len(), 0);
    }
}
