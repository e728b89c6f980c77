//! Snapshot envelope for simulator state
//!
//! A [`Snapshot`] wraps a deep copy of a simulator's observable state together
//! with the step number it was taken at and a wall-clock capture stamp. The
//! payload type is generic: each simulator defines its own serializable state
//! struct (current node, visited list, choice and parallel state, recursion
//! stack, buffers, counters) and the history layer treats it opaquely.
//!
//! Snapshots are taken *before* a step executes, so restoring snapshot `n`
//! rewinds the simulator to the configuration it had when step `n` began.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A deep copy of simulator state captured before one step
///
/// The `captured_at` stamp is informational only; it is excluded from
/// equality so that snapshot comparisons (and the round-trip property
/// `step -> step_back` restores the pre-step snapshot) are deterministic.
///
/// # Examples
///
/// ```rust
/// use choreo_history::Snapshot;
///
/// let snap = Snapshot::new(3, vec!["n0".to_string(), "n1".to_string()]);
/// assert_eq!(snap.step, 3);
/// assert_eq!(snap.state.len(), 2);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot<S> {
    /// Step number the snapshot was taken before
    pub step: u64,

    /// Wall-clock capture time (informational, excluded from equality)
    pub captured_at: DateTime<Utc>,

    /// Deep copy of the simulator's observable state
    pub state: S,
}

impl<S> Snapshot<S> {
    /// Wrap `state` as the snapshot taken before `step`
    pub fn new(step: u64, state: S) -> Self {
        Self {
            step,
            captured_at: Utc::now(),
            state,
        }
    }
}

impl<S: PartialEq> PartialEq for Snapshot<S> {
    fn eq(&self, other: &Self) -> bool {
        self.step == other.step && self.state == other.state
    }
}

impl<S: Eq> Eq for Snapshot<S> {}
