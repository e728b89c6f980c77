//! History store trait
//!
//! [`HistoryStore`] is the abstraction simulators program against for reverse
//! stepping. The crate ships one implementation,
//! [`InMemoryHistory`](crate::InMemoryHistory); alternative backends (for
//! example a persistent store) only need to implement this trait.
//!
//! The store is an undo/redo pair of stacks over [`Snapshot`]s:
//!
//! - [`record`](HistoryStore::record) pushes the pre-step snapshot and clears
//!   any redo entries (recording after a rewind starts a new timeline),
//! - [`step_back`](HistoryStore::step_back) exchanges the caller's current
//!   state for the most recent recorded snapshot,
//! - [`step_forward`](HistoryStore::step_forward) exchanges it back for the
//!   most recently undone snapshot.
//!
//! Because the caller hands its *current* state in on every rewind, a
//! back-then-forward pair restores exactly the state the caller started
//! from.

use crate::error::Result;
use crate::snapshot::Snapshot;

/// Storage and cursor management for simulator snapshots
///
/// Implementations must bound their memory: the number of retained snapshots
/// never exceeds [`capacity`](HistoryStore::capacity), with the oldest
/// snapshot evicted first.
pub trait HistoryStore<S: Clone> {
    /// Record a snapshot taken before a step; discards any redo entries
    fn record(&mut self, snapshot: Snapshot<S>);

    /// Exchange `current` for the most recent recorded snapshot
    ///
    /// `current` is parked on the redo side so a subsequent
    /// [`step_forward`](Self::step_forward) can restore it.
    fn step_back(&mut self, current: Snapshot<S>) -> Result<Snapshot<S>>;

    /// Exchange `current` for the most recently undone snapshot
    fn step_forward(&mut self, current: Snapshot<S>) -> Result<Snapshot<S>>;

    /// Number of snapshots available to step back through
    fn len(&self) -> usize;

    /// Whether no snapshots are recorded
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of undone snapshots available to step forward through
    fn redo_len(&self) -> usize;

    /// Maximum number of retained snapshots
    fn capacity(&self) -> usize;

    /// Discard all snapshots and redo entries
    fn clear(&mut self);
}
