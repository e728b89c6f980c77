//! # choreo-history - Execution Snapshots and Reverse Stepping
//!
//! Bounded snapshot history for the choreo simulators. Each simulator that
//! enables execution history records a deep copy of its observable state
//! before every step; this crate stores those copies and manages the
//! undo/redo cursor that powers `step_back` / `step_forward`.
//!
//! ## Design
//!
//! - **Generic payloads** - a [`Snapshot<S>`] wraps any `Clone` state struct;
//!   simulators own the shape of `S`, the store never inspects it.
//! - **Undo/redo discipline** - stepping back exchanges the simulator's
//!   current state for the most recent snapshot and parks the current state
//!   on a redo stack; recording a fresh snapshot after a rewind discards
//!   the redo entries (a new timeline).
//! - **Bounded memory** - at most `max_snapshots` entries are retained
//!   (default 1000), oldest first out.
//! - **Synchronous** - the simulators are single-threaded and cooperative,
//!   so the store exposes plain `&mut self` methods.
//!
//! ## Quick Start
//!
//! ```rust
//! use choreo_history::{HistoryStore, InMemoryHistory, Snapshot};
//!
//! #[derive(Clone, PartialEq, Debug)]
//! struct SimState {
//!     current_node: String,
//!     step_count: u64,
//! }
//!
//! let mut history = InMemoryHistory::new(1000);
//!
//! // Before each step, the simulator records its pre-step state.
//! history.record(Snapshot::new(0, SimState {
//!     current_node: "initial".to_string(),
//!     step_count: 0,
//! }));
//!
//! // Rewinding exchanges the current state for the pre-step one.
//! let current = Snapshot::new(1, SimState {
//!     current_node: "msg_0".to_string(),
//!     step_count: 1,
//! });
//! let restored = history.step_back(current).unwrap();
//! assert_eq!(restored.state.current_node, "initial");
//! ```

pub mod error;
pub mod memory;
pub mod snapshot;
pub mod traits;

pub use error::{HistoryError, Result};
pub use memory::{InMemoryHistory, DEFAULT_MAX_SNAPSHOTS};
pub use snapshot::Snapshot;
pub use traits::HistoryStore;
