//! Execution traces
//!
//! Every simulator can record an [`ExecutionTrace`]: an ordered list of typed
//! events with monotonically non-decreasing logical timestamps, closed with
//! the run's completion flag and total step count.
//!
//! Traces are the unit of comparison for the determinism guarantees: two
//! round-robin distributed runs over the same machines must produce equal
//! traces. Equality therefore covers entries, completion, and step counts,
//! but not the wall-clock metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cfg::{Label, NodeId, ProtocolName, Recipients, RoleName};

/// Typed trace event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEvent {
    /// A global message exchange (orchestrated simulator)
    Message {
        /// Sending role
        from: RoleName,
        /// Receiving role(s)
        to: Recipients,
        /// Message label
        label: Label,
    },

    /// A send performed by one role (distributed simulator)
    Send {
        /// Receiving role
        to: RoleName,
        /// Message label
        label: Label,
    },

    /// A receive performed by one role (distributed simulator)
    Receive {
        /// Sending role
        from: RoleName,
        /// Message label
        label: Label,
    },

    /// An internal step
    Tau,

    /// A choice resolution
    Choice {
        /// The deciding role
        at: RoleName,
        /// Selected branch index
        index: usize,
        /// Selected branch label
        label: Label,
    },

    /// A recursion boundary
    Recursion {
        /// Recursion label
        label: Label,
        /// `enter`, `continue`, or `exit`
        phase: RecursionPhase,
    },

    /// A parallel boundary
    Parallel {
        /// The parallel id
        parallel_id: String,
        /// `fork` or `join`
        phase: ParallelPhase,
    },

    /// A sub-protocol boundary
    Subprotocol {
        /// The invoked protocol
        protocol: ProtocolName,
        /// `enter` or `exit`
        phase: SubprotocolPhase,
    },

    /// A local state transition (distributed simulator)
    StateChange {
        /// Previous state or node
        from: NodeId,
        /// New state or node
        to: NodeId,
    },
}

/// Phase of a recursion trace event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecursionPhase {
    /// First visit of the loop header
    Enter,
    /// Re-entry through a continue edge
    Continue,
    /// The loop body was left
    Exit,
}

/// Phase of a parallel trace event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelPhase {
    /// Branches were set up
    Fork,
    /// All branches completed
    Join,
}

/// Phase of a sub-protocol trace event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubprotocolPhase {
    /// Invocation entered the sub-protocol
    Enter,
    /// The sub-protocol completed
    Exit,
}

/// One trace entry: a typed event stamped with its position and logical time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Zero-based position in the trace
    pub seq: u64,
    /// Logical timestamp; monotonically non-decreasing within one trace
    pub timestamp: u64,
    /// The event
    pub event: TraceEvent,
}

/// Ordered record of one simulation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionTrace {
    /// Recorded entries in emission order
    pub entries: Vec<TraceEntry>,
    /// Whether the run reached completion
    pub completed: bool,
    /// Steps taken when the trace was closed
    pub total_steps: u64,
    /// Wall-clock start (informational, excluded from equality)
    pub started_at: DateTime<Utc>,
}

impl Default for ExecutionTrace {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionTrace {
    /// Empty, open trace
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            completed: false,
            total_steps: 0,
            started_at: Utc::now(),
        }
    }

    /// Append an event at logical time `timestamp`
    pub fn record(&mut self, timestamp: u64, event: TraceEvent) {
        let seq = self.entries.len() as u64;
        self.entries.push(TraceEntry {
            seq,
            timestamp,
            event,
        });
    }

    /// Close the trace with the run outcome
    pub fn close(&mut self, completed: bool, total_steps: u64) {
        self.completed = completed;
        self.total_steps = total_steps;
    }

    /// Number of recorded entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop entries recorded at or after position `len` (used on rewind)
    pub fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }

    /// Entries of one event type, by predicate
    pub fn filter<'a>(
        &'a self,
        predicate: impl Fn(&TraceEvent) -> bool + 'a,
    ) -> impl Iterator<Item = &'a TraceEntry> {
        self.entries.iter().filter(move |e| predicate(&e.event))
    }

    /// Reset to an empty open trace
    pub fn clear(&mut self) {
        self.entries.clear();
        self.completed = false;
        self.total_steps = 0;
        self.started_at = Utc::now();
    }

    /// Render the trace as pretty-printed JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl PartialEq for ExecutionTrace {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
            && self.completed == other.completed
            && self.total_steps == other.total_steps
    }
}

impl Eq for ExecutionTrace {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_assigns_sequence_numbers() {
        let mut t = ExecutionTrace::new();
        t.record(0, TraceEvent::Tau);
        t.record(1, TraceEvent::Tau);
        assert_eq!(t.entries[0].seq, 0);
        assert_eq!(t.entries[1].seq, 1);
    }

    #[test]
    fn test_equality_ignores_wall_clock() {
        let mut a = ExecutionTrace::new();
        a.record(0, TraceEvent::Tau);
        a.close(true, 1);

        let mut b = ExecutionTrace::new();
        b.started_at = a.started_at + chrono::Duration::seconds(5);
        b.record(0, TraceEvent::Tau);
        b.close(true, 1);

        assert_eq!(a, b);
    }

    #[test]
    fn test_close_records_outcome() {
        let mut t = ExecutionTrace::new();
        t.close(false, 7);
        assert!(!t.completed);
        assert_eq!(t.total_steps, 7);
    }

    #[test]
    fn test_filter_by_event_type() {
        let mut t = ExecutionTrace::new();
        t.record(0, TraceEvent::Send { to: "B".to_string(), label: "X".to_string() });
        t.record(1, TraceEvent::Tau);
        t.record(2, TraceEvent::Send { to: "B".to_string(), label: "Y".to_string() });

        let sends: Vec<_> = t
            .filter(|e| matches!(e, TraceEvent::Send { .. }))
            .collect();
        assert_eq!(sends.len(), 2);
    }

    #[test]
    fn test_truncate_for_rewind() {
        let mut t = ExecutionTrace::new();
        t.record(0, TraceEvent::Tau);
        t.record(1, TraceEvent::Tau);
        t.truncate(1);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_json_rendering_tags_events() {
        let mut t = ExecutionTrace::new();
        t.record(
            0,
            TraceEvent::Send {
                to: "B".to_string(),
                label: "X".to_string(),
            },
        );
        let json = t.to_json().unwrap();
        assert!(json.contains("\"type\": \"send\""));
    }
}
