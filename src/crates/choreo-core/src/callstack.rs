//! Call-stack manager for recursion and sub-protocol invocation
//!
//! One stack serves both simulators: recursion frames track loop iterations,
//! sub-protocol frames carry the invoked CFG (or machine) and the role
//! substitution plus the return continuation in the parent. Frames hold node
//! *ids*, never graph handles into foreign structures, so the stack can be
//! cloned into snapshots and restored wholesale on rewind.
//!
//! Depth and iteration budgets guard runaway protocols: pushing past
//! `max_depth` fails with `stack-overflow` and a recursion frame iterating
//! past `max_iterations` fails with `max-iterations-exceeded`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cfg::{Cfg, NodeId};
use crate::error::StackError;
use crate::event::{BusEvent, EventBus, SubscriptionId};
use crate::registry::RoleMapping;

/// Default depth budget
pub const DEFAULT_MAX_DEPTH: usize = 100;

/// Default per-recursion iteration budget
pub const DEFAULT_MAX_ITERATIONS: u64 = 1000;

/// What a frame was pushed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    /// A recursion header was entered
    Recursion,
    /// A sub-protocol was invoked
    Subprotocol,
}

/// One frame of the call stack
#[derive(Debug, Clone, Serialize)]
pub struct StackFrame {
    /// Monotonically assigned frame id
    pub id: u64,
    /// Recursion or sub-protocol
    pub kind: FrameKind,
    /// Recursion label or protocol name
    pub name: String,
    /// Node at which the frame was entered
    pub entry_node: NodeId,
    /// Return continuation in the parent, for sub-protocol frames
    pub exit_node: Option<NodeId>,
    /// The frame's current position
    pub current_node: NodeId,
    /// Iteration count; meaningful for recursion frames only
    pub iterations: u64,
    /// Steps taken while this frame was on top
    pub step_count: u64,
    /// Wall-clock entry stamp (informational)
    pub entered_at: DateTime<Utc>,
    /// The invoked sub-CFG, for sub-protocol frames
    #[serde(skip)]
    pub sub_cfg: Option<Arc<Cfg>>,
    /// Formal-to-actual substitution, for sub-protocol frames
    pub role_mapping: Option<RoleMapping>,
}

impl PartialEq for StackFrame {
    fn eq(&self, other: &Self) -> bool {
        // Entry stamps are wall-clock and the sub-CFG is shared immutable
        // data; neither participates in snapshot equality.
        self.id == other.id
            && self.kind == other.kind
            && self.name == other.name
            && self.entry_node == other.entry_node
            && self.exit_node == other.exit_node
            && self.current_node == other.current_node
            && self.iterations == other.iterations
            && self.step_count == other.step_count
            && self.role_mapping == other.role_mapping
    }
}

impl Eq for StackFrame {}

/// Inputs for pushing a frame; ids and stamps are assigned by the manager
#[derive(Debug, Clone)]
pub struct FrameSeed {
    /// Recursion or sub-protocol
    pub kind: FrameKind,
    /// Recursion label or protocol name
    pub name: String,
    /// Node at which the frame is entered
    pub entry_node: NodeId,
    /// Return continuation in the parent
    pub exit_node: Option<NodeId>,
    /// The invoked sub-CFG
    pub sub_cfg: Option<Arc<Cfg>>,
    /// Role substitution
    pub role_mapping: Option<RoleMapping>,
}

impl FrameSeed {
    /// Seed for a recursion frame at `entry_node`
    pub fn recursion(label: impl Into<String>, entry_node: impl Into<NodeId>) -> Self {
        Self {
            kind: FrameKind::Recursion,
            name: label.into(),
            entry_node: entry_node.into(),
            exit_node: None,
            sub_cfg: None,
            role_mapping: None,
        }
    }

    /// Seed for a sub-protocol frame
    pub fn subprotocol(
        protocol: impl Into<String>,
        entry_node: impl Into<NodeId>,
        exit_node: impl Into<NodeId>,
        sub_cfg: Arc<Cfg>,
        role_mapping: RoleMapping,
    ) -> Self {
        Self {
            kind: FrameKind::Subprotocol,
            name: protocol.into(),
            entry_node: entry_node.into(),
            exit_node: Some(exit_node.into()),
            sub_cfg: Some(sub_cfg),
            role_mapping: Some(role_mapping),
        }
    }
}

/// Events emitted by the call-stack manager
#[derive(Debug, Clone)]
pub enum StackEvent {
    /// A frame was pushed
    FramePush {
        /// The new frame's id
        frame_id: u64,
        /// Recursion or sub-protocol
        kind: FrameKind,
        /// Frame name
        name: String,
        /// Stack depth after the push
        depth: usize,
    },
    /// A frame was popped
    FramePop {
        /// The popped frame's id
        frame_id: u64,
        /// Frame name
        name: String,
        /// How long the frame was alive
        duration_ms: i64,
        /// Steps taken inside the frame
        step_count: u64,
    },
    /// The current frame advanced one node
    FrameStep {
        /// The advancing frame's id
        frame_id: u64,
        /// The new current node
        node_id: NodeId,
        /// Optional action description
        action: Option<String>,
    },
    /// The stack was reset
    StackReset,
}

/// Subscription discriminant for [`StackEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackEventKind {
    /// Frame pushes
    FramePush,
    /// Frame pops
    FramePop,
    /// Frame steps
    FrameStep,
    /// Stack resets
    StackReset,
}

impl BusEvent for StackEvent {
    type Kind = StackEventKind;

    fn kind(&self) -> StackEventKind {
        match self {
            Self::FramePush { .. } => StackEventKind::FramePush,
            Self::FramePop { .. } => StackEventKind::FramePop,
            Self::FrameStep { .. } => StackEventKind::FrameStep,
            Self::StackReset => StackEventKind::StackReset,
        }
    }
}

/// Immutable view of the stack for snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallStackState {
    /// All frames, bottom first
    pub frames: Vec<StackFrame>,
    /// Total steps counted across all frames since construction or reset
    pub total_steps: u64,
    /// Next frame id to assign
    pub next_frame_id: u64,
}

impl CallStackState {
    /// The top frame, if any
    pub fn current_frame(&self) -> Option<&StackFrame> {
        self.frames.last()
    }

    /// Stack depth
    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

/// The shared call stack
///
/// # Examples
///
/// ```rust
/// use choreo_core::callstack::{CallStackManager, FrameSeed};
///
/// let mut stack = CallStackManager::new();
/// let id = stack.push(FrameSeed::recursion("Loop", "rec_0")).unwrap();
///
/// stack.step("msg_0", Some("A -> B: Data")).unwrap();
/// stack.increment_iterations().unwrap();
///
/// let frame = stack.frame_by_id(id).unwrap();
/// assert_eq!(frame.iterations, 1);
/// assert_eq!(frame.current_node, "msg_0");
///
/// let popped = stack.pop().unwrap();
/// assert!(stack.is_empty());
/// assert_eq!(popped.step_count, 1);
/// ```
#[derive(Debug, Clone)]
pub struct CallStackManager {
    frames: Vec<StackFrame>,
    next_frame_id: u64,
    total_steps: u64,
    max_depth: usize,
    max_iterations: u64,
    bus: EventBus<StackEvent>,
}

impl Default for CallStackManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CallStackManager {
    /// Manager with default budgets
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_DEPTH, DEFAULT_MAX_ITERATIONS)
    }

    /// Manager with explicit depth and iteration budgets
    pub fn with_limits(max_depth: usize, max_iterations: u64) -> Self {
        Self {
            frames: Vec::new(),
            next_frame_id: 0,
            total_steps: 0,
            max_depth,
            max_iterations,
            bus: EventBus::new(),
        }
    }

    /// Subscribe to stack events
    pub fn on(
        &self,
        kind: StackEventKind,
        callback: impl Fn(&StackEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.bus.on(kind, callback)
    }

    /// Remove a stack-event subscription
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.bus.off(id)
    }

    /// Push a frame; returns its assigned id
    pub fn push(&mut self, seed: FrameSeed) -> Result<u64, StackError> {
        if self.frames.len() >= self.max_depth {
            return Err(StackError::StackOverflow {
                max_depth: self.max_depth,
            });
        }
        let id = self.next_frame_id;
        self.next_frame_id += 1;
        let frame = StackFrame {
            id,
            kind: seed.kind,
            name: seed.name.clone(),
            current_node: seed.entry_node.clone(),
            entry_node: seed.entry_node,
            exit_node: seed.exit_node,
            iterations: 0,
            step_count: 0,
            entered_at: Utc::now(),
            sub_cfg: seed.sub_cfg,
            role_mapping: seed.role_mapping,
        };
        self.frames.push(frame);
        self.bus.emit(&StackEvent::FramePush {
            frame_id: id,
            kind: seed.kind,
            name: seed.name,
            depth: self.frames.len(),
        });
        Ok(id)
    }

    /// Pop the top frame
    pub fn pop(&mut self) -> Result<StackFrame, StackError> {
        let frame = self.frames.pop().ok_or(StackError::EmptyStack)?;
        let duration_ms = (Utc::now() - frame.entered_at).num_milliseconds();
        self.bus.emit(&StackEvent::FramePop {
            frame_id: frame.id,
            name: frame.name.clone(),
            duration_ms,
            step_count: frame.step_count,
        });
        Ok(frame)
    }

    /// Advance the current frame to `node_id`
    ///
    /// Increments the frame's step count and the global total. A step with
    /// an empty stack only advances the global total.
    pub fn step(&mut self, node_id: &str, action: Option<&str>) -> Result<(), StackError> {
        self.total_steps += 1;
        if let Some(frame) = self.frames.last_mut() {
            frame.current_node = node_id.to_string();
            frame.step_count += 1;
            let event = StackEvent::FrameStep {
                frame_id: frame.id,
                node_id: node_id.to_string(),
                action: action.map(str::to_string),
            };
            self.bus.emit(&event);
        }
        Ok(())
    }

    /// Bump the top recursion frame's iteration count
    ///
    /// # Errors
    ///
    /// `empty-stack` when no frame is active;
    /// `max-iterations-exceeded` when the budget is spent.
    pub fn increment_iterations(&mut self) -> Result<u64, StackError> {
        let max_iterations = self.max_iterations;
        let frame = self.frames.last_mut().ok_or(StackError::EmptyStack)?;
        if frame.iterations >= max_iterations {
            return Err(StackError::MaxIterationsExceeded {
                label: frame.name.clone(),
                max_iterations,
            });
        }
        frame.iterations += 1;
        Ok(frame.iterations)
    }

    /// Clear every frame and counter
    pub fn reset(&mut self) {
        self.frames.clear();
        self.next_frame_id = 0;
        self.total_steps = 0;
        self.bus.emit(&StackEvent::StackReset);
    }

    /// Current depth
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Whether no frame is active
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// The top frame, if any
    pub fn current_frame(&self) -> Option<&StackFrame> {
        self.frames.last()
    }

    /// The frame at `depth` counted from the bottom
    pub fn frame_at_depth(&self, depth: usize) -> Option<&StackFrame> {
        self.frames.get(depth)
    }

    /// The frame with id `id`, if still on the stack
    pub fn frame_by_id(&self, id: u64) -> Option<&StackFrame> {
        self.frames.iter().find(|f| f.id == id)
    }

    /// Frames, bottom first
    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    /// The topmost sub-protocol frame, if any
    pub fn current_subprotocol(&self) -> Option<&StackFrame> {
        self.frames
            .iter()
            .rev()
            .find(|f| f.kind == FrameKind::Subprotocol)
    }

    /// Topmost recursion frame named `label` that sits above any
    /// sub-protocol frame (recursion labels do not cross `do` boundaries)
    pub fn recursion_frame(&self, label: &str) -> Option<&StackFrame> {
        for frame in self.frames.iter().rev() {
            match frame.kind {
                FrameKind::Subprotocol => return None,
                FrameKind::Recursion if frame.name == label => return Some(frame),
                FrameKind::Recursion => continue,
            }
        }
        None
    }

    /// Pop frames until the frame with id `id` is on top
    ///
    /// Used when a `continue` to an outer recursion unwinds nested loops.
    pub fn unwind_to(&mut self, id: u64) -> Result<(), StackError> {
        while let Some(top) = self.frames.last() {
            if top.id == id {
                return Ok(());
            }
            self.pop()?;
        }
        Err(StackError::EmptyStack)
    }

    /// Steps counted across all frames
    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }

    /// Immutable snapshot of the whole stack
    pub fn get_state(&self) -> CallStackState {
        CallStackState {
            frames: self.frames.clone(),
            total_steps: self.total_steps,
            next_frame_id: self.next_frame_id,
        }
    }

    /// Restore a previously captured snapshot
    pub fn restore(&mut self, state: CallStackState) {
        self.frames = state.frames;
        self.total_steps = state.total_steps;
        self.next_frame_id = state.next_frame_id;
    }
}
