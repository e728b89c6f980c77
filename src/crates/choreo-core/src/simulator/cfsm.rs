//! Per-role CFSM simulator
//!
//! [`CfsmSimulator`] executes one role's machine with asynchronous
//! semantics: sends are always enabled and buffer into an outgoing queue the
//! coordinator drains, receives are enabled against the head of the matching
//! per-sender input queue, and internal steps and choice markers are always
//! enabled.
//!
//! # Reception modes
//!
//! With `verify_fifo` (the default) a receive is enabled only when the head
//! of its sender's queue carries the matching label; a manual selection that
//! would skip a mismatched head fails with `fifo-violation`. Without it, the
//! first matching message anywhere in the queue may be consumed.
//!
//! # Sub-protocols
//!
//! A `call` transition resolves the invoked protocol's machine for this
//! role's position through the [`CfsmRegistry`], pushes a frame on the
//! shared call stack, and executes the sub-machine to a terminal state
//! before returning to the parent transition's target. Role substitution
//! applies to every send and receive inside the sub-machine.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;

use choreo_history::{HistoryStore, InMemoryHistory, Snapshot};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::callstack::{CallStackManager, CallStackState, FrameKind, FrameSeed};
use crate::cfsm::{Cfsm, LocalAction, StateId};
use crate::error::{CfsmError, CfsmResult};
use crate::event::{BusEvent, EventBus, SubscriptionId};
use crate::message::{Message, MessageBuffer};
use crate::registry::{CfsmRegistry, RoleMapping};
use crate::trace::{ExecutionTrace, SubprotocolPhase, TraceEvent};

/// How the next transition is selected when several are enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionStrategy {
    /// Pick the first enabled transition
    First,
    /// Pick uniformly with a seeded generator
    Random {
        /// RNG seed, for reproducible runs
        seed: u64,
    },
    /// Require [`CfsmSimulator::select_transition`] before every step
    Manual,
}

/// Machine simulator configuration
#[derive(Debug, Clone)]
pub struct CfsmSimulatorConfig {
    /// Step budget (default 1000)
    pub max_steps: u64,
    /// Per-sender queue capacity; 0 means unbounded
    pub max_buffer_size: usize,
    /// Whether to record an execution trace
    pub record_trace: bool,
    /// Transition selection strategy
    pub transition_strategy: TransitionStrategy,
    /// Enforce head-of-queue reception (default on)
    pub verify_fifo: bool,
    /// Whether to keep snapshots for reverse stepping
    pub execution_history: bool,
    /// Snapshot retention bound (default 1000)
    pub max_snapshots: usize,
}

impl Default for CfsmSimulatorConfig {
    fn default() -> Self {
        Self {
            max_steps: 1000,
            max_buffer_size: 0,
            record_trace: true,
            transition_strategy: TransitionStrategy::First,
            verify_fifo: true,
            execution_history: false,
            max_snapshots: 1000,
        }
    }
}

/// One currently enabled transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnabledTransition {
    /// Index into the current state's transition list
    pub index: usize,
    /// The transition's action
    pub action: LocalAction,
    /// The transition's target state
    pub to: StateId,
}

/// Events emitted by a machine simulator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CfsmEvent {
    /// A message was emitted into the outgoing queue
    Send {
        /// The created message
        message: Message,
    },
    /// A message was consumed
    Receive {
        /// The consumed message
        message: Message,
    },
    /// A delivery was appended to an input queue
    BufferEnqueue {
        /// The sender whose queue grew
        sender: String,
        /// The message label
        label: String,
        /// Queue length after the append
        queue_len: usize,
    },
    /// A message left an input queue
    BufferDequeue {
        /// The sender whose queue shrank
        sender: String,
        /// The message label
        label: String,
        /// Queue length after the removal
        queue_len: usize,
    },
    /// An internal step
    Tau {
        /// The state the step was taken in
        state: StateId,
    },
    /// A choice marker was crossed
    Choice {
        /// The state the marker was crossed in
        state: StateId,
    },
    /// The machine moved between states
    StateChange {
        /// Previous state
        from: StateId,
        /// New state
        to: StateId,
    },
    /// A sub-protocol machine was entered
    CallEnter {
        /// The invoked protocol
        protocol: String,
    },
    /// A sub-protocol machine completed
    CallExit {
        /// The completed protocol
        protocol: String,
    },
    /// The machine reached a terminal state
    Complete {
        /// The terminal state
        state: StateId,
        /// Steps taken
        steps: u64,
    },
    /// A step failed
    Error {
        /// Stable error discriminator
        kind: String,
        /// Human-readable message
        message: String,
    },
}

/// Subscription discriminant for [`CfsmEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum CfsmEventKind {
    Send,
    Receive,
    BufferEnqueue,
    BufferDequeue,
    Tau,
    Choice,
    StateChange,
    CallEnter,
    CallExit,
    Complete,
    Error,
}

impl BusEvent for CfsmEvent {
    type Kind = CfsmEventKind;

    fn kind(&self) -> CfsmEventKind {
        match self {
            Self::Send { .. } => CfsmEventKind::Send,
            Self::Receive { .. } => CfsmEventKind::Receive,
            Self::BufferEnqueue { .. } => CfsmEventKind::BufferEnqueue,
            Self::BufferDequeue { .. } => CfsmEventKind::BufferDequeue,
            Self::Tau { .. } => CfsmEventKind::Tau,
            Self::Choice { .. } => CfsmEventKind::Choice,
            Self::StateChange { .. } => CfsmEventKind::StateChange,
            Self::CallEnter { .. } => CfsmEventKind::CallEnter,
            Self::CallExit { .. } => CfsmEventKind::CallExit,
            Self::Complete { .. } => CfsmEventKind::Complete,
            Self::Error { .. } => CfsmEventKind::Error,
        }
    }
}

/// An active sub-machine invocation
#[derive(Debug, Clone)]
struct MachineFrame {
    frame_id: u64,
    machine: Arc<Cfsm>,
    exit_state: StateId,
    mapping: RoleMapping,
    protocol: String,
}

impl PartialEq for MachineFrame {
    fn eq(&self, other: &Self) -> bool {
        self.frame_id == other.frame_id
            && self.exit_state == other.exit_state
            && self.mapping == other.mapping
            && self.protocol == other.protocol
    }
}

/// Deep copy of a machine simulator's observable state
#[derive(Debug, Clone, PartialEq)]
pub struct CfsmSimState {
    /// Current state id
    pub current_state: StateId,
    /// Visited states in visit order
    pub visited: Vec<StateId>,
    /// Steps taken
    pub step_count: u64,
    /// Whether a terminal state was reached
    pub completed: bool,
    /// Whether the step budget was exhausted
    pub reached_max_steps: bool,
    /// Input buffers
    pub buffer: MessageBuffer,
    /// Outgoing queue not yet drained by the coordinator
    pub outgoing: Vec<Message>,
    /// Next message id to assign
    pub next_message_id: u64,
    /// Logical send clock
    pub clock: u64,
    /// Pending manual selection
    pub pending_transition: Option<usize>,
    /// Call stack snapshot
    pub call_stack: CallStackState,
    /// Deep copy of the trace at capture time
    pub trace: ExecutionTrace,
    machine_frames: Vec<MachineFrame>,
}

/// One role's machine under execution
#[derive(Clone)]
pub struct CfsmSimulator {
    machine: Arc<Cfsm>,
    role: String,
    config: CfsmSimulatorConfig,
    registry: Option<Arc<CfsmRegistry>>,

    current_state: StateId,
    visited: Vec<StateId>,
    step_count: u64,
    completed: bool,
    reached_max_steps: bool,
    buffer: MessageBuffer,
    outgoing: VecDeque<Message>,
    next_message_id: u64,
    clock: u64,
    pending_transition: Option<usize>,
    machine_frames: Vec<MachineFrame>,
    call_stack: CallStackManager,

    rng: Option<StdRng>,
    trace: ExecutionTrace,
    bus: EventBus<CfsmEvent>,
    history: Option<InMemoryHistory<CfsmSimState>>,
}

impl CfsmSimulator {
    /// Construct a simulator for `machine`
    pub fn new(machine: Arc<Cfsm>, config: CfsmSimulatorConfig) -> Self {
        let rng = match config.transition_strategy {
            TransitionStrategy::Random { seed } => Some(StdRng::seed_from_u64(seed)),
            _ => None,
        };
        let history = config
            .execution_history
            .then(|| InMemoryHistory::new(config.max_snapshots));
        let current_state = machine.initial_state.clone();
        let completed = machine.is_terminal(&current_state);
        Self {
            role: machine.role.clone(),
            buffer: MessageBuffer::new(config.max_buffer_size),
            current_state: current_state.clone(),
            visited: vec![current_state],
            step_count: 0,
            completed,
            reached_max_steps: false,
            outgoing: VecDeque::new(),
            next_message_id: 0,
            clock: 0,
            pending_transition: None,
            machine_frames: Vec::new(),
            call_stack: CallStackManager::new(),
            rng,
            trace: ExecutionTrace::new(),
            bus: EventBus::new(),
            history,
            registry: None,
            machine,
            config,
        }
    }

    /// Attach a machine registry for `call` resolution
    pub fn with_registry(mut self, registry: Arc<CfsmRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Subscribe to machine events
    pub fn on(
        &self,
        kind: CfsmEventKind,
        callback: impl Fn(&CfsmEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.bus.on(kind, callback)
    }

    /// Remove a subscription
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.bus.off(id)
    }

    // --- accessors -------------------------------------------------------

    /// The role this simulator executes
    pub fn role(&self) -> &str {
        &self.role
    }

    /// The current state id
    pub fn current_state(&self) -> &StateId {
        &self.current_state
    }

    /// Steps taken so far
    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    /// Whether a terminal state was reached
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Whether the step budget was exhausted
    pub fn reached_max_steps(&self) -> bool {
        self.reached_max_steps
    }

    /// The input buffers
    pub fn buffer(&self) -> &MessageBuffer {
        &self.buffer
    }

    /// The recorded trace
    pub fn trace(&self) -> &ExecutionTrace {
        &self.trace
    }

    /// Deep copy of the observable state
    pub fn state(&self) -> CfsmSimState {
        CfsmSimState {
            current_state: self.current_state.clone(),
            visited: self.visited.clone(),
            step_count: self.step_count,
            completed: self.completed,
            reached_max_steps: self.reached_max_steps,
            buffer: self.buffer.clone(),
            outgoing: self.outgoing.iter().cloned().collect(),
            next_message_id: self.next_message_id,
            clock: self.clock,
            pending_transition: self.pending_transition,
            call_stack: self.call_stack.get_state(),
            trace: self.trace.clone(),
            machine_frames: self.machine_frames.clone(),
        }
    }

    fn active_machine(&self) -> Arc<Cfsm> {
        self.machine_frames
            .last()
            .map(|f| Arc::clone(&f.machine))
            .unwrap_or_else(|| Arc::clone(&self.machine))
    }

    fn active_mapping(&self) -> RoleMapping {
        self.machine_frames
            .last()
            .map(|f| f.mapping.clone())
            .unwrap_or_default()
    }

    // --- delivery --------------------------------------------------------

    /// Append a message to its sender's input queue
    ///
    /// The buffer is untouched when the queue is at capacity.
    pub fn deliver_message(&mut self, message: Message) -> CfsmResult<()> {
        if message.to != self.role {
            return self.fail(CfsmError::InvalidMessage {
                role: self.role.clone(),
                to: message.to.clone(),
            });
        }
        let sender = message.from.clone();
        let label = message.label.clone();
        match self.buffer.enqueue(message) {
            Ok(queue_len) => {
                self.bus.emit(&CfsmEvent::BufferEnqueue {
                    sender,
                    label,
                    queue_len,
                });
                Ok(())
            }
            Err(()) => self.fail(CfsmError::BufferOverflow {
                role: self.role.clone(),
                sender,
                capacity: self.config.max_buffer_size,
            }),
        }
    }

    /// Drain the outgoing queue for the coordinator
    pub fn outgoing_messages(&mut self) -> Vec<Message> {
        self.outgoing.drain(..).collect()
    }

    // --- enabledness -----------------------------------------------------

    /// Transitions enabled in the current state
    ///
    /// Sends, internal steps, choice markers, and calls are always enabled;
    /// a receive is enabled when its sender's queue can serve the label
    /// under the configured reception mode.
    pub fn enabled_transitions(&self) -> Vec<EnabledTransition> {
        let machine = self.active_machine();
        let mapping = self.active_mapping();
        machine
            .transitions_from(&self.current_state)
            .into_iter()
            .enumerate()
            .filter_map(|(index, t)| {
                let enabled = match &t.action {
                    LocalAction::Send { .. }
                    | LocalAction::Tau
                    | LocalAction::ChoiceMarker
                    | LocalAction::Call { .. } => true,
                    LocalAction::Receive { from, label, .. } => {
                        let sender = mapping.apply(from);
                        if self.config.verify_fifo {
                            matches!(self.buffer.head(&sender), Some(m) if m.label == *label)
                        } else {
                            self.buffer.position_of(&sender, label).is_some()
                        }
                    }
                };
                enabled.then(|| EnabledTransition {
                    index,
                    action: t.action.clone(),
                    to: t.to.clone(),
                })
            })
            .collect()
    }

    /// Select the transition (by index into the current state's transition
    /// list) the next manual step will take
    pub fn select_transition(&mut self, index: usize) {
        self.pending_transition = Some(index);
    }

    // --- stepping --------------------------------------------------------

    /// Execute one transition
    pub fn step(&mut self) -> CfsmResult<CfsmEvent> {
        if self.completed {
            return self.fail(CfsmError::InvalidState {
                role: self.role.clone(),
            });
        }
        if self.step_count >= self.config.max_steps {
            self.reached_max_steps = true;
            self.close_trace();
            let max_steps = self.config.max_steps;
            return self.fail(CfsmError::MaxSteps { max_steps });
        }

        let enabled = self.enabled_transitions();
        let chosen = match self.config.transition_strategy {
            TransitionStrategy::Manual => {
                let Some(index) = self.pending_transition.take() else {
                    return self.fail(CfsmError::TransitionRequired);
                };
                match self.validate_manual_selection(index, &enabled) {
                    Ok(t) => t,
                    Err(err) => return self.fail(err),
                }
            }
            TransitionStrategy::First => match enabled.first() {
                Some(t) => t.clone(),
                None => {
                    return self.fail(CfsmError::NoEnabledTransitions {
                        role: self.role.clone(),
                        state: self.current_state.clone(),
                    })
                }
            },
            TransitionStrategy::Random { .. } => {
                if enabled.is_empty() {
                    return self.fail(CfsmError::NoEnabledTransitions {
                        role: self.role.clone(),
                        state: self.current_state.clone(),
                    });
                }
                let idx = self
                    .rng
                    .as_mut()
                    .map(|rng| rng.gen_range(0..enabled.len()))
                    .unwrap_or(0);
                enabled[idx].clone()
            }
        };

        self.record_snapshot();
        match self.execute(&chosen) {
            Ok(event) => {
                tracing::debug!(
                    role = %self.role,
                    state = %self.current_state,
                    step = self.step_count,
                    "step"
                );
                Ok(event)
            }
            Err(err) => self.fail(err),
        }
    }

    /// Run until completion, a blocked state, or budget exhaustion
    pub fn run(&mut self) -> CfsmResult<u64> {
        while !self.completed {
            self.step()?;
        }
        Ok(self.step_count)
    }

    /// Restore the initial configuration
    pub fn reset(&mut self) {
        self.current_state = self.machine.initial_state.clone();
        self.visited = vec![self.current_state.clone()];
        self.step_count = 0;
        self.completed = self.machine.is_terminal(&self.current_state);
        self.reached_max_steps = false;
        self.buffer.clear();
        self.outgoing.clear();
        self.next_message_id = 0;
        self.clock = 0;
        self.pending_transition = None;
        self.machine_frames.clear();
        self.call_stack.reset();
        self.trace.clear();
        if let TransitionStrategy::Random { seed } = self.config.transition_strategy {
            self.rng = Some(StdRng::seed_from_u64(seed));
        }
        if let Some(history) = &mut self.history {
            history.clear();
        }
    }

    /// Restore the state recorded before the previous step
    pub fn step_back(&mut self) -> CfsmResult<()> {
        let current = Snapshot::new(self.step_count, self.state());
        let history = self
            .history
            .as_mut()
            .ok_or(choreo_history::HistoryError::Disabled)?;
        let snapshot = history.step_back(current)?;
        self.restore(snapshot.state);
        Ok(())
    }

    /// Re-apply the most recently undone step
    pub fn step_forward(&mut self) -> CfsmResult<()> {
        let current = Snapshot::new(self.step_count, self.state());
        let history = self
            .history
            .as_mut()
            .ok_or(choreo_history::HistoryError::Disabled)?;
        let snapshot = history.step_forward(current)?;
        self.restore(snapshot.state);
        Ok(())
    }

    // --- internals -------------------------------------------------------

    fn fail<T>(&mut self, err: CfsmError) -> CfsmResult<T> {
        self.bus.emit(&CfsmEvent::Error {
            kind: err.kind().to_string(),
            message: err.to_string(),
        });
        Err(err)
    }

    fn restore(&mut self, state: CfsmSimState) {
        self.current_state = state.current_state;
        self.visited = state.visited;
        self.step_count = state.step_count;
        self.completed = state.completed;
        self.reached_max_steps = state.reached_max_steps;
        self.buffer = state.buffer;
        self.outgoing = state.outgoing.into();
        self.next_message_id = state.next_message_id;
        self.clock = state.clock;
        self.pending_transition = state.pending_transition;
        self.call_stack.restore(state.call_stack);
        self.trace = state.trace;
        self.machine_frames = state.machine_frames;
    }

    fn record_snapshot(&mut self) {
        if self.history.is_some() {
            let snapshot = Snapshot::new(self.step_count, self.state());
            if let Some(history) = &mut self.history {
                history.record(snapshot);
            }
        }
    }

    fn close_trace(&mut self) {
        if self.config.record_trace {
            self.trace.close(self.completed, self.step_count);
        }
    }

    fn validate_manual_selection(
        &self,
        index: usize,
        enabled: &[EnabledTransition],
    ) -> Result<EnabledTransition, CfsmError> {
        if let Some(t) = enabled.iter().find(|t| t.index == index) {
            return Ok(t.clone());
        }
        // Not enabled: distinguish a FIFO skip from a plain bad selection.
        let machine = self.active_machine();
        let transitions = machine.transitions_from(&self.current_state);
        let Some(t) = transitions.get(index) else {
            return Err(CfsmError::TransitionRequired);
        };
        if let LocalAction::Receive { from, label, .. } = &t.action {
            let sender = self.active_mapping().apply(from);
            if self.config.verify_fifo && self.buffer.position_of(&sender, label).is_some() {
                let head_label = self
                    .buffer
                    .head(&sender)
                    .map(|m| m.label.clone())
                    .unwrap_or_default();
                return Err(CfsmError::FifoViolation {
                    sender,
                    label: label.clone(),
                    head_label,
                });
            }
        }
        Err(CfsmError::NoEnabledTransitions {
            role: self.role.clone(),
            state: self.current_state.clone(),
        })
    }

    fn execute(&mut self, chosen: &EnabledTransition) -> CfsmResult<CfsmEvent> {
        let mapping = self.active_mapping();
        let from_state = self.current_state.clone();

        let event = match &chosen.action {
            LocalAction::Send {
                to,
                label,
                payload_type,
            } => {
                let message = Message {
                    id: self.next_message_id,
                    from: self.role.clone(),
                    to: mapping.apply(to),
                    label: label.clone(),
                    payload_type: payload_type.clone(),
                    timestamp: self.clock,
                };
                self.next_message_id += 1;
                self.clock += 1;
                self.outgoing.push_back(message.clone());
                self.record(TraceEvent::Send {
                    to: message.to.clone(),
                    label: message.label.clone(),
                });
                CfsmEvent::Send { message }
            }

            LocalAction::Receive { from, label, .. } => {
                let sender = mapping.apply(from);
                let message = if self.config.verify_fifo {
                    self.buffer.dequeue_head(&sender)
                } else {
                    self.buffer.dequeue_label(&sender, label)
                };
                let Some(message) = message else {
                    return Err(CfsmError::NoEnabledTransitions {
                        role: self.role.clone(),
                        state: self.current_state.clone(),
                    });
                };
                self.bus.emit(&CfsmEvent::BufferDequeue {
                    sender: sender.clone(),
                    label: message.label.clone(),
                    queue_len: self.buffer.queue_len(&sender),
                });
                self.record(TraceEvent::Receive {
                    from: message.from.clone(),
                    label: message.label.clone(),
                });
                CfsmEvent::Receive { message }
            }

            LocalAction::Tau => {
                self.record(TraceEvent::Tau);
                CfsmEvent::Tau {
                    state: from_state.clone(),
                }
            }

            LocalAction::ChoiceMarker => {
                self.record(TraceEvent::Choice {
                    at: self.role.clone(),
                    index: chosen.index,
                    label: String::new(),
                });
                CfsmEvent::Choice {
                    state: from_state.clone(),
                }
            }

            LocalAction::Call {
                protocol,
                role_arguments,
            } => return self.enter_call(chosen, protocol, role_arguments),
        };

        self.advance_to(chosen.to.clone(), &from_state);
        self.bus.emit(&event);
        Ok(event)
    }

    fn enter_call(
        &mut self,
        chosen: &EnabledTransition,
        protocol: &str,
        role_arguments: &[String],
    ) -> CfsmResult<CfsmEvent> {
        let Some(registry) = self.registry.clone() else {
            return Err(CfsmError::SubprotocolMissingRegistry {
                protocol: protocol.to_string(),
            });
        };

        let outer = self.active_mapping();
        let actual: Vec<String> = role_arguments.iter().map(|r| outer.apply(r)).collect();
        let formals = registry.formal_roles(protocol)?.to_vec();
        if formals.len() != actual.len() {
            return Err(crate::error::RegistryError::InvalidRoleArguments {
                protocol: protocol.to_string(),
                expected: formals.len(),
                actual: actual.len(),
            }
            .into());
        }
        let position = actual.iter().position(|a| *a == self.role).ok_or_else(|| {
            crate::error::RegistryError::RoleNotFound {
                protocol: protocol.to_string(),
                role: self.role.clone(),
            }
        })?;
        let formal = formals[position].clone();
        let sub_machine = registry.resolve(protocol, &formal)?;
        let mapping = RoleMapping::new(&formals, &actual);

        let frame_id = self.call_stack.push(FrameSeed {
            kind: FrameKind::Subprotocol,
            name: protocol.to_string(),
            entry_node: self.current_state.clone(),
            exit_node: Some(chosen.to.clone()),
            sub_cfg: None,
            role_mapping: Some(mapping.clone()),
        })?;
        self.machine_frames.push(MachineFrame {
            frame_id,
            machine: Arc::clone(&sub_machine),
            exit_state: chosen.to.clone(),
            mapping,
            protocol: protocol.to_string(),
        });

        let from_state = self.current_state.clone();
        let entry = sub_machine.initial_state.clone();
        self.record(TraceEvent::Subprotocol {
            protocol: protocol.to_string(),
            phase: SubprotocolPhase::Enter,
        });
        let event = CfsmEvent::CallEnter {
            protocol: protocol.to_string(),
        };
        self.bus.emit(&event);
        self.advance_to(entry, &from_state);
        Ok(event)
    }

    /// Move to `to`, count the step, unwind completed sub-machines, and
    /// settle the completion flag
    fn advance_to(&mut self, to: StateId, from: &StateId) {
        self.current_state = to;
        self.visited.push(self.current_state.clone());
        self.step_count += 1;
        let _ = self.call_stack.step(&self.current_state, None);
        self.bus.emit(&CfsmEvent::StateChange {
            from: from.clone(),
            to: self.current_state.clone(),
        });

        // A sub-machine that reached a terminal state returns to the parent
        // transition's target; unwind as many levels as have completed.
        while let Some(frame) = self.machine_frames.last() {
            if !frame.machine.is_terminal(&self.current_state) {
                break;
            }
            let frame = self.machine_frames.pop().expect("frame present");
            let _ = self.call_stack.pop();
            self.record(TraceEvent::Subprotocol {
                protocol: frame.protocol.clone(),
                phase: SubprotocolPhase::Exit,
            });
            self.bus.emit(&CfsmEvent::CallExit {
                protocol: frame.protocol.clone(),
            });
            self.current_state = frame.exit_state;
            self.visited.push(self.current_state.clone());
        }

        if self.machine_frames.is_empty() && self.machine.is_terminal(&self.current_state) {
            self.completed = true;
            self.close_trace();
            self.bus.emit(&CfsmEvent::Complete {
                state: self.current_state.clone(),
                steps: self.step_count,
            });
        }
    }

    fn record(&mut self, event: TraceEvent) {
        if self.config.record_trace {
            self.trace.record(self.step_count, event);
        }
    }
}
