//! Orchestrated CFG simulator
//!
//! [`CfgSimulator`] treats the CFG as the operational semantics of the
//! global protocol: one central interpreter walks the graph, and every
//! [`step`](CfgSimulator::step) yields exactly one protocol event (message,
//! choice, fork, join, sub-protocol boundary, completion) or one error,
//! never both.
//!
//! # Traversal rules
//!
//! - `initial` and `merge` nodes are transparent;
//! - recursion boundaries emit `recursion-*` events on the bus and in the
//!   trace but do not consume a step of their own (a bounded run over a
//!   recursion therefore spends its whole budget on messages);
//! - a `branch` node halts under the manual strategy until
//!   [`choose`](CfgSimulator::choose) resolves it, and resolves itself under
//!   the `first` and `random` strategies;
//! - parallel branches execute in deterministic round-robin order by branch
//!   index, one visible event per step;
//! - a recursion re-entered through a `continue` edge increments its frame's
//!   iteration count; the loop only ends through `max_steps` or by control
//!   flow leaving the loop body.
//!
//! The simulator assumes a CFG that passed the verifier; it never repairs a
//! malformed graph and fails with `invalid-node` instead.

use std::sync::Arc;

use serde::Serialize;

use choreo_history::{HistoryStore, InMemoryHistory, Snapshot};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::callstack::{CallStackManager, CallStackState, FrameKind, FrameSeed};
use crate::cfg::{Action, Cfg, EdgeType, Label, Node, NodeId, Recipients, RoleName};
use crate::error::{SimResult, SimulatorError};
use crate::event::{BusEvent, EventBus, SubscriptionId};
use crate::registry::{ProtocolRegistry, RoleMapping};
use crate::trace::{
    ExecutionTrace, ParallelPhase, RecursionPhase, SubprotocolPhase, TraceEvent,
};

/// Inner transition budget of one step; a well-formed CFG never comes close
const TRAVERSAL_BUDGET: usize = 100;

/// How choices are resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChoiceStrategy {
    /// Halt at every choice until [`CfgSimulator::choose`] is called
    Manual,
    /// Always pick branch 0
    First,
    /// Pick uniformly with a seeded generator
    Random {
        /// RNG seed, for reproducible runs
        seed: u64,
    },
}

/// Simulator configuration
#[derive(Debug, Clone)]
pub struct CfgSimulatorConfig {
    /// Step budget (default 1000)
    pub max_steps: u64,
    /// Whether to record an execution trace
    pub record_trace: bool,
    /// Choice resolution strategy
    pub choice_strategy: ChoiceStrategy,
    /// Preview depth at choice points (default 5)
    pub preview_limit: usize,
    /// Whether to keep snapshots for reverse stepping
    pub execution_history: bool,
    /// Snapshot retention bound (default 1000)
    pub max_snapshots: usize,
}

impl Default for CfgSimulatorConfig {
    fn default() -> Self {
        Self {
            max_steps: 1000,
            record_trace: true,
            choice_strategy: ChoiceStrategy::Manual,
            preview_limit: 5,
            execution_history: false,
            max_snapshots: 1000,
        }
    }
}

/// One selectable branch at a choice point
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingChoice {
    /// Branch index, in edge order
    pub index: usize,
    /// Branch edge label
    pub label: Label,
    /// Description of the branch's first node
    pub first_node: String,
    /// Bounded description of what the branch does next
    pub preview: Vec<String>,
    /// Roles participating in the previewed prefix
    pub roles: Vec<RoleName>,
    /// Rough count of protocol steps until the branch rejoins
    pub estimated_steps: usize,
}

/// Pending choice state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChoiceState {
    /// The branch node awaiting a decision
    pub node: NodeId,
    /// The deciding role
    pub at: RoleName,
    /// The selectable branches
    pub options: Vec<PendingChoice>,
}

/// One branch of an active parallel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchState {
    /// Entry node of the branch
    pub entry: NodeId,
    /// The branch's saved position
    pub current: NodeId,
    /// Whether the branch reached the join
    pub complete: bool,
}

/// Active parallel composition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParallelState {
    /// The fork node
    pub fork_node: NodeId,
    /// The matching join node
    pub join_node: NodeId,
    /// The pairing id
    pub parallel_id: String,
    /// Branch positions, by index
    pub branches: Vec<BranchState>,
    /// Index of the branch currently executing
    pub current_branch: usize,
    /// Sub-protocol nesting depth the parallel was created at; rotation is
    /// suspended while a branch is inside a deeper `do` invocation
    pub subproto_depth: usize,
}

impl ParallelState {
    fn next_incomplete(&self, after: usize) -> Option<usize> {
        let n = self.branches.len();
        (1..=n)
            .map(|offset| (after + offset) % n)
            .find(|&i| !self.branches[i].complete)
    }
}

/// Events emitted by the orchestrated simulator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimulatorEvent {
    /// A step began
    StepStart {
        /// The step number about to execute
        step: u64,
    },
    /// A step finished
    StepEnd {
        /// The completed step number
        step: u64,
    },
    /// Traversal entered a node
    NodeEnter {
        /// The entered node
        node_id: NodeId,
    },
    /// Traversal left a node
    NodeExit {
        /// The left node
        node_id: NodeId,
    },
    /// A message was exchanged
    Message {
        /// The action node
        node_id: NodeId,
        /// Sending role (after role substitution)
        from: RoleName,
        /// Receiving role(s) (after role substitution)
        to: Recipients,
        /// Message label
        label: Label,
        /// Optional payload type tag
        payload_type: Option<String>,
    },
    /// An internal step
    Tau {
        /// The action node
        node_id: NodeId,
    },
    /// Dynamic participant creation
    CreateParticipants {
        /// The action node
        node_id: NodeId,
        /// The creating role
        creator: RoleName,
        /// The created participants' role
        role_name: RoleName,
        /// Optional instance name
        instance_name: Option<String>,
    },
    /// A session invitation
    Invitation {
        /// The action node
        node_id: NodeId,
        /// The inviting role
        inviter: RoleName,
        /// The invited role
        invitee: RoleName,
    },
    /// A dynamic role declaration
    DynamicRoleDeclaration {
        /// The action node
        node_id: NodeId,
        /// The declared role
        role_name: RoleName,
    },
    /// Halted at a choice point (manual strategy)
    ChoicePoint {
        /// The branch node
        node_id: NodeId,
        /// The deciding role
        at: RoleName,
        /// The selectable branches
        options: Vec<PendingChoice>,
    },
    /// A choice was resolved
    ChoiceSelected {
        /// The branch node
        node_id: NodeId,
        /// The deciding role
        at: RoleName,
        /// Selected branch index
        index: usize,
        /// Selected branch label
        label: Label,
    },
    /// A parallel was set up
    Fork {
        /// The fork node
        node_id: NodeId,
        /// The pairing id
        parallel_id: String,
        /// Number of branches
        branch_count: usize,
    },
    /// All branches of a parallel completed
    Join {
        /// The join node
        node_id: NodeId,
        /// The pairing id
        parallel_id: String,
    },
    /// A recursion was entered for the first time
    RecursionEnter {
        /// The recursive node
        node_id: NodeId,
        /// Recursion label
        label: Label,
    },
    /// A recursion looped through a continue edge
    RecursionContinue {
        /// The recursive node
        node_id: NodeId,
        /// Recursion label
        label: Label,
        /// Iteration count after the loop
        iteration: u64,
    },
    /// Control flow left a recursion body
    RecursionExit {
        /// The node execution resumed at
        node_id: NodeId,
        /// Recursion label
        label: Label,
        /// Iterations performed
        iterations: u64,
    },
    /// A sub-protocol was entered
    SubprotocolEnter {
        /// The `do` action node
        node_id: NodeId,
        /// The invoked protocol
        protocol: String,
    },
    /// A sub-protocol completed
    SubprotocolExit {
        /// The parent node execution resumed at
        node_id: NodeId,
        /// The completed protocol
        protocol: String,
    },
    /// The protocol completed
    Complete {
        /// The terminal node
        node_id: NodeId,
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

/// Subscription discriminant for [`SimulatorEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum SimulatorEventKind {
    StepStart,
    StepEnd,
    NodeEnter,
    NodeExit,
    Message,
    Tau,
    CreateParticipants,
    Invitation,
    DynamicRoleDeclaration,
    ChoicePoint,
    ChoiceSelected,
    Fork,
    Join,
    RecursionEnter,
    RecursionContinue,
    RecursionExit,
    SubprotocolEnter,
    SubprotocolExit,
    Complete,
    Error,
}

impl BusEvent for SimulatorEvent {
    type Kind = SimulatorEventKind;

    fn kind(&self) -> SimulatorEventKind {
        match self {
            Self::StepStart { .. } => SimulatorEventKind::StepStart,
            Self::StepEnd { .. } => SimulatorEventKind::StepEnd,
            Self::NodeEnter { .. } => SimulatorEventKind::NodeEnter,
            Self::NodeExit { .. } => SimulatorEventKind::NodeExit,
            Self::Message { .. } => SimulatorEventKind::Message,
            Self::Tau { .. } => SimulatorEventKind::Tau,
            Self::CreateParticipants { .. } => SimulatorEventKind::CreateParticipants,
            Self::Invitation { .. } => SimulatorEventKind::Invitation,
            Self::DynamicRoleDeclaration { .. } => SimulatorEventKind::DynamicRoleDeclaration,
            Self::ChoicePoint { .. } => SimulatorEventKind::ChoicePoint,
            Self::ChoiceSelected { .. } => SimulatorEventKind::ChoiceSelected,
            Self::Fork { .. } => SimulatorEventKind::Fork,
            Self::Join { .. } => SimulatorEventKind::Join,
            Self::RecursionEnter { .. } => SimulatorEventKind::RecursionEnter,
            Self::RecursionContinue { .. } => SimulatorEventKind::RecursionContinue,
            Self::RecursionExit { .. } => SimulatorEventKind::RecursionExit,
            Self::SubprotocolEnter { .. } => SimulatorEventKind::SubprotocolEnter,
            Self::SubprotocolExit { .. } => SimulatorEventKind::SubprotocolExit,
            Self::Complete { .. } => SimulatorEventKind::Complete,
            Self::Error { .. } => SimulatorEventKind::Error,
        }
    }
}

/// Deep copy of the simulator's observable state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CfgSimState {
    /// Current node id
    pub current_node: NodeId,
    /// Visited nodes in visit order
    pub visited: Vec<NodeId>,
    /// Steps taken
    pub step_count: u64,
    /// Whether the protocol completed
    pub completed: bool,
    /// Whether the step budget was exhausted
    pub reached_max_steps: bool,
    /// Pending choice, if halted at one
    pub choice: Option<ChoiceState>,
    /// Active parallels, innermost last
    pub parallel_stack: Vec<ParallelState>,
    /// Call stack snapshot
    pub call_stack: CallStackState,
    /// Deep copy of the trace at capture time
    pub trace: ExecutionTrace,
    /// Most recent visible event
    pub last_event: Option<SimulatorEvent>,
}

/// Outcome of [`CfgSimulator::run`]
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Whether the protocol completed
    pub completed: bool,
    /// Whether the step budget was exhausted
    pub reached_max_steps: bool,
    /// Steps taken
    pub steps: u64,
    /// Where execution stopped
    pub final_node: NodeId,
    /// The failure, if the run stopped on an error other than the budget
    pub error: Option<SimulatorError>,
    /// The recorded trace (empty when recording is off)
    pub trace: ExecutionTrace,
}

/// The orchestrated simulator
pub struct CfgSimulator {
    cfg: Arc<Cfg>,
    config: CfgSimulatorConfig,
    registry: Option<Arc<ProtocolRegistry>>,

    current_node: NodeId,
    visited: Vec<NodeId>,
    step_count: u64,
    completed: bool,
    reached_max_steps: bool,
    choice: Option<ChoiceState>,
    parallel_stack: Vec<ParallelState>,
    call_stack: CallStackManager,
    last_event: Option<SimulatorEvent>,

    rng: Option<StdRng>,
    trace: ExecutionTrace,
    bus: EventBus<SimulatorEvent>,
    history: Option<InMemoryHistory<CfgSimState>>,
}

impl CfgSimulator {
    /// Construct a simulator and advance to the first meaningful state
    ///
    /// # Errors
    ///
    /// `invalid-node` when the CFG has no initial node (a malformed graph
    /// that escaped the builder).
    pub fn new(cfg: Arc<Cfg>, config: CfgSimulatorConfig) -> SimResult<Self> {
        let initial = cfg
            .initial_node()
            .cloned()
            .ok_or_else(|| SimulatorError::invalid_node("initial"))?;

        let rng = match config.choice_strategy {
            ChoiceStrategy::Random { seed } => Some(StdRng::seed_from_u64(seed)),
            _ => None,
        };
        let history = config
            .execution_history
            .then(|| InMemoryHistory::new(config.max_snapshots));

        let mut sim = Self {
            cfg,
            config,
            registry: None,
            current_node: initial,
            visited: Vec::new(),
            step_count: 0,
            completed: false,
            reached_max_steps: false,
            choice: None,
            parallel_stack: Vec::new(),
            call_stack: CallStackManager::new(),
            last_event: None,
            rng,
            trace: ExecutionTrace::new(),
            bus: EventBus::new(),
            history,
        };
        sim.skip_initial()?;
        Ok(sim)
    }

    /// Attach a protocol registry for `do` resolution
    pub fn with_registry(mut self, registry: Arc<ProtocolRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replace the default call-stack manager (custom budgets)
    pub fn with_call_stack(mut self, call_stack: CallStackManager) -> Self {
        self.call_stack = call_stack;
        self
    }

    /// Subscribe to simulator events
    pub fn on(
        &self,
        kind: SimulatorEventKind,
        callback: impl Fn(&SimulatorEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.bus.on(kind, callback)
    }

    /// Subscribe to every simulator event
    pub fn on_any(
        &self,
        callback: impl Fn(&SimulatorEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.bus.on_any(callback)
    }

    /// Remove a subscription
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.bus.off(id)
    }

    // --- accessors -------------------------------------------------------

    /// The node execution is at
    pub fn current_node(&self) -> &NodeId {
        &self.current_node
    }

    /// Nodes visited so far, in visit order
    pub fn visited_nodes(&self) -> &[NodeId] {
        &self.visited
    }

    /// Steps taken so far
    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    /// Whether the protocol completed
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Whether the step budget was exhausted
    pub fn reached_max_steps(&self) -> bool {
        self.reached_max_steps
    }

    /// The pending choice, if halted at one
    pub fn pending_choice(&self) -> Option<&ChoiceState> {
        self.choice.as_ref()
    }

    /// The recorded trace
    pub fn trace(&self) -> &ExecutionTrace {
        &self.trace
    }

    /// Deep copy of the observable state
    pub fn state(&self) -> CfgSimState {
        CfgSimState {
            current_node: self.current_node.clone(),
            visited: self.visited.clone(),
            step_count: self.step_count,
            completed: self.completed,
            reached_max_steps: self.reached_max_steps,
            choice: self.choice.clone(),
            parallel_stack: self.parallel_stack.clone(),
            call_stack: self.call_stack.get_state(),
            trace: self.trace.clone(),
            last_event: self.last_event.clone(),
        }
    }

    // --- stepping --------------------------------------------------------

    /// Execute one step, producing exactly one event or one error
    pub fn step(&mut self) -> SimResult<SimulatorEvent> {
        if self.completed {
            return self.fail(SimulatorError::AlreadyCompleted);
        }
        if let Some(choice) = &self.choice {
            let node = choice.node.clone();
            return self.fail(SimulatorError::ChoiceRequired { node });
        }
        if self.step_count >= self.config.max_steps {
            self.reached_max_steps = true;
            self.close_trace();
            let max_steps = self.config.max_steps;
            return self.fail(SimulatorError::MaxStepsReached { max_steps });
        }

        self.record_snapshot();
        self.bus.emit(&SimulatorEvent::StepStart {
            step: self.step_count,
        });

        match self.advance() {
            Ok(event) => {
                // A choice point halts without consuming the step.
                if !matches!(event, SimulatorEvent::ChoicePoint { .. }) {
                    self.step_count += 1;
                }
                tracing::debug!(step = self.step_count, node = %self.current_node, "step");
                self.last_event = Some(event.clone());
                self.bus.emit(&SimulatorEvent::StepEnd {
                    step: self.step_count,
                });
                Ok(event)
            }
            Err(err) => self.fail(err),
        }
    }

    /// Resolve the pending choice
    ///
    /// Counts as one step and emits the `choice-selected` event.
    pub fn choose(&mut self, index: usize) -> SimResult<SimulatorEvent> {
        let Some(choice) = self.choice.clone() else {
            return self.fail(SimulatorError::invalid_choice(
                Some(index),
                "simulator is not at a choice point",
            ));
        };
        if index >= choice.options.len() {
            let reason = format!("index out of range (0..{})", choice.options.len());
            return self.fail(SimulatorError::invalid_choice(Some(index), reason));
        }

        self.record_snapshot();
        let event = self.apply_selection(&choice.node, &choice.at, index)?;
        self.choice = None;
        self.step_count += 1;
        self.last_event = Some(event.clone());
        Ok(event)
    }

    /// Run until completion, budget exhaustion, or failure
    pub fn run(&mut self) -> RunResult {
        let mut error = None;
        while !self.completed {
            match self.step() {
                Ok(_) => {}
                Err(SimulatorError::MaxStepsReached { .. }) => break,
                Err(err) => {
                    error = Some(err);
                    break;
                }
            }
        }
        RunResult {
            completed: self.completed,
            reached_max_steps: self.reached_max_steps,
            steps: self.step_count,
            final_node: self.current_node.clone(),
            error,
            trace: self.trace.clone(),
        }
    }

    /// Return to the initial configuration without rebuilding
    pub fn reset(&mut self) -> SimResult<()> {
        self.current_node = self
            .cfg
            .initial_node()
            .cloned()
            .ok_or_else(|| SimulatorError::invalid_node("initial"))?;
        self.visited.clear();
        self.step_count = 0;
        self.completed = false;
        self.reached_max_steps = false;
        self.choice = None;
        self.parallel_stack.clear();
        self.call_stack.reset();
        self.last_event = None;
        self.trace.clear();
        if let ChoiceStrategy::Random { seed } = self.config.choice_strategy {
            self.rng = Some(StdRng::seed_from_u64(seed));
        }
        if let Some(history) = &mut self.history {
            history.clear();
        }
        self.skip_initial()
    }

    /// Restore the state recorded before the previous step
    pub fn step_back(&mut self) -> SimResult<()> {
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
    pub fn step_forward(&mut self) -> SimResult<()> {
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

    fn fail(&mut self, err: SimulatorError) -> SimResult<SimulatorEvent> {
        self.bus.emit(&SimulatorEvent::Error {
            kind: err.kind().to_string(),
            message: err.to_string(),
        });
        Err(err)
    }

    fn restore(&mut self, state: CfgSimState) {
        self.current_node = state.current_node;
        self.visited = state.visited;
        self.step_count = state.step_count;
        self.completed = state.completed;
        self.reached_max_steps = state.reached_max_steps;
        self.choice = state.choice;
        self.parallel_stack = state.parallel_stack;
        self.call_stack.restore(state.call_stack);
        self.trace = state.trace;
        self.last_event = state.last_event;
    }

    fn record_snapshot(&mut self) {
        if self.history.is_some() {
            let snapshot = Snapshot::new(self.step_count, self.state());
            if let Some(history) = &mut self.history {
                history.record(snapshot);
            }
        }
    }

    fn skip_initial(&mut self) -> SimResult<()> {
        self.visited.push(self.current_node.clone());
        if matches!(self.cfg.node(&self.current_node), Some(Node::Initial)) {
            let next = self.unique_successor(&self.current_node)?;
            self.current_node = next;
            self.visited.push(self.current_node.clone());
        }
        Ok(())
    }

    fn active_cfg(&self) -> Arc<Cfg> {
        self.call_stack
            .current_subprotocol()
            .and_then(|f| f.sub_cfg.clone())
            .unwrap_or_else(|| Arc::clone(&self.cfg))
    }

    fn active_mapping(&self) -> RoleMapping {
        self.call_stack
            .current_subprotocol()
            .and_then(|f| f.role_mapping.clone())
            .unwrap_or_default()
    }

    fn unique_successor(&self, node: &str) -> SimResult<NodeId> {
        let cfg = self.active_cfg();
        let outs = cfg.outgoing(node);
        outs.first()
            .map(|e| e.to.clone())
            .ok_or_else(|| SimulatorError::NoTransition {
                node: node.to_string(),
            })
    }

    fn record_trace(&mut self, event: TraceEvent) {
        if self.config.record_trace {
            self.trace.record(self.step_count, event);
        }
    }

    fn close_trace(&mut self) {
        if self.config.record_trace {
            self.trace.close(self.completed, self.step_count);
        }
    }

    fn subproto_depth(&self) -> usize {
        self.call_stack
            .frames()
            .iter()
            .filter(|f| f.kind == FrameKind::Subprotocol)
            .count()
    }

    /// After a visible event inside a parallel, save the branch position
    /// and rotate round-robin to the next incomplete branch.
    ///
    /// Rotation is suspended while the branch sits inside a `do` invocation
    /// entered after the fork, so a sub-protocol runs to completion within
    /// its branch.
    fn rotate_parallel(&mut self) {
        let depth = self.subproto_depth();
        if let Some(par) = self.parallel_stack.last_mut() {
            if depth != par.subproto_depth {
                return;
            }
            let idx = par.current_branch;
            par.branches[idx].current = self.current_node.clone();
            if let Some(next) = par.next_incomplete(idx) {
                if next != idx {
                    par.current_branch = next;
                    self.current_node = par.branches[next].current.clone();
                }
            }
        }
    }

    /// Nodes that belong to the loop of `rec_node`: reachable from it and
    /// able to return to it
    fn recursion_body(cfg: &Cfg, rec_node: &str) -> std::collections::BTreeSet<NodeId> {
        let forward = cfg.reachable_from(rec_node, true);

        let mut backward = std::collections::BTreeSet::new();
        let mut work = vec![rec_node.to_string()];
        while let Some(id) = work.pop() {
            if !backward.insert(id.clone()) {
                continue;
            }
            for edge in cfg.incoming(&id) {
                if !backward.contains(&edge.from) {
                    work.push(edge.from.clone());
                }
            }
        }

        forward.intersection(&backward).cloned().collect()
    }

    /// Walk to the next visible event
    fn advance(&mut self) -> SimResult<SimulatorEvent> {
        for _ in 0..TRAVERSAL_BUDGET {
            // Leaving a recursion body pops its frame.
            if let Some(frame) = self.call_stack.current_frame() {
                if frame.kind == FrameKind::Recursion {
                    let cfg = self.active_cfg();
                    let body = Self::recursion_body(&cfg, &frame.entry_node);
                    if !body.contains(&self.current_node) {
                        let frame = self.call_stack.pop()?;
                        let event = SimulatorEvent::RecursionExit {
                            node_id: self.current_node.clone(),
                            label: frame.name.clone(),
                            iterations: frame.iterations,
                        };
                        self.record_trace(TraceEvent::Recursion {
                            label: frame.name,
                            phase: RecursionPhase::Exit,
                        });
                        self.bus.emit(&event);
                        // Transparent: keep walking toward a visible event.
                        continue;
                    }
                }
            }

            let node_id = self.current_node.clone();
            let cfg = self.active_cfg();
            let node = cfg
                .node(&node_id)
                .cloned()
                .ok_or_else(|| SimulatorError::invalid_node(&node_id))?;
            self.bus.emit(&SimulatorEvent::NodeEnter {
                node_id: node_id.clone(),
            });

            match node {
                Node::Initial | Node::Merge => {
                    self.move_to(self.unique_successor(&node_id)?);
                }

                Node::Action { action } => match action {
                    Action::Message {
                        from,
                        to,
                        label,
                        payload_type,
                    } => {
                        let mapping = self.active_mapping();
                        let from = mapping.apply(&from);
                        let to = map_recipients(&mapping, &to);
                        let event = SimulatorEvent::Message {
                            node_id: node_id.clone(),
                            from: from.clone(),
                            to: to.clone(),
                            label: label.clone(),
                            payload_type,
                        };
                        self.record_trace(TraceEvent::Message { from, to, label });
                        return self.finish_action(&node_id, event);
                    }
                    Action::Tau => {
                        let event = SimulatorEvent::Tau {
                            node_id: node_id.clone(),
                        };
                        self.record_trace(TraceEvent::Tau);
                        return self.finish_action(&node_id, event);
                    }
                    Action::CreateParticipants {
                        creator,
                        role_name,
                        instance_name,
                    } => {
                        let mapping = self.active_mapping();
                        let event = SimulatorEvent::CreateParticipants {
                            node_id: node_id.clone(),
                            creator: mapping.apply(&creator),
                            role_name,
                            instance_name,
                        };
                        self.record_trace(TraceEvent::Tau);
                        return self.finish_action(&node_id, event);
                    }
                    Action::Invitation { inviter, invitee } => {
                        let mapping = self.active_mapping();
                        let event = SimulatorEvent::Invitation {
                            node_id: node_id.clone(),
                            inviter: mapping.apply(&inviter),
                            invitee: mapping.apply(&invitee),
                        };
                        self.record_trace(TraceEvent::Tau);
                        return self.finish_action(&node_id, event);
                    }
                    Action::DynamicRoleDeclaration { role_name } => {
                        let event = SimulatorEvent::DynamicRoleDeclaration {
                            node_id: node_id.clone(),
                            role_name,
                        };
                        self.record_trace(TraceEvent::Tau);
                        return self.finish_action(&node_id, event);
                    }
                    Action::Do {
                        protocol,
                        role_arguments,
                    } => return self.enter_subprotocol(&node_id, &protocol, &role_arguments),
                },

                Node::Branch { at } => return self.handle_branch(&node_id, &at),

                Node::Recursive { label } => {
                    // Transparent either way: the boundary event is emitted
                    // but the walk continues to the next visible event.
                    if let Some(frame) = self.call_stack.recursion_frame(&label) {
                        let frame_id = frame.id;
                        self.call_stack.unwind_to(frame_id)?;
                        let iteration = self.call_stack.increment_iterations()?;
                        let event = SimulatorEvent::RecursionContinue {
                            node_id: node_id.clone(),
                            label: label.clone(),
                            iteration,
                        };
                        self.record_trace(TraceEvent::Recursion {
                            label,
                            phase: RecursionPhase::Continue,
                        });
                        self.bus.emit(&event);
                    } else {
                        self.call_stack
                            .push(FrameSeed::recursion(label.clone(), node_id.clone()))?;
                        let event = SimulatorEvent::RecursionEnter {
                            node_id: node_id.clone(),
                            label: label.clone(),
                        };
                        self.record_trace(TraceEvent::Recursion {
                            label,
                            phase: RecursionPhase::Enter,
                        });
                        self.bus.emit(&event);
                    }
                    self.move_to(self.unique_successor(&node_id)?);
                }

                Node::Fork { parallel_id } => {
                    return self.enter_parallel(&node_id, &parallel_id);
                }

                Node::Join { parallel_id } => {
                    if let Some(event) = self.reach_join(&node_id, &parallel_id)? {
                        return Ok(event);
                    }
                    // Switched to another branch; keep walking.
                }

                Node::Terminal => return self.reach_terminal(&node_id),
            }
        }

        Err(SimulatorError::TraversalBudgetExceeded {
            node: self.current_node.clone(),
        })
    }

    fn move_to(&mut self, next: NodeId) {
        self.bus.emit(&SimulatorEvent::NodeExit {
            node_id: self.current_node.clone(),
        });
        self.current_node = next;
        self.visited.push(self.current_node.clone());
    }

    /// Advance past an action node, emit its event, rotate parallels
    fn finish_action(
        &mut self,
        node_id: &str,
        event: SimulatorEvent,
    ) -> SimResult<SimulatorEvent> {
        self.call_stack.step(node_id, None)?;
        self.move_to(self.unique_successor(node_id)?);
        self.bus.emit(&event);
        self.rotate_parallel();
        Ok(event)
    }

    fn handle_branch(&mut self, node_id: &str, at: &str) -> SimResult<SimulatorEvent> {
        let mapping = self.active_mapping();
        let at = mapping.apply(at);
        match self.config.choice_strategy {
            ChoiceStrategy::Manual => {
                let options = self.pending_choices(node_id);
                let state = ChoiceState {
                    node: node_id.to_string(),
                    at: at.clone(),
                    options: options.clone(),
                };
                self.choice = Some(state);
                let event = SimulatorEvent::ChoicePoint {
                    node_id: node_id.to_string(),
                    at,
                    options,
                };
                self.bus.emit(&event);
                Ok(event)
            }
            ChoiceStrategy::First => self.apply_selection(node_id, &at, 0),
            ChoiceStrategy::Random { .. } => {
                let count = self.active_cfg().outgoing(node_id).len().max(1);
                let index = self
                    .rng
                    .as_mut()
                    .map(|rng| rng.gen_range(0..count))
                    .unwrap_or(0);
                self.apply_selection(node_id, &at, index)
            }
        }
    }

    fn apply_selection(&mut self, node_id: &str, at: &str, index: usize) -> SimResult<SimulatorEvent> {
        let cfg = self.active_cfg();
        let edges = cfg.outgoing(node_id);
        let edge = edges
            .get(index)
            .ok_or_else(|| SimulatorError::invalid_choice(Some(index), "branch index out of range"))?;
        let label = match &edge.edge_type {
            EdgeType::Branch { label } => label.clone(),
            _ => String::new(),
        };
        let target = edge.to.clone();

        let event = SimulatorEvent::ChoiceSelected {
            node_id: node_id.to_string(),
            at: at.to_string(),
            index,
            label: label.clone(),
        };
        self.record_trace(TraceEvent::Choice {
            at: at.to_string(),
            index,
            label,
        });
        self.call_stack.step(node_id, None)?;
        self.move_to(target);
        self.bus.emit(&event);
        self.rotate_parallel();
        Ok(event)
    }

    fn enter_subprotocol(
        &mut self,
        node_id: &str,
        protocol: &str,
        role_arguments: &[RoleName],
    ) -> SimResult<SimulatorEvent> {
        let Some(registry) = self.registry.clone() else {
            return Err(SimulatorError::SubprotocolMissingRegistry {
                protocol: protocol.to_string(),
            });
        };

        let outer = self.active_mapping();
        let actual: Vec<RoleName> = role_arguments.iter().map(|r| outer.apply(r)).collect();
        let mapping = registry.create_role_mapping(protocol, &actual)?;
        let sub_cfg = registry.resolve(protocol)?;
        let sub_initial = sub_cfg
            .initial_node()
            .cloned()
            .ok_or_else(|| SimulatorError::invalid_node("initial"))?;
        let exit_node = self.unique_successor(node_id)?;

        self.call_stack.push(FrameSeed::subprotocol(
            protocol,
            node_id,
            exit_node,
            Arc::clone(&sub_cfg),
            mapping,
        ))?;

        // Enter the sub-CFG past its initial node.
        let entry = sub_cfg
            .outgoing(&sub_initial)
            .first()
            .map(|e| e.to.clone())
            .unwrap_or(sub_initial);
        self.move_to(entry);

        let event = SimulatorEvent::SubprotocolEnter {
            node_id: node_id.to_string(),
            protocol: protocol.to_string(),
        };
        self.record_trace(TraceEvent::Subprotocol {
            protocol: protocol.to_string(),
            phase: SubprotocolPhase::Enter,
        });
        self.bus.emit(&event);
        self.rotate_parallel();
        Ok(event)
    }

    fn enter_parallel(&mut self, node_id: &str, parallel_id: &str) -> SimResult<SimulatorEvent> {
        let cfg = self.active_cfg();
        let entries: Vec<NodeId> = cfg
            .outgoing(node_id)
            .into_iter()
            .filter(|e| matches!(e.edge_type, EdgeType::Fork))
            .map(|e| e.to.clone())
            .collect();
        if entries.is_empty() {
            return Err(SimulatorError::ParallelError {
                reason: format!("fork '{}' has no branches", node_id),
            });
        }
        let join = cfg
            .matching_join(node_id)
            .cloned()
            .ok_or_else(|| SimulatorError::ParallelError {
                reason: format!("fork '{}' has no matching join", node_id),
            })?;

        let branch_count = entries.len();
        let subproto_depth = self.subproto_depth();
        self.parallel_stack.push(ParallelState {
            fork_node: node_id.to_string(),
            join_node: join,
            parallel_id: parallel_id.to_string(),
            branches: entries
                .iter()
                .map(|e| BranchState {
                    entry: e.clone(),
                    current: e.clone(),
                    complete: false,
                })
                .collect(),
            current_branch: 0,
            subproto_depth,
        });

        let event = SimulatorEvent::Fork {
            node_id: node_id.to_string(),
            parallel_id: parallel_id.to_string(),
            branch_count,
        };
        self.record_trace(TraceEvent::Parallel {
            parallel_id: parallel_id.to_string(),
            phase: ParallelPhase::Fork,
        });
        self.call_stack.step(node_id, None)?;
        self.move_to(entries[0].clone());
        self.bus.emit(&event);
        Ok(event)
    }

    /// Returns the join event when all branches are done, `None` after a
    /// transparent switch to another branch
    fn reach_join(
        &mut self,
        node_id: &str,
        parallel_id: &str,
    ) -> SimResult<Option<SimulatorEvent>> {
        let Some(par) = self.parallel_stack.last_mut() else {
            return Err(SimulatorError::ParallelError {
                reason: format!("join '{}' reached without an active parallel", node_id),
            });
        };
        if par.parallel_id != parallel_id {
            return Err(SimulatorError::ParallelError {
                reason: format!(
                    "join '{}' belongs to '{}' but '{}' is active",
                    node_id, parallel_id, par.parallel_id
                ),
            });
        }

        let idx = par.current_branch;
        par.branches[idx].complete = true;
        if let Some(next) = par.next_incomplete(idx) {
            par.current_branch = next;
            let resume = par.branches[next].current.clone();
            self.move_to(resume);
            return Ok(None);
        }

        // Every branch reached the join.
        self.parallel_stack.pop();
        let event = SimulatorEvent::Join {
            node_id: node_id.to_string(),
            parallel_id: parallel_id.to_string(),
        };
        self.record_trace(TraceEvent::Parallel {
            parallel_id: parallel_id.to_string(),
            phase: ParallelPhase::Join,
        });
        self.call_stack.step(node_id, None)?;
        self.move_to(self.unique_successor(node_id)?);
        self.bus.emit(&event);
        self.rotate_parallel();
        Ok(Some(event))
    }

    fn reach_terminal(&mut self, node_id: &str) -> SimResult<SimulatorEvent> {
        if let Some(frame) = self.call_stack.current_frame() {
            if frame.kind == FrameKind::Subprotocol {
                let frame = self.call_stack.pop()?;
                let exit = frame
                    .exit_node
                    .clone()
                    .ok_or_else(|| SimulatorError::ParallelError {
                        reason: format!("sub-protocol '{}' has no return continuation", frame.name),
                    })?;
                self.move_to(exit);
                let event = SimulatorEvent::SubprotocolExit {
                    node_id: self.current_node.clone(),
                    protocol: frame.name.clone(),
                };
                self.record_trace(TraceEvent::Subprotocol {
                    protocol: frame.name,
                    phase: SubprotocolPhase::Exit,
                });
                self.bus.emit(&event);
                self.rotate_parallel();
                return Ok(event);
            }
        }

        self.completed = true;
        let steps = self.step_count + 1;
        let event = SimulatorEvent::Complete {
            node_id: node_id.to_string(),
            steps,
        };
        if self.config.record_trace {
            self.trace.close(true, steps);
        }
        self.bus.emit(&event);
        Ok(event)
    }

    // --- choice previews -------------------------------------------------

    fn pending_choices(&self, branch_node: &str) -> Vec<PendingChoice> {
        let cfg = self.active_cfg();
        let mapping = self.active_mapping();
        cfg.outgoing(branch_node)
            .iter()
            .enumerate()
            .map(|(index, edge)| {
                let label = match &edge.edge_type {
                    EdgeType::Branch { label } => label.clone(),
                    _ => String::new(),
                };
                let first_node = cfg
                    .node(&edge.to)
                    .map(|n| n.describe())
                    .unwrap_or_else(|| edge.to.clone());
                let (preview, roles, estimated_steps) =
                    self.preview_branch(&cfg, &mapping, &edge.to);
                PendingChoice {
                    index,
                    label,
                    first_node,
                    preview,
                    roles,
                    estimated_steps,
                }
            })
            .collect()
    }

    /// Bounded walk along sequence edges; stops at choice, parallel, and
    /// recursion boundaries
    fn preview_branch(
        &self,
        cfg: &Cfg,
        mapping: &RoleMapping,
        start: &str,
    ) -> (Vec<String>, Vec<RoleName>, usize) {
        let mut preview = Vec::new();
        let mut roles = std::collections::BTreeSet::new();
        let mut estimated = 0usize;
        let mut seen = std::collections::HashSet::new();
        let mut current = start.to_string();

        loop {
            if !seen.insert(current.clone()) {
                break;
            }
            match cfg.node(&current) {
                Some(Node::Action { action }) => {
                    estimated += 1;
                    for role in action.participants() {
                        roles.insert(mapping.apply(role));
                    }
                    if preview.len() < self.config.preview_limit {
                        preview.push(action.describe());
                    }
                }
                Some(Node::Branch { .. }) | Some(Node::Fork { .. })
                | Some(Node::Recursive { .. }) => break,
                Some(Node::Merge) | Some(Node::Join { .. }) | Some(Node::Terminal) | None => break,
                Some(Node::Initial) => {}
            }
            match cfg
                .outgoing(&current)
                .into_iter()
                .find(|e| !e.edge_type.is_continue())
            {
                Some(edge) => current = edge.to.clone(),
                None => break,
            }
        }

        (preview, roles.into_iter().collect(), estimated)
    }
}

fn map_recipients(mapping: &RoleMapping, to: &Recipients) -> Recipients {
    match to {
        Recipients::One(r) => Recipients::One(mapping.apply(r)),
        Recipients::Many(rs) => Recipients::Many(rs.iter().map(|r| mapping.apply(r)).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ChoiceBranch, GlobalInteraction, ProtocolDecl};
    use crate::builder::build_cfg;

    fn msg(from: &str, to: &str, label: &str, cont: GlobalInteraction) -> GlobalInteraction {
        GlobalInteraction::message(from, to, label, cont)
    }

    fn simulator(decl: &ProtocolDecl, config: CfgSimulatorConfig) -> CfgSimulator {
        CfgSimulator::new(Arc::new(build_cfg(decl).unwrap()), config).unwrap()
    }

    fn auto_first() -> CfgSimulatorConfig {
        CfgSimulatorConfig {
            choice_strategy: ChoiceStrategy::First,
            ..CfgSimulatorConfig::default()
        }
    }

    fn request_response() -> ProtocolDecl {
        ProtocolDecl::new(
            "RequestResponse",
            ["Client", "Server"],
            msg(
                "Client",
                "Server",
                "Request",
                msg("Server", "Client", "Response", GlobalInteraction::end()),
            ),
        )
    }

    #[test]
    fn test_request_response_two_messages_in_order() {
        let mut sim = simulator(&request_response(), auto_first());

        let first = sim.step().unwrap();
        assert!(matches!(
            first,
            SimulatorEvent::Message { ref label, .. } if label == "Request"
        ));
        let second = sim.step().unwrap();
        assert!(matches!(
            second,
            SimulatorEvent::Message { ref label, .. } if label == "Response"
        ));
        let done = sim.step().unwrap();
        assert!(matches!(done, SimulatorEvent::Complete { .. }));
        assert!(sim.is_completed());
        // Two message events plus the completion step.
        assert_eq!(sim.step_count(), 3);
    }

    #[test]
    fn test_step_after_completion_fails() {
        let mut sim = simulator(&request_response(), auto_first());
        sim.run();
        let err = sim.step().unwrap_err();
        assert_eq!(err.kind(), "already-completed");
    }

    #[test]
    fn test_empty_protocol_completes_without_messages() {
        let decl = ProtocolDecl::new("Empty", ["A", "B"], GlobalInteraction::end());
        let mut sim = simulator(&decl, auto_first());
        let result = sim.run();
        assert!(result.completed);
        assert!(result.error.is_none());
        let messages = result
            .trace
            .filter(|e| matches!(e, TraceEvent::Message { .. }))
            .count();
        assert_eq!(messages, 0);
    }

    #[test]
    fn test_choice_auto_first_emits_selection_then_message() {
        let decl = ProtocolDecl::new(
            "ChoiceDemo",
            ["Server", "Client"],
            GlobalInteraction::choice(
                "Server",
                vec![
                    ChoiceBranch::new(
                        "ok",
                        msg("Server", "Client", "Success", GlobalInteraction::end()),
                    ),
                    ChoiceBranch::new(
                        "err",
                        msg("Server", "Client", "Failure", GlobalInteraction::end()),
                    ),
                ],
                GlobalInteraction::end(),
            ),
        );
        let mut sim = simulator(&decl, auto_first());

        let selected = sim.step().unwrap();
        assert!(matches!(
            selected,
            SimulatorEvent::ChoiceSelected { index: 0, .. }
        ));
        let message = sim.step().unwrap();
        assert!(matches!(
            message,
            SimulatorEvent::Message { ref label, .. } if label == "Success"
        ));
    }

    #[test]
    fn test_manual_choice_halts_and_resumes() {
        let decl = ProtocolDecl::new(
            "ChoiceDemo",
            ["Server", "Client"],
            GlobalInteraction::choice(
                "Server",
                vec![
                    ChoiceBranch::new(
                        "ok",
                        msg("Server", "Client", "Success", GlobalInteraction::end()),
                    ),
                    ChoiceBranch::new(
                        "err",
                        msg("Server", "Client", "Failure", GlobalInteraction::end()),
                    ),
                ],
                GlobalInteraction::end(),
            ),
        );
        let mut sim = simulator(&decl, CfgSimulatorConfig::default());

        let point = sim.step().unwrap();
        let SimulatorEvent::ChoicePoint { options, at, .. } = point else {
            panic!("expected a choice point");
        };
        assert_eq!(at, "Server");
        assert_eq!(options.len(), 2);
        assert_eq!(options[0].label, "ok");
        assert!(!options[0].preview.is_empty());

        // Stepping while the choice pends is an error.
        assert_eq!(sim.step().unwrap_err().kind(), "choice-required");

        // Out-of-range selection is rejected.
        assert_eq!(sim.choose(5).unwrap_err().kind(), "invalid-choice");

        let selected = sim.choose(1).unwrap();
        assert!(matches!(
            selected,
            SimulatorEvent::ChoiceSelected { index: 1, .. }
        ));
        let message = sim.step().unwrap();
        assert!(matches!(
            message,
            SimulatorEvent::Message { ref label, .. } if label == "Failure"
        ));
    }

    #[test]
    fn test_choose_without_pending_choice_fails() {
        let mut sim = simulator(&request_response(), auto_first());
        assert_eq!(sim.choose(0).unwrap_err().kind(), "invalid-choice");
    }

    #[test]
    fn test_parallel_round_robin_interleaving() {
        let decl = ProtocolDecl::new(
            "TwoPhase",
            ["P1", "P2", "C"],
            GlobalInteraction::parallel(
                vec![
                    msg("P1", "C", "VoteA", GlobalInteraction::end()),
                    msg("P2", "C", "VoteB", GlobalInteraction::end()),
                ],
                GlobalInteraction::end(),
            ),
        );
        let mut sim = simulator(&decl, auto_first());

        assert!(matches!(sim.step().unwrap(), SimulatorEvent::Fork { branch_count: 2, .. }));
        assert!(matches!(
            sim.step().unwrap(),
            SimulatorEvent::Message { ref label, .. } if label == "VoteA"
        ));
        assert!(matches!(
            sim.step().unwrap(),
            SimulatorEvent::Message { ref label, .. } if label == "VoteB"
        ));
        assert!(matches!(sim.step().unwrap(), SimulatorEvent::Join { .. }));
        assert!(matches!(sim.step().unwrap(), SimulatorEvent::Complete { .. }));
    }

    #[test]
    fn test_bounded_recursion_emits_exactly_max_steps_messages() {
        let decl = ProtocolDecl::new(
            "Loop",
            ["A", "B"],
            GlobalInteraction::rec(
                "L",
                msg("A", "B", "Data", GlobalInteraction::continue_("L")),
                GlobalInteraction::end(),
            ),
        );
        let config = CfgSimulatorConfig {
            max_steps: 5,
            choice_strategy: ChoiceStrategy::First,
            ..CfgSimulatorConfig::default()
        };
        let mut sim = simulator(&decl, config);
        let result = sim.run();

        assert!(!result.completed);
        assert!(result.reached_max_steps);
        let messages = result
            .trace
            .filter(|e| matches!(e, TraceEvent::Message { .. }))
            .count();
        assert_eq!(messages, 5);
    }

    #[test]
    fn test_recursion_with_exit_completes() {
        let decl = ProtocolDecl::new(
            "LoopExit",
            ["A", "B"],
            GlobalInteraction::rec(
                "L",
                GlobalInteraction::choice(
                    "A",
                    vec![
                        ChoiceBranch::new(
                            "stop",
                            msg("A", "B", "Stop", GlobalInteraction::end()),
                        ),
                        ChoiceBranch::new(
                            "more",
                            msg("A", "B", "Data", GlobalInteraction::continue_("L")),
                        ),
                    ],
                    GlobalInteraction::end(),
                ),
                GlobalInteraction::end(),
            ),
        );
        // First strategy picks "stop" immediately.
        let mut sim = simulator(&decl, auto_first());
        let result = sim.run();
        assert!(result.completed);
        assert!(result.error.is_none());

        // The trace saw the recursion enter and exit around the choice.
        let phases: Vec<RecursionPhase> = result
            .trace
            .entries
            .iter()
            .filter_map(|e| match e.event {
                TraceEvent::Recursion { phase, .. } => Some(phase),
                _ => None,
            })
            .collect();
        assert_eq!(phases, vec![RecursionPhase::Enter, RecursionPhase::Exit]);
    }

    #[test]
    fn test_visited_nodes_grow_monotonically() {
        let mut sim = simulator(&request_response(), auto_first());
        let mut last_len = sim.visited_nodes().len();
        while !sim.is_completed() {
            sim.step().unwrap();
            assert!(sim.visited_nodes().len() >= last_len);
            last_len = sim.visited_nodes().len();
        }
    }

    #[test]
    fn test_subprotocol_enter_and_exit() {
        use crate::registry::ProtocolRegistry;

        let auth = build_cfg(&ProtocolDecl::new(
            "Auth",
            ["U", "S"],
            msg("U", "S", "Credentials", GlobalInteraction::end()),
        ))
        .unwrap();
        let mut registry = ProtocolRegistry::new();
        registry.register(auth);

        let main = ProtocolDecl::new(
            "Main",
            ["Client", "Server"],
            GlobalInteraction::do_protocol(
                "Auth",
                ["Client", "Server"],
                msg("Server", "Client", "Welcome", GlobalInteraction::end()),
            ),
        );
        let mut sim = simulator(&main, auto_first()).with_registry(Arc::new(registry));

        assert!(matches!(
            sim.step().unwrap(),
            SimulatorEvent::SubprotocolEnter { ref protocol, .. } if protocol == "Auth"
        ));
        // Inside Auth, roles are substituted to the caller's names.
        let message = sim.step().unwrap();
        let SimulatorEvent::Message { from, to, label, .. } = message else {
            panic!("expected the sub-protocol message");
        };
        assert_eq!(from, "Client");
        assert_eq!(to, Recipients::one("Server"));
        assert_eq!(label, "Credentials");

        assert!(matches!(
            sim.step().unwrap(),
            SimulatorEvent::SubprotocolExit { ref protocol, .. } if protocol == "Auth"
        ));
        assert!(matches!(
            sim.step().unwrap(),
            SimulatorEvent::Message { ref label, .. } if label == "Welcome"
        ));
        assert!(matches!(sim.step().unwrap(), SimulatorEvent::Complete { .. }));
    }

    #[test]
    fn test_do_without_registry_fails() {
        let main = ProtocolDecl::new(
            "Main",
            ["A", "B"],
            GlobalInteraction::do_protocol("Ghost", ["A", "B"], GlobalInteraction::end()),
        );
        let mut sim = simulator(&main, auto_first());
        assert_eq!(
            sim.step().unwrap_err().kind(),
            "subprotocol-missing-registry"
        );
    }

    #[test]
    fn test_reset_reproduces_event_stream() {
        let mut sim = simulator(&request_response(), auto_first());
        let first_run = sim.run();

        sim.reset().unwrap();
        assert_eq!(sim.step_count(), 0);
        assert!(!sim.is_completed());

        let second_run = sim.run();
        assert_eq!(first_run.trace, second_run.trace);
        assert_eq!(first_run.steps, second_run.steps);
    }

    #[test]
    fn test_random_strategy_is_reproducible() {
        let decl = ProtocolDecl::new(
            "ChoiceDemo",
            ["S", "C"],
            GlobalInteraction::choice(
                "S",
                vec![
                    ChoiceBranch::new("a", msg("S", "C", "A", GlobalInteraction::end())),
                    ChoiceBranch::new("b", msg("S", "C", "B", GlobalInteraction::end())),
                ],
                GlobalInteraction::end(),
            ),
        );
        let config = CfgSimulatorConfig {
            choice_strategy: ChoiceStrategy::Random { seed: 42 },
            ..CfgSimulatorConfig::default()
        };
        let run1 = simulator(&decl, config.clone()).run();
        let run2 = simulator(&decl, config).run();
        assert_eq!(run1.trace, run2.trace);
    }

    #[test]
    fn test_step_back_restores_pre_step_state() {
        let config = CfgSimulatorConfig {
            choice_strategy: ChoiceStrategy::First,
            execution_history: true,
            ..CfgSimulatorConfig::default()
        };
        let mut sim = simulator(&request_response(), config);

        let before = sim.state();
        sim.step().unwrap();
        let after = sim.state();
        assert_ne!(before, after);

        sim.step_back().unwrap();
        assert_eq!(sim.state(), before);

        // Forward restores the post-step state.
        sim.step_forward().unwrap();
        assert_eq!(sim.state(), after);
    }

    #[test]
    fn test_step_back_without_history_fails() {
        let mut sim = simulator(&request_response(), auto_first());
        sim.step().unwrap();
        assert_eq!(sim.step_back().unwrap_err().kind(), "history-disabled");
    }

    #[test]
    fn test_message_count_matches_visited_message_nodes() {
        let decl = ProtocolDecl::new(
            "Chain",
            ["A", "B", "C"],
            msg(
                "A",
                "B",
                "M1",
                msg("B", "C", "M2", msg("C", "A", "M3", GlobalInteraction::end())),
            ),
        );
        let mut sim = simulator(&decl, auto_first());
        let counted = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let c = counted.clone();
        sim.on(SimulatorEventKind::Message, move |_| {
            c.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
        sim.run();
        assert_eq!(counted.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[test]
    fn test_error_events_broadcast() {
        let mut sim = simulator(&request_response(), auto_first());
        let errors = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = errors.clone();
        sim.on(SimulatorEventKind::Error, move |e| {
            if let SimulatorEvent::Error { kind, .. } = e {
                sink.lock().unwrap().push(kind.clone());
            }
        });
        sim.run();
        sim.step().unwrap_err();
        assert_eq!(*errors.lock().unwrap(), vec!["already-completed"]);
    }

    #[test]
    fn test_multicast_is_one_event() {
        let decl = ProtocolDecl::new(
            "Broadcast",
            ["A", "B", "C"],
            GlobalInteraction::multicast("A", ["B", "C"], "Go", GlobalInteraction::end()),
        );
        let mut sim = simulator(&decl, auto_first());
        let event = sim.step().unwrap();
        let SimulatorEvent::Message { to, .. } = event else {
            panic!("expected a message event");
        };
        assert!(to.is_multicast());
    }
}
