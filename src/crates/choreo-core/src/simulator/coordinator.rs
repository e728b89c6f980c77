//! Distributed coordinator
//!
//! [`DistributedSimulator`] owns one [`CfsmSimulator`] per role and drives
//! them cooperatively: each global step schedules exactly one enabled role,
//! executes one of its transitions, and routes the messages it produced into
//! the recipients' input buffers.
//!
//! # Scheduling
//!
//! - `round-robin` starts after the last scheduled role in declared order
//!   and wraps; two runs over the same machines are bit-identical;
//! - `fair` picks the enabled role with the fewest schedules, ties broken
//!   by declared order;
//! - `random` draws from the enabled set with a seeded generator;
//! - `manual` requires the caller to name the role for every step.
//!
//! # Delivery
//!
//! Messages drain in send order. Under `fifo` they are delivered in exactly
//! that order; under `unordered` the interleaving across distinct recipients
//! is shuffled, but the per-channel order (one sender to one recipient) is
//! preserved, so per-channel FIFO reception holds in both modes.
//!
//! # Termination
//!
//! A run ends with success when every machine completed, with `deadlock`
//! (listing the blocked roles) when no machine can move but some are
//! unfinished, or with `max-steps` when the global budget runs out.

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::cfg::{Cfg, RoleName};
use crate::cfsm::Cfsm;
use crate::error::{CfsmError, CoordResult, CoordinatorError, ProjectionError};
use crate::projection::project_all;
use crate::registry::CfsmRegistry;
use crate::simulator::cfsm::{
    CfsmEvent, CfsmSimulator, CfsmSimulatorConfig, TransitionStrategy,
};
use crate::trace::ExecutionTrace;

/// Role scheduling policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingStrategy {
    /// Cycle through roles in declared order
    RoundRobin,
    /// Fewest schedules first, ties by declared order
    Fair,
    /// Seeded uniform pick among enabled roles
    Random {
        /// RNG seed, for reproducible runs
        seed: u64,
    },
    /// The caller names the role on every step
    Manual,
}

/// Message delivery policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryModel {
    /// Deliver in send order
    Fifo,
    /// Shuffle across recipients; per-channel order is still preserved
    Unordered {
        /// RNG seed for the shuffle
        seed: u64,
    },
}

/// Coordinator configuration
#[derive(Debug, Clone)]
pub struct DistributedSimulatorConfig {
    /// Global step budget (default 1000)
    pub max_steps: u64,
    /// Per-sender queue capacity inside each role (0 = unbounded)
    pub max_buffer_size: usize,
    /// Delivery policy
    pub delivery_model: DeliveryModel,
    /// Whether role simulators record traces
    pub record_trace: bool,
    /// Scheduling policy
    pub scheduling_strategy: SchedulingStrategy,
    /// Whether [`DistributedSimulator::explore_all_interleavings`] is the
    /// intended mode of use; `run` itself always follows the strategy
    pub explore_all_interleavings: bool,
}

impl Default for DistributedSimulatorConfig {
    fn default() -> Self {
        Self {
            max_steps: 1000,
            max_buffer_size: 0,
            delivery_model: DeliveryModel::Fifo,
            record_trace: true,
            scheduling_strategy: SchedulingStrategy::RoundRobin,
            explore_all_interleavings: false,
        }
    }
}

/// What one global step did
#[derive(Debug, Clone)]
pub enum GlobalStepOutcome {
    /// A role took one transition
    Progressed {
        /// The scheduled role
        role: RoleName,
        /// The event its machine produced
        event: CfsmEvent,
    },
    /// Every machine has completed
    Completed,
}

/// How a full run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DistributedRunOutcome {
    /// Every role completed
    Completed,
    /// No enabled role remained while some were unfinished
    Deadlock {
        /// The blocked roles, in declared order
        blocked_roles: Vec<RoleName>,
    },
    /// The global step budget ran out
    MaxSteps,
    /// A scheduling or delivery failure stopped the run
    Failed {
        /// The stable discriminator of the failure
        kind: String,
        /// Human-readable message
        message: String,
    },
}

/// Result of [`DistributedSimulator::run`]
#[derive(Debug, Clone)]
pub struct DistributedRunResult {
    /// How the run ended
    pub outcome: DistributedRunOutcome,
    /// Global steps taken
    pub global_steps: u64,
    /// Per-role traces, closed with each role's completion flag
    pub traces: BTreeMap<RoleName, ExecutionTrace>,
    /// How often each role was scheduled
    pub schedule_counts: BTreeMap<RoleName, u64>,
}

/// Outcome counts of a bounded interleaving exploration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterleavingSummary {
    /// Fully explored interleavings
    pub explored: usize,
    /// How many ended in completion
    pub completed: usize,
    /// How many ended in deadlock
    pub deadlocked: usize,
    /// Whether the exploration hit the path or depth limit
    pub truncated: bool,
}

/// The coordinator
#[derive(Clone)]
pub struct DistributedSimulator {
    roles: Vec<RoleName>,
    sims: Vec<CfsmSimulator>,
    config: DistributedSimulatorConfig,

    global_steps: u64,
    schedule_counts: Vec<u64>,
    deadlocked: bool,
    reached_max_steps: bool,
    last_scheduled: Option<usize>,

    scheduling_rng: Option<StdRng>,
    delivery_rng: Option<StdRng>,
}

impl DistributedSimulator {
    /// Build a coordinator over hand-supplied machines
    ///
    /// The vector order is the declared role order used by the schedulers.
    pub fn new(machines: Vec<Cfsm>, config: DistributedSimulatorConfig) -> Self {
        let role_config = CfsmSimulatorConfig {
            max_steps: config.max_steps,
            max_buffer_size: config.max_buffer_size,
            record_trace: config.record_trace,
            transition_strategy: TransitionStrategy::First,
            verify_fifo: true,
            execution_history: false,
            max_snapshots: 1000,
        };

        let scheduling_rng = match config.scheduling_strategy {
            SchedulingStrategy::Random { seed } => Some(StdRng::seed_from_u64(seed)),
            _ => None,
        };
        let delivery_rng = match config.delivery_model {
            DeliveryModel::Unordered { seed } => Some(StdRng::seed_from_u64(seed)),
            _ => None,
        };

        let roles: Vec<RoleName> = machines.iter().map(|m| m.role.clone()).collect();
        let sims: Vec<CfsmSimulator> = machines
            .into_iter()
            .map(|m| CfsmSimulator::new(Arc::new(m), role_config.clone()))
            .collect();
        let n = sims.len();

        Self {
            roles,
            sims,
            config,
            global_steps: 0,
            schedule_counts: vec![0; n],
            deadlocked: false,
            reached_max_steps: false,
            last_scheduled: None,
            scheduling_rng,
            delivery_rng,
        }
    }

    /// Project a CFG and build a coordinator over the result
    ///
    /// Role order follows the CFG's declared roles. Projection errors are
    /// returned instead of a coordinator.
    pub fn from_projection(
        cfg: &Cfg,
        config: DistributedSimulatorConfig,
    ) -> Result<Self, Vec<ProjectionError>> {
        let (machines, errors) = project_all(cfg);
        if !errors.is_empty() {
            return Err(errors);
        }
        let ordered: Vec<Cfsm> = cfg
            .roles
            .iter()
            .filter_map(|r| machines.get(r).cloned())
            .collect();
        Ok(Self::new(ordered, config))
    }

    /// Attach a machine registry to every role simulator
    pub fn with_registry(mut self, registry: Arc<CfsmRegistry>) -> Self {
        self.sims = self
            .sims
            .drain(..)
            .map(|sim| sim.with_registry(Arc::clone(&registry)))
            .collect();
        self
    }

    // --- accessors -------------------------------------------------------

    /// Declared role order
    pub fn roles(&self) -> &[RoleName] {
        &self.roles
    }

    /// Global steps taken
    pub fn global_steps(&self) -> u64 {
        self.global_steps
    }

    /// Whether a deadlock was detected
    pub fn is_deadlocked(&self) -> bool {
        self.deadlocked
    }

    /// Whether the global budget ran out
    pub fn reached_max_steps(&self) -> bool {
        self.reached_max_steps
    }

    /// The simulator for `role`
    pub fn simulator(&self, role: &str) -> Option<&CfsmSimulator> {
        self.roles
            .iter()
            .position(|r| r == role)
            .map(|i| &self.sims[i])
    }

    /// Roles that are neither completed nor enabled, in declared order
    pub fn blocked_roles(&self) -> Vec<RoleName> {
        self.sims
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.is_completed() && s.enabled_transitions().is_empty())
            .map(|(i, _)| self.roles[i].clone())
            .collect()
    }

    // --- stepping --------------------------------------------------------

    /// Execute one global step
    ///
    /// `role` must be supplied under the manual strategy and is ignored
    /// otherwise.
    pub fn step(&mut self, role: Option<&str>) -> CoordResult<GlobalStepOutcome> {
        if self.global_steps >= self.config.max_steps {
            self.reached_max_steps = true;
            return Err(CoordinatorError::MaxSteps {
                max_steps: self.config.max_steps,
            });
        }

        let enabled: Vec<usize> = self
            .sims
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.is_completed() && !s.enabled_transitions().is_empty())
            .map(|(i, _)| i)
            .collect();

        if enabled.is_empty() {
            if self.sims.iter().all(CfsmSimulator::is_completed) {
                return Ok(GlobalStepOutcome::Completed);
            }
            self.deadlocked = true;
            let blocked_roles: Vec<RoleName> = self
                .sims
                .iter()
                .enumerate()
                .filter(|(_, s)| !s.is_completed())
                .map(|(i, _)| self.roles[i].clone())
                .collect();
            return Err(CoordinatorError::Deadlock { blocked_roles });
        }

        let idx = self.select_role(&enabled, role)?;
        self.step_role(idx)
    }

    /// Step one specific role by index and route its output
    fn step_role(&mut self, idx: usize) -> CoordResult<GlobalStepOutcome> {
        let role = self.roles[idx].clone();
        let event = self.sims[idx].step().map_err(|source| {
            CoordinatorError::NoProgress {
                role: role.clone(),
                source,
            }
        })?;

        let outgoing = self.sims[idx].outgoing_messages();
        self.deliver(outgoing)?;

        self.global_steps += 1;
        self.schedule_counts[idx] += 1;
        self.last_scheduled = Some(idx);
        tracing::trace!(role = %role, step = self.global_steps, "scheduled");
        Ok(GlobalStepOutcome::Progressed { role, event })
    }

    fn select_role(&mut self, enabled: &[usize], requested: Option<&str>) -> CoordResult<usize> {
        match self.config.scheduling_strategy {
            SchedulingStrategy::RoundRobin => {
                let n = self.sims.len();
                let start = self.last_scheduled.map(|i| (i + 1) % n).unwrap_or(0);
                Ok((0..n)
                    .map(|offset| (start + offset) % n)
                    .find(|i| enabled.contains(i))
                    .expect("enabled set is non-empty"))
            }
            SchedulingStrategy::Fair => {
                let min = enabled
                    .iter()
                    .map(|&i| self.schedule_counts[i])
                    .min()
                    .expect("enabled set is non-empty");
                Ok(*enabled
                    .iter()
                    .find(|&&i| self.schedule_counts[i] == min)
                    .expect("minimum exists"))
            }
            SchedulingStrategy::Random { .. } => {
                let rng = self.scheduling_rng.as_mut().expect("seeded at construction");
                Ok(enabled[rng.gen_range(0..enabled.len())])
            }
            SchedulingStrategy::Manual => {
                let Some(name) = requested else {
                    return Err(CoordinatorError::RoleRequired);
                };
                self.roles
                    .iter()
                    .position(|r| r == name)
                    .ok_or_else(|| CoordinatorError::UnknownRole {
                        role: name.to_string(),
                    })
            }
        }
    }

    fn deliver(&mut self, messages: Vec<crate::message::Message>) -> CoordResult<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let ordered = match self.config.delivery_model {
            DeliveryModel::Fifo => messages,
            DeliveryModel::Unordered { .. } => {
                // Group per recipient (preserving per-channel order), then
                // shuffle the interleaving across recipients.
                let mut groups: Vec<(String, Vec<crate::message::Message>)> = Vec::new();
                for m in messages {
                    match groups.iter_mut().find(|(to, _)| *to == m.to) {
                        Some((_, queue)) => queue.push(m),
                        None => groups.push((m.to.clone(), vec![m])),
                    }
                }
                let rng = self.delivery_rng.as_mut().expect("seeded at construction");
                for i in (1..groups.len()).rev() {
                    let j = rng.gen_range(0..=i);
                    groups.swap(i, j);
                }
                groups.into_iter().flat_map(|(_, queue)| queue).collect()
            }
        };

        for message in ordered {
            let Some(target) = self.roles.iter().position(|r| *r == message.to) else {
                return Err(CoordinatorError::InvalidMessage {
                    reason: format!("no role '{}' to deliver '{}' to", message.to, message.label),
                });
            };
            let sender = message.from.clone();
            self.sims[target].deliver_message(message).map_err(|err| {
                match err {
                    CfsmError::BufferOverflow { role, sender: s, .. } => {
                        CoordinatorError::BufferOverflow { role, sender: s }
                    }
                    other => CoordinatorError::InvalidMessage {
                        reason: format!("delivery from '{}' failed: {}", sender, other),
                    },
                }
            })?;
        }
        Ok(())
    }

    /// Run global steps until completion, deadlock, or budget exhaustion
    pub fn run(&mut self) -> DistributedRunResult {
        let outcome = loop {
            match self.step(None) {
                Ok(GlobalStepOutcome::Progressed { .. }) => continue,
                Ok(GlobalStepOutcome::Completed) => break DistributedRunOutcome::Completed,
                Err(CoordinatorError::Deadlock { blocked_roles }) => {
                    break DistributedRunOutcome::Deadlock { blocked_roles }
                }
                Err(CoordinatorError::MaxSteps { .. }) => break DistributedRunOutcome::MaxSteps,
                Err(err) => {
                    break DistributedRunOutcome::Failed {
                        kind: err.kind().to_string(),
                        message: err.to_string(),
                    }
                }
            }
        };

        let mut traces = BTreeMap::new();
        let mut schedule_counts = BTreeMap::new();
        for (i, sim) in self.sims.iter().enumerate() {
            let mut trace = sim.trace().clone();
            if !sim.is_completed() {
                trace.close(false, sim.step_count());
            }
            traces.insert(self.roles[i].clone(), trace);
            schedule_counts.insert(self.roles[i].clone(), self.schedule_counts[i]);
        }

        DistributedRunResult {
            outcome,
            global_steps: self.global_steps,
            traces,
            schedule_counts,
        }
    }

    /// Reset every role simulator and the global counters
    pub fn reset(&mut self) {
        for sim in &mut self.sims {
            sim.reset();
        }
        self.global_steps = 0;
        self.schedule_counts = vec![0; self.sims.len()];
        self.deadlocked = false;
        self.reached_max_steps = false;
        self.last_scheduled = None;
        if let SchedulingStrategy::Random { seed } = self.config.scheduling_strategy {
            self.scheduling_rng = Some(StdRng::seed_from_u64(seed));
        }
        if let DeliveryModel::Unordered { seed } = self.config.delivery_model {
            self.delivery_rng = Some(StdRng::seed_from_u64(seed));
        }
    }

    /// Depth-first exploration of every scheduling interleaving
    ///
    /// Each node of the search tree clones the coordinator and tries every
    /// enabled role. The walk stops expanding once `path_limit` complete
    /// interleavings were counted or a branch exceeds the step budget; the
    /// summary then reports itself as truncated.
    pub fn explore_all_interleavings(&self, path_limit: usize) -> InterleavingSummary {
        let mut summary = InterleavingSummary::default();
        let mut stack: Vec<DistributedSimulator> = vec![self.clone()];

        while let Some(state) = stack.pop() {
            if summary.explored >= path_limit {
                summary.truncated = true;
                break;
            }
            let enabled: Vec<usize> = state
                .sims
                .iter()
                .enumerate()
                .filter(|(_, s)| !s.is_completed() && !s.enabled_transitions().is_empty())
                .map(|(i, _)| i)
                .collect();

            if enabled.is_empty() {
                summary.explored += 1;
                if state.sims.iter().all(CfsmSimulator::is_completed) {
                    summary.completed += 1;
                } else {
                    summary.deadlocked += 1;
                }
                continue;
            }
            if state.global_steps >= state.config.max_steps {
                summary.explored += 1;
                summary.truncated = true;
                continue;
            }

            for idx in enabled {
                let mut next = state.clone();
                if next.step_role(idx).is_ok() {
                    stack.push(next);
                } else {
                    summary.explored += 1;
                    summary.truncated = true;
                }
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfsm::LocalAction;
    use crate::trace::TraceEvent;

    /// A -> B: Hello
    fn sender_receiver() -> Vec<Cfsm> {
        let mut a = Cfsm::new("A", "s0");
        a.add_transition("s0", "s1", LocalAction::send("B", "Hello"));
        a.mark_terminal("s1");

        let mut b = Cfsm::new("B", "s0");
        b.add_transition("s0", "s1", LocalAction::receive("A", "Hello"));
        b.mark_terminal("s1");

        vec![a, b]
    }

    #[test]
    fn test_simple_exchange_completes() {
        let mut sim = DistributedSimulator::new(sender_receiver(), Default::default());
        let result = sim.run();
        assert_eq!(result.outcome, DistributedRunOutcome::Completed);
        assert_eq!(result.global_steps, 2);

        let a_trace = &result.traces["A"];
        assert!(matches!(a_trace.entries[0].event, TraceEvent::Send { .. }));
        let b_trace = &result.traces["B"];
        assert!(matches!(b_trace.entries[0].event, TraceEvent::Receive { .. }));
    }

    #[test]
    fn test_mutual_wait_deadlocks() {
        let mut a = Cfsm::new("A", "s0");
        a.add_transition("s0", "s1", LocalAction::receive("B", "X"));
        a.mark_terminal("s1");
        let mut b = Cfsm::new("B", "s0");
        b.add_transition("s0", "s1", LocalAction::receive("A", "Y"));
        b.mark_terminal("s1");

        let mut sim = DistributedSimulator::new(vec![a, b], Default::default());
        let result = sim.run();
        assert_eq!(
            result.outcome,
            DistributedRunOutcome::Deadlock {
                blocked_roles: vec!["A".to_string(), "B".to_string()]
            }
        );
        assert!(sim.is_deadlocked());
        // Traces are returned on failure too, closed as incomplete.
        assert!(!result.traces["A"].completed);
    }

    #[test]
    fn test_max_steps_outcome() {
        // A sends forever, B consumes forever.
        let mut a = Cfsm::new("A", "s0");
        a.add_transition("s0", "s0", LocalAction::send("B", "Tick"));
        let mut b = Cfsm::new("B", "s0");
        b.add_transition("s0", "s0", LocalAction::receive("A", "Tick"));

        let config = DistributedSimulatorConfig {
            max_steps: 10,
            ..Default::default()
        };
        let mut sim = DistributedSimulator::new(vec![a, b], config);
        let result = sim.run();
        assert_eq!(result.outcome, DistributedRunOutcome::MaxSteps);
        assert_eq!(result.global_steps, 10);
        assert!(sim.reached_max_steps());
    }

    #[test]
    fn test_round_robin_is_deterministic() {
        let run = |machines: Vec<Cfsm>| {
            let mut sim = DistributedSimulator::new(machines, Default::default());
            sim.run()
        };
        let r1 = run(sender_receiver());
        let r2 = run(sender_receiver());
        assert_eq!(r1.traces, r2.traces);
        assert_eq!(r1.global_steps, r2.global_steps);
        assert_eq!(r1.schedule_counts, r2.schedule_counts);
    }

    #[test]
    fn test_fair_scheduling_balances_roles() {
        // Both roles send to a sink that consumes everything.
        let mut a = Cfsm::new("A", "s0");
        a.add_transition("s0", "s1", LocalAction::send("Sink", "M"));
        a.add_transition("s1", "s2", LocalAction::send("Sink", "M"));
        a.mark_terminal("s2");
        let mut b = Cfsm::new("B", "s0");
        b.add_transition("s0", "s1", LocalAction::send("Sink", "M"));
        b.add_transition("s1", "s2", LocalAction::send("Sink", "M"));
        b.mark_terminal("s2");
        let mut sink = Cfsm::new("Sink", "s0");
        sink.add_transition("s0", "s0", LocalAction::receive("A", "M"));
        sink.add_transition("s0", "s0", LocalAction::receive("B", "M"));

        let config = DistributedSimulatorConfig {
            scheduling_strategy: SchedulingStrategy::Fair,
            max_steps: 4,
            ..Default::default()
        };
        let mut sim = DistributedSimulator::new(vec![a, b, sink], config);
        for _ in 0..4 {
            sim.step(None).unwrap();
        }
        // Fair scheduling never lets one role run twice while another
        // enabled role has run zero times.
        let counts = &sim.schedule_counts;
        assert!(counts.iter().max().unwrap() - counts.iter().min().unwrap() <= 1);
    }

    #[test]
    fn test_manual_strategy_requires_role() {
        let config = DistributedSimulatorConfig {
            scheduling_strategy: SchedulingStrategy::Manual,
            ..Default::default()
        };
        let mut sim = DistributedSimulator::new(sender_receiver(), config);
        assert_eq!(sim.step(None).unwrap_err().kind(), "role-required");
        assert_eq!(
            sim.step(Some("Ghost")).unwrap_err().kind(),
            "unknown-role"
        );
        assert!(matches!(
            sim.step(Some("A")).unwrap(),
            GlobalStepOutcome::Progressed { ref role, .. } if role == "A"
        ));
    }

    #[test]
    fn test_manual_step_of_blocked_role_is_no_progress() {
        let config = DistributedSimulatorConfig {
            scheduling_strategy: SchedulingStrategy::Manual,
            ..Default::default()
        };
        let mut sim = DistributedSimulator::new(sender_receiver(), config);
        // B has nothing to receive yet.
        assert_eq!(sim.step(Some("B")).unwrap_err().kind(), "no-progress");
    }

    #[test]
    fn test_per_channel_fifo_across_run() {
        // A sends three labeled messages; B must receive them in order.
        let mut a = Cfsm::new("A", "s0");
        a.add_transition("s0", "s1", LocalAction::send("B", "One"));
        a.add_transition("s1", "s2", LocalAction::send("B", "Two"));
        a.add_transition("s2", "s3", LocalAction::send("B", "Three"));
        a.mark_terminal("s3");
        let mut b = Cfsm::new("B", "s0");
        b.add_transition("s0", "s1", LocalAction::receive("A", "One"));
        b.add_transition("s1", "s2", LocalAction::receive("A", "Two"));
        b.add_transition("s2", "s3", LocalAction::receive("A", "Three"));
        b.mark_terminal("s3");

        let mut sim = DistributedSimulator::new(vec![a, b], Default::default());
        let result = sim.run();
        assert_eq!(result.outcome, DistributedRunOutcome::Completed);

        let received: Vec<String> = result.traces["B"]
            .entries
            .iter()
            .filter_map(|e| match &e.event {
                TraceEvent::Receive { label, .. } => Some(label.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(received, vec!["One", "Two", "Three"]);
    }

    #[test]
    fn test_unordered_delivery_keeps_channel_order() {
        let config = DistributedSimulatorConfig {
            delivery_model: DeliveryModel::Unordered { seed: 7 },
            ..Default::default()
        };
        // Same protocol as above: per-channel order must survive the shuffle.
        let mut a = Cfsm::new("A", "s0");
        a.add_transition("s0", "s1", LocalAction::send("B", "One"));
        a.add_transition("s1", "s2", LocalAction::send("B", "Two"));
        a.mark_terminal("s2");
        let mut b = Cfsm::new("B", "s0");
        b.add_transition("s0", "s1", LocalAction::receive("A", "One"));
        b.add_transition("s1", "s2", LocalAction::receive("A", "Two"));
        b.mark_terminal("s2");

        let mut sim = DistributedSimulator::new(vec![a, b], config);
        assert_eq!(sim.run().outcome, DistributedRunOutcome::Completed);
    }

    #[test]
    fn test_delivery_to_unknown_role_fails() {
        let mut a = Cfsm::new("A", "s0");
        a.add_transition("s0", "s1", LocalAction::send("Nobody", "M"));
        a.mark_terminal("s1");

        let mut sim = DistributedSimulator::new(vec![a], Default::default());
        let result = sim.run();
        assert!(matches!(
            result.outcome,
            DistributedRunOutcome::Failed { ref kind, .. } if kind == "invalid-message"
        ));
    }

    #[test]
    fn test_buffer_overflow_surfaces() {
        let mut a = Cfsm::new("A", "s0");
        a.add_transition("s0", "s1", LocalAction::send("B", "One"));
        a.add_transition("s1", "s2", LocalAction::send("B", "Two"));
        a.mark_terminal("s2");
        // B never receives.
        let mut b = Cfsm::new("B", "s0");
        b.add_transition("s0", "s1", LocalAction::receive("A", "Never"));
        b.mark_terminal("s1");

        let config = DistributedSimulatorConfig {
            max_buffer_size: 1,
            ..Default::default()
        };
        let mut sim = DistributedSimulator::new(vec![a, b], config);
        let result = sim.run();
        assert!(matches!(
            result.outcome,
            DistributedRunOutcome::Failed { ref kind, .. } if kind == "buffer-overflow"
        ));
    }

    #[test]
    fn test_reset_allows_identical_rerun() {
        let mut sim = DistributedSimulator::new(sender_receiver(), Default::default());
        let r1 = sim.run();
        sim.reset();
        let r2 = sim.run();
        assert_eq!(r1.traces, r2.traces);
        assert_eq!(r1.global_steps, r2.global_steps);
    }

    #[test]
    fn test_explore_interleavings_finds_both_outcomes() {
        // Two independent exchanges: every interleaving completes.
        let mut a = Cfsm::new("A", "s0");
        a.add_transition("s0", "s1", LocalAction::send("B", "X"));
        a.mark_terminal("s1");
        let mut b = Cfsm::new("B", "s0");
        b.add_transition("s0", "s1", LocalAction::receive("A", "X"));
        b.mark_terminal("s1");
        let mut c = Cfsm::new("C", "s0");
        c.add_transition("s0", "s1", LocalAction::send("D", "Y"));
        c.mark_terminal("s1");
        let mut d = Cfsm::new("D", "s0");
        d.add_transition("s0", "s1", LocalAction::receive("C", "Y"));
        d.mark_terminal("s1");

        let sim = DistributedSimulator::new(vec![a, b, c, d], Default::default());
        let summary = sim.explore_all_interleavings(1000);
        assert!(summary.explored > 1);
        assert_eq!(summary.deadlocked, 0);
        assert_eq!(summary.completed, summary.explored);
        assert!(!summary.truncated);
    }
}
