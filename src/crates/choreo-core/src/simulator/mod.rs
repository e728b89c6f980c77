//! Operational simulators
//!
//! Two complementary executions of a protocol:
//!
//! - [`orchestrated`] interprets the global CFG directly: one central
//!   interpreter walks the graph and emits protocol events;
//! - [`cfsm`] executes one role's machine with asynchronous semantics and
//!   per-sender FIFO input buffers;
//! - [`coordinator`] schedules a set of role machines, routes their
//!   messages, and detects termination and deadlock.
//!
//! All simulators are synchronous and single-threaded; "concurrency" is the
//! coordinator's deterministic interleaving of role-local atomic steps.

pub mod cfsm;
pub mod coordinator;
pub mod orchestrated;

pub use cfsm::{
    CfsmEvent, CfsmEventKind, CfsmSimState, CfsmSimulator, CfsmSimulatorConfig,
    EnabledTransition, TransitionStrategy,
};
pub use coordinator::{
    DeliveryModel, DistributedRunOutcome, DistributedRunResult, DistributedSimulator,
    DistributedSimulatorConfig, GlobalStepOutcome, InterleavingSummary, SchedulingStrategy,
};
pub use orchestrated::{
    BranchState, CfgSimState, CfgSimulator, CfgSimulatorConfig, ChoiceState, ChoiceStrategy,
    ParallelState, PendingChoice, RunResult, SimulatorEvent, SimulatorEventKind,
};
