//! # choreo-core - Multiparty Session Protocol Workbench
//!
//! Build a control-flow graph from a global choreography, verify its
//! well-formedness statically, and execute it two ways: orchestrated (one
//! interpreter over the global graph) and distributed (one communicating
//! finite-state machine per role over FIFO channels).
//!
//! ## Pipeline
//!
//! ```text
//!   ProtocolDecl (AST)
//!        │ build_cfg
//!        ▼
//!       Cfg ──────────► Verifier ──► VerificationReport
//!        │
//!        ├─────────────► CfgSimulator ──► trace + events
//!        │
//!        │ project_all
//!        ▼
//!   {Role → Cfsm} ────► DistributedSimulator ──► {Role → trace}
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use choreo_core::ast::{GlobalInteraction, ProtocolDecl};
//! use choreo_core::builder::build_cfg;
//! use choreo_core::simulator::{CfgSimulator, CfgSimulatorConfig, ChoiceStrategy};
//! use choreo_core::verifier;
//!
//! // Client -> Server: Request; Server -> Client: Response
//! let decl = ProtocolDecl::new(
//!     "RequestResponse",
//!     ["Client", "Server"],
//!     GlobalInteraction::message(
//!         "Client",
//!         "Server",
//!         "Request",
//!         GlobalInteraction::message("Server", "Client", "Response", GlobalInteraction::end()),
//!     ),
//! );
//!
//! // 1. Build the control-flow graph.
//! let cfg = Arc::new(build_cfg(&decl).unwrap());
//!
//! // 2. Verify it.
//! let report = verifier::verify(&cfg);
//! assert!(report.is_valid());
//!
//! // 3. Simulate the global protocol.
//! let config = CfgSimulatorConfig {
//!     choice_strategy: ChoiceStrategy::First,
//!     ..CfgSimulatorConfig::default()
//! };
//! let mut sim = CfgSimulator::new(cfg, config).unwrap();
//! let result = sim.run();
//! assert!(result.completed);
//! ```
//!
//! ## Distributed Execution
//!
//! ```rust
//! use choreo_core::ast::{GlobalInteraction, ProtocolDecl};
//! use choreo_core::builder::build_cfg;
//! use choreo_core::simulator::{
//!     DistributedRunOutcome, DistributedSimulator, DistributedSimulatorConfig,
//! };
//!
//! let decl = ProtocolDecl::new(
//!     "Ping",
//!     ["A", "B"],
//!     GlobalInteraction::message("A", "B", "Ping", GlobalInteraction::end()),
//! );
//! let cfg = build_cfg(&decl).unwrap();
//!
//! let mut sim =
//!     DistributedSimulator::from_projection(&cfg, DistributedSimulatorConfig::default()).unwrap();
//! let result = sim.run();
//! assert_eq!(result.outcome, DistributedRunOutcome::Completed);
//! ```
//!
//! ## Module Organization
//!
//! ### The pipeline
//! - [`ast`] - protocol declaration input shape
//! - [`builder`] - [`build_cfg`](builder::build_cfg), AST to CFG lowering
//! - [`cfg`] - the CFG model and its structural invariants
//! - [`verifier`] - the static check catalogue and report
//! - [`projection`] - [`project_all`](projection::project_all), CFG to machines
//! - [`cfsm`] - the per-role machine model
//! - [`simulator`] - orchestrated, per-role, and distributed execution
//!
//! ### Supporting pieces
//! - [`callstack`] - shared recursion / sub-protocol call stack
//! - [`registry`] - protocol and machine registries, role substitution
//! - [`message`] - runtime messages and per-sender FIFO buffers
//! - [`event`] - typed per-simulator event bus
//! - [`trace`] - execution traces
//! - [`error`] - the error taxonomy with stable discriminators
//!
//! Execution snapshots and reverse stepping live in the `choreo-history`
//! crate; both simulators use it when execution history is enabled.
//!
//! ## Design Notes
//!
//! - **Synchronous core** - no simulator spawns threads or awaits; the
//!   distributed flavor is cooperative interleaving of role-local atomic
//!   steps under a deterministic scheduler.
//! - **Arena graphs** - nodes are stored by stable string ids and edges
//!   carry ids, never references, so `continue` back-edges are plain data.
//! - **Explicit randomness** - every random strategy takes a seed; two runs
//!   with the same configuration produce identical traces.
//! - **Collected findings** - the verifier never throws; simulator step
//!   errors are returned and broadcast as `error` events.

pub mod ast;
pub mod builder;
pub mod callstack;
pub mod cfg;
pub mod cfsm;
pub mod error;
pub mod event;
pub mod message;
pub mod projection;
pub mod registry;
pub mod simulator;
pub mod trace;
pub mod verifier;

// Re-export main types
pub use ast::{ChoiceBranch, Declaration, GlobalInteraction, Module, ProtocolDecl};
pub use builder::build_cfg;
pub use cfg::{Action, Cfg, Edge, EdgeType, Label, Node, NodeId, ProtocolName, Recipients, RoleName};
pub use cfsm::{Cfsm, LocalAction, StateId, Transition};
pub use error::{
    BuildError, CfsmError, CoordinatorError, ProjectionError, RegistryError, SimulatorError,
    StackError,
};
pub use event::{BusEvent, EventBus, SubscriptionId};
pub use message::{Channel, Message, MessageBuffer};
pub use projection::project_all;
pub use registry::{CfsmRegistry, ProtocolRegistry, RoleMapping};
pub use simulator::{
    CfgSimulator, CfgSimulatorConfig, CfsmSimulator, CfsmSimulatorConfig, ChoiceStrategy,
    DeliveryModel, DistributedRunOutcome, DistributedSimulator, DistributedSimulatorConfig,
    SchedulingStrategy, SimulatorEvent, SimulatorEventKind, TransitionStrategy,
};
pub use trace::{ExecutionTrace, TraceEntry, TraceEvent};
pub use verifier::{VerificationOptions, VerificationReport, Verifier};
