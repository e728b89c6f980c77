//! Error types shared by the builder, verifiers, and simulators
//!
//! Every subsystem has its own error enum, all implemented with `thiserror`:
//!
//! ```text
//! BuildError        - CFG construction (builder contract violations)
//! SimulatorError    - orchestrated CFG simulator runtime
//! CfsmError         - per-role CFSM simulator runtime
//! CoordinatorError  - distributed coordinator
//! StackError        - call-stack manager
//! RegistryError     - protocol registry resolution
//! ProjectionError   - CFG-to-CFSM projection
//! ```
//!
//! Each variant exposes a stable kebab-case discriminator through `kind()`.
//! The discriminators are part of the public contract: tooling that matches
//! on them (trace consumers, report renderers) can rely on the exact strings
//! across releases.
//!
//! # Propagation policy
//!
//! - Verifier findings are *collected* into the report, never raised as
//!   errors; see [`crate::verifier`].
//! - Simulator step errors are returned in the step result and additionally
//!   broadcast as `error` events on the simulator's bus.
//! - Structural impossibilities (a node id that is not present in the CFG)
//!   are fatal for the step and surface as `invalid-node`.
//! - Panics inside event subscribers are caught, logged, and swallowed; see
//!   [`crate::event`].

use thiserror::Error;

use choreo_history::HistoryError;

/// Convenience result type for CFG construction
pub type BuildResult<T> = std::result::Result<T, BuildError>;

/// Convenience result type for the orchestrated simulator
pub type SimResult<T> = std::result::Result<T, SimulatorError>;

/// Convenience result type for the CFSM simulator
pub type CfsmResult<T> = std::result::Result<T, CfsmError>;

/// Convenience result type for the distributed coordinator
pub type CoordResult<T> = std::result::Result<T, CoordinatorError>;

/// Errors raised while constructing a CFG from a protocol declaration
///
/// The builder establishes the structural invariants every downstream
/// component relies on; these errors are the only ways it can refuse.
///
/// # Examples
///
/// ```rust
/// use choreo_core::error::BuildError;
///
/// let err = BuildError::undefined_recursion_label("Loop");
/// assert_eq!(err.kind(), "undefined-recursion-label");
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// A `continue` references a recursion label with no enclosing `rec`
    #[error("continue references undefined recursion label '{label}'")]
    UndefinedRecursionLabel {
        /// The unresolved label
        label: String,
    },

    /// A fork or join has no partner with the same parallel id
    #[error("unmatched fork/join for parallel id '{parallel_id}'")]
    UnmatchedForkJoin {
        /// The parallel id missing its partner
        parallel_id: String,
    },

    /// An edge violates the structural rules of the CFG
    ///
    /// Covers dangling endpoints and edge-type constraints (for example a
    /// non-`branch` edge leaving a branch node).
    #[error("malformed edge from '{from}' to '{to}': {reason}")]
    MalformedEdge {
        /// Source node id
        from: String,
        /// Target node id
        to: String,
        /// What rule the edge breaks
        reason: String,
    },
}

impl BuildError {
    /// Create an [`BuildError::UndefinedRecursionLabel`]
    pub fn undefined_recursion_label(label: impl Into<String>) -> Self {
        Self::UndefinedRecursionLabel { label: label.into() }
    }

    /// Create an [`BuildError::UnmatchedForkJoin`]
    pub fn unmatched_fork_join(parallel_id: impl Into<String>) -> Self {
        Self::UnmatchedForkJoin {
            parallel_id: parallel_id.into(),
        }
    }

    /// Create a [`BuildError::MalformedEdge`]
    pub fn malformed_edge(
        from: impl Into<String>,
        to: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::MalformedEdge {
            from: from.into(),
            to: to.into(),
            reason: reason.into(),
        }
    }

    /// Stable kebab-case discriminator for this error
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UndefinedRecursionLabel { .. } => "undefined-recursion-label",
            Self::UnmatchedForkJoin { .. } => "unmatched-fork-join",
            Self::MalformedEdge { .. } => "malformed-edge",
        }
    }
}

/// Runtime errors from the orchestrated CFG simulator
///
/// A step either produces exactly one event or exactly one of these errors,
/// never both. Errors are also broadcast on the simulator's event bus so
/// subscribers observe the failure without inspecting the step result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimulatorError {
    /// The simulator is halted at a choice point awaiting a decision
    #[error("simulator is waiting for a choice at node '{node}'")]
    ChoiceRequired {
        /// The branch node awaiting a decision
        node: String,
    },

    /// A choice index was supplied that does not name a branch
    #[error("invalid choice: {reason}")]
    InvalidChoice {
        /// The offending index, if one was given
        index: Option<usize>,
        /// Why the choice was rejected
        reason: String,
    },

    /// `step` was called after the protocol completed
    #[error("protocol already completed")]
    AlreadyCompleted,

    /// The configured step budget was exhausted
    #[error("maximum step count of {max_steps} reached")]
    MaxStepsReached {
        /// The configured budget
        max_steps: u64,
    },

    /// A node id was not present in the active CFG
    ///
    /// This indicates a malformed CFG that escaped the builder; the
    /// simulator never repairs such graphs.
    #[error("node '{node}' is not present in the CFG")]
    InvalidNode {
        /// The missing node id
        node: String,
    },

    /// A node that requires an outgoing edge has none
    #[error("no outgoing transition from node '{node}'")]
    NoTransition {
        /// The stuck node id
        node: String,
    },

    /// A `continue` edge targeted a label with no active recursion
    #[error("no active recursion frame for label '{label}'")]
    RecursionNotFound {
        /// The unresolved label
        label: String,
    },

    /// The parallel bookkeeping became inconsistent
    #[error("parallel execution error: {reason}")]
    ParallelError {
        /// What went wrong
        reason: String,
    },

    /// A `do` action was reached but no protocol registry was supplied
    #[error("sub-protocol '{protocol}' invoked but no registry is configured")]
    SubprotocolMissingRegistry {
        /// The invoked protocol
        protocol: String,
    },

    /// The per-step traversal budget was exceeded
    ///
    /// A guard against pathological CFGs; a well-formed graph never trips it.
    #[error("internal traversal budget exceeded at node '{node}'")]
    TraversalBudgetExceeded {
        /// Where traversal was abandoned
        node: String,
    },

    /// Failure delegated to the call-stack manager
    #[error(transparent)]
    Stack(#[from] StackError),

    /// Failure delegated to the protocol registry
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Failure delegated to the history store
    #[error(transparent)]
    History(#[from] HistoryError),
}

impl SimulatorError {
    /// Stable kebab-case discriminator for this error
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChoiceRequired { .. } => "choice-required",
            Self::InvalidChoice { .. } => "invalid-choice",
            Self::AlreadyCompleted => "already-completed",
            Self::MaxStepsReached { .. } => "max-steps-reached",
            Self::InvalidNode { .. } => "invalid-node",
            Self::NoTransition { .. } => "no-transition",
            Self::RecursionNotFound { .. } => "recursion-not-found",
            Self::ParallelError { .. } => "parallel-error",
            Self::SubprotocolMissingRegistry { .. } => "subprotocol-missing-registry",
            Self::TraversalBudgetExceeded { .. } => "traversal-budget-exceeded",
            Self::Stack(e) => e.kind(),
            Self::Registry(e) => e.kind(),
            Self::History(e) => e.kind(),
        }
    }

    /// Create an [`SimulatorError::InvalidNode`]
    pub fn invalid_node(node: impl Into<String>) -> Self {
        Self::InvalidNode { node: node.into() }
    }

    /// Create an [`SimulatorError::InvalidChoice`]
    pub fn invalid_choice(index: Option<usize>, reason: impl Into<String>) -> Self {
        Self::InvalidChoice {
            index,
            reason: reason.into(),
        }
    }
}

/// Runtime errors from the per-role CFSM simulator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CfsmError {
    /// No transition is enabled in the current state
    ///
    /// For a state whose only transitions are receives, this means every
    /// per-sender queue head fails to match.
    #[error("role '{role}' has no enabled transition in state '{state}'")]
    NoEnabledTransitions {
        /// The blocked role
        role: String,
        /// The state it is blocked in
        state: String,
    },

    /// Delivery would exceed the configured buffer capacity
    ///
    /// The buffer is left untouched when this is returned.
    #[error("buffer for sender '{sender}' at role '{role}' is full (capacity {capacity})")]
    BufferOverflow {
        /// The receiving role
        role: String,
        /// The sender whose queue is full
        sender: String,
        /// The configured capacity
        capacity: usize,
    },

    /// The configured step budget was exhausted
    #[error("maximum step count of {max_steps} reached")]
    MaxSteps {
        /// The configured budget
        max_steps: u64,
    },

    /// `step` was called on a completed machine
    #[error("machine for role '{role}' already reached a terminal state")]
    InvalidState {
        /// The completed role
        role: String,
    },

    /// Manual strategy requires a transition selection before stepping
    #[error("manual strategy: select a transition before stepping")]
    TransitionRequired,

    /// A receive would dequeue past an unmatched queue head
    ///
    /// Only raised when `verify_fifo` is enabled.
    #[error("receive of '{label}' from '{sender}' would skip queue head '{head_label}'")]
    FifoViolation {
        /// The sender whose queue would be reordered
        sender: String,
        /// The label the receive wanted
        label: String,
        /// The label actually at the head
        head_label: String,
    },

    /// A message was handed to a machine that is not its recipient
    #[error("message addressed to '{to}' delivered to role '{role}'")]
    InvalidMessage {
        /// The machine that received the delivery call
        role: String,
        /// The message's addressee
        to: String,
    },

    /// A `call` transition was reached but no CFSM registry is configured
    #[error("sub-protocol '{protocol}' invoked but no machine registry is configured")]
    SubprotocolMissingRegistry {
        /// The invoked protocol
        protocol: String,
    },

    /// Failure delegated to the call-stack manager
    #[error(transparent)]
    Stack(#[from] StackError),

    /// Failure delegated to the CFSM registry
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Failure delegated to the history store
    #[error(transparent)]
    History(#[from] HistoryError),
}

impl CfsmError {
    /// Stable kebab-case discriminator for this error
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoEnabledTransitions { .. } => "no-enabled-transitions",
            Self::BufferOverflow { .. } => "buffer-overflow",
            Self::MaxSteps { .. } => "max-steps",
            Self::InvalidState { .. } => "invalid-state",
            Self::TransitionRequired => "transition-required",
            Self::FifoViolation { .. } => "fifo-violation",
            Self::InvalidMessage { .. } => "invalid-message",
            Self::SubprotocolMissingRegistry { .. } => "subprotocol-missing-registry",
            Self::Stack(e) => e.kind(),
            Self::Registry(e) => e.kind(),
            Self::History(e) => e.kind(),
        }
    }
}

/// Errors from the distributed coordinator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    /// No role can make progress and not all roles have completed
    #[error("deadlock: roles {blocked_roles:?} are blocked")]
    Deadlock {
        /// Roles that are neither completed nor enabled
        blocked_roles: Vec<String>,
    },

    /// A delivery overflowed a role's buffer
    #[error("buffer overflow delivering to role '{role}' from '{sender}'")]
    BufferOverflow {
        /// The receiving role
        role: String,
        /// The sender whose queue overflowed
        sender: String,
    },

    /// The global step budget was exhausted
    #[error("maximum global step count of {max_steps} reached")]
    MaxSteps {
        /// The configured budget
        max_steps: u64,
    },

    /// A scheduled role failed to step
    #[error("role '{role}' could not make progress: {source}")]
    NoProgress {
        /// The role whose step failed
        role: String,
        /// The underlying machine error
        source: CfsmError,
    },

    /// A message could not be routed or has an unsupported shape
    ///
    /// Also raised for multicast messages: the distributed layer has no
    /// delivery contract for set-valued recipients and rejects them.
    #[error("invalid message: {reason}")]
    InvalidMessage {
        /// Why routing failed
        reason: String,
    },

    /// Manual scheduling requires the caller to name a role
    #[error("manual scheduling: a role must be supplied to step")]
    RoleRequired,

    /// A named role is not part of this simulation
    #[error("unknown role '{role}'")]
    UnknownRole {
        /// The unresolved role name
        role: String,
    },
}

impl CoordinatorError {
    /// Stable kebab-case discriminator for this error
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Deadlock { .. } => "deadlock",
            Self::BufferOverflow { .. } => "buffer-overflow",
            Self::MaxSteps { .. } => "max-steps",
            Self::NoProgress { .. } => "no-progress",
            Self::InvalidMessage { .. } => "invalid-message",
            Self::RoleRequired => "role-required",
            Self::UnknownRole { .. } => "unknown-role",
        }
    }
}

/// Errors from the call-stack manager
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StackError {
    /// Pushing would exceed the configured maximum depth
    #[error("call stack overflow: depth limit of {max_depth} reached")]
    StackOverflow {
        /// The configured depth limit
        max_depth: usize,
    },

    /// A recursion frame exceeded its iteration budget
    #[error("recursion '{label}' exceeded {max_iterations} iterations")]
    MaxIterationsExceeded {
        /// The recursion label
        label: String,
        /// The configured iteration limit
        max_iterations: u64,
    },

    /// Pop or frame access on an empty stack
    #[error("operation on empty call stack")]
    EmptyStack,
}

impl StackError {
    /// Stable kebab-case discriminator for this error
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StackOverflow { .. } => "stack-overflow",
            Self::MaxIterationsExceeded { .. } => "max-iterations-exceeded",
            Self::EmptyStack => "empty-stack",
        }
    }
}

/// Errors from the protocol and CFSM registries
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A referenced protocol is not registered
    #[error("protocol '{protocol}' not found in registry")]
    ProtocolNotFound {
        /// The unresolved protocol name
        protocol: String,
    },

    /// Role argument count does not match the protocol's formal roles
    #[error(
        "protocol '{protocol}' declares {expected} role(s) but {actual} argument(s) were supplied"
    )]
    InvalidRoleArguments {
        /// The invoked protocol
        protocol: String,
        /// Number of formal roles
        expected: usize,
        /// Number of supplied arguments
        actual: usize,
    },

    /// Sub-protocol invocations form a cycle
    #[error("circular sub-protocol dependency: {chain}")]
    CircularDependency {
        /// A rendered cycle such as `A -> B -> A`
        chain: String,
    },

    /// No CFSM is registered for a role of a protocol
    #[error("no machine registered for role '{role}' of protocol '{protocol}'")]
    RoleNotFound {
        /// The invoked protocol
        protocol: String,
        /// The missing role
        role: String,
    },
}

impl RegistryError {
    /// Stable kebab-case discriminator for this error
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProtocolNotFound { .. } => "protocol-not-found",
            Self::InvalidRoleArguments { .. } => "invalid-role-arguments",
            Self::CircularDependency { .. } => "circular-dependency",
            Self::RoleNotFound { .. } => "role-not-found",
        }
    }
}

/// Collected failures from the projection of a CFG to per-role machines
///
/// Projection failures are collected per run, not thrown: `project_all`
/// returns the machines it could derive alongside the list of errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProjectionError {
    /// A role participates in more than one branch of the same parallel
    ///
    /// Projection of overlapping parallel branches would require a product
    /// construction; branches must have disjoint role sets.
    #[error("role '{role}' participates in multiple branches of parallel '{parallel_id}'")]
    RoleInMultipleBranches {
        /// The overlapping role
        role: String,
        /// The offending parallel
        parallel_id: String,
    },

    /// A receiving role cannot distinguish two branches of a choice
    #[error("role '{role}' receives the same label '{label}' on distinct branches of '{node}'")]
    AmbiguousReceive {
        /// The receiver that cannot distinguish branches
        role: String,
        /// The shared label
        label: String,
        /// The branch node
        node: String,
    },

    /// The CFG was structurally unusable for projection
    #[error("projection failed for role '{role}': {reason}")]
    Structural {
        /// The role being projected
        role: String,
        /// What made the walk impossible
        reason: String,
    },
}

impl ProjectionError {
    /// Stable kebab-case discriminator for this error
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RoleInMultipleBranches { .. } => "role-in-multiple-branches",
            Self::AmbiguousReceive { .. } => "ambiguous-receive",
            Self::Structural { .. } => "projection-structural",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_error_kinds() {
        assert_eq!(
            BuildError::undefined_recursion_label("L").kind(),
            "undefined-recursion-label"
        );
        assert_eq!(BuildError::unmatched_fork_join("p0").kind(), "unmatched-fork-join");
        assert_eq!(
            BuildError::malformed_edge("a", "b", "dangling").kind(),
            "malformed-edge"
        );
    }

    #[test]
    fn test_simulator_error_kinds() {
        assert_eq!(SimulatorError::AlreadyCompleted.kind(), "already-completed");
        assert_eq!(
            SimulatorError::MaxStepsReached { max_steps: 10 }.kind(),
            "max-steps-reached"
        );
        assert_eq!(SimulatorError::invalid_node("x").kind(), "invalid-node");
        assert_eq!(
            SimulatorError::invalid_choice(Some(3), "out of range").kind(),
            "invalid-choice"
        );
    }

    #[test]
    fn test_wrapped_errors_surface_inner_kind() {
        let err: SimulatorError = StackError::EmptyStack.into();
        assert_eq!(err.kind(), "empty-stack");

        let err: CfsmError = RegistryError::ProtocolNotFound {
            protocol: "Auth".to_string(),
        }
        .into();
        assert_eq!(err.kind(), "protocol-not-found");
    }

    #[test]
    fn test_coordinator_deadlock_lists_blocked_roles() {
        let err = CoordinatorError::Deadlock {
            blocked_roles: vec!["A".to_string(), "B".to_string()],
        };
        assert_eq!(err.kind(), "deadlock");
        assert!(err.to_string().contains("A"));
        assert!(err.to_string().contains("B"));
    }

    #[test]
    fn test_registry_arity_message() {
        let err = RegistryError::InvalidRoleArguments {
            protocol: "Transfer".to_string(),
            expected: 2,
            actual: 3,
        };
        assert_eq!(err.kind(), "invalid-role-arguments");
        assert!(err.to_string().contains("declares 2 role(s)"));
    }
}
