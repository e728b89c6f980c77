//! Communicating finite-state machines
//!
//! A [`Cfsm`] is one role's local view of a global protocol: a finite set of
//! states, transitions labeled with [`LocalAction`]s, a distinguished initial
//! state, and a set of terminal states. Machines are produced by projection
//! ([`crate::projection`]) or constructed by hand for tests and ad-hoc
//! simulations.
//!
//! # Examples
//!
//! ```rust
//! use choreo_core::cfsm::{Cfsm, LocalAction};
//!
//! // A client that sends one request and waits for the response.
//! let mut client = Cfsm::new("Client", "s0");
//! client.add_state("s1");
//! client.add_state("s2");
//! client.add_transition("s0", "s1", LocalAction::send("Server", "Request"));
//! client.add_transition("s1", "s2", LocalAction::receive("Server", "Response"));
//! client.mark_terminal("s2");
//!
//! assert!(client.validate().is_ok());
//! assert_eq!(client.transitions_from("s0").len(), 1);
//! ```

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::cfg::{Label, ProtocolName, RoleName};

/// State identifier, unique within one machine
pub type StateId = String;

/// Action labeling one CFSM transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LocalAction {
    /// Emit a message toward another role (always enabled; buffered)
    Send {
        /// Receiving role
        to: RoleName,
        /// Message label
        label: Label,
        /// Optional payload type tag
        payload_type: Option<String>,
    },

    /// Consume a message from the head of a per-sender queue
    Receive {
        /// Sending role
        from: RoleName,
        /// Message label
        label: Label,
        /// Optional payload type tag
        payload_type: Option<String>,
    },

    /// Internal step, always enabled
    Tau,

    /// Marks the local side of a choice this role decides
    ChoiceMarker,

    /// Sub-protocol invocation resolved through the CFSM registry
    Call {
        /// The invoked protocol
        protocol: ProtocolName,
        /// Actual roles bound to the protocol's formal roles, in order
        role_arguments: Vec<RoleName>,
    },
}

impl LocalAction {
    /// Send constructor
    pub fn send(to: impl Into<RoleName>, label: impl Into<Label>) -> Self {
        Self::Send {
            to: to.into(),
            label: label.into(),
            payload_type: None,
        }
    }

    /// Receive constructor
    pub fn receive(from: impl Into<RoleName>, label: impl Into<Label>) -> Self {
        Self::Receive {
            from: from.into(),
            label: label.into(),
            payload_type: None,
        }
    }

    /// Short human-readable rendering
    pub fn describe(&self) -> String {
        match self {
            Self::Send { to, label, .. } => format!("!{}@{}", label, to),
            Self::Receive { from, label, .. } => format!("?{}@{}", label, from),
            Self::Tau => "tau".to_string(),
            Self::ChoiceMarker => "choice".to_string(),
            Self::Call { protocol, .. } => format!("call {}", protocol),
        }
    }
}

/// One transition of a machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    /// Source state
    pub from: StateId,
    /// Target state
    pub to: StateId,
    /// The labeling action
    pub action: LocalAction,
}

/// A communicating finite-state machine for one role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cfsm {
    /// The role this machine belongs to
    pub role: RoleName,
    /// States in insertion order
    pub states: Vec<StateId>,
    /// Transitions in insertion order
    pub transitions: Vec<Transition>,
    /// Where execution starts
    pub initial_state: StateId,
    /// States in which the machine has completed
    pub terminal_states: BTreeSet<StateId>,
}

impl Cfsm {
    /// Create a machine with its initial state already present
    pub fn new(role: impl Into<RoleName>, initial_state: impl Into<StateId>) -> Self {
        let initial_state = initial_state.into();
        Self {
            role: role.into(),
            states: vec![initial_state.clone()],
            transitions: Vec::new(),
            initial_state,
            terminal_states: BTreeSet::new(),
        }
    }

    /// Add a state; duplicate ids are ignored
    pub fn add_state(&mut self, id: impl Into<StateId>) {
        let id = id.into();
        if !self.states.contains(&id) {
            self.states.push(id);
        }
    }

    /// Add a transition, creating missing endpoint states
    pub fn add_transition(
        &mut self,
        from: impl Into<StateId>,
        to: impl Into<StateId>,
        action: LocalAction,
    ) {
        let from = from.into();
        let to = to.into();
        self.add_state(from.clone());
        self.add_state(to.clone());
        self.transitions.push(Transition { from, to, action });
    }

    /// Mark a state terminal, creating it if missing
    pub fn mark_terminal(&mut self, id: impl Into<StateId>) {
        let id = id.into();
        self.add_state(id.clone());
        self.terminal_states.insert(id);
    }

    /// Transitions leaving `state`, in insertion order
    pub fn transitions_from(&self, state: &str) -> Vec<&Transition> {
        self.transitions.iter().filter(|t| t.from == state).collect()
    }

    /// Whether `state` is terminal
    pub fn is_terminal(&self, state: &str) -> bool {
        self.terminal_states.contains(state)
    }

    /// Structural sanity: endpoints exist and the initial state is present
    pub fn validate(&self) -> Result<(), String> {
        if !self.states.contains(&self.initial_state) {
            return Err(format!("initial state '{}' does not exist", self.initial_state));
        }
        for t in &self.transitions {
            if !self.states.contains(&t.from) {
                return Err(format!("transition source '{}' does not exist", t.from));
            }
            if !self.states.contains(&t.to) {
                return Err(format!("transition target '{}' does not exist", t.to));
            }
        }
        for s in &self.terminal_states {
            if !self.states.contains(s) {
                return Err(format!("terminal state '{}' does not exist", s));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_construction() {
        let mut m = Cfsm::new("A", "s0");
        m.add_transition("s0", "s1", LocalAction::send("B", "Hello"));
        m.mark_terminal("s1");

        assert_eq!(m.states, vec!["s0", "s1"]);
        assert!(m.is_terminal("s1"));
        assert!(m.validate().is_ok());
    }

    #[test]
    fn test_transitions_from_preserves_order() {
        let mut m = Cfsm::new("A", "s0");
        m.add_transition("s0", "s1", LocalAction::send("B", "X"));
        m.add_transition("s0", "s2", LocalAction::send("B", "Y"));
        let ts = m.transitions_from("s0");
        assert_eq!(ts.len(), 2);
        assert_eq!(ts[0].to, "s1");
        assert_eq!(ts[1].to, "s2");
    }

    #[test]
    fn test_validate_rejects_missing_initial() {
        let mut m = Cfsm::new("A", "s0");
        m.initial_state = "ghost".to_string();
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_action_descriptions() {
        assert_eq!(LocalAction::send("B", "M").describe(), "!M@B");
        assert_eq!(LocalAction::receive("B", "M").describe(), "?M@B");
        assert_eq!(LocalAction::Tau.describe(), "tau");
    }
}
