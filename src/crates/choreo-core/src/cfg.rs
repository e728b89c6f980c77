//! Control-flow graph model for global protocols
//!
//! The [`Cfg`] is the intermediate representation every other component
//! consumes: the verifier walks it, the orchestrated simulator interprets it,
//! and the projector derives per-role machines from it.
//!
//! # Structure
//!
//! A CFG belongs to one protocol declaration and holds:
//!
//! - the protocol name and its ordered, unique role list,
//! - an insertion-ordered arena of [`Node`]s addressed by stable string ids,
//! - a list of directed [`Edge`]s typed by [`EdgeType`].
//!
//! Nodes never hold references to each other; edges carry source and target
//! *ids* and traversal goes through the arena. Back-edges (`continue`) are
//! therefore plain data rather than ownership cycles.
//!
//! # Invariants
//!
//! Once [`Cfg::assert_invariants`] has passed (the builder runs it before
//! handing a graph out), downstream code may rely on:
//!
//! - exactly one [`Node::Initial`], with exactly one outgoing `sequence` edge;
//! - every non-terminal node has at least one outgoing edge and every
//!   non-initial node at least one incoming edge;
//! - every fork has exactly one join with the same `parallel_id` and vice
//!   versa;
//! - every `continue` edge targets a [`Node::Recursive`] reachable from the
//!   edge's source (the label is in scope);
//! - outgoing edges of a branch node are all `branch`, outgoing of a fork all
//!   `fork`, incoming to a join all `join`; all other edges are `sequence`
//!   or `continue`.
//!
//! Iteration order over nodes and edges is insertion order and therefore
//! deterministic for a given construction sequence.
//!
//! # Examples
//!
//! ```rust
//! use choreo_core::cfg::{Action, Cfg, EdgeType, Node, Recipients};
//!
//! let mut cfg = Cfg::new("Ping", vec!["Client".to_string(), "Server".to_string()]);
//!
//! cfg.add_node("initial", Node::Initial);
//! cfg.add_node("msg_0", Node::Action {
//!     action: Action::Message {
//!         from: "Client".to_string(),
//!         to: Recipients::one("Server"),
//!         label: "Ping".to_string(),
//!         payload_type: None,
//!     },
//! });
//! cfg.add_node("terminal", Node::Terminal);
//!
//! cfg.add_edge("initial", "msg_0", EdgeType::Sequence).unwrap();
//! cfg.add_edge("msg_0", "terminal", EdgeType::Sequence).unwrap();
//!
//! assert!(cfg.assert_invariants().is_ok());
//! ```

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{BuildError, BuildResult};

/// Node identifier, unique within one CFG
pub type NodeId = String;

/// Role (participant) name
pub type RoleName = String;

/// Message or branch label
pub type Label = String;

/// Protocol name
pub type ProtocolName = String;

/// One or more message recipients
///
/// Most messages are point-to-point; the multicast form carries a set of
/// receivers and is emitted as a single event by the orchestrated simulator.
/// The distributed layer rejects multicast messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Recipients {
    /// A single receiving role
    One(RoleName),
    /// A set of receiving roles (multicast)
    Many(Vec<RoleName>),
}

impl Recipients {
    /// Single recipient from anything string-like
    pub fn one(role: impl Into<RoleName>) -> Self {
        Self::One(role.into())
    }

    /// Multicast recipient set
    pub fn many<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<RoleName>,
    {
        Self::Many(roles.into_iter().map(Into::into).collect())
    }

    /// Whether `role` is among the recipients
    pub fn contains(&self, role: &str) -> bool {
        match self {
            Self::One(r) => r == role,
            Self::Many(rs) => rs.iter().any(|r| r == role),
        }
    }

    /// Iterate the recipient roles in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &RoleName> {
        match self {
            Self::One(r) => std::slice::from_ref(r).iter(),
            Self::Many(rs) => rs.iter(),
        }
    }

    /// True when the recipient set has two or more members
    pub fn is_multicast(&self) -> bool {
        matches!(self, Self::Many(rs) if rs.len() >= 2)
    }

    /// The sole recipient, if this is not a multicast
    pub fn single(&self) -> Option<&RoleName> {
        match self {
            Self::One(r) => Some(r),
            Self::Many(rs) if rs.len() == 1 => rs.first(),
            Self::Many(_) => None,
        }
    }
}

impl std::fmt::Display for Recipients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::One(r) => write!(f, "{}", r),
            Self::Many(rs) => write!(f, "[{}]", rs.join(", ")),
        }
    }
}

/// Protocol step carried by an action node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// A labeled message from one role to one or more roles
    Message {
        /// Sending role
        from: RoleName,
        /// Receiving role(s)
        to: Recipients,
        /// Message label
        label: Label,
        /// Optional payload type tag (labels only, no typechecking)
        payload_type: Option<String>,
    },

    /// Internal step, invisible to other roles
    Tau,

    /// Dynamic creation of participant instances
    CreateParticipants {
        /// The role performing the creation
        creator: RoleName,
        /// The role the new participants assume
        role_name: RoleName,
        /// Optional instance name for the created participant
        instance_name: Option<String>,
    },

    /// Invitation of a participant into the session
    Invitation {
        /// The inviting role
        inviter: RoleName,
        /// The invited role
        invitee: RoleName,
    },

    /// Declaration of a dynamically bound role
    DynamicRoleDeclaration {
        /// The declared role name
        role_name: RoleName,
    },

    /// Sub-protocol invocation under a role substitution
    Do {
        /// The invoked protocol
        protocol: ProtocolName,
        /// Actual roles bound to the protocol's formal roles, in order
        role_arguments: Vec<RoleName>,
    },
}

impl Action {
    /// Roles participating in this action (senders, receivers, creators,
    /// inviters, invitees, and `do` arguments)
    pub fn participants(&self) -> Vec<&RoleName> {
        match self {
            Self::Message { from, to, .. } => {
                let mut ps = vec![from];
                ps.extend(to.iter());
                ps
            }
            Self::Tau => Vec::new(),
            Self::CreateParticipants { creator, role_name, .. } => vec![creator, role_name],
            Self::Invitation { inviter, invitee } => vec![inviter, invitee],
            Self::DynamicRoleDeclaration { role_name } => vec![role_name],
            Self::Do { role_arguments, .. } => role_arguments.iter().collect(),
        }
    }

    /// Short human-readable rendering used in choice previews and logs
    pub fn describe(&self) -> String {
        match self {
            Self::Message { from, to, label, .. } => format!("{} -> {}: {}", from, to, label),
            Self::Tau => "tau".to_string(),
            Self::CreateParticipants { creator, role_name, .. } => {
                format!("{} creates {}", creator, role_name)
            }
            Self::Invitation { inviter, invitee } => format!("{} invites {}", inviter, invitee),
            Self::DynamicRoleDeclaration { role_name } => format!("role {}", role_name),
            Self::Do { protocol, .. } => format!("do {}", protocol),
        }
    }
}

/// Node variants of the control-flow graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    /// Unique entry point
    Initial,

    /// End of the protocol; may occur multiple times
    Terminal,

    /// A protocol step
    Action {
        /// The carried action
        action: Action,
    },

    /// Choice point
    Branch {
        /// The role deciding the choice
        at: RoleName,
    },

    /// Confluence of choice branches
    Merge,

    /// Entry of a parallel composition
    Fork {
        /// Pairs this fork with its join
        parallel_id: String,
    },

    /// Exit of a parallel composition
    Join {
        /// Pairs this join with its fork
        parallel_id: String,
    },

    /// Loop header
    Recursive {
        /// The recursion label referenced by `continue` edges
        label: Label,
    },
}

impl Node {
    /// Short human-readable rendering for previews and logs
    pub fn describe(&self) -> String {
        match self {
            Self::Initial => "initial".to_string(),
            Self::Terminal => "terminal".to_string(),
            Self::Action { action } => action.describe(),
            Self::Branch { at } => format!("choice at {}", at),
            Self::Merge => "merge".to_string(),
            Self::Fork { parallel_id } => format!("fork {}", parallel_id),
            Self::Join { parallel_id } => format!("join {}", parallel_id),
            Self::Recursive { label } => format!("rec {}", label),
        }
    }
}

/// Edge classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdgeType {
    /// Plain control flow
    Sequence,
    /// Labeled branch out of a choice node
    Branch {
        /// The branch label
        label: Label,
    },
    /// Fork node to a parallel branch entry
    Fork,
    /// Parallel branch end to its join node
    Join,
    /// Back-edge into a recursive node
    Continue,
}

impl EdgeType {
    /// True for `continue` back-edges
    pub fn is_continue(&self) -> bool {
        matches!(self, Self::Continue)
    }
}

/// A directed edge between two nodes, identified by their ids
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Source node id
    pub from: NodeId,
    /// Target node id
    pub to: NodeId,
    /// Edge classification
    pub edge_type: EdgeType,
}

/// A node together with its stable id
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeEntry {
    /// Stable id, unique within the CFG
    pub id: NodeId,
    /// The node itself
    pub node: Node,
}

/// Control-flow graph of one global protocol
///
/// Immutable once built; simulators never mutate a CFG. See the module
/// documentation for the invariant set.
#[derive(Debug, Clone, Serialize)]
pub struct Cfg {
    /// Name of the protocol this graph was built from
    pub protocol_name: ProtocolName,
    /// Declared roles, in declaration order
    pub roles: Vec<RoleName>,
    nodes: Vec<NodeEntry>,
    edges: Vec<Edge>,
    #[serde(skip)]
    node_index: HashMap<NodeId, usize>,
    #[serde(skip)]
    outgoing: HashMap<NodeId, Vec<usize>>,
    #[serde(skip)]
    incoming: HashMap<NodeId, Vec<usize>>,
}

impl Cfg {
    /// Create an empty graph for `protocol_name` over `roles`
    pub fn new(protocol_name: impl Into<ProtocolName>, roles: Vec<RoleName>) -> Self {
        Self {
            protocol_name: protocol_name.into(),
            roles,
            nodes: Vec::new(),
            edges: Vec::new(),
            node_index: HashMap::new(),
            outgoing: HashMap::new(),
            incoming: HashMap::new(),
        }
    }

    /// Add a node under `id`; a duplicate id replaces nothing and is ignored
    ///
    /// The builder guarantees unique ids; manual construction should too.
    pub fn add_node(&mut self, id: impl Into<NodeId>, node: Node) {
        let id = id.into();
        if self.node_index.contains_key(&id) {
            return;
        }
        self.node_index.insert(id.clone(), self.nodes.len());
        self.nodes.push(NodeEntry { id, node });
    }

    /// Add an edge between two existing nodes
    ///
    /// # Errors
    ///
    /// `malformed-edge` when either endpoint is missing.
    pub fn add_edge(
        &mut self,
        from: impl Into<NodeId>,
        to: impl Into<NodeId>,
        edge_type: EdgeType,
    ) -> BuildResult<()> {
        let from = from.into();
        let to = to.into();
        if !self.node_index.contains_key(&from) {
            return Err(BuildError::malformed_edge(&from, &to, "source node does not exist"));
        }
        if !self.node_index.contains_key(&to) {
            return Err(BuildError::malformed_edge(&from, &to, "target node does not exist"));
        }
        let idx = self.edges.len();
        self.outgoing.entry(from.clone()).or_default().push(idx);
        self.incoming.entry(to.clone()).or_default().push(idx);
        self.edges.push(Edge { from, to, edge_type });
        Ok(())
    }

    /// Look up a node by id
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.node_index.get(id).map(|&i| &self.nodes[i].node)
    }

    /// Whether a node id exists
    pub fn contains(&self, id: &str) -> bool {
        self.node_index.contains_key(id)
    }

    /// Nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &NodeEntry> {
        self.nodes.iter()
    }

    /// Edges in insertion order
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    /// Outgoing edges of `id`, in insertion order
    pub fn outgoing(&self, id: &str) -> Vec<&Edge> {
        self.outgoing
            .get(id)
            .map(|idxs| idxs.iter().map(|&i| &self.edges[i]).collect())
            .unwrap_or_default()
    }

    /// Incoming edges of `id`, in insertion order
    pub fn incoming(&self, id: &str) -> Vec<&Edge> {
        self.incoming
            .get(id)
            .map(|idxs| idxs.iter().map(|&i| &self.edges[i]).collect())
            .unwrap_or_default()
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// The id of the unique initial node, if present
    pub fn initial_node(&self) -> Option<&NodeId> {
        self.nodes
            .iter()
            .find(|e| matches!(e.node, Node::Initial))
            .map(|e| &e.id)
    }

    /// Ids of all terminal nodes
    pub fn terminal_nodes(&self) -> Vec<&NodeId> {
        self.nodes
            .iter()
            .filter(|e| matches!(e.node, Node::Terminal))
            .map(|e| &e.id)
            .collect()
    }

    /// The unique non-`continue` successor of `id`, if exactly one exists
    pub fn sequence_successor(&self, id: &str) -> Option<&NodeId> {
        let outs: Vec<&Edge> = self
            .outgoing(id)
            .into_iter()
            .filter(|e| !e.edge_type.is_continue())
            .collect();
        match outs.as_slice() {
            [e] => Some(&e.to),
            _ => None,
        }
    }

    /// The join node paired with `fork_id`, if the pairing is unique
    pub fn matching_join(&self, fork_id: &str) -> Option<&NodeId> {
        let parallel_id = match self.node(fork_id)? {
            Node::Fork { parallel_id } => parallel_id,
            _ => return None,
        };
        let joins: Vec<&NodeId> = self
            .nodes
            .iter()
            .filter(|e| matches!(&e.node, Node::Join { parallel_id: p } if p == parallel_id))
            .map(|e| &e.id)
            .collect();
        match joins.as_slice() {
            [j] => Some(j),
            _ => None,
        }
    }

    /// Node ids reachable from `start` (inclusive), optionally following
    /// `continue` edges
    pub fn reachable_from(&self, start: &str, follow_continue: bool) -> BTreeSet<NodeId> {
        let mut seen = BTreeSet::new();
        let mut work = vec![start.to_string()];
        while let Some(id) = work.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            for edge in self.outgoing(&id) {
                if !follow_continue && edge.edge_type.is_continue() {
                    continue;
                }
                if !seen.contains(&edge.to) {
                    work.push(edge.to.clone());
                }
            }
        }
        seen
    }

    /// Node ids of one parallel branch: everything reachable from `entry`
    /// without following `continue` edges, stopping at the branch's `join`
    pub fn branch_nodes(&self, entry: &str, join: &str) -> BTreeSet<NodeId> {
        let mut seen = BTreeSet::new();
        let mut work = vec![entry.to_string()];
        while let Some(id) = work.pop() {
            if id == join || !seen.insert(id.clone()) {
                continue;
            }
            for edge in self.outgoing(&id) {
                if edge.edge_type.is_continue() {
                    continue;
                }
                if edge.to != join && !seen.contains(&edge.to) {
                    work.push(edge.to.clone());
                }
            }
        }
        seen
    }

    /// Check the full structural invariant set
    ///
    /// The builder calls this before releasing a graph; tests and manual
    /// constructions can call it directly. The first violation found is
    /// returned as a [`BuildError`].
    pub fn assert_invariants(&self) -> BuildResult<()> {
        // Exactly one initial node with exactly one outgoing sequence edge.
        let initials: Vec<&NodeEntry> = self
            .nodes
            .iter()
            .filter(|e| matches!(e.node, Node::Initial))
            .collect();
        if initials.len() != 1 {
            return Err(BuildError::malformed_edge(
                "-",
                "-",
                format!("expected exactly one initial node, found {}", initials.len()),
            ));
        }
        let initial = initials[0];
        let init_out = self.outgoing(&initial.id);
        if init_out.len() != 1 || !matches!(init_out[0].edge_type, EdgeType::Sequence) {
            return Err(BuildError::malformed_edge(
                &initial.id,
                init_out.first().map(|e| e.to.as_str()).unwrap_or("-"),
                "initial node must have exactly one outgoing sequence edge",
            ));
        }

        for entry in &self.nodes {
            let outs = self.outgoing(&entry.id);
            let ins = self.incoming(&entry.id);

            // Degree rules.
            if !matches!(entry.node, Node::Terminal) && outs.is_empty() {
                return Err(BuildError::malformed_edge(
                    &entry.id,
                    "-",
                    "non-terminal node has no outgoing edge",
                ));
            }
            if !matches!(entry.node, Node::Initial) && ins.is_empty() {
                return Err(BuildError::malformed_edge(
                    "-",
                    &entry.id,
                    "non-initial node has no incoming edge",
                ));
            }

            // Per-kind edge typing.
            match &entry.node {
                Node::Branch { .. } => {
                    if outs.iter().any(|e| !matches!(e.edge_type, EdgeType::Branch { .. })) {
                        return Err(BuildError::malformed_edge(
                            &entry.id,
                            "-",
                            "branch node has a non-branch outgoing edge",
                        ));
                    }
                }
                Node::Fork { .. } => {
                    if outs.iter().any(|e| !matches!(e.edge_type, EdgeType::Fork)) {
                        return Err(BuildError::malformed_edge(
                            &entry.id,
                            "-",
                            "fork node has a non-fork outgoing edge",
                        ));
                    }
                }
                Node::Join { .. } => {
                    if ins.iter().any(|e| !matches!(e.edge_type, EdgeType::Join)) {
                        return Err(BuildError::malformed_edge(
                            "-",
                            &entry.id,
                            "join node has a non-join incoming edge",
                        ));
                    }
                }
                _ => {}
            }
        }

        // Fork/join pairing by parallel id.
        let mut forks: HashMap<&str, usize> = HashMap::new();
        let mut joins: HashMap<&str, usize> = HashMap::new();
        for entry in &self.nodes {
            match &entry.node {
                Node::Fork { parallel_id } => *forks.entry(parallel_id).or_default() += 1,
                Node::Join { parallel_id } => *joins.entry(parallel_id).or_default() += 1,
                _ => {}
            }
        }
        for (pid, count) in &forks {
            if *count != 1 || joins.get(pid) != Some(&1) {
                return Err(BuildError::unmatched_fork_join(*pid));
            }
        }
        for pid in joins.keys() {
            if !forks.contains_key(pid) {
                return Err(BuildError::unmatched_fork_join(*pid));
            }
        }

        // Continue edges target recursive nodes whose label is in scope:
        // the source must sit inside the loop body, i.e. be reachable from
        // the recursive node without taking continue edges.
        for edge in &self.edges {
            if !edge.edge_type.is_continue() {
                continue;
            }
            let label = match self.node(&edge.to) {
                Some(Node::Recursive { label }) => label.clone(),
                _ => {
                    return Err(BuildError::malformed_edge(
                        &edge.from,
                        &edge.to,
                        "continue edge does not target a recursive node",
                    ));
                }
            };
            let body = self.reachable_from(&edge.to, false);
            if !body.contains(&edge.from) {
                return Err(BuildError::undefined_recursion_label(label));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(from: &str, to: &str, label: &str) -> Node {
        Node::Action {
            action: Action::Message {
                from: from.to_string(),
                to: Recipients::one(to),
                label: label.to_string(),
                payload_type: None,
            },
        }
    }

    fn linear_cfg() -> Cfg {
        let mut cfg = Cfg::new("Ping", vec!["A".to_string(), "B".to_string()]);
        cfg.add_node("initial", Node::Initial);
        cfg.add_node("msg_0", message("A", "B", "Ping"));
        cfg.add_node("terminal", Node::Terminal);
        cfg.add_edge("initial", "msg_0", EdgeType::Sequence).unwrap();
        cfg.add_edge("msg_0", "terminal", EdgeType::Sequence).unwrap();
        cfg
    }

    #[test]
    fn test_linear_cfg_satisfies_invariants() {
        assert!(linear_cfg().assert_invariants().is_ok());
    }

    #[test]
    fn test_node_iteration_is_insertion_ordered() {
        let cfg = linear_cfg();
        let ids: Vec<&str> = cfg.nodes().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["initial", "msg_0", "terminal"]);
    }

    #[test]
    fn test_add_edge_rejects_dangling_endpoints() {
        let mut cfg = Cfg::new("P", vec![]);
        cfg.add_node("initial", Node::Initial);
        let err = cfg.add_edge("initial", "ghost", EdgeType::Sequence).unwrap_err();
        assert_eq!(err.kind(), "malformed-edge");
    }

    #[test]
    fn test_missing_outgoing_edge_violates_invariants() {
        let mut cfg = Cfg::new("P", vec![]);
        cfg.add_node("initial", Node::Initial);
        cfg.add_node("msg_0", message("A", "B", "M"));
        cfg.add_edge("initial", "msg_0", EdgeType::Sequence).unwrap();
        // msg_0 dangles without a terminal.
        assert!(cfg.assert_invariants().is_err());
    }

    #[test]
    fn test_unmatched_fork_detected() {
        let mut cfg = Cfg::new("P", vec![]);
        cfg.add_node("initial", Node::Initial);
        cfg.add_node("fork_0", Node::Fork { parallel_id: "p0".to_string() });
        cfg.add_node("terminal", Node::Terminal);
        cfg.add_edge("initial", "fork_0", EdgeType::Sequence).unwrap();
        cfg.add_edge("fork_0", "terminal", EdgeType::Fork).unwrap();
        let err = cfg.assert_invariants().unwrap_err();
        assert_eq!(err.kind(), "unmatched-fork-join");
    }

    #[test]
    fn test_continue_must_target_recursive_node() {
        let mut cfg = Cfg::new("P", vec![]);
        cfg.add_node("initial", Node::Initial);
        cfg.add_node("msg_0", message("A", "B", "M"));
        cfg.add_node("terminal", Node::Terminal);
        cfg.add_edge("initial", "msg_0", EdgeType::Sequence).unwrap();
        cfg.add_edge("msg_0", "terminal", EdgeType::Sequence).unwrap();
        cfg.add_edge("msg_0", "msg_0", EdgeType::Continue).unwrap();
        let err = cfg.assert_invariants().unwrap_err();
        assert_eq!(err.kind(), "malformed-edge");
    }

    #[test]
    fn test_recipients_multicast() {
        let one = Recipients::one("B");
        assert!(!one.is_multicast());
        assert_eq!(one.single(), Some(&"B".to_string()));

        let many = Recipients::many(["B", "C"]);
        assert!(many.is_multicast());
        assert!(many.contains("C"));
        assert_eq!(many.single(), None);
    }

    #[test]
    fn test_reachability_excludes_continue_when_asked() {
        let mut cfg = Cfg::new("P", vec![]);
        cfg.add_node("initial", Node::Initial);
        cfg.add_node("rec_0", Node::Recursive { label: "L".to_string() });
        cfg.add_node("msg_0", message("A", "B", "M"));
        cfg.add_node("terminal", Node::Terminal);
        cfg.add_edge("initial", "rec_0", EdgeType::Sequence).unwrap();
        cfg.add_edge("rec_0", "msg_0", EdgeType::Sequence).unwrap();
        cfg.add_edge("msg_0", "rec_0", EdgeType::Continue).unwrap();
        cfg.add_edge("msg_0", "terminal", EdgeType::Sequence).unwrap();

        let from_msg = cfg.reachable_from("msg_0", false);
        assert!(!from_msg.contains("rec_0"));
        let with_continue = cfg.reachable_from("msg_0", true);
        assert!(with_continue.contains("rec_0"));
    }
}
