//! Projection of a global CFG onto per-role machines
//!
//! [`project_all`] derives one [`Cfsm`] per declared role. The walk is
//! syntactic: every CFG edge becomes a machine transition labeled with the
//! role's view of the source node - a send for the sender, a receive for a
//! recipient, a choice marker for the deciding role, an internal step for
//! the acting role of extension actions, and an epsilon step for everyone
//! else. Epsilon steps are then eliminated with a subset construction, so
//! the resulting machines have only meaningful transitions and
//! deterministically named states (`s0`, `s1`, ... in discovery order).
//!
//! Multicast messages project to one send per recipient in declaration
//! order on the sender's side, and an ordinary receive on each recipient's
//! side; the distributed layer then only ever routes point-to-point
//! messages.
//!
//! Projection failures are collected, never thrown: a role participating in
//! two branches of one parallel cannot be given a machine without a product
//! construction and is reported as [`ProjectionError::RoleInMultipleBranches`]
//! (parallel branches must have disjoint role sets).

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::cfg::{Action, Cfg, EdgeType, Label, Node, NodeId, RoleName};
use crate::cfsm::{Cfsm, LocalAction};
use crate::error::ProjectionError;

/// Project every declared role of `cfg`
///
/// Returns the machines that could be derived together with the collected
/// errors. A verifier-clean CFG (determinism, mergeability, connectedness,
/// recursion-in-parallel all passing) with disjoint parallel branches
/// projects without errors.
///
/// # Examples
///
/// ```rust
/// use choreo_core::ast::{GlobalInteraction, ProtocolDecl};
/// use choreo_core::builder::build_cfg;
/// use choreo_core::projection::project_all;
///
/// let cfg = build_cfg(&ProtocolDecl::new(
///     "Ping",
///     ["A", "B"],
///     GlobalInteraction::message("A", "B", "Ping", GlobalInteraction::end()),
/// )).unwrap();
///
/// let (machines, errors) = project_all(&cfg);
/// assert!(errors.is_empty());
/// assert_eq!(machines.len(), 2);
/// assert_eq!(machines["A"].transitions.len(), 1); // the send
/// ```
pub fn project_all(cfg: &Cfg) -> (BTreeMap<RoleName, Cfsm>, Vec<ProjectionError>) {
    let mut machines = BTreeMap::new();
    let mut errors = Vec::new();
    for role in &cfg.roles {
        match project_role(cfg, role) {
            Ok(machine) => {
                machines.insert(role.clone(), machine);
            }
            Err(err) => errors.push(err),
        }
    }
    (machines, errors)
}

/// Project a single role
pub fn project_role(cfg: &Cfg, role: &str) -> Result<Cfsm, ProjectionError> {
    check_parallel_disjointness(cfg, role)?;
    let nfa = build_nfa(cfg, role)?;
    Ok(determinize(role, &nfa))
}

/// A role may participate in at most one branch of each parallel
fn check_parallel_disjointness(cfg: &Cfg, role: &str) -> Result<(), ProjectionError> {
    for entry in cfg.nodes() {
        let parallel_id = match &entry.node {
            Node::Fork { parallel_id } => parallel_id,
            _ => continue,
        };
        let Some(join) = cfg.matching_join(&entry.id) else {
            continue;
        };
        let mut involved_branches = 0usize;
        for edge in cfg.outgoing(&entry.id) {
            if !matches!(edge.edge_type, EdgeType::Fork) {
                continue;
            }
            let nodes = cfg.branch_nodes(&edge.to, join);
            let involved = nodes.iter().any(|id| match cfg.node(id) {
                Some(Node::Action { action }) => {
                    action.participants().into_iter().any(|r| r == role)
                }
                Some(Node::Branch { at }) => at == role,
                _ => false,
            });
            if involved {
                involved_branches += 1;
            }
        }
        if involved_branches >= 2 {
            return Err(ProjectionError::RoleInMultipleBranches {
                role: role.to_string(),
                parallel_id: parallel_id.clone(),
            });
        }
    }
    Ok(())
}

/// Transition label of the role-local NFA
#[derive(Debug, Clone, PartialEq, Eq)]
enum NfaLabel {
    /// A meaningful local action
    Act(LocalAction),
    /// The decider's view of one choice branch; the branch identity keeps
    /// distinct branches from being merged during determinization
    Choose {
        node: NodeId,
        branch: Label,
    },
}

impl NfaLabel {
    fn action(&self) -> LocalAction {
        match self {
            Self::Act(a) => a.clone(),
            Self::Choose { .. } => LocalAction::ChoiceMarker,
        }
    }
}

struct Nfa {
    labeled: HashMap<NodeId, Vec<(NfaLabel, NodeId)>>,
    epsilon: HashMap<NodeId, Vec<NodeId>>,
    initial: NodeId,
    accepting: BTreeSet<NodeId>,
}

fn build_nfa(cfg: &Cfg, role: &str) -> Result<Nfa, ProjectionError> {
    let initial = cfg
        .initial_node()
        .cloned()
        .ok_or_else(|| ProjectionError::Structural {
            role: role.to_string(),
            reason: "CFG has no initial node".to_string(),
        })?;

    let mut labeled: HashMap<NodeId, Vec<(NfaLabel, NodeId)>> = HashMap::new();
    let mut epsilon: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    let mut accepting = BTreeSet::new();

    let add_eps = |eps: &mut HashMap<NodeId, Vec<NodeId>>, from: &NodeId, to: &NodeId| {
        eps.entry(from.clone()).or_default().push(to.clone());
    };

    for entry in cfg.nodes() {
        let id = &entry.id;
        match &entry.node {
            Node::Terminal => {
                accepting.insert(id.clone());
            }
            Node::Branch { at } => {
                for edge in cfg.outgoing(id) {
                    if at == role {
                        let branch = match &edge.edge_type {
                            EdgeType::Branch { label } => label.clone(),
                            _ => String::new(),
                        };
                        labeled.entry(id.clone()).or_default().push((
                            NfaLabel::Choose {
                                node: id.clone(),
                                branch,
                            },
                            edge.to.clone(),
                        ));
                    } else {
                        add_eps(&mut epsilon, id, &edge.to);
                    }
                }
            }
            Node::Action { action } => {
                let view = role_view(action, role);
                for edge in cfg.outgoing(id) {
                    match &view {
                        RoleView::Silent => add_eps(&mut epsilon, id, &edge.to),
                        RoleView::Single(act) => labeled
                            .entry(id.clone())
                            .or_default()
                            .push((NfaLabel::Act(act.clone()), edge.to.clone())),
                        RoleView::SendChain(sends) => {
                            // Multicast: thread synthesized states between
                            // the consecutive sends.
                            let mut current = id.clone();
                            for (i, act) in sends.iter().enumerate() {
                                let next = if i + 1 == sends.len() {
                                    edge.to.clone()
                                } else {
                                    format!("{}#mc{}", id, i + 1)
                                };
                                labeled
                                    .entry(current.clone())
                                    .or_default()
                                    .push((NfaLabel::Act(act.clone()), next.clone()));
                                current = next;
                            }
                        }
                    }
                }
            }
            Node::Fork { .. } => {
                // Route the role through its own branch only; a role with no
                // branch of its own skips straight to the join. Epsilon paths
                // through foreign branches would let the machine bypass its
                // obligations.
                match fork_routing(cfg, id, role) {
                    Some(ForkRouting { own_branch: Some(entry), .. }) => {
                        add_eps(&mut epsilon, id, &entry);
                    }
                    Some(ForkRouting { join, .. }) => {
                        add_eps(&mut epsilon, id, &join);
                    }
                    None => {
                        for edge in cfg.outgoing(id) {
                            add_eps(&mut epsilon, id, &edge.to);
                        }
                    }
                }
            }
            // Structural nodes are invisible to every role.
            Node::Initial | Node::Merge | Node::Join { .. } | Node::Recursive { .. } => {
                for edge in cfg.outgoing(id) {
                    add_eps(&mut epsilon, id, &edge.to);
                }
            }
        }
    }

    Ok(Nfa {
        labeled,
        epsilon,
        initial,
        accepting,
    })
}

struct ForkRouting {
    join: NodeId,
    own_branch: Option<NodeId>,
}

/// Where a role's epsilon path leaves a fork: into its own branch, or
/// straight to the join when no branch involves it
fn fork_routing(cfg: &Cfg, fork: &str, role: &str) -> Option<ForkRouting> {
    let join = cfg.matching_join(fork)?.clone();
    let mut own_branch = None;
    for edge in cfg.outgoing(fork) {
        if !matches!(edge.edge_type, EdgeType::Fork) {
            continue;
        }
        let nodes = cfg.branch_nodes(&edge.to, &join);
        let involved = nodes.iter().any(|id| match cfg.node(id) {
            Some(Node::Action { action }) => action.participants().into_iter().any(|r| r == role),
            Some(Node::Branch { at }) => at == role,
            _ => false,
        });
        if involved {
            own_branch = Some(edge.to.clone());
            break;
        }
    }
    Some(ForkRouting { join, own_branch })
}

enum RoleView {
    /// The role does not observe this action
    Silent,
    /// One local action
    Single(LocalAction),
    /// Consecutive sends (multicast sender)
    SendChain(Vec<LocalAction>),
}

fn role_view(action: &Action, role: &str) -> RoleView {
    match action {
        Action::Message {
            from,
            to,
            label,
            payload_type,
        } => {
            if from == role && to.contains(role) {
                // Self-communication is local computation.
                RoleView::Single(LocalAction::Tau)
            } else if from == role {
                let sends: Vec<LocalAction> = to
                    .iter()
                    .map(|recipient| LocalAction::Send {
                        to: recipient.clone(),
                        label: label.clone(),
                        payload_type: payload_type.clone(),
                    })
                    .collect();
                match sends.len() {
                    1 => RoleView::Single(sends.into_iter().next().expect("one send")),
                    _ => RoleView::SendChain(sends),
                }
            } else if to.contains(role) {
                RoleView::Single(LocalAction::Receive {
                    from: from.clone(),
                    label: label.clone(),
                    payload_type: payload_type.clone(),
                })
            } else {
                RoleView::Silent
            }
        }
        Action::Tau => RoleView::Silent,
        Action::CreateParticipants { creator, .. } if creator == role => {
            RoleView::Single(LocalAction::Tau)
        }
        Action::Invitation { inviter, .. } if inviter == role => {
            RoleView::Single(LocalAction::Tau)
        }
        Action::Do {
            protocol,
            role_arguments,
        } if role_arguments.iter().any(|r| r == role) => RoleView::Single(LocalAction::Call {
            protocol: protocol.clone(),
            role_arguments: role_arguments.clone(),
        }),
        _ => RoleView::Silent,
    }
}

fn epsilon_closure(nfa: &Nfa, seed: &BTreeSet<NodeId>) -> BTreeSet<NodeId> {
    let mut closure = seed.clone();
    let mut work: Vec<NodeId> = seed.iter().cloned().collect();
    while let Some(id) = work.pop() {
        if let Some(succs) = nfa.epsilon.get(&id) {
            for s in succs {
                if closure.insert(s.clone()) {
                    work.push(s.clone());
                }
            }
        }
    }
    closure
}

fn determinize(role: &str, nfa: &Nfa) -> Cfsm {
    let start = epsilon_closure(nfa, &BTreeSet::from([nfa.initial.clone()]));

    let mut names: HashMap<BTreeSet<NodeId>, String> = HashMap::new();
    let mut order: Vec<BTreeSet<NodeId>> = Vec::new();
    names.insert(start.clone(), "s0".to_string());
    order.push(start.clone());

    let mut machine = Cfsm::new(role, "s0");
    let mut cursor = 0usize;
    while cursor < order.len() {
        let subset = order[cursor].clone();
        let from_name = names[&subset].clone();
        cursor += 1;

        if subset.iter().any(|id| nfa.accepting.contains(id)) {
            machine.mark_terminal(from_name.clone());
        }

        // Collect moves grouped by label, preserving first-seen order so
        // state numbering is deterministic.
        let mut moves: Vec<(NfaLabel, BTreeSet<NodeId>)> = Vec::new();
        for id in &subset {
            if let Some(transitions) = nfa.labeled.get(id) {
                for (label, target) in transitions {
                    match moves.iter_mut().find(|(l, _)| l == label) {
                        Some((_, targets)) => {
                            targets.insert(target.clone());
                        }
                        None => {
                            moves.push((label.clone(), BTreeSet::from([target.clone()])));
                        }
                    }
                }
            }
        }

        for (label, targets) in moves {
            let closure = epsilon_closure(nfa, &targets);
            let to_name = match names.get(&closure) {
                Some(name) => name.clone(),
                None => {
                    let name = format!("s{}", order.len());
                    names.insert(closure.clone(), name.clone());
                    order.push(closure);
                    name
                }
            };
            machine.add_transition(from_name.clone(), to_name, label.action());
        }
    }

    machine
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ChoiceBranch, GlobalInteraction, ProtocolDecl};
    use crate::builder::build_cfg;

    fn msg(from: &str, to: &str, label: &str, cont: GlobalInteraction) -> GlobalInteraction {
        GlobalInteraction::message(from, to, label, cont)
    }

    fn project(decl: &ProtocolDecl) -> (BTreeMap<RoleName, Cfsm>, Vec<ProjectionError>) {
        project_all(&build_cfg(decl).unwrap())
    }

    #[test]
    fn test_request_response_projection() {
        let (machines, errors) = project(&ProtocolDecl::new(
            "RequestResponse",
            ["Client", "Server"],
            msg(
                "Client",
                "Server",
                "Request",
                msg("Server", "Client", "Response", GlobalInteraction::end()),
            ),
        ));
        assert!(errors.is_empty());

        let client = &machines["Client"];
        assert_eq!(client.transitions.len(), 2);
        assert!(matches!(
            client.transitions[0].action,
            LocalAction::Send { ref label, .. } if label == "Request"
        ));
        assert!(matches!(
            client.transitions[1].action,
            LocalAction::Receive { ref label, .. } if label == "Response"
        ));
        assert_eq!(client.terminal_states.len(), 1);

        let server = &machines["Server"];
        assert!(matches!(
            server.transitions[0].action,
            LocalAction::Receive { ref label, .. } if label == "Request"
        ));
    }

    #[test]
    fn test_uninvolved_role_gets_empty_terminal_machine() {
        let (machines, errors) = project(&ProtocolDecl::new(
            "ThreeRoles",
            ["A", "B", "Observer"],
            msg("A", "B", "M", GlobalInteraction::end()),
        ));
        assert!(errors.is_empty());
        let observer = &machines["Observer"];
        assert!(observer.transitions.is_empty());
        assert!(observer.is_terminal(&observer.initial_state));
    }

    #[test]
    fn test_choice_projection_decider_and_receiver() {
        let (machines, errors) = project(&ProtocolDecl::new(
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
        ));
        assert!(errors.is_empty());

        // The decider gets one choice marker per branch.
        let server = &machines["Server"];
        let markers = server
            .transitions
            .iter()
            .filter(|t| matches!(t.action, LocalAction::ChoiceMarker))
            .count();
        assert_eq!(markers, 2);

        // The receiver distinguishes branches by label.
        let client = &machines["Client"];
        let receive_labels: BTreeSet<String> = client
            .transitions
            .iter()
            .filter_map(|t| match &t.action {
                LocalAction::Receive { label, .. } => Some(label.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            receive_labels,
            BTreeSet::from(["Success".to_string(), "Failure".to_string()])
        );
    }

    #[test]
    fn test_recursion_projects_to_loop() {
        let (machines, errors) = project(&ProtocolDecl::new(
            "Loop",
            ["A", "B"],
            GlobalInteraction::rec(
                "L",
                msg("A", "B", "Data", GlobalInteraction::continue_("L")),
                GlobalInteraction::end(),
            ),
        ));
        assert!(errors.is_empty());

        // A's machine sends forever: the loop body state loops to itself
        // and no terminal state exists.
        let a = &machines["A"];
        assert_eq!(a.transitions.len(), 2);
        assert_eq!(a.transitions[1].from, a.transitions[1].to);
        assert!(a
            .transitions
            .iter()
            .all(|t| matches!(t.action, LocalAction::Send { ref label, .. } if label == "Data")));
        assert!(a.terminal_states.is_empty());
    }

    #[test]
    fn test_parallel_disjoint_roles_project() {
        let (machines, errors) = project(&ProtocolDecl::new(
            "TwoPhase",
            ["P1", "P2", "C"],
            GlobalInteraction::parallel(
                vec![
                    msg("P1", "C", "VoteA", GlobalInteraction::end()),
                    msg("P2", "C", "VoteB", GlobalInteraction::end()),
                ],
                GlobalInteraction::end(),
            ),
        ));
        // C receives in both branches, so C is not projectable without a
        // product construction; P1 and P2 are fine.
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0],
            ProjectionError::RoleInMultipleBranches { ref role, .. } if role == "C"
        ));
        assert_eq!(machines["P1"].transitions.len(), 1);
        assert_eq!(machines["P2"].transitions.len(), 1);
    }

    #[test]
    fn test_multicast_sender_chains_sends() {
        let (machines, errors) = project(&ProtocolDecl::new(
            "Broadcast",
            ["A", "B", "C"],
            GlobalInteraction::multicast("A", ["B", "C"], "Go", GlobalInteraction::end()),
        ));
        assert!(errors.is_empty());

        let a = &machines["A"];
        let sends: Vec<&str> = a
            .transitions
            .iter()
            .filter_map(|t| match &t.action {
                LocalAction::Send { to, .. } => Some(to.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(sends, vec!["B", "C"]);

        assert_eq!(machines["B"].transitions.len(), 1);
        assert_eq!(machines["C"].transitions.len(), 1);
    }

    #[test]
    fn test_do_projects_to_call_for_arguments() {
        let (machines, errors) = project(&ProtocolDecl::new(
            "Caller",
            ["X", "Y"],
            GlobalInteraction::do_protocol("Sub", ["X", "Y"], GlobalInteraction::end()),
        ));
        assert!(errors.is_empty());
        assert!(matches!(
            machines["X"].transitions[0].action,
            LocalAction::Call { ref protocol, .. } if protocol == "Sub"
        ));
    }

    #[test]
    fn test_state_names_are_deterministic() {
        let decl = ProtocolDecl::new(
            "Ping",
            ["A", "B"],
            msg("A", "B", "Ping", msg("B", "A", "Pong", GlobalInteraction::end())),
        );
        let (m1, _) = project(&decl);
        let (m2, _) = project(&decl);
        assert_eq!(m1, m2);
    }
}
