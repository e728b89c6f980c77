//! The well-formedness check catalogue
//!
//! Each check is a free function from a CFG to findings, independently
//! runnable and linear (or linear per parallel/choice) in the graph size.
//! Checks never fail: a graph too broken to analyze produces structural
//! findings rather than panics or errors.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::cfg::{Action, Cfg, EdgeType, Label, Node, NodeId, RoleName};
use crate::message::Channel;

use super::report::{Finding, FindingKind};
use super::scc::{has_self_loop, strongly_connected_components};

/// Structural invariant recheck
///
/// The builder establishes the invariants; this re-validates them so that a
/// hand-assembled or corrupted graph surfaces findings instead of tripping
/// the simulators.
pub fn check_structural(cfg: &Cfg) -> Vec<Finding> {
    let mut findings = Vec::new();
    if let Err(err) = cfg.assert_invariants() {
        findings.push(Finding::error(FindingKind::Structural, err.to_string()));
    }

    let mut seen = HashSet::new();
    for role in &cfg.roles {
        if !seen.insert(role) {
            findings.push(
                Finding::error(
                    FindingKind::Structural,
                    format!("role '{}' declared more than once", role),
                )
                .with_role(role.clone()),
            );
        }
    }
    findings
}

/// Check 1: structural deadlock
///
/// Tarjan over the graph restricted to non-`continue` edges; any surviving
/// cycle cannot be explained by recursion and is reported.
pub fn check_deadlock(cfg: &Cfg) -> Vec<Finding> {
    let mut findings = Vec::new();
    for component in strongly_connected_components(cfg) {
        let is_cycle = component.len() > 1
            || component
                .first()
                .map(|n| has_self_loop(cfg, n))
                .unwrap_or(false);
        if is_cycle {
            findings.push(
                Finding::error(
                    FindingKind::Deadlock,
                    format!("cycle not closed by recursion: {}", component.join(", ")),
                )
                .with_nodes(component),
            );
        }
    }
    findings
}

/// Check 2: liveness
///
/// Every non-terminal node must either reach a terminal or take part in an
/// intentional infinite recursion (be reachable from a `continue` target).
pub fn check_liveness(cfg: &Cfg) -> Vec<Finding> {
    let terminals: Vec<&NodeId> = cfg.terminal_nodes();

    // Nodes that can reach a terminal, via reverse traversal.
    let mut live: BTreeSet<&str> = BTreeSet::new();
    let mut work: Vec<&str> = terminals.iter().map(|s| s.as_str()).collect();
    while let Some(id) = work.pop() {
        if !live.insert(id) {
            continue;
        }
        for edge in cfg.incoming(id) {
            if !live.contains(edge.from.as_str()) {
                work.push(edge.from.as_str());
            }
        }
    }

    // Nodes inside an intentional loop: reachable from a continue target.
    let mut looping: BTreeSet<NodeId> = BTreeSet::new();
    for edge in cfg.edges() {
        if edge.edge_type.is_continue() {
            looping.extend(cfg.reachable_from(&edge.to, true));
        }
    }

    let mut findings = Vec::new();
    for entry in cfg.nodes() {
        if matches!(entry.node, Node::Terminal) {
            continue;
        }
        if !live.contains(entry.id.as_str()) && !looping.contains(&entry.id) {
            findings.push(
                Finding::error(
                    FindingKind::StuckState,
                    format!("node '{}' can neither complete nor loop", entry.id),
                )
                .with_node(entry.id.clone()),
            );
        }
    }
    findings
}

/// Check 3: progress
pub fn check_progress(cfg: &Cfg) -> Vec<Finding> {
    cfg.nodes()
        .filter(|entry| !matches!(entry.node, Node::Terminal))
        .filter(|entry| cfg.outgoing(&entry.id).is_empty())
        .map(|entry| {
            Finding::error(
                FindingKind::ProgressViolation,
                format!("non-terminal node '{}' has no outgoing edge", entry.id),
            )
            .with_node(entry.id.clone())
        })
        .collect()
}

/// One parallel composition, resolved to its branches
pub struct ParallelInfo {
    /// The fork node id
    pub fork: NodeId,
    /// The join node id
    pub join: NodeId,
    /// The pairing id
    pub parallel_id: String,
    /// Per-branch entry node and node set (join excluded)
    pub branches: Vec<(NodeId, BTreeSet<NodeId>)>,
}

/// Resolve every fork with a unique matching join to its branch node sets
pub fn parallels(cfg: &Cfg) -> Vec<ParallelInfo> {
    let mut result = Vec::new();
    for entry in cfg.nodes() {
        let parallel_id = match &entry.node {
            Node::Fork { parallel_id } => parallel_id.clone(),
            _ => continue,
        };
        let join = match cfg.matching_join(&entry.id) {
            Some(j) => j.clone(),
            // Broken pairing is reported by the fork-join check.
            None => continue,
        };
        let branches = cfg
            .outgoing(&entry.id)
            .into_iter()
            .filter(|e| matches!(e.edge_type, EdgeType::Fork))
            .map(|e| (e.to.clone(), cfg.branch_nodes(&e.to, &join)))
            .collect();
        result.push(ParallelInfo {
            fork: entry.id.clone(),
            join,
            parallel_id,
            branches,
        });
    }
    result
}

fn branch_messages<'a>(
    cfg: &'a Cfg,
    nodes: &BTreeSet<NodeId>,
) -> Vec<(&'a RoleName, Vec<&'a RoleName>, &'a Label)> {
    let mut messages = Vec::new();
    for id in nodes {
        if let Some(Node::Action {
            action: Action::Message { from, to, label, .. },
        }) = cfg.node(id)
        {
            messages.push((from, to.iter().collect(), label));
        }
    }
    messages
}

fn branch_participants(cfg: &Cfg, nodes: &BTreeSet<NodeId>) -> BTreeSet<RoleName> {
    let mut roles = BTreeSet::new();
    for id in nodes {
        if let Some(Node::Action { action }) = cfg.node(id) {
            roles.extend(action.participants().into_iter().cloned());
        }
    }
    roles
}

/// Check 4: parallel deadlock
///
/// Two violation shapes per parallel: (a) a role sending in two branches,
/// and (b) a pair of branches each waiting on a message whose sender is
/// busy in the other.
pub fn check_parallel_deadlock(cfg: &Cfg) -> Vec<Finding> {
    let mut findings = Vec::new();
    for par in parallels(cfg) {
        // (a) duplicate senders across branches.
        let mut sender_branches: BTreeMap<&RoleName, BTreeSet<usize>> = BTreeMap::new();
        for (idx, (_, nodes)) in par.branches.iter().enumerate() {
            for (from, _, _) in branch_messages(cfg, nodes) {
                sender_branches.entry(from).or_default().insert(idx);
            }
        }
        for (role, idxs) in &sender_branches {
            if idxs.len() >= 2 {
                findings.push(
                    Finding::error(
                        FindingKind::ParallelDeadlock,
                        format!(
                            "role '{}' sends in branches {:?} of parallel '{}'",
                            role, idxs, par.parallel_id
                        ),
                    )
                    .with_node(par.fork.clone())
                    .with_role((*role).clone()),
                );
            }
        }

        // (b) cross-branch circular waits: branch i depends on branch j when
        // some message received in i has a sender participating in j.
        let participant_sets: Vec<BTreeSet<RoleName>> = par
            .branches
            .iter()
            .map(|(_, nodes)| branch_participants(cfg, nodes))
            .collect();
        let depends = |i: usize, j: usize| -> bool {
            branch_messages(cfg, &par.branches[i].1)
                .iter()
                .any(|(from, _, _)| participant_sets[j].contains(*from))
        };
        for i in 0..par.branches.len() {
            for j in (i + 1)..par.branches.len() {
                if depends(i, j) && depends(j, i) {
                    findings.push(
                        Finding::error(
                            FindingKind::ParallelDeadlock,
                            format!(
                                "branches {} and {} of parallel '{}' wait on each other",
                                i, j, par.parallel_id
                            ),
                        )
                        .with_node(par.fork.clone()),
                    );
                }
            }
        }
    }
    findings
}

/// Check 5: race conditions
///
/// Messages in different branches of one parallel racing on the same
/// channel `(from, to)`. Shared role participation alone is not a race;
/// an identical channel is.
pub fn check_race_conditions(cfg: &Cfg) -> Vec<Finding> {
    let mut findings = Vec::new();
    for par in parallels(cfg) {
        let channel_sets: Vec<BTreeSet<Channel>> = par
            .branches
            .iter()
            .map(|(_, nodes)| {
                branch_messages(cfg, nodes)
                    .into_iter()
                    .flat_map(|(from, tos, _)| {
                        tos.into_iter()
                            .map(move |to| Channel::new(from.clone(), to.clone()))
                    })
                    .collect()
            })
            .collect();
        for i in 0..channel_sets.len() {
            for j in (i + 1)..channel_sets.len() {
                for channel in channel_sets[i].intersection(&channel_sets[j]) {
                    findings.push(
                        Finding::error(
                            FindingKind::RaceCondition,
                            format!(
                                "branches {} and {} of parallel '{}' both use channel {}",
                                i, j, par.parallel_id, channel
                            ),
                        )
                        .with_node(par.fork.clone())
                        .with_role(channel.from.clone())
                        .with_role(channel.to.clone()),
                    );
                }
            }
        }
    }
    findings
}

/// First message label along a branch, walking through non-message nodes
fn first_message_label(cfg: &Cfg, start: &str) -> Option<Label> {
    let mut seen = HashSet::new();
    let mut current = start.to_string();
    loop {
        if !seen.insert(current.clone()) {
            return None;
        }
        match cfg.node(&current)? {
            Node::Action {
                action: Action::Message { label, .. },
            } => return Some(label.clone()),
            Node::Branch { .. } | Node::Fork { .. } | Node::Join { .. } | Node::Terminal => {
                return None
            }
            _ => {
                let next = cfg
                    .outgoing(&current)
                    .into_iter()
                    .find(|e| !e.edge_type.is_continue())?
                    .to
                    .clone();
                current = next;
            }
        }
    }
}

/// Check 6: choice determinism
///
/// Two branches leading with the same label are indistinguishable to
/// receivers.
pub fn check_choice_determinism(cfg: &Cfg) -> Vec<Finding> {
    let mut findings = Vec::new();
    for entry in cfg.nodes() {
        let at = match &entry.node {
            Node::Branch { at } => at,
            _ => continue,
        };
        let mut labels_seen: BTreeMap<Label, usize> = BTreeMap::new();
        for (idx, edge) in cfg.outgoing(&entry.id).iter().enumerate() {
            let Some(label) = first_message_label(cfg, &edge.to) else {
                continue;
            };
            if let Some(first_idx) = labels_seen.get(&label) {
                findings.push(
                    Finding::error(
                        FindingKind::ChoiceDeterminism,
                        format!(
                            "choice at '{}' ('{}'): branches {} and {} both start with label '{}'",
                            at, entry.id, first_idx, idx, label
                        ),
                    )
                    .with_node(entry.id.clone())
                    .with_role(at.clone()),
                );
            } else {
                labels_seen.insert(label, idx);
            }
        }
    }
    findings
}

/// Per-choice branch regions: reachable nodes minus everything after the
/// common merge (when one exists)
fn choice_regions(cfg: &Cfg, branch_node: &str) -> Vec<BTreeSet<NodeId>> {
    let reaches: Vec<BTreeSet<NodeId>> = cfg
        .outgoing(branch_node)
        .into_iter()
        .map(|e| cfg.reachable_from(&e.to, false))
        .collect();

    // The common merge, if all branches converge on one.
    let mut common: Option<BTreeSet<NodeId>> = None;
    for reach in &reaches {
        let merges: BTreeSet<NodeId> = reach
            .iter()
            .filter(|id| matches!(cfg.node(id), Some(Node::Merge)))
            .cloned()
            .collect();
        common = Some(match common {
            None => merges,
            Some(prev) => prev.intersection(&merges).cloned().collect(),
        });
    }
    let after_merge: BTreeSet<NodeId> = common
        .unwrap_or_default()
        .iter()
        .flat_map(|m| {
            let mut after = cfg.reachable_from(m, false);
            after.remove(m);
            after
        })
        .collect();

    reaches
        .into_iter()
        .map(|r| r.difference(&after_merge).cloned().collect())
        .collect()
}

/// Check 7: choice mergeability
///
/// Static roles must participate in every branch or in none; roles created
/// dynamically inside a branch may stay branch-local.
pub fn check_choice_mergeability(cfg: &Cfg) -> Vec<Finding> {
    let mut findings = Vec::new();
    for entry in cfg.nodes() {
        let at = match &entry.node {
            Node::Branch { at } => at,
            _ => continue,
        };
        let regions = choice_regions(cfg, &entry.id);
        if regions.len() < 2 {
            continue;
        }

        let mut dynamic: BTreeSet<RoleName> = BTreeSet::new();
        let mut static_roles: Vec<BTreeSet<RoleName>> = Vec::new();
        for region in &regions {
            let mut roles = BTreeSet::new();
            for id in region {
                match cfg.node(id) {
                    Some(Node::Action {
                        action: Action::Message { from, to, .. },
                    }) => {
                        roles.insert(from.clone());
                        roles.extend(to.iter().cloned());
                    }
                    Some(Node::Action {
                        action: Action::Invitation { inviter, invitee },
                    }) => {
                        roles.insert(inviter.clone());
                        roles.insert(invitee.clone());
                    }
                    Some(Node::Action {
                        action: Action::CreateParticipants { creator, role_name, .. },
                    }) => {
                        roles.insert(creator.clone());
                        dynamic.insert(role_name.clone());
                    }
                    Some(Node::Action {
                        action: Action::DynamicRoleDeclaration { role_name },
                    }) => {
                        dynamic.insert(role_name.clone());
                    }
                    _ => {}
                }
            }
            static_roles.push(roles);
        }

        let union: BTreeSet<&RoleName> = static_roles.iter().flatten().collect();
        for role in union {
            if dynamic.contains(role) {
                continue;
            }
            let present: Vec<usize> = static_roles
                .iter()
                .enumerate()
                .filter(|(_, set)| set.contains(role))
                .map(|(i, _)| i)
                .collect();
            if present.len() < regions.len() {
                let absent: Vec<usize> = (0..regions.len())
                    .filter(|i| !present.contains(i))
                    .collect();
                findings.push(
                    Finding::error(
                        FindingKind::ChoiceMergeability,
                        format!(
                            "choice at '{}' ('{}'): role '{}' appears in branches {:?} but not {:?}",
                            at, entry.id, role, present, absent
                        ),
                    )
                    .with_node(entry.id.clone())
                    .with_role(role.clone()),
                );
            }
        }
    }
    findings
}

/// Check 8: connectedness
pub fn check_connectedness(cfg: &Cfg) -> Vec<Finding> {
    let mut participating: BTreeSet<&RoleName> = BTreeSet::new();
    for entry in cfg.nodes() {
        if let Node::Action { action } = &entry.node {
            participating.extend(action.participants());
        }
    }
    cfg.roles
        .iter()
        .filter(|role| !participating.contains(role))
        .map(|role| {
            Finding::error(
                FindingKind::Connectedness,
                format!("declared role '{}' never participates in any action", role),
            )
            .with_role(role.clone())
        })
        .collect()
}

/// Check 9: nested recursion scoping
///
/// Every continue edge must target a recursive node whose body contains the
/// edge's source. The builder maintains scoping; this rechecks it.
pub fn check_nested_recursion(cfg: &Cfg) -> Vec<Finding> {
    let mut findings = Vec::new();
    for edge in cfg.edges() {
        if !edge.edge_type.is_continue() {
            continue;
        }
        match cfg.node(&edge.to) {
            Some(Node::Recursive { label }) => {
                let body = cfg.reachable_from(&edge.to, false);
                if !body.contains(&edge.from) {
                    findings.push(
                        Finding::error(
                            FindingKind::NestedRecursion,
                            format!(
                                "continue from '{}' targets recursion '{}' outside its scope",
                                edge.from, label
                            ),
                        )
                        .with_node(edge.from.clone())
                        .with_node(edge.to.clone()),
                    );
                }
            }
            _ => {
                findings.push(
                    Finding::error(
                        FindingKind::NestedRecursion,
                        format!(
                            "continue from '{}' targets non-recursive node '{}'",
                            edge.from, edge.to
                        ),
                    )
                    .with_node(edge.from.clone())
                    .with_node(edge.to.clone()),
                );
            }
        }
    }
    findings
}

/// Check 10: recursion in parallel
///
/// A continue edge may not cross a parallel boundary: its target must live
/// in the same branch as its source.
pub fn check_recursion_in_parallel(cfg: &Cfg) -> Vec<Finding> {
    let mut findings = Vec::new();
    for par in parallels(cfg) {
        for (idx, (_, nodes)) in par.branches.iter().enumerate() {
            for edge in cfg.edges() {
                if edge.edge_type.is_continue()
                    && nodes.contains(&edge.from)
                    && !nodes.contains(&edge.to)
                {
                    findings.push(
                        Finding::error(
                            FindingKind::RecursionInParallel,
                            format!(
                                "continue from '{}' escapes branch {} of parallel '{}'",
                                edge.from, idx, par.parallel_id
                            ),
                        )
                        .with_node(edge.from.clone())
                        .with_node(par.fork.clone()),
                    );
                }
            }
        }
    }
    findings
}

/// Check 11: fork-join structure
pub fn check_fork_join_structure(cfg: &Cfg) -> Vec<Finding> {
    let mut forks: BTreeMap<&str, Vec<&NodeId>> = BTreeMap::new();
    let mut joins: BTreeMap<&str, Vec<&NodeId>> = BTreeMap::new();
    for entry in cfg.nodes() {
        match &entry.node {
            Node::Fork { parallel_id } => forks.entry(parallel_id).or_default().push(&entry.id),
            Node::Join { parallel_id } => joins.entry(parallel_id).or_default().push(&entry.id),
            _ => {}
        }
    }

    let mut findings = Vec::new();
    let ids: BTreeSet<&str> = forks.keys().chain(joins.keys()).copied().collect();
    for pid in ids {
        let fork_count = forks.get(pid).map(Vec::len).unwrap_or(0);
        let join_count = joins.get(pid).map(Vec::len).unwrap_or(0);
        if fork_count != 1 || join_count != 1 {
            findings.push(
                Finding::error(
                    FindingKind::ForkJoinStructure,
                    format!(
                        "parallel '{}' has {} fork(s) and {} join(s)",
                        pid, fork_count, join_count
                    ),
                )
                .with_nodes(
                    forks
                        .get(pid)
                        .into_iter()
                        .flatten()
                        .chain(joins.get(pid).into_iter().flatten())
                        .map(|n| (*n).clone()),
                ),
            );
        }
    }
    findings
}

/// Check 12: multicast advisory
pub fn check_multicast(cfg: &Cfg) -> Vec<Finding> {
    cfg.nodes()
        .filter_map(|entry| match &entry.node {
            Node::Action {
                action: Action::Message { from, to, label, .. },
            } if to.is_multicast() => Some(
                Finding::warning(
                    FindingKind::Multicast,
                    format!("message '{}' from '{}' has recipients {}", label, from, to),
                )
                .with_node(entry.id.clone())
                .with_role(from.clone()),
            ),
            _ => None,
        })
        .collect()
}

/// Check 13: self-communication
///
/// Off by default: dynamic-participant dialects use self-messages as local
/// computation. When enabled, a self-message is an error.
pub fn check_self_communication(cfg: &Cfg) -> Vec<Finding> {
    cfg.nodes()
        .filter_map(|entry| match &entry.node {
            Node::Action {
                action: Action::Message { from, to, label, .. },
            } if to.contains(from) => Some(
                Finding::error(
                    FindingKind::SelfCommunication,
                    format!("role '{}' sends '{}' to itself", from, label),
                )
                .with_node(entry.id.clone())
                .with_role(from.clone()),
            ),
            _ => None,
        })
        .collect()
}

/// Check 14: empty choice branch
pub fn check_empty_choice_branch(cfg: &Cfg) -> Vec<Finding> {
    let mut findings = Vec::new();
    for entry in cfg.nodes() {
        if !matches!(entry.node, Node::Branch { .. }) {
            continue;
        }
        for (idx, edge) in cfg.outgoing(&entry.id).iter().enumerate() {
            if matches!(cfg.node(&edge.to), Some(Node::Merge)) {
                findings.push(
                    Finding::error(
                        FindingKind::EmptyChoiceBranch,
                        format!("branch {} of choice '{}' is empty", idx, entry.id),
                    )
                    .with_node(entry.id.clone())
                    .with_node(edge.to.clone()),
                );
            }
        }
    }
    findings
}

/// Check 15: merge reachability
///
/// Branches that neither share a merge nor contain a continue edge cannot
/// converge; updatable recursion is the only sanctioned non-convergence.
pub fn check_merge_reachability(cfg: &Cfg) -> Vec<Finding> {
    let mut findings = Vec::new();
    for entry in cfg.nodes() {
        if !matches!(entry.node, Node::Branch { .. }) {
            continue;
        }
        let branches = cfg.outgoing(&entry.id);
        if branches.len() < 2 {
            continue;
        }

        let mut converging: Vec<(usize, BTreeSet<NodeId>)> = Vec::new();
        for (idx, edge) in branches.iter().enumerate() {
            let reach = cfg.reachable_from(&edge.to, false);
            let loops = cfg
                .edges()
                .any(|e| e.edge_type.is_continue() && reach.contains(&e.from));
            if loops {
                continue;
            }
            let merges: BTreeSet<NodeId> = reach
                .iter()
                .filter(|id| matches!(cfg.node(id), Some(Node::Merge)))
                .cloned()
                .collect();
            converging.push((idx, merges));
        }

        if converging.len() < 2 {
            continue;
        }
        let mut common = converging[0].1.clone();
        for (_, merges) in &converging[1..] {
            common = common.intersection(merges).cloned().collect();
        }
        if common.is_empty() {
            let idxs: Vec<usize> = converging.iter().map(|(i, _)| *i).collect();
            findings.push(
                Finding::error(
                    FindingKind::MergeReachability,
                    format!(
                        "branches {:?} of choice '{}' do not converge at a common merge",
                        idxs, entry.id
                    ),
                )
                .with_node(entry.id.clone()),
            );
        }
    }
    findings
}
