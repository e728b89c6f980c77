//! CFG construction from protocol declarations
//!
//! [`build_cfg`] lowers a [`ProtocolDecl`] body into a [`Cfg`] and establishes
//! every structural invariant downstream components rely on. The builder is
//! the only component allowed to construct graphs for the rest of the system;
//! nothing downstream repairs a malformed graph.
//!
//! # Lowering scheme
//!
//! The interaction tree is continuation-styled, so lowering threads an *exit
//! target* downward: the node an `End` leaf connects to, together with the
//! edge type that connection must use (`sequence` into a merge or terminal,
//! `join` into a join node). `Continue` leaves resolve against the lexical
//! recursion scope and produce `continue` back-edges.
//!
//! Merges, joins, terminals, and continuations are only materialized when
//! some path actually reaches them: a choice whose branches all jump back
//! into a recursion has no merge, and a protocol that never ends has no
//! terminal node.
//!
//! # Errors
//!
//! - `undefined-recursion-label` - a `continue` names no enclosing `rec`;
//! - `malformed-edge` - duplicate roles, or a structural rule the lowered
//!   graph fails to satisfy;
//! - `unmatched-fork-join` - cannot arise from lowering but is checked all
//!   the same, since [`Cfg::assert_invariants`] runs before the graph is
//!   released.

use std::collections::HashSet;

use crate::ast::{ChoiceBranch, GlobalInteraction, ProtocolDecl};
use crate::cfg::{Action, Cfg, EdgeType, Node, NodeId};
use crate::error::{BuildError, BuildResult};

/// Build a CFG satisfying the structural invariants, or fail
///
/// # Examples
///
/// ```rust
/// use choreo_core::ast::{GlobalInteraction, ProtocolDecl};
/// use choreo_core::builder::build_cfg;
///
/// let decl = ProtocolDecl::new(
///     "Ping",
///     ["A", "B"],
///     GlobalInteraction::message("A", "B", "Ping", GlobalInteraction::end()),
/// );
/// let cfg = build_cfg(&decl).unwrap();
/// assert_eq!(cfg.node_count(), 3); // initial, message, terminal
/// ```
pub fn build_cfg(decl: &ProtocolDecl) -> BuildResult<Cfg> {
    let mut seen = HashSet::new();
    for role in &decl.roles {
        if !seen.insert(role) {
            return Err(BuildError::malformed_edge(
                "-",
                "-",
                format!("role '{}' declared more than once", role),
            ));
        }
    }

    let mut builder = CfgBuilder::new(decl);
    builder.lower_protocol(&decl.body)?;
    let cfg = builder.finish();
    cfg.assert_invariants()?;
    Ok(cfg)
}

/// Where a flow's `End` leaves connect, and with what edge type
#[derive(Debug, Clone)]
struct Target {
    node: NodeId,
    inbound: Option<EdgeType>,
}

impl Target {
    fn sequence(node: impl Into<NodeId>) -> Self {
        Self {
            node: node.into(),
            inbound: None,
        }
    }

    fn with(node: impl Into<NodeId>, edge: EdgeType) -> Self {
        Self {
            node: node.into(),
            inbound: Some(edge),
        }
    }

    fn edge_or_sequence(&self) -> EdgeType {
        self.inbound.clone().unwrap_or(EdgeType::Sequence)
    }
}

struct CfgBuilder {
    cfg: Cfg,
    rec_scope: Vec<(String, NodeId)>,
    counters: Counters,
}

#[derive(Default)]
struct Counters {
    message: usize,
    tau: usize,
    create: usize,
    invite: usize,
    dynrole: usize,
    do_call: usize,
    branch: usize,
    merge: usize,
    fork: usize,
    join: usize,
    rec: usize,
    parallel: usize,
}

impl CfgBuilder {
    fn new(decl: &ProtocolDecl) -> Self {
        Self {
            cfg: Cfg::new(decl.name.clone(), decl.roles.clone()),
            rec_scope: Vec::new(),
            counters: Counters::default(),
        }
    }

    fn finish(self) -> Cfg {
        self.cfg
    }

    fn lower_protocol(&mut self, body: &GlobalInteraction) -> BuildResult<()> {
        self.cfg.add_node("initial", Node::Initial);

        let exit = if falls_through(body) {
            self.cfg.add_node("terminal", Node::Terminal);
            Target::sequence("terminal")
        } else {
            // The protocol never ends (for example a recursion with no exit
            // branch); no terminal node exists and no End leaf is reachable.
            Target::sequence("initial")
        };

        let entry = self.lower(body, &exit)?;
        self.cfg
            .add_edge("initial", entry.node, EdgeType::Sequence)?;
        Ok(())
    }

    /// Lower one interaction flow; returns the target predecessors connect to
    fn lower(&mut self, g: &GlobalInteraction, exit: &Target) -> BuildResult<Target> {
        match g {
            GlobalInteraction::End => Ok(exit.clone()),

            GlobalInteraction::Continue { label } => {
                let rec_node = self
                    .rec_scope
                    .iter()
                    .rev()
                    .find(|(l, _)| l == label)
                    .map(|(_, id)| id.clone())
                    .ok_or_else(|| BuildError::undefined_recursion_label(label.clone()))?;
                Ok(Target::with(rec_node, EdgeType::Continue))
            }

            GlobalInteraction::Message {
                from,
                to,
                label,
                payload_type,
                continuation,
            } => {
                let id = format!("msg_{}", self.counters.message);
                self.counters.message += 1;
                self.cfg.add_node(
                    &id,
                    Node::Action {
                        action: Action::Message {
                            from: from.clone(),
                            to: to.clone(),
                            label: label.clone(),
                            payload_type: payload_type.clone(),
                        },
                    },
                );
                self.connect_continuation(&id, continuation, exit)?;
                Ok(Target::sequence(id))
            }

            GlobalInteraction::Tau { continuation } => {
                let id = self.fresh_tau();
                self.connect_continuation(&id, continuation, exit)?;
                Ok(Target::sequence(id))
            }

            GlobalInteraction::CreateParticipants {
                creator,
                role_name,
                instance_name,
                continuation,
            } => {
                let id = format!("create_{}", self.counters.create);
                self.counters.create += 1;
                self.cfg.add_node(
                    &id,
                    Node::Action {
                        action: Action::CreateParticipants {
                            creator: creator.clone(),
                            role_name: role_name.clone(),
                            instance_name: instance_name.clone(),
                        },
                    },
                );
                self.connect_continuation(&id, continuation, exit)?;
                Ok(Target::sequence(id))
            }

            GlobalInteraction::Invitation {
                inviter,
                invitee,
                continuation,
            } => {
                let id = format!("invite_{}", self.counters.invite);
                self.counters.invite += 1;
                self.cfg.add_node(
                    &id,
                    Node::Action {
                        action: Action::Invitation {
                            inviter: inviter.clone(),
                            invitee: invitee.clone(),
                        },
                    },
                );
                self.connect_continuation(&id, continuation, exit)?;
                Ok(Target::sequence(id))
            }

            GlobalInteraction::DynamicRoleDecl {
                role_name,
                continuation,
            } => {
                let id = format!("dynrole_{}", self.counters.dynrole);
                self.counters.dynrole += 1;
                self.cfg.add_node(
                    &id,
                    Node::Action {
                        action: Action::DynamicRoleDeclaration {
                            role_name: role_name.clone(),
                        },
                    },
                );
                self.connect_continuation(&id, continuation, exit)?;
                Ok(Target::sequence(id))
            }

            GlobalInteraction::Do {
                protocol,
                role_arguments,
                continuation,
            } => {
                let id = format!("do_{}", self.counters.do_call);
                self.counters.do_call += 1;
                self.cfg.add_node(
                    &id,
                    Node::Action {
                        action: Action::Do {
                            protocol: protocol.clone(),
                            role_arguments: role_arguments.clone(),
                        },
                    },
                );
                self.connect_continuation(&id, continuation, exit)?;
                Ok(Target::sequence(id))
            }

            GlobalInteraction::Choice {
                at,
                branches,
                continuation,
            } => self.lower_choice(at, branches, continuation, exit),

            GlobalInteraction::Parallel {
                branches,
                continuation,
            } => self.lower_parallel(branches, continuation, exit),

            GlobalInteraction::Rec {
                label,
                body,
                continuation,
            } => self.lower_rec(label, body, continuation, exit),
        }
    }

    fn lower_choice(
        &mut self,
        at: &str,
        branches: &[ChoiceBranch],
        continuation: &GlobalInteraction,
        exit: &Target,
    ) -> BuildResult<Target> {
        let branch_id = format!("branch_{}", self.counters.branch);
        self.counters.branch += 1;
        self.cfg
            .add_node(&branch_id, Node::Branch { at: at.to_string() });

        // The merge and the continuation only exist if some branch reaches
        // them; otherwise every branch jumps back into a recursion.
        let converges = branches.iter().any(|b| falls_through(&b.body));
        let branch_exit = if converges {
            let merge_id = format!("merge_{}", self.counters.merge);
            self.counters.merge += 1;
            self.cfg.add_node(&merge_id, Node::Merge);
            let after = self.lower(continuation, exit)?;
            let after_edge = after.edge_or_sequence();
            self.cfg
                .add_edge(&merge_id, after.node, after_edge)?;
            Target::sequence(merge_id)
        } else {
            exit.clone()
        };

        for branch in branches {
            let entry = self.lower(&branch.body, &branch_exit)?;
            // Outgoing edges of a branch node are branch-typed regardless of
            // where the body starts (a body that is a bare `continue` points
            // its branch edge straight at the recursive node).
            self.cfg.add_edge(
                &branch_id,
                entry.node,
                EdgeType::Branch {
                    label: branch.label.clone(),
                },
            )?;
        }

        Ok(Target::sequence(branch_id))
    }

    fn lower_parallel(
        &mut self,
        branches: &[GlobalInteraction],
        continuation: &GlobalInteraction,
        exit: &Target,
    ) -> BuildResult<Target> {
        let parallel_id = format!("par_{}", self.counters.parallel);
        self.counters.parallel += 1;

        let fork_id = format!("fork_{}", self.counters.fork);
        self.counters.fork += 1;
        self.cfg.add_node(
            &fork_id,
            Node::Fork {
                parallel_id: parallel_id.clone(),
            },
        );

        let join_id = format!("join_{}", self.counters.join);
        self.counters.join += 1;
        self.cfg.add_node(
            &join_id,
            Node::Join {
                parallel_id: parallel_id.clone(),
            },
        );

        let after = self.lower(continuation, exit)?;
        let after_edge = after.edge_or_sequence();
        self.cfg
            .add_edge(&join_id, after.node, after_edge)?;

        let branch_exit = Target::with(join_id, EdgeType::Join);
        for branch in branches {
            // An empty branch would need a single edge that is both fork-
            // and join-typed; interpose an internal step instead.
            let entry = if matches!(branch, GlobalInteraction::End) {
                let tau_id = self.fresh_tau();
                self.cfg
                    .add_edge(&tau_id, &branch_exit.node, EdgeType::Join)?;
                Target::sequence(tau_id)
            } else {
                self.lower(branch, &branch_exit)?
            };
            self.cfg.add_edge(&fork_id, entry.node, EdgeType::Fork)?;
        }

        Ok(Target::sequence(fork_id))
    }

    fn lower_rec(
        &mut self,
        label: &str,
        body: &GlobalInteraction,
        continuation: &GlobalInteraction,
        exit: &Target,
    ) -> BuildResult<Target> {
        let rec_id = format!("rec_{}", self.counters.rec);
        self.counters.rec += 1;
        self.cfg.add_node(
            &rec_id,
            Node::Recursive {
                label: label.to_string(),
            },
        );

        let body_exit = if falls_through(body) {
            self.lower(continuation, exit)?
        } else {
            // No path exits the loop; the continuation is unreachable and is
            // not lowered.
            exit.clone()
        };

        self.rec_scope.push((label.to_string(), rec_id.clone()));
        let entry = self.lower(body, &body_exit);
        self.rec_scope.pop();
        let entry = entry?;

        let entry_edge = entry.edge_or_sequence();
        self.cfg
            .add_edge(&rec_id, entry.node, entry_edge)?;
        Ok(Target::sequence(rec_id))
    }

    fn connect_continuation(
        &mut self,
        from: &str,
        continuation: &GlobalInteraction,
        exit: &Target,
    ) -> BuildResult<()> {
        let target = self.lower(continuation, exit)?;
        let target_edge = target.edge_or_sequence();
        self.cfg
            .add_edge(from, target.node, target_edge)
    }

    fn fresh_tau(&mut self) -> NodeId {
        let id = format!("tau_{}", self.counters.tau);
        self.counters.tau += 1;
        self.cfg.add_node(&id, Node::Action { action: Action::Tau });
        id
    }
}

/// Whether execution can leave `g` into whatever follows it
///
/// Exact by construction: an `End` leaf always connects to the enclosing
/// construct's exit, so a flow falls through iff an `End` leaf is reachable
/// through it.
fn falls_through(g: &GlobalInteraction) -> bool {
    match g {
        GlobalInteraction::End => true,
        GlobalInteraction::Continue { .. } => false,
        GlobalInteraction::Message { continuation, .. }
        | GlobalInteraction::Tau { continuation }
        | GlobalInteraction::CreateParticipants { continuation, .. }
        | GlobalInteraction::Invitation { continuation, .. }
        | GlobalInteraction::DynamicRoleDecl { continuation, .. }
        | GlobalInteraction::Do { continuation, .. } => falls_through(continuation),
        GlobalInteraction::Choice {
            branches,
            continuation,
            ..
        } => branches.iter().any(|b| falls_through(&b.body)) && falls_through(continuation),
        GlobalInteraction::Parallel { continuation, .. } => falls_through(continuation),
        GlobalInteraction::Rec {
            body, continuation, ..
        } => falls_through(body) && falls_through(continuation),
    }
}
