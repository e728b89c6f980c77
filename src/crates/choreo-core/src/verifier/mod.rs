//! Static well-formedness verification
//!
//! The [`Verifier`] runs the check catalogue over a CFG and collects every
//! finding into a [`VerificationReport`]. It never fails: ill-formed graphs
//! produce findings (structural ones for catastrophic inconsistencies), not
//! errors or panics.
//!
//! Each check can be toggled through [`VerificationOptions`]; the defaults
//! enable everything except self-communication, which dynamic-participant
//! protocols legitimately use for local computation.
//!
//! # Examples
//!
//! ```rust
//! use choreo_core::ast::{GlobalInteraction, ProtocolDecl};
//! use choreo_core::builder::build_cfg;
//! use choreo_core::verifier::{VerificationOptions, Verifier};
//!
//! let cfg = build_cfg(&ProtocolDecl::new(
//!     "Ping",
//!     ["A", "B"],
//!     GlobalInteraction::message("A", "B", "Ping", GlobalInteraction::end()),
//! )).unwrap();
//!
//! let report = Verifier::new(VerificationOptions::default()).verify(&cfg);
//! assert!(report.is_valid());
//! ```

mod checks;
mod report;
mod scc;

pub use report::{Finding, FindingKind, FlatReport, Severity, VerificationReport};
pub use scc::strongly_connected_components;

use crate::cfg::Cfg;

/// Per-check toggles
///
/// Field names follow the check catalogue; `strict_mode` promotes warnings
/// to errors when the report is flattened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationOptions {
    /// Structural deadlock (Tarjan over non-continue edges)
    pub check_deadlock: bool,
    /// Liveness (stuck states)
    pub check_liveness: bool,
    /// Parallel deadlock (duplicate senders, circular waits)
    pub check_parallel_deadlock: bool,
    /// Cross-branch channel races
    pub check_race_conditions: bool,
    /// Non-terminal nodes without outgoing edges
    pub check_progress: bool,
    /// Duplicate leading labels across choice branches
    pub check_choice_determinism: bool,
    /// All-or-no-branch role participation
    pub check_choice_mergeability: bool,
    /// Declared roles must participate
    pub check_connectedness: bool,
    /// Continue-edge scoping
    pub check_nested_recursion: bool,
    /// Continue edges crossing parallel boundaries
    pub check_recursion_in_parallel: bool,
    /// Fork/join pairing
    pub check_fork_join_structure: bool,
    /// Multicast advisory (warning-only)
    pub check_multicast: bool,
    /// Self-communication (off by default for dynamic participants)
    pub check_self_communication: bool,
    /// Branches that are immediately the merge
    pub check_empty_choice_branch: bool,
    /// Branch convergence at a common merge
    pub check_merge_reachability: bool,
    /// Promote warnings to errors in `flatten`
    pub strict_mode: bool,
}

impl Default for VerificationOptions {
    fn default() -> Self {
        Self {
            check_deadlock: true,
            check_liveness: true,
            check_parallel_deadlock: true,
            check_race_conditions: true,
            check_progress: true,
            check_choice_determinism: true,
            check_choice_mergeability: true,
            check_connectedness: true,
            check_nested_recursion: true,
            check_recursion_in_parallel: true,
            check_fork_join_structure: true,
            check_multicast: true,
            check_self_communication: false,
            check_empty_choice_branch: true,
            check_merge_reachability: true,
            strict_mode: false,
        }
    }
}

impl VerificationOptions {
    /// Everything on, warnings promoted
    pub fn strict() -> Self {
        Self {
            check_self_communication: true,
            strict_mode: true,
            ..Self::default()
        }
    }

    /// Everything off (structural rechecks still run)
    pub fn none() -> Self {
        Self {
            check_deadlock: false,
            check_liveness: false,
            check_parallel_deadlock: false,
            check_race_conditions: false,
            check_progress: false,
            check_choice_determinism: false,
            check_choice_mergeability: false,
            check_connectedness: false,
            check_nested_recursion: false,
            check_recursion_in_parallel: false,
            check_fork_join_structure: false,
            check_multicast: false,
            check_self_communication: false,
            check_empty_choice_branch: false,
            check_merge_reachability: false,
            strict_mode: false,
        }
    }
}

/// The check runner
#[derive(Debug, Clone, Default)]
pub struct Verifier {
    options: VerificationOptions,
}

impl Verifier {
    /// Verifier with explicit options
    pub fn new(options: VerificationOptions) -> Self {
        Self { options }
    }

    /// The active options
    pub fn options(&self) -> &VerificationOptions {
        &self.options
    }

    /// Run every enabled check; never fails
    pub fn verify(&self, cfg: &Cfg) -> VerificationReport {
        let o = &self.options;
        let span = tracing::debug_span!("verify", protocol = %cfg.protocol_name);
        let _guard = span.enter();

        let report = VerificationReport {
            structural: checks::check_structural(cfg),
            deadlock: run_if(o.check_deadlock, cfg, checks::check_deadlock),
            liveness: run_if(o.check_liveness, cfg, checks::check_liveness),
            parallel_deadlock: run_if(o.check_parallel_deadlock, cfg, checks::check_parallel_deadlock),
            race_conditions: run_if(o.check_race_conditions, cfg, checks::check_race_conditions),
            progress: run_if(o.check_progress, cfg, checks::check_progress),
            choice_determinism: run_if(o.check_choice_determinism, cfg, checks::check_choice_determinism),
            choice_mergeability: run_if(o.check_choice_mergeability, cfg, checks::check_choice_mergeability),
            connectedness: run_if(o.check_connectedness, cfg, checks::check_connectedness),
            nested_recursion: run_if(o.check_nested_recursion, cfg, checks::check_nested_recursion),
            recursion_in_parallel: run_if(o.check_recursion_in_parallel, cfg, checks::check_recursion_in_parallel),
            fork_join_structure: run_if(o.check_fork_join_structure, cfg, checks::check_fork_join_structure),
            multicast: run_if(o.check_multicast, cfg, checks::check_multicast),
            self_communication: run_if(o.check_self_communication, cfg, checks::check_self_communication),
            empty_choice_branch: run_if(o.check_empty_choice_branch, cfg, checks::check_empty_choice_branch),
            merge_reachability: run_if(o.check_merge_reachability, cfg, checks::check_merge_reachability),
            strict_mode: o.strict_mode,
        };

        tracing::debug!(
            errors = report.flatten().errors.len(),
            warnings = report.flatten().warnings.len(),
            "verification finished"
        );
        report
    }
}

fn run_if(enabled: bool, cfg: &Cfg, check: fn(&Cfg) -> Vec<Finding>) -> Vec<Finding> {
    if enabled {
        check(cfg)
    } else {
        Vec::new()
    }
}

/// Verify with default options
pub fn verify(cfg: &Cfg) -> VerificationReport {
    Verifier::default().verify(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ChoiceBranch, GlobalInteraction, ProtocolDecl};
    use crate::builder::build_cfg;
    use crate::cfg::{Action, EdgeType, Node, Recipients};

    fn msg(from: &str, to: &str, label: &str, cont: GlobalInteraction) -> GlobalInteraction {
        GlobalInteraction::message(from, to, label, cont)
    }

    fn verify_decl(decl: &ProtocolDecl) -> VerificationReport {
        verify(&build_cfg(decl).unwrap())
    }

    #[test]
    fn test_clean_linear_protocol_passes() {
        let report = verify_decl(&ProtocolDecl::new(
            "Ping",
            ["A", "B"],
            msg("A", "B", "Ping", msg("B", "A", "Pong", GlobalInteraction::end())),
        ));
        assert!(report.is_valid());
        assert!(report.flatten().warnings.is_empty());
    }

    #[test]
    fn test_empty_protocol_passes() {
        // A role that never participates would trip connectedness, so the
        // empty protocol is declared without roles.
        let report = verify_decl(&ProtocolDecl::new("Empty", [] as [&str; 0], GlobalInteraction::end()));
        assert!(report.is_valid());
    }

    #[test]
    fn test_unused_role_trips_connectedness() {
        let report = verify_decl(&ProtocolDecl::new(
            "Lonely",
            ["A", "B", "Ghost"],
            msg("A", "B", "Hi", GlobalInteraction::end()),
        ));
        assert!(!report.is_valid());
        assert_eq!(report.connectedness.len(), 1);
        assert_eq!(report.connectedness[0].roles, vec!["Ghost"]);
    }

    #[test]
    fn test_duplicate_choice_labels_trip_determinism() {
        let report = verify_decl(&ProtocolDecl::new(
            "Ambiguous",
            ["S", "C"],
            GlobalInteraction::choice(
                "S",
                vec![
                    ChoiceBranch::new("l", msg("S", "C", "Same", GlobalInteraction::end())),
                    ChoiceBranch::new("r", msg("S", "C", "Same", GlobalInteraction::end())),
                ],
                GlobalInteraction::end(),
            ),
        ));
        assert_eq!(report.choice_determinism.len(), 1);
        assert_eq!(report.choice_determinism[0].roles, vec!["S"]);
    }

    #[test]
    fn test_branch_local_role_trips_mergeability() {
        let report = verify_decl(&ProtocolDecl::new(
            "Lopsided",
            ["S", "C", "Audit"],
            GlobalInteraction::choice(
                "S",
                vec![
                    ChoiceBranch::new(
                        "logged",
                        msg("S", "C", "Ok", msg("S", "Audit", "Log", GlobalInteraction::end())),
                    ),
                    ChoiceBranch::new("quiet", msg("S", "C", "Ok2", GlobalInteraction::end())),
                ],
                GlobalInteraction::end(),
            ),
        ));
        assert!(report
            .choice_mergeability
            .iter()
            .any(|f| f.roles.contains(&"Audit".to_string())));
    }

    #[test]
    fn test_race_on_shared_channel() {
        let report = verify_decl(&ProtocolDecl::new(
            "Racy",
            ["A", "B"],
            GlobalInteraction::parallel(
                vec![
                    msg("A", "B", "First", GlobalInteraction::end()),
                    msg("A", "B", "Second", GlobalInteraction::end()),
                ],
                GlobalInteraction::end(),
            ),
        ));
        assert!(!report.race_conditions.is_empty());
        // The same shape also trips the duplicate-sender rule.
        assert!(!report.parallel_deadlock.is_empty());
    }

    #[test]
    fn test_disjoint_parallel_is_clean() {
        let report = verify_decl(&ProtocolDecl::new(
            "TwoPhase",
            ["P1", "P2", "C"],
            GlobalInteraction::parallel(
                vec![
                    msg("P1", "C", "Vote", GlobalInteraction::end()),
                    msg("P2", "C", "Vote", GlobalInteraction::end()),
                ],
                GlobalInteraction::end(),
            ),
        ));
        assert!(report.race_conditions.is_empty());
        assert!(report.parallel_deadlock.is_empty());
        assert!(report.is_valid());
    }

    #[test]
    fn test_multicast_is_warning_only() {
        let report = verify_decl(&ProtocolDecl::new(
            "Broadcast",
            ["A", "B", "C"],
            GlobalInteraction::multicast("A", ["B", "C"], "Announce", GlobalInteraction::end()),
        ));
        assert!(report.is_valid());
        assert_eq!(report.multicast.len(), 1);
        assert_eq!(report.flatten().warnings.len(), 1);
    }

    #[test]
    fn test_strict_mode_fails_on_multicast() {
        let cfg = build_cfg(&ProtocolDecl::new(
            "Broadcast",
            ["A", "B", "C"],
            GlobalInteraction::multicast("A", ["B", "C"], "Announce", GlobalInteraction::end()),
        ))
        .unwrap();
        let report = Verifier::new(VerificationOptions::strict()).verify(&cfg);
        assert!(!report.is_valid());
    }

    #[test]
    fn test_self_communication_off_by_default() {
        let decl = ProtocolDecl::new(
            "Selfie",
            ["A", "B"],
            msg("A", "A", "Note", msg("A", "B", "Hi", GlobalInteraction::end())),
        );
        let report = verify_decl(&decl);
        assert!(report.self_communication.is_empty());

        let mut options = VerificationOptions::default();
        options.check_self_communication = true;
        let report = Verifier::new(options).verify(&build_cfg(&decl).unwrap());
        assert_eq!(report.self_communication.len(), 1);
    }

    #[test]
    fn test_empty_choice_branch_flagged() {
        let report = verify_decl(&ProtocolDecl::new(
            "HasEmpty",
            ["S", "C"],
            GlobalInteraction::choice(
                "S",
                vec![
                    ChoiceBranch::new("full", msg("S", "C", "X", GlobalInteraction::end())),
                    ChoiceBranch::new("empty", GlobalInteraction::end()),
                ],
                msg("S", "C", "After", GlobalInteraction::end()),
            ),
        ));
        assert_eq!(report.empty_choice_branch.len(), 1);
    }

    #[test]
    fn test_recursion_protocol_is_not_a_deadlock() {
        let report = verify_decl(&ProtocolDecl::new(
            "Loop",
            ["A", "B"],
            GlobalInteraction::rec(
                "L",
                msg("A", "B", "Data", GlobalInteraction::continue_("L")),
                GlobalInteraction::end(),
            ),
        ));
        assert!(report.deadlock.is_empty());
        // Infinite on purpose: nodes are reachable from the continue target.
        assert!(report.liveness.is_empty());
    }

    #[test]
    fn test_handmade_cycle_is_a_deadlock() {
        let mut cfg = Cfg::new("Cycle", vec!["A".to_string(), "B".to_string()]);
        cfg.add_node("initial", Node::Initial);
        cfg.add_node(
            "a",
            Node::Action {
                action: Action::Message {
                    from: "A".to_string(),
                    to: Recipients::one("B"),
                    label: "M1".to_string(),
                    payload_type: None,
                },
            },
        );
        cfg.add_node(
            "b",
            Node::Action {
                action: Action::Message {
                    from: "B".to_string(),
                    to: Recipients::one("A"),
                    label: "M2".to_string(),
                    payload_type: None,
                },
            },
        );
        cfg.add_edge("initial", "a", EdgeType::Sequence).unwrap();
        cfg.add_edge("a", "b", EdgeType::Sequence).unwrap();
        cfg.add_edge("b", "a", EdgeType::Sequence).unwrap();

        let report = verify(&cfg);
        assert!(!report.deadlock.is_empty());
        // The cycle also starves the liveness check of a terminal.
        assert!(!report.liveness.is_empty());
        assert!(!report.is_valid());
    }

    #[test]
    fn test_continue_crossing_parallel_boundary() {
        // rec L { par { A->B: In; continue L || C->D: Other } }
        // The continue escapes its branch.
        let decl = ProtocolDecl::new(
            "Escape",
            ["A", "B", "C", "D"],
            GlobalInteraction::rec(
                "L",
                GlobalInteraction::parallel(
                    vec![
                        msg("A", "B", "In", GlobalInteraction::continue_("L")),
                        msg("C", "D", "Other", GlobalInteraction::end()),
                    ],
                    GlobalInteraction::end(),
                ),
                GlobalInteraction::end(),
            ),
        );
        let report = verify_decl(&decl);
        assert!(!report.recursion_in_parallel.is_empty());
    }

    #[test]
    fn test_disabled_checks_stay_silent() {
        let cfg = build_cfg(&ProtocolDecl::new(
            "Lonely",
            ["A", "B", "Ghost"],
            msg("A", "B", "Hi", GlobalInteraction::end()),
        ))
        .unwrap();
        let report = Verifier::new(VerificationOptions::none()).verify(&cfg);
        assert!(report.connectedness.is_empty());
        assert!(report.is_valid());
    }
}
