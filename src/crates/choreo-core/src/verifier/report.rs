//! Verification findings and the report shape
//!
//! Every check produces [`Finding`]s; the [`VerificationReport`] groups them
//! per check in a stable field order, and [`VerificationReport::flatten`]
//! reduces the report to the `{valid, errors, warnings}` triple callers
//! branch on. With `strict_mode`, warnings are promoted to errors during
//! flattening.

use serde::{Deserialize, Serialize};

use crate::cfg::{NodeId, RoleName};

/// Finding severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// A well-formedness violation
    Error,
    /// An advisory observation
    Warning,
}

/// Stable classification of a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    /// A structural invariant of the CFG does not hold
    Structural,
    /// A cycle not explained by recursion
    Deadlock,
    /// A node that can neither finish nor loop
    StuckState,
    /// Conflicting send obligations or cross-branch waits in a parallel
    ParallelDeadlock,
    /// Two parallel branches share a channel
    RaceCondition,
    /// A non-terminal node without outgoing edges
    ProgressViolation,
    /// Two branches of one choice start with the same label
    ChoiceDeterminism,
    /// A role participates in some branches of a choice but not all
    ChoiceMergeability,
    /// A declared role that never participates
    Connectedness,
    /// A continue edge escaping its recursion's lexical scope
    NestedRecursion,
    /// A continue edge crossing a parallel boundary
    RecursionInParallel,
    /// Fork/join pairing broken
    ForkJoinStructure,
    /// A message with a set-valued recipient
    Multicast,
    /// A role messaging itself
    SelfCommunication,
    /// A choice branch that is immediately the merge
    EmptyChoiceBranch,
    /// Choice branches that neither converge nor loop
    MergeReachability,
}

impl FindingKind {
    /// Stable kebab-case discriminator
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Structural => "structural",
            Self::Deadlock => "deadlock",
            Self::StuckState => "stuck-state",
            Self::ParallelDeadlock => "parallel-deadlock",
            Self::RaceCondition => "race-condition",
            Self::ProgressViolation => "progress-violation",
            Self::ChoiceDeterminism => "choice-determinism",
            Self::ChoiceMergeability => "choice-mergeability",
            Self::Connectedness => "connectedness",
            Self::NestedRecursion => "nested-recursion",
            Self::RecursionInParallel => "recursion-in-parallel",
            Self::ForkJoinStructure => "fork-join-structure",
            Self::Multicast => "multicast",
            Self::SelfCommunication => "self-communication",
            Self::EmptyChoiceBranch => "empty-choice-branch",
            Self::MergeReachability => "merge-reachability",
        }
    }
}

/// One verification finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Classification
    pub kind: FindingKind,
    /// Severity before any strict-mode promotion
    pub severity: Severity,
    /// Human-readable description
    pub message: String,
    /// Node ids the finding anchors to
    pub nodes: Vec<NodeId>,
    /// Roles the finding names
    pub roles: Vec<RoleName>,
}

impl Finding {
    /// An error finding
    pub fn error(kind: FindingKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Error,
            message: message.into(),
            nodes: Vec::new(),
            roles: Vec::new(),
        }
    }

    /// A warning finding
    pub fn warning(kind: FindingKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Warning,
            message: message.into(),
            nodes: Vec::new(),
            roles: Vec::new(),
        }
    }

    /// Anchor the finding to a node
    pub fn with_node(mut self, node: impl Into<NodeId>) -> Self {
        self.nodes.push(node.into());
        self
    }

    /// Anchor the finding to several nodes
    pub fn with_nodes<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.nodes.extend(nodes.into_iter().map(Into::into));
        self
    }

    /// Name a role in the finding
    pub fn with_role(mut self, role: impl Into<RoleName>) -> Self {
        self.roles.push(role.into());
        self
    }
}

/// Per-check report with stable field order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Structural invariant violations (always checked)
    pub structural: Vec<Finding>,
    /// Structural deadlock findings
    pub deadlock: Vec<Finding>,
    /// Liveness findings
    pub liveness: Vec<Finding>,
    /// Parallel deadlock findings
    pub parallel_deadlock: Vec<Finding>,
    /// Race condition findings
    pub race_conditions: Vec<Finding>,
    /// Progress findings
    pub progress: Vec<Finding>,
    /// Choice determinism findings
    pub choice_determinism: Vec<Finding>,
    /// Choice mergeability findings
    pub choice_mergeability: Vec<Finding>,
    /// Connectedness findings
    pub connectedness: Vec<Finding>,
    /// Recursion scoping findings
    pub nested_recursion: Vec<Finding>,
    /// Continue-across-parallel findings
    pub recursion_in_parallel: Vec<Finding>,
    /// Fork/join pairing findings
    pub fork_join_structure: Vec<Finding>,
    /// Multicast advisories
    pub multicast: Vec<Finding>,
    /// Self-communication findings
    pub self_communication: Vec<Finding>,
    /// Empty-branch findings
    pub empty_choice_branch: Vec<Finding>,
    /// Merge convergence findings
    pub merge_reachability: Vec<Finding>,
    /// Whether flattening promotes warnings to errors
    pub strict_mode: bool,
}

/// Flat view of a report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatReport {
    /// Whether no errors remain after strict-mode promotion
    pub valid: bool,
    /// Error findings
    pub errors: Vec<Finding>,
    /// Warning findings
    pub warnings: Vec<Finding>,
}

impl VerificationReport {
    /// Every finding across all sections, in field order
    pub fn all_findings(&self) -> impl Iterator<Item = &Finding> {
        [
            &self.structural,
            &self.deadlock,
            &self.liveness,
            &self.parallel_deadlock,
            &self.race_conditions,
            &self.progress,
            &self.choice_determinism,
            &self.choice_mergeability,
            &self.connectedness,
            &self.nested_recursion,
            &self.recursion_in_parallel,
            &self.fork_join_structure,
            &self.multicast,
            &self.self_communication,
            &self.empty_choice_branch,
            &self.merge_reachability,
        ]
        .into_iter()
        .flatten()
    }

    /// Reduce to `{valid, errors, warnings}`
    ///
    /// With `strict_mode`, every warning is promoted to an error.
    pub fn flatten(&self) -> FlatReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        for finding in self.all_findings() {
            match finding.severity {
                Severity::Error => errors.push(finding.clone()),
                Severity::Warning if self.strict_mode => {
                    let mut promoted = finding.clone();
                    promoted.severity = Severity::Error;
                    errors.push(promoted);
                }
                Severity::Warning => warnings.push(finding.clone()),
            }
        }
        FlatReport {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Shorthand for `flatten().valid`
    pub fn is_valid(&self) -> bool {
        self.flatten().valid
    }

    /// Render the report as pretty-printed JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_separates_severities() {
        let mut report = VerificationReport::default();
        report
            .deadlock
            .push(Finding::error(FindingKind::Deadlock, "cycle"));
        report
            .multicast
            .push(Finding::warning(FindingKind::Multicast, "set recipient"));

        let flat = report.flatten();
        assert!(!flat.valid);
        assert_eq!(flat.errors.len(), 1);
        assert_eq!(flat.warnings.len(), 1);
    }

    #[test]
    fn test_strict_mode_promotes_warnings() {
        let mut report = VerificationReport {
            strict_mode: true,
            ..Default::default()
        };
        report
            .multicast
            .push(Finding::warning(FindingKind::Multicast, "set recipient"));

        let flat = report.flatten();
        assert!(!flat.valid);
        assert_eq!(flat.errors.len(), 1);
        assert_eq!(flat.errors[0].severity, Severity::Error);
        assert!(flat.warnings.is_empty());
    }

    #[test]
    fn test_empty_report_is_valid() {
        assert!(VerificationReport::default().is_valid());
    }

    #[test]
    fn test_finding_kind_discriminators() {
        assert_eq!(FindingKind::StuckState.kind(), "stuck-state");
        assert_eq!(FindingKind::RaceCondition.kind(), "race-condition");
        assert_eq!(FindingKind::MergeReachability.kind(), "merge-reachability");
    }
}
