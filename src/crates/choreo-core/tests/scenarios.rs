//! End-to-end scenarios over the full pipeline: AST -> CFG -> verifier ->
//! projection -> simulators.

use std::sync::Arc;

use choreo_core::ast::{ChoiceBranch, GlobalInteraction, ProtocolDecl};
use choreo_core::builder::build_cfg;
use choreo_core::projection::project_all;
use choreo_core::simulator::{
    CfgSimulator, CfgSimulatorConfig, ChoiceStrategy, DistributedRunOutcome,
    DistributedSimulator, DistributedSimulatorConfig, SimulatorEvent,
};
use choreo_core::trace::TraceEvent;
use choreo_core::verifier;

fn msg(from: &str, to: &str, label: &str, cont: GlobalInteraction) -> GlobalInteraction {
    GlobalInteraction::message(from, to, label, cont)
}

fn auto_first() -> CfgSimulatorConfig {
    CfgSimulatorConfig {
        choice_strategy: ChoiceStrategy::First,
        ..CfgSimulatorConfig::default()
    }
}

fn orchestrate(decl: &ProtocolDecl) -> CfgSimulator {
    CfgSimulator::new(Arc::new(build_cfg(decl).unwrap()), auto_first()).unwrap()
}

/// Scenario (a): request/response emits exactly two messages in order.
#[test]
fn request_response_round_trip() {
    let decl = ProtocolDecl::new(
        "RequestResponse",
        ["Client", "Server"],
        msg(
            "Client",
            "Server",
            "Request",
            msg("Server", "Client", "Response", GlobalInteraction::end()),
        ),
    );

    let cfg = build_cfg(&decl).unwrap();
    assert!(verifier::verify(&cfg).is_valid());

    let mut sim = CfgSimulator::new(Arc::new(cfg), auto_first()).unwrap();
    let result = sim.run();
    assert!(result.completed);

    let labels: Vec<String> = result
        .trace
        .entries
        .iter()
        .filter_map(|e| match &e.event {
            TraceEvent::Message { label, .. } => Some(label.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(labels, vec!["Request", "Response"]);
}

/// Scenario (b): a three-party chain terminates under round-robin with one
/// send and one receive per role, in causal order.
#[test]
fn three_party_linear_distributed() {
    let decl = ProtocolDecl::new(
        "Chain",
        ["A", "B", "C"],
        msg(
            "A",
            "B",
            "M1",
            msg("B", "C", "M2", msg("C", "A", "M3", GlobalInteraction::end())),
        ),
    );
    let cfg = build_cfg(&decl).unwrap();
    assert!(verifier::verify(&cfg).is_valid());

    let mut sim =
        DistributedSimulator::from_projection(&cfg, DistributedSimulatorConfig::default())
            .unwrap();
    let result = sim.run();
    assert_eq!(result.outcome, DistributedRunOutcome::Completed);

    // Three sends and three receives across six global steps.
    assert_eq!(result.global_steps, 6);
    for role in ["A", "B", "C"] {
        let trace = &result.traces[role];
        let sends = trace
            .filter(|e| matches!(e, TraceEvent::Send { .. }))
            .count();
        let receives = trace
            .filter(|e| matches!(e, TraceEvent::Receive { .. }))
            .count();
        assert_eq!(sends, 1, "role {} sends once", role);
        assert_eq!(receives, 1, "role {} receives once", role);
    }

    // Causal order: B receives M1 before sending M2.
    let b_events: Vec<&TraceEvent> = result.traces["B"].entries.iter().map(|e| &e.event).collect();
    assert!(matches!(b_events[0], TraceEvent::Receive { label, .. } if label == "M1"));
    assert!(matches!(b_events[1], TraceEvent::Send { label, .. } if label == "M2"));
}

/// Scenario (c): auto-first choice selects branch 0 and emits its message.
#[test]
fn choice_with_auto_first_strategy() {
    let decl = ProtocolDecl::new(
        "Outcome",
        ["Server", "Client"],
        GlobalInteraction::choice(
            "Server",
            vec![
                ChoiceBranch::new(
                    "success",
                    msg("Server", "Client", "Success", GlobalInteraction::end()),
                ),
                ChoiceBranch::new(
                    "failure",
                    msg("Server", "Client", "Failure", GlobalInteraction::end()),
                ),
            ],
            GlobalInteraction::end(),
        ),
    );
    let mut sim = orchestrate(&decl);

    let selected = sim.step().unwrap();
    assert!(matches!(
        selected,
        SimulatorEvent::ChoiceSelected { index: 0, .. }
    ));
    let message = sim.step().unwrap();
    assert!(matches!(
        message,
        SimulatorEvent::Message { ref label, .. } if label == "Success"
    ));
}

/// Scenario (d): two-phase-commit style parallel votes interleave
/// deterministically: fork, two messages by branch index, join.
#[test]
fn two_phase_commit_parallel_votes() {
    let decl = ProtocolDecl::new(
        "TwoPhaseCommit",
        ["P1", "P2", "Coordinator"],
        GlobalInteraction::parallel(
            vec![
                msg("P1", "Coordinator", "Vote", GlobalInteraction::end()),
                msg("P2", "Coordinator", "Vote", GlobalInteraction::end()),
            ],
            GlobalInteraction::end(),
        ),
    );
    let mut sim = orchestrate(&decl);

    assert!(matches!(
        sim.step().unwrap(),
        SimulatorEvent::Fork { branch_count: 2, .. }
    ));
    let first = sim.step().unwrap();
    assert!(matches!(
        first,
        SimulatorEvent::Message { ref from, .. } if from == "P1"
    ));
    let second = sim.step().unwrap();
    assert!(matches!(
        second,
        SimulatorEvent::Message { ref from, .. } if from == "P2"
    ));
    assert!(matches!(sim.step().unwrap(), SimulatorEvent::Join { .. }));
    assert!(matches!(sim.step().unwrap(), SimulatorEvent::Complete { .. }));
}

/// Scenario (e): mutual receives deadlock with both roles reported blocked.
#[test]
fn mutual_wait_deadlock() {
    use choreo_core::cfsm::{Cfsm, LocalAction};

    let mut a = Cfsm::new("A", "s0");
    a.add_transition("s0", "s1", LocalAction::receive("B", "X"));
    a.mark_terminal("s1");
    let mut b = Cfsm::new("B", "s0");
    b.add_transition("s0", "s1", LocalAction::receive("A", "Y"));
    b.mark_terminal("s1");

    let mut sim = DistributedSimulator::new(vec![a, b], DistributedSimulatorConfig::default());
    let result = sim.run();
    assert_eq!(
        result.outcome,
        DistributedRunOutcome::Deadlock {
            blocked_roles: vec!["A".to_string(), "B".to_string()]
        }
    );
}

/// Scenario (f): an exit-less recursion burns the whole budget on messages.
#[test]
fn bounded_recursion_hits_step_budget() {
    let decl = ProtocolDecl::new(
        "Forever",
        ["A", "B"],
        GlobalInteraction::rec(
            "L",
            msg("A", "B", "Data", GlobalInteraction::continue_("L")),
            GlobalInteraction::end(),
        ),
    );
    let config = CfgSimulatorConfig {
        max_steps: 5,
        choice_strategy: ChoiceStrategy::First,
        ..CfgSimulatorConfig::default()
    };
    let mut sim = CfgSimulator::new(Arc::new(build_cfg(&decl).unwrap()), config).unwrap();
    let result = sim.run();

    assert!(!result.completed);
    assert!(result.reached_max_steps);
    let messages = result
        .trace
        .filter(|e| matches!(e, TraceEvent::Message { .. }))
        .count();
    assert_eq!(messages, 5);
}

/// The full pipeline agrees with itself: a verifier-clean protocol projects
/// without errors and completes both orchestrated and distributed.
#[test]
fn pipeline_end_to_end() {
    let decl = ProtocolDecl::new(
        "Purchase",
        ["Buyer", "Seller"],
        msg(
            "Buyer",
            "Seller",
            "Quote",
            GlobalInteraction::choice(
                "Seller",
                vec![
                    ChoiceBranch::new(
                        "accept",
                        msg(
                            "Seller",
                            "Buyer",
                            "Price",
                            msg("Buyer", "Seller", "Confirm", GlobalInteraction::end()),
                        ),
                    ),
                    ChoiceBranch::new(
                        "reject",
                        msg("Seller", "Buyer", "OutOfStock", GlobalInteraction::end()),
                    ),
                ],
                GlobalInteraction::end(),
            ),
        ),
    );

    let cfg = build_cfg(&decl).unwrap();
    let report = verifier::verify(&cfg);
    assert!(report.is_valid(), "unexpected findings: {:?}", report.flatten().errors);

    let (machines, errors) = project_all(&cfg);
    assert!(errors.is_empty());
    assert_eq!(machines.len(), 2);

    let mut orchestrated = CfgSimulator::new(Arc::new(cfg.clone()), auto_first()).unwrap();
    assert!(orchestrated.run().completed);

    let mut distributed =
        DistributedSimulator::from_projection(&cfg, DistributedSimulatorConfig::default())
            .unwrap();
    assert_eq!(distributed.run().outcome, DistributedRunOutcome::Completed);
}

/// A distributed choice: the decider's branch selection propagates through
/// labels alone.
#[test]
fn distributed_choice_resolves_by_label() {
    let decl = ProtocolDecl::new(
        "Outcome",
        ["Server", "Client"],
        GlobalInteraction::choice(
            "Server",
            vec![
                ChoiceBranch::new(
                    "success",
                    msg("Server", "Client", "Success", GlobalInteraction::end()),
                ),
                ChoiceBranch::new(
                    "failure",
                    msg("Server", "Client", "Failure", GlobalInteraction::end()),
                ),
            ],
            GlobalInteraction::end(),
        ),
    );
    let cfg = build_cfg(&decl).unwrap();

    let mut sim =
        DistributedSimulator::from_projection(&cfg, DistributedSimulatorConfig::default())
            .unwrap();
    let result = sim.run();
    assert_eq!(result.outcome, DistributedRunOutcome::Completed);

    // The first enabled choice marker picks the first branch, so the client
    // receives Success.
    let client_receives: Vec<String> = result.traces["Client"]
        .entries
        .iter()
        .filter_map(|e| match &e.event {
            TraceEvent::Receive { label, .. } => Some(label.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(client_receives, vec!["Success"]);
}

/// Sub-protocol invocation through the registry, end to end.
#[test]
fn subprotocol_invocation_with_role_substitution() {
    use choreo_core::registry::ProtocolRegistry;

    let handshake = build_cfg(&ProtocolDecl::new(
        "Handshake",
        ["Initiator", "Responder"],
        msg(
            "Initiator",
            "Responder",
            "Syn",
            msg("Responder", "Initiator", "Ack", GlobalInteraction::end()),
        ),
    ))
    .unwrap();

    let mut registry = ProtocolRegistry::new();
    registry.register(handshake);
    registry.validate().unwrap();

    let main = ProtocolDecl::new(
        "Session",
        ["Client", "Server"],
        GlobalInteraction::do_protocol(
            "Handshake",
            ["Client", "Server"],
            msg("Client", "Server", "Data", GlobalInteraction::end()),
        ),
    );
    let mut sim = orchestrate(&main).with_registry(Arc::new(registry));
    let result = sim.run();
    assert!(result.completed);

    // The sub-protocol's messages carry the caller's role names.
    let messages: Vec<(String, String)> = result
        .trace
        .entries
        .iter()
        .filter_map(|e| match &e.event {
            TraceEvent::Message { from, label, .. } => Some((from.clone(), label.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(
        messages,
        vec![
            ("Client".to_string(), "Syn".to_string()),
            ("Server".to_string(), "Ack".to_string()),
            ("Client".to_string(), "Data".to_string()),
        ]
    );
}
