use approx::assert_relative_eq;
use cascade_clearing::clearing::bookkeeping::{DefaultFloor, DefaultStatus};
use cascade_clearing::clearing::engine::ClearingEngine;
use cascade_clearing::clearing::request::ClearingRequest;
use cascade_clearing::core::config::{CarryPolicy, ClearingConfig};
use cascade_clearing::core::error::{ClearingError, InputViolation};
use cascade_clearing::core::node::NodeId;
use cascade_clearing::graph::builder::LiabilityGraphBuilder;
use cascade_clearing::graph::liability_graph::LiabilityGraph;
use cascade_clearing::simulation::stress_test::{generate_network, NetworkConfig};
use uuid::Uuid;

fn n(i: u32) -> NodeId {
    NodeId::new(i)
}

fn engine() -> ClearingEngine {
    ClearingEngine::new(ClearingConfig::default()).unwrap()
}

fn engine_with(policy: CarryPolicy) -> ClearingEngine {
    ClearingEngine::new(ClearingConfig::default().with_carry_policy(policy)).unwrap()
}

/// A owes B 100 and holds 40. Node 2 is the sink.
fn two_node_chain() -> LiabilityGraph {
    let mut builder = LiabilityGraphBuilder::new(3, n(2)).unwrap();
    builder.add_liability(n(0), n(1), 100.0).unwrap();
    builder.add_resources(n(0), 40.0).unwrap();
    builder.build()
}

/// A owes B 100, B owes C 100; only A has resources (50). Node 3 is the sink.
fn cascade_of_three() -> LiabilityGraph {
    let mut builder = LiabilityGraphBuilder::new(4, n(3)).unwrap();
    builder.add_liability(n(0), n(1), 100.0).unwrap();
    builder.add_liability(n(1), n(2), 100.0).unwrap();
    builder.add_resources(n(0), 50.0).unwrap();
    builder.build()
}

#[test]
fn two_node_chain_clears_partially() {
    let response = engine().clear(&ClearingRequest::new(1, two_node_chain())).unwrap();

    assert_eq!(response.ratio(n(0)), 0.4);
    assert_eq!(response.equity(n(0)), -60.0);
    assert_eq!(response.default_round(n(0)), 1);
    assert_eq!(response.ratio(n(1)), 1.0);
    assert_eq!(response.equity(n(1)), 40.0);
    assert_eq!(response.default_round(n(1)), 0);
    assert_eq!(response.status(n(1)), DefaultStatus::Solvent);
    // Round 1 finds the default, round 2 confirms nothing moves.
    assert_eq!(response.rounds, 2);
}

#[test]
fn cascade_of_three_defaults_one_hop_per_round() {
    let response = engine().clear(&ClearingRequest::new(1, cascade_of_three())).unwrap();

    assert_eq!(response.ratio(n(0)), 0.5);
    assert_eq!(response.ratio(n(1)), 0.5);
    assert_eq!(response.ratio(n(2)), 1.0);
    assert_eq!(response.status(n(0)), DefaultStatus::Defaulted { round: 1 });
    assert_eq!(response.status(n(1)), DefaultStatus::Defaulted { round: 2 });
    assert_eq!(response.status(n(2)), DefaultStatus::Solvent);
    assert_eq!(response.equity(n(0)), -50.0);
    assert_eq!(response.equity(n(1)), -50.0);
    assert_eq!(response.equity(n(2)), 50.0);
    assert_eq!(response.rounds, 3);

    let cascade: Vec<_> = response
        .round_summaries()
        .iter()
        .map(|s| (s.round, s.newly_defaulted, s.defaulted))
        .collect();
    assert_eq!(cascade, vec![(1, 1, 1), (2, 1, 2), (3, 0, 2)]);
    assert_eq!(response.defaulted_nodes(), vec![n(0), n(1)]);
}

#[test]
fn sink_absorbs_payments_and_never_defaults() {
    // A owes the sink 100 and B 50, with 30 in hand.
    let mut builder = LiabilityGraphBuilder::new(3, n(2)).unwrap();
    builder.add_liability(n(0), n(2), 100.0).unwrap();
    builder.add_liability(n(0), n(1), 50.0).unwrap();
    builder.add_resources(n(0), 30.0).unwrap();
    let response = engine().clear(&ClearingRequest::new(3, builder.build())).unwrap();

    assert_relative_eq!(response.ratio(n(0)), 0.2);
    assert_eq!(response.status(n(2)), DefaultStatus::Sink);
    assert_eq!(response.ratio(n(2)), 1.0);
    assert_relative_eq!(response.node(n(2)).received, 20.0, epsilon = 1e-9);
    assert_relative_eq!(response.node(n(1)).received, 10.0, epsilon = 1e-9);
    assert_eq!(response.totals().defaulted, 1);
}

#[test]
fn payments_are_conserved_across_the_network() {
    let config = NetworkConfig {
        node_count: 2_000,
        avg_edges_per_node: 8,
        seed: 11,
        ..Default::default()
    };
    let graph = generate_network(&config).unwrap();
    let response = engine().clear(&ClearingRequest::new(0, graph.clone())).unwrap();

    let paid: f64 = response.nodes().iter().map(|o| o.paid).sum();
    let received: f64 = response.nodes().iter().map(|o| o.received).sum();
    assert_relative_eq!(paid, received, max_relative = 1e-9);
    assert_relative_eq!(paid, response.totals().total_paid, max_relative = 1e-9);

    let equity: f64 = response.nodes().iter().map(|o| o.equity).sum();
    let own: f64 = graph.all_own_resources().iter().sum();
    assert_relative_eq!(
        equity,
        own - response.totals().total_nominal + paid,
        epsilon = 1e-3,
        max_relative = 1e-9
    );

    for node in graph.nodes() {
        let outcome = response.node(node);
        assert!((0.0..=1.0).contains(&outcome.ratio));
        assert!(outcome.paid <= graph.nominal_obligation(node) * (1.0 + 1e-12));
        assert_eq!(
            outcome.status.is_in_default(),
            outcome.ratio < 1.0 - 1e-4,
            "status and ratio disagree for {}",
            node
        );
    }
}

#[test]
fn hundred_thousand_nodes_converge_quickly() {
    let config = NetworkConfig {
        node_count: 100_000,
        avg_edges_per_node: 20,
        seed: 2024,
        ..Default::default()
    };
    let graph = generate_network(&config).unwrap();
    assert!(graph.edge_count() > 1_000_000);

    let response = engine().clear(&ClearingRequest::new(0, graph)).unwrap();
    let totals = response.totals();
    assert!(response.rounds < 1_000, "took {} rounds", response.rounds);
    assert!(totals.total_paid <= totals.total_nominal);
    assert!(totals.defaulted > 0);
    assert!(response.nodes().iter().all(|o| (0.0..=1.0).contains(&o.ratio)));
}

#[test]
fn floor_carries_default_into_next_iteration() {
    let engine = engine();
    let first = engine.clear(&ClearingRequest::new(1, two_node_chain())).unwrap();
    assert_eq!(first.next_floor().get(n(0)), Some(0.4));
    assert_eq!(first.next_floor().get(n(1)), None);

    // Next iteration A could pay in full, but stays in default at its floor.
    let mut builder = LiabilityGraphBuilder::new(3, n(2)).unwrap();
    builder.add_liability(n(0), n(1), 100.0).unwrap();
    builder.add_resources(n(0), 1_000.0).unwrap();
    let request = ClearingRequest::new(2, builder.build()).with_floor(first.next_floor().clone());
    let second = engine.clear(&request).unwrap();

    assert_eq!(second.status(n(0)), DefaultStatus::Carried);
    assert_eq!(second.default_round(n(0)), 0);
    assert_eq!(second.ratio(n(0)), 0.4);
    assert_eq!(second.totals().carried, 1);
    assert_eq!(second.next_floor().get(n(0)), Some(0.4));
}

#[test]
fn carry_policies_treat_the_floor_differently() {
    let floor = DefaultFloor::from_ratios(vec![Some(0.25), None, None, None]);
    let request = ClearingRequest::new(5, cascade_of_three()).with_floor(floor);

    let by_ratio = engine_with(CarryPolicy::CarryRatio).clear(&request).unwrap();
    assert_eq!(by_ratio.ratio(n(0)), 0.25);
    assert_eq!(by_ratio.status(n(0)), DefaultStatus::Carried);
    assert_eq!(by_ratio.ratio(n(1)), 0.25);

    let by_status = engine_with(CarryPolicy::CarryStatus).clear(&request).unwrap();
    assert_eq!(by_status.ratio(n(0)), 0.5);
    assert_eq!(by_status.status(n(0)), DefaultStatus::Carried);
    assert_eq!(by_status.next_floor().get(n(0)), Some(0.25));

    let fresh = engine_with(CarryPolicy::Reevaluate).clear(&request).unwrap();
    assert_eq!(fresh.ratio(n(0)), 0.5);
    assert_eq!(fresh.status(n(0)), DefaultStatus::Defaulted { round: 1 });
    assert_eq!(fresh.next_floor().get(n(0)), Some(0.5));
}

#[test]
fn request_and_response_survive_json() {
    let id = Uuid::new_v4();
    let request = ClearingRequest::new(9, cascade_of_three())
        .with_request_id(id)
        .with_floor(DefaultFloor::none(4));
    let json = serde_json::to_string(&request).unwrap();
    let back: ClearingRequest = serde_json::from_str(&json).unwrap();
    assert_eq!(back.request_id, id);
    assert_eq!(back.graph, request.graph);
    assert_eq!(back.floor, request.floor);

    let response = engine().clear(&back).unwrap();
    assert_eq!(response.request_id, id);
    assert_eq!(response.macro_iteration, 9);

    let value = serde_json::to_value(&response).unwrap();
    assert_eq!(value["nodes"][1]["status"]["kind"], "defaulted");
    assert_eq!(value["nodes"][1]["status"]["round"], 2);
    assert_eq!(value["nodes"][3]["status"]["kind"], "sink");
    assert_eq!(value["rounds"], 3);
}

#[test]
fn malformed_input_is_distinct_from_non_convergence() {
    // Negative edge amount.
    let bad = LiabilityGraph::from_raw_parts(
        n(2),
        vec![-5.0, 0.0, 0.0],
        vec![0.0, 0.0, 0.0],
        vec![0, 1, 1, 1],
        vec![n(1)],
        vec![-5.0],
    );
    let err = engine().clear(&ClearingRequest::new(0, bad)).unwrap_err();
    assert!(err.is_input_violation());
    assert!(!err.is_non_convergence());

    // Floor sized for a different snapshot.
    let request = ClearingRequest::new(0, two_node_chain()).with_floor(DefaultFloor::none(7));
    assert!(matches!(
        engine().clear(&request),
        Err(ClearingError::Input(InputViolation::LengthMismatch { field: "floor", .. }))
    ));

    // Mutual default that needs a confirming third round, capped at two.
    let mut builder = LiabilityGraphBuilder::new(3, n(2)).unwrap();
    builder.add_liability(n(0), n(1), 100.0).unwrap();
    builder.add_liability(n(1), n(0), 100.0).unwrap();
    builder.add_liability(n(0), n(2), 50.0).unwrap();
    builder.add_resources(n(0), 10.0).unwrap();
    let capped = ClearingEngine::new(ClearingConfig::default().with_max_rounds(2)).unwrap();
    let err = capped.clear(&ClearingRequest::new(0, builder.build())).unwrap_err();
    assert!(err.is_non_convergence());
    assert!(matches!(err, ClearingError::NonConvergence { rounds: 2, defaulted: 2, .. }));
}

#[test]
fn nearly_closed_default_cycle_reaches_exact_clearing_vector() {
    // A owes B 100; B owes A 100 and the sink 0.1 and holds 0.05. Almost
    // everything B pays comes straight back, so plain rounds would shrink
    // the pair by about 0.1% each time.
    let mut builder = LiabilityGraphBuilder::new(3, n(2)).unwrap();
    builder.add_liability(n(0), n(1), 100.0).unwrap();
    builder.add_liability(n(1), n(0), 100.0).unwrap();
    builder.add_liability(n(1), n(2), 0.1).unwrap();
    builder.add_resources(n(1), 0.05).unwrap();
    let graph = builder.build();
    let response = engine().clear(&ClearingRequest::new(0, graph.clone())).unwrap();

    // 100 p_A = 100 p_B and 100.1 p_B = 0.05 + 100 p_A, so p_A = p_B = 0.5.
    assert!(response.rounds as usize <= graph.node_count() + 1);
    assert_relative_eq!(response.ratio(n(0)), 0.5, epsilon = 1e-9);
    assert_relative_eq!(response.ratio(n(1)), 0.5, epsilon = 1e-9);
    assert_relative_eq!(response.equity(n(0)), -50.0, epsilon = 1e-6);
    assert_relative_eq!(response.equity(n(1)), -50.05, epsilon = 1e-6);
    assert_relative_eq!(response.node(n(2)).received, 0.05, epsilon = 1e-9);
    assert_eq!(response.status(n(1)), DefaultStatus::Defaulted { round: 1 });
    assert_eq!(response.status(n(0)), DefaultStatus::Defaulted { round: 2 });
}

#[test]
fn closed_loop_with_tiny_shortfall_drains_to_zero() {
    // A and B owe each other 100 and A starts in the hole. At a millionth
    // short, each pass round the loop loses only 1e-8 of a ratio.
    for shortfall in [30.0, 1e-6] {
        let mut builder = LiabilityGraphBuilder::new(3, n(2)).unwrap();
        builder.add_liability(n(0), n(1), 100.0).unwrap();
        builder.add_liability(n(1), n(0), 100.0).unwrap();
        builder.add_resources(n(0), -shortfall).unwrap();
        let graph = builder.build();
        let response = engine().clear(&ClearingRequest::new(0, graph.clone())).unwrap();

        assert!(response.rounds as usize <= graph.node_count() + 1);
        assert_eq!(response.ratio(n(0)), 0.0);
        assert_eq!(response.ratio(n(1)), 0.0);
        assert_eq!(response.totals().total_paid, 0.0);
        assert_eq!(response.defaulted_nodes().len(), 2);
    }
}

#[test]
fn nodes_without_liabilities_are_always_solvent() {
    let mut builder = LiabilityGraphBuilder::new(4, n(3)).unwrap();
    builder.add_resources(n(0), -500.0).unwrap();
    builder.add_resources(n(1), 0.0).unwrap();
    builder.add_resources(n(2), 75.0).unwrap();
    let response = engine().clear(&ClearingRequest::new(0, builder.build())).unwrap();

    assert!(response.nodes().iter().all(|o| o.ratio == 1.0));
    assert!(response.defaulted_nodes().is_empty());
    assert_eq!(response.equity(n(0)), -500.0);
    assert_eq!(response.totals().insolvent, 1);
    assert_eq!(response.rounds, 1);
}
