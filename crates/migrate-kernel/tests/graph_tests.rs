use migrate_kernel::error::GraphError;
use migrate_kernel::graph::PipelineGraph;
use migrate_test_utils::{scripted_chain, ScriptedStage};
use proptest::prelude::*;

fn builder(names: &[String], edges: &[(usize, usize)]) -> migrate_kernel::graph::PipelineGraphBuilder {
    let mut b = PipelineGraph::builder();
    for name in names {
        b.add_stage(ScriptedStage::says(name.clone(), "ok"));
    }
    for &(from, to) in edges {
        b.add_edge(names[from].clone(), names[to].clone());
    }
    b
}

proptest! {
    #[test]
    fn prop_forward_edges_build_and_respect_order(
        node_count in 1..12usize,
        extra in proptest::collection::vec((0..12usize, 0..12usize), 0..30)
    ) {
        let names: Vec<String> = (0..node_count).map(|i| format!("s{i}")).collect();
        // spine from s0 keeps a single entry; extra edges only point forward
        let mut edges: Vec<(usize, usize)> = (1..node_count).map(|i| (i - 1, i)).collect();
        edges.extend(
            extra
                .into_iter()
                .filter(|&(a, b)| a < node_count && b < node_count && a < b),
        );

        let graph = builder(&names, &edges).build().unwrap();
        let order = graph.topological_order();
        prop_assert_eq!(order.len(), node_count);
        prop_assert_eq!(graph.entry(), "s0");

        let position = |name: &str| order.iter().position(|n| *n == name).unwrap();
        for &(a, b) in &edges {
            prop_assert!(position(&names[a]) < position(&names[b]));
        }
    }

    #[test]
    fn prop_back_edge_is_rejected(node_count in 2..10usize, back in 0..10usize) {
        let names: Vec<String> = (0..node_count).map(|i| format!("s{i}")).collect();
        let mut edges: Vec<(usize, usize)> = (1..node_count).map(|i| (i - 1, i)).collect();
        // target above the entry so s0 stays the only stage without in-edges
        let target = 1 + back % (node_count - 1);
        edges.push((node_count - 1, target));

        let err = builder(&names, &edges).build().unwrap_err();
        prop_assert!(matches!(err, GraphError::Cycle(_)));
    }
}

#[test]
fn test_rejects_simple_cycle() {
    // Entry -> A -> B -> A
    let names: Vec<String> = ["entry", "a", "b"].iter().map(ToString::to_string).collect();
    let err = builder(&names, &[(0, 1), (1, 2), (2, 1)]).build().unwrap_err();
    assert!(matches!(err, GraphError::Cycle(_)));
}

#[test]
fn test_every_stage_with_incoming_edge_has_no_entry() {
    // A -> B -> A: both stages have an incoming edge, and the entry check
    // runs before cycle detection
    let names: Vec<String> = ["a", "b"].iter().map(ToString::to_string).collect();
    let err = builder(&names, &[(0, 1), (1, 0)]).build().unwrap_err();
    assert_eq!(err, GraphError::NoEntryPoint { found: vec![] });
}

#[test]
fn test_two_roots_have_no_single_entry() {
    let names: Vec<String> = ["a", "b", "c"].iter().map(ToString::to_string).collect();
    let err = builder(&names, &[(0, 2), (1, 2)]).build().unwrap_err();
    assert_eq!(
        err,
        GraphError::NoEntryPoint {
            found: vec!["a".to_string(), "b".to_string()]
        }
    );
}

#[test]
fn test_self_loop_is_rejected() {
    let names: Vec<String> = ["a", "b"].iter().map(ToString::to_string).collect();
    let err = builder(&names, &[(0, 1), (1, 1)]).build().unwrap_err();
    assert!(matches!(err, GraphError::Cycle(ref s) if s == "b"));
}

#[test]
fn test_fan_out_fan_in() {
    let names: Vec<String> = ["setup", "schema", "export", "validate"]
        .iter()
        .map(ToString::to_string)
        .collect();
    let graph = builder(&names, &[(0, 1), (0, 2), (1, 3), (2, 3)])
        .build()
        .unwrap();
    assert_eq!(graph.topological_order(), vec!["setup", "schema", "export", "validate"]);
    assert_eq!(graph.successors("setup"), vec!["schema", "export"]);
    assert_eq!(graph.predecessors("validate"), vec!["schema", "export"]);
    assert!(graph.stage("export").is_some());
    assert!(graph.stage("ghost").is_none());
}

#[test]
fn test_scripted_chain_helper() {
    let graph = scripted_chain(6, "ok").unwrap();
    assert_eq!(graph.len(), 6);
    assert_eq!(graph.entry(), "stage_0");
}
