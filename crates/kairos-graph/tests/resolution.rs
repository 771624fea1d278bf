//! Integration test: group resolution and execution through the registry.
//!
//! Covers ordering with tie-breaks, cycle and self-reference detection,
//! net boundaries of nested groups, missing producers, write
//! confinement, checked mode, and execution counts.

use kairos_core::{BufferHandle, BufferSet, GraphError, NodeError, SolveError, Tensor};
use kairos_graph::{ComputeGraph, ComputeGroup, ComputeNode, ExecContext};
use kairos_store::BufferStore;
use kairos_test_utils::{execution_log, logged, ConstNode, CopyNode, IdentityDomain, TagNode};

fn store_with(names: &[&str]) -> BufferStore {
    let mut store = BufferStore::new();
    for name in names {
        store.register(name).unwrap();
    }
    store
}

fn unresolvable_node(err: GraphError) -> String {
    match err {
        GraphError::UnresolvableDependency { node, .. } => node,
        other => panic!("expected UnresolvableDependency, got {other:?}"),
    }
}

// ── Ordering ────────────────────────────────────────────────────────

#[test]
fn consumer_listed_first_runs_after_producer() {
    let store = store_with(&["x", "y"]);
    let mut graph = ComputeGraph::new();
    graph
        .add_node(Box::new(TagNode::new("B", ["x"], ["y"])))
        .unwrap();
    graph.add_node(Box::new(TagNode::new("A", [], ["x"]))).unwrap();
    let g = graph.add_group(ComputeGroup::new("G", ["B", "A"])).unwrap();

    graph.resolve(g, &store).unwrap();
    assert_eq!(graph.order_names(g), ["A", "B"]);
}

#[test]
fn independent_nodes_keep_configured_order() {
    let store = store_with(&["a", "b", "c"]);
    let mut graph = ComputeGraph::new();
    for (name, out) in [("n2", "b"), ("n0", "a"), ("n1", "c")] {
        graph
            .add_node(Box::new(TagNode::new(name, [], [out])))
            .unwrap();
    }
    let g = graph
        .add_group(ComputeGroup::new("G", ["n2", "n0", "n1"]))
        .unwrap();

    graph.resolve(g, &store).unwrap();
    let first = graph.order_names(g).join(",");
    graph.resolve(g, &store).unwrap();
    assert_eq!(first, "n2,n0,n1");
    assert_eq!(graph.order_names(g).join(","), first);
}

#[test]
fn member_list_order_overrides_registration_order() {
    let store = store_with(&["a", "b", "c"]);
    let mut graph = ComputeGraph::new();
    for (name, out) in [("n0", "a"), ("n1", "b"), ("n2", "c")] {
        graph
            .add_node(Box::new(TagNode::new(name, [], [out])))
            .unwrap();
    }
    let g = graph
        .add_group(ComputeGroup::new("G", ["n2", "n0", "n1"]))
        .unwrap();

    graph.resolve(g, &store).unwrap();
    assert_eq!(graph.order_names(g), ["n2", "n0", "n1"]);
}

// ── Cycles and self-reference ───────────────────────────────────────

#[test]
fn two_node_cycle_is_unresolvable() {
    let store = store_with(&["x", "y"]);
    let mut graph = ComputeGraph::new();
    graph
        .add_node(Box::new(TagNode::new("A", ["y"], ["x"])))
        .unwrap();
    graph
        .add_node(Box::new(TagNode::new("B", ["x"], ["y"])))
        .unwrap();
    let g = graph.add_group(ComputeGroup::new("G", ["A", "B"])).unwrap();

    let err = graph.resolve(g, &store).unwrap_err();
    assert_eq!(unresolvable_node(err), "A");
}

#[test]
fn group_containing_itself_is_reported() {
    let store = BufferStore::new();
    let mut graph = ComputeGraph::new();
    let g = graph.add_group(ComputeGroup::new("G", ["G"])).unwrap();

    let err = graph.resolve(g, &store).unwrap_err();
    assert_eq!(err.to_string(), "unresolvable dependency in 'G': G is using itself");
}

#[test]
fn mutually_nested_groups_are_reported() {
    let store = BufferStore::new();
    let mut graph = ComputeGraph::new();
    let outer = graph.add_group(ComputeGroup::new("outer", ["inner"])).unwrap();
    graph.add_group(ComputeGroup::new("inner", ["outer"])).unwrap();

    let err = graph.resolve(outer, &store).unwrap_err();
    assert_eq!(unresolvable_node(err), "outer");
}

#[test]
fn member_listed_twice_is_rejected() {
    let store = store_with(&["x"]);
    let mut graph = ComputeGraph::new();
    graph.add_node(Box::new(TagNode::new("A", [], ["x"]))).unwrap();
    let g = graph.add_group(ComputeGroup::new("G", ["A", "A"])).unwrap();

    assert_eq!(unresolvable_node(graph.resolve(g, &store).unwrap_err()), "G");
}

#[test]
fn visited_flags_reset_between_passes() {
    let store = store_with(&["x"]);
    let mut graph = ComputeGraph::new();
    let a = graph.add_node(Box::new(TagNode::new("A", [], ["x"]))).unwrap();
    let g = graph.add_group(ComputeGroup::new("G", ["A"])).unwrap();

    graph.resolve(g, &store).unwrap();
    assert!(graph.is_visited(a));
    graph.reset_visited();
    assert!(!graph.is_visited(a));
    graph.resolve(g, &store).unwrap();
}

#[test]
fn shared_member_across_roots_resolves_once() {
    let store = store_with(&["x", "y", "z"]);
    let mut graph = ComputeGraph::new();
    graph.add_node(Box::new(TagNode::new("A", [], ["x"]))).unwrap();
    graph
        .add_node(Box::new(TagNode::new("B", ["x"], ["y"])))
        .unwrap();
    graph
        .add_node(Box::new(TagNode::new("C", ["x"], ["z"])))
        .unwrap();
    let g1 = graph.add_group(ComputeGroup::new("G1", ["A", "B"])).unwrap();
    let g2 = graph.add_group(ComputeGroup::new("G2", ["A", "C"])).unwrap();

    graph.resolve_all(&[g1, g2], &store).unwrap();
    assert_eq!(graph.order_names(g2), ["A", "C"]);
}

// ── Boundaries ──────────────────────────────────────────────────────

#[test]
fn intermediate_buffer_is_hidden_from_parent() {
    let store = store_with(&["x", "y"]);
    let mut graph = ComputeGraph::new();
    graph.add_node(Box::new(TagNode::new("A", [], ["x"]))).unwrap();
    graph
        .add_node(Box::new(TagNode::new("B", ["x"], ["y"])))
        .unwrap();
    let g = graph.add_group(ComputeGroup::new("G", ["A", "B"])).unwrap();

    graph.resolve(g, &store).unwrap();
    assert!(graph.requested(g).is_empty());
    assert_eq!(graph.supplied(g), &BufferSet::from(["y"]));
}

#[test]
fn nested_group_is_ordered_by_its_boundary() {
    let store = store_with(&["x", "y", "z"]);
    let log = execution_log();
    let mut graph = ComputeGraph::new();
    graph
        .add_node(Box::new(TagNode::new("C", ["y"], ["z"]).with_log(&log)))
        .unwrap();
    graph
        .add_node(Box::new(TagNode::new("A", [], ["x"]).with_log(&log)))
        .unwrap();
    graph
        .add_node(Box::new(TagNode::new("B", ["x"], ["y"]).with_log(&log)))
        .unwrap();
    let inner = graph.add_group(ComputeGroup::new("inner", ["A", "B"])).unwrap();
    let outer = graph
        .add_group(ComputeGroup::new("outer", ["C", "inner"]))
        .unwrap();

    graph.resolve(outer, &store).unwrap();
    assert_eq!(graph.supplied(inner), &BufferSet::from(["y"]));
    assert_eq!(graph.order_names(outer), ["inner", "C"]);
    assert!(graph.requested(outer).is_empty());
    assert_eq!(graph.supplied(outer), &BufferSet::from(["z"]));

    let mut store = store;
    let domain = IdentityDomain::new(&[2]);
    graph.execute(outer, &mut store, &domain, 0.0, 0.1).unwrap();
    assert_eq!(logged(&log), ["A", "B", "C"]);
}

#[test]
fn unregistered_input_without_producer_is_unresolvable() {
    let store = store_with(&["out"]);
    let mut graph = ComputeGraph::new();
    graph
        .add_node(Box::new(TagNode::new("reader", ["ghost"], ["out"])))
        .unwrap();
    let g = graph.add_group(ComputeGroup::new("G", ["reader"])).unwrap();

    let err = graph.resolve(g, &store).unwrap_err();
    assert!(err.to_string().contains("ghost"), "{err}");
    assert_eq!(unresolvable_node(err), "reader");
}

#[test]
fn unknown_member_is_reported() {
    let store = BufferStore::new();
    let mut graph = ComputeGraph::new();
    let g = graph.add_group(ComputeGroup::new("G", ["missing"])).unwrap();

    assert_eq!(
        graph.resolve(g, &store).unwrap_err(),
        GraphError::UnknownNode {
            name: "missing".into()
        }
    );
}

#[test]
fn duplicate_node_name_is_rejected() {
    let mut graph = ComputeGraph::new();
    graph.add_node(Box::new(TagNode::new("A", [], []))).unwrap();
    let err = graph
        .add_node(Box::new(TagNode::new("A", [], [])))
        .unwrap_err();
    assert_eq!(err, GraphError::DuplicateNode { name: "A".into() });
}

// ── Execution ───────────────────────────────────────────────────────

#[test]
fn values_flow_through_resolved_order() {
    let mut store = BufferStore::new();
    let mut graph = ComputeGraph::new();
    let copy = CopyNode::new("copy", &mut store, "u", "v");
    let source = ConstNode::new("source", &mut store, "u", &[3], 2.0);
    graph.add_node(Box::new(copy)).unwrap();
    graph.add_node(Box::new(source)).unwrap();
    let g = graph
        .add_group(ComputeGroup::new("G", ["copy", "source"]))
        .unwrap();

    graph.resolve(g, &store).unwrap();
    let domain = IdentityDomain::new(&[3]);
    graph.execute(g, &mut store, &domain, 0.0, 1.0).unwrap();
    assert_eq!(store.current("v").unwrap(), &Tensor::filled(&[3], 2.0));
}

#[test]
fn execution_counts_track_groups_and_members() {
    let store = store_with(&["x"]);
    let mut graph = ComputeGraph::new();
    let a = graph.add_node(Box::new(TagNode::new("A", [], ["x"]))).unwrap();
    let g = graph.add_group(ComputeGroup::new("G", ["A"])).unwrap();
    graph.resolve(g, &store).unwrap();

    let mut store = store;
    let domain = IdentityDomain::new(&[1]);
    for _ in 0..3 {
        graph.execute(g, &mut store, &domain, 0.0, 1.0).unwrap();
    }
    assert_eq!(graph.execution_count(g), 3);
    assert_eq!(graph.execution_count(a), 3);
}

#[test]
fn executing_before_resolution_fails() {
    let mut store = store_with(&["x"]);
    let mut graph = ComputeGraph::new();
    let g = graph.add_group(ComputeGroup::new("G", Vec::<String>::new())).unwrap();

    let domain = IdentityDomain::new(&[1]);
    let err = graph.execute(g, &mut store, &domain, 0.0, 1.0).unwrap_err();
    assert!(matches!(err, SolveError::NodeFailed { ref node, .. } if node == "G"));
}

/// Declares `declared` as its output but writes `actual`.
struct RogueNode {
    declared: String,
    actual: BufferHandle,
}

impl ComputeNode for RogueNode {
    fn name(&self) -> &str {
        "rogue"
    }

    fn requested_items(&self) -> BufferSet {
        BufferSet::empty()
    }

    fn supplied_items(&self) -> BufferSet {
        BufferSet::from([self.declared.as_str()])
    }

    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Result<(), NodeError> {
        ctx.write(self.actual)?.fill(1.0);
        Ok(())
    }
}

#[test]
fn writing_outside_supplied_set_is_refused() {
    let mut store = store_with(&["mine"]);
    let theirs = store.register_with("theirs", Tensor::zeros(&[2])).unwrap();
    let mut graph = ComputeGraph::new();
    let id = graph
        .add_node(Box::new(RogueNode {
            declared: "mine".into(),
            actual: theirs,
        }))
        .unwrap();
    graph.resolve(id, &store).unwrap();

    let domain = IdentityDomain::new(&[2]);
    let err = graph.execute(id, &mut store, &domain, 0.0, 1.0).unwrap_err();
    assert_eq!(
        err,
        SolveError::NodeFailed {
            node: "rogue".into(),
            reason: NodeError::NotWritable {
                node: "rogue".into(),
                buffer: "theirs".into(),
            },
        }
    );
    assert_eq!(store.current("theirs").unwrap(), &Tensor::zeros(&[2]));
}

#[test]
fn checked_mode_rejects_undefined_inputs() {
    let mut store = BufferStore::new();
    let mut graph = ComputeGraph::new();
    let copy = CopyNode::new("copy", &mut store, "u", "v");
    let id = graph.add_node(Box::new(copy)).unwrap();
    graph.resolve(id, &store).unwrap();
    graph.set_checked(true);

    let domain = IdentityDomain::new(&[2]);
    let err = graph.execute(id, &mut store, &domain, 0.0, 1.0).unwrap_err();
    match err {
        SolveError::NodeFailed {
            reason: NodeError::UndefinedInput { buffer, .. },
            ..
        } => assert_eq!(buffer, "u"),
        other => panic!("expected UndefinedInput, got {other:?}"),
    }

    *store.current("u").unwrap() = Tensor::filled(&[2], 5.0);
    graph.execute(id, &mut store, &domain, 0.0, 1.0).unwrap();
    assert_eq!(store.current("v").unwrap().as_slice(), &[5.0, 5.0]);
}
