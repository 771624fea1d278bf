//! Criterion benchmarks for dependency resolution and group execution.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use kairos_core::BufferSet;
use kairos_graph::{ComputeGraph, ComputeGroup, DepView, DependencyResolver};
use kairos_store::BufferStore;
use kairos_test_utils::{IdentityDomain, TagNode};

/// `(requested, supplied)` sets of a chain `b0 -> b1 -> ... -> bn`, listed
/// in reverse so every node has to be reordered.
fn reversed_chain(n: usize) -> Vec<(String, BufferSet, BufferSet)> {
    (0..n)
        .rev()
        .map(|i| {
            (
                format!("node{i}"),
                BufferSet::from([format!("b{i}")]),
                BufferSet::from([format!("b{}", i + 1)]),
            )
        })
        .collect()
}

fn bench_resolver(c: &mut Criterion) {
    let chain = reversed_chain(500);
    let views: Vec<DepView<'_>> = chain
        .iter()
        .map(|(name, requested, supplied)| DepView {
            name: name.as_str(),
            requested,
            supplied,
        })
        .collect();
    c.bench_function("resolver_order_chain_500", |b| {
        b.iter(|| black_box(DependencyResolver::order(&views).unwrap()));
    });
}

fn bench_group_execute(c: &mut Criterion) {
    let mut store = BufferStore::new();
    let mut graph = ComputeGraph::new();
    let mut names = Vec::new();
    for i in 0..64 {
        let input = format!("b{i}");
        let output = format!("b{}", i + 1);
        store.handle_or_register(&input);
        store.handle_or_register(&output);
        let name = format!("node{i}");
        graph
            .add_node(Box::new(TagNode::new(
                name.clone(),
                [input.as_str()],
                [output.as_str()],
            )))
            .unwrap();
        names.push(name);
    }
    let root = graph.add_group(ComputeGroup::new("root", names)).unwrap();
    graph.resolve(root, &store).unwrap();
    let domain = IdentityDomain::new(&[1]);
    c.bench_function("execute_group_64", |b| {
        b.iter(|| graph.execute(root, &mut store, &domain, 0.0, 0.1).unwrap());
    });
}

criterion_group!(benches, bench_resolver, bench_group_execute);
criterion_main!(benches);
