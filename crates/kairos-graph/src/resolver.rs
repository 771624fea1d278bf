//! Deterministic topological ordering of compute nodes.
//!
//! [`DependencyResolver`] orders nodes so that every buffer a node
//! requests is either external (no node supplies it) or supplied by a
//! node that runs earlier. Ties are broken by input position, so the same
//! input always produces the same schedule. Nodes with equal formal
//! dependencies often carry implicit ordering intent (two kernels adding
//! partial contributions to one buffer), which reordering would break.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use kairos_core::{BufferSet, GraphError};

/// Anything with a name and requested/supplied buffer sets.
pub trait Dependencies {
    /// Name used in diagnostics.
    fn dep_name(&self) -> &str;
    /// Buffers read.
    fn requested(&self) -> &BufferSet;
    /// Buffers written.
    fn supplied(&self) -> &BufferSet;
}

impl<T: Dependencies + ?Sized> Dependencies for &T {
    fn dep_name(&self) -> &str {
        (**self).dep_name()
    }
    fn requested(&self) -> &BufferSet {
        (**self).requested()
    }
    fn supplied(&self) -> &BufferSet {
        (**self).supplied()
    }
}

/// A borrowed `(name, requested, supplied)` triple.
#[derive(Clone, Copy, Debug)]
pub struct DepView<'a> {
    /// Node name.
    pub name: &'a str,
    /// Buffers read.
    pub requested: &'a BufferSet,
    /// Buffers written.
    pub supplied: &'a BufferSet,
}

impl Dependencies for DepView<'_> {
    fn dep_name(&self) -> &str {
        self.name
    }
    fn requested(&self) -> &BufferSet {
        self.requested
    }
    fn supplied(&self) -> &BufferSet {
        self.supplied
    }
}

/// Kahn's algorithm with input-order tie-breaking.
#[derive(Clone, Copy, Debug, Default)]
pub struct DependencyResolver;

impl DependencyResolver {
    /// Compute an execution order as a permutation of input indices.
    ///
    /// Node `i` depends on node `j != i` when `j` supplies a buffer `i`
    /// requests. A node reading and writing the same buffer updates it in
    /// place and does not depend on itself. When several nodes supply one
    /// buffer, every consumer waits for all of them.
    ///
    /// # Errors
    ///
    /// [`GraphError::UnresolvableDependency`] naming the earliest node
    /// (by input position) that is part of or blocked by a cycle.
    pub fn order<T: Dependencies>(items: &[T]) -> Result<Vec<usize>, GraphError> {
        let n = items.len();

        // 1. Edges: producer -> consumer, and consumer in-degree.
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut in_degree = vec![0usize; n];
        for (i, consumer) in items.iter().enumerate() {
            for (j, producer) in items.iter().enumerate() {
                if i != j && producer.supplied().intersects(consumer.requested()) {
                    dependents[j].push(i);
                    in_degree[i] += 1;
                }
            }
        }

        // 2. Ready set ordered by input position.
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        // 3. Emit the earliest ready node, release its dependents.
        let mut order = Vec::with_capacity(n);
        while let Some(Reverse(next)) = ready.pop() {
            order.push(next);
            for &d in &dependents[next] {
                in_degree[d] -= 1;
                if in_degree[d] == 0 {
                    ready.push(Reverse(d));
                }
            }
        }

        // 4. Anything left is stuck on a cycle.
        if order.len() < n {
            let stuck = (0..n).find(|&i| in_degree[i] > 0).unwrap_or(0);
            let mut waiting_on = BufferSet::empty();
            let mut blockers = Vec::new();
            for (j, producer) in items.iter().enumerate() {
                if j != stuck && in_degree[j] > 0 {
                    let shared = producer.supplied().intersection(items[stuck].requested());
                    if !shared.is_empty() {
                        waiting_on = waiting_on.union(&shared);
                        blockers.push(producer.dep_name().to_owned());
                    }
                }
            }
            return Err(GraphError::UnresolvableDependency {
                node: items[stuck].dep_name().to_owned(),
                reason: format!(
                    "cyclic dependency: requests {waiting_on} supplied by [{}]",
                    blockers.join(", ")
                ),
            });
        }

        Ok(order)
    }

    /// Reorder `items` in place into a valid execution order.
    pub fn sort<T: Dependencies>(items: &mut Vec<T>) -> Result<(), GraphError> {
        let order = Self::order(items)?;
        let mut slots: Vec<Option<T>> = items.drain(..).map(Some).collect();
        items.extend(order.into_iter().filter_map(|i| slots[i].take()));
        Ok(())
    }
}
