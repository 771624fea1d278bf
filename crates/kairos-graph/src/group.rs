//! [`ComputeGroup`]: a composite node with a derived buffer boundary.

use kairos_core::{BufferSet, NodeId};

use crate::resolver::Dependencies;

/// An ordered list of member nodes executed as one node.
///
/// Members are named at construction and looked up in the owning
/// [`ComputeGraph`](crate::ComputeGraph) when the group is resolved. The
/// configured order only breaks ties; the resolved order is what
/// [`execute`](crate::ComputeGraph::execute) follows.
#[derive(Clone, Debug)]
pub struct ComputeGroup {
    name: String,
    members: Vec<String>,
    pub(crate) order: Vec<NodeId>,
}

impl ComputeGroup {
    /// A group over the named members, in tie-break order.
    ///
    /// Members with no ordering constraint between them run in the order
    /// of `members`, not in the order they were added to the graph.
    pub fn new<S: Into<String>>(
        name: impl Into<String>,
        members: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            name: name.into(),
            members: members.into_iter().map(Into::into).collect(),
            order: Vec::new(),
        }
    }

    /// Group name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured member names.
    pub fn members(&self) -> &[String] {
        &self.members
    }

    /// Resolved execution order; empty until resolved.
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }
}

/// Net boundary of a set of children.
///
/// Returns `(requested, supplied)` where requested is everything the
/// children read that none of them write, and supplied is everything they
/// write that none of them read. Buffers both produced and consumed inside
/// stay internal.
pub fn boundary<T: Dependencies>(children: &[T]) -> (BufferSet, BufferSet) {
    let mut all_requested = BufferSet::empty();
    let mut all_supplied = BufferSet::empty();
    for child in children {
        all_requested = all_requested.union(child.requested());
        all_supplied = all_supplied.union(child.supplied());
    }
    (
        all_requested.difference(&all_supplied),
        all_supplied.difference(&all_requested),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::DepView;

    #[test]
    fn intermediate_buffers_stay_internal() {
        let none = BufferSet::empty();
        let x = BufferSet::from(["x"]);
        let y = BufferSet::from(["y"]);
        let children = [
            DepView {
                name: "A",
                requested: &none,
                supplied: &x,
            },
            DepView {
                name: "B",
                requested: &x,
                supplied: &y,
            },
        ];
        let (requested, supplied) = boundary(&children);
        assert!(requested.is_empty());
        assert_eq!(supplied, BufferSet::from(["y"]));
    }

    #[test]
    fn external_inputs_surface() {
        let u = BufferSet::from(["u"]);
        let n = BufferSet::from(["n"]);
        let children = [DepView {
            name: "rhs",
            requested: &u,
            supplied: &n,
        }];
        let (requested, supplied) = boundary(&children);
        assert_eq!(requested, u);
        assert_eq!(supplied, n);
    }

    #[test]
    fn new_group_is_unresolved() {
        let g = ComputeGroup::new("root", ["a", "b"]);
        assert_eq!(g.name(), "root");
        assert_eq!(g.members(), ["a".to_string(), "b".to_string()]);
        assert!(g.order().is_empty());
    }
}
