//! The [`ComputeGraph`] node registry: resolution and execution.

use indexmap::IndexMap;
use kairos_core::{BufferHandle, BufferSet, Domain, GraphError, NodeError, NodeId, SolveError};
use kairos_store::BufferStore;

use crate::context::ExecContext;
use crate::group::{boundary, ComputeGroup};
use crate::node::ComputeNode;
use crate::resolver::{Dependencies, DependencyResolver};

enum NodeKind {
    Leaf(Box<dyn ComputeNode>),
    Group(ComputeGroup),
}

struct Entry {
    name: String,
    kind: NodeKind,
    requested: BufferSet,
    supplied: BufferSet,
    /// Handles of `requested`, for checked mode.
    readable: Vec<BufferHandle>,
    /// Handles of `supplied`; the only buffers `execute()` may write.
    writable: Vec<BufferHandle>,
    visited: bool,
    /// Finished during the current resolution pass.
    pass_done: bool,
    /// Resolved at least once; gates execution.
    resolved: bool,
    executions: u64,
}

impl Entry {
    fn new(name: String, kind: NodeKind) -> Self {
        Self {
            name,
            kind,
            requested: BufferSet::empty(),
            supplied: BufferSet::empty(),
            readable: Vec::new(),
            writable: Vec::new(),
            visited: false,
            pass_done: false,
            resolved: false,
            executions: 0,
        }
    }
}

impl Dependencies for Entry {
    fn dep_name(&self) -> &str {
        &self.name
    }
    fn requested(&self) -> &BufferSet {
        &self.requested
    }
    fn supplied(&self) -> &BufferSet {
        &self.supplied
    }
}

/// Registry of leaf nodes and groups.
///
/// Nodes are added once, referenced by [`NodeId`], and grouped by name.
/// A group may list any registered node, including other groups, which
/// is how nested scopes are built. [`resolve`](Self::resolve) walks a
/// group tree bottom-up, sorts every group's members, derives each
/// group's boundary, and binds buffer handles; [`execute`](Self::execute)
/// then runs a node or group without further lookups.
#[derive(Default)]
pub struct ComputeGraph {
    entries: Vec<Entry>,
    names: IndexMap<String, NodeId>,
    checked: bool,
}

impl ComputeGraph {
    /// An empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, name: String, kind: NodeKind) -> Result<NodeId, GraphError> {
        if self.names.contains_key(&name) {
            return Err(GraphError::DuplicateNode { name });
        }
        let id = NodeId(self.entries.len() as u32);
        self.names.insert(name.clone(), id);
        self.entries.push(Entry::new(name, kind));
        Ok(id)
    }

    /// Register a leaf node.
    pub fn add_node(&mut self, node: Box<dyn ComputeNode>) -> Result<NodeId, GraphError> {
        let name = node.name().to_owned();
        self.insert(name, NodeKind::Leaf(node))
    }

    /// Register a group. Members may be added to the graph later, as long
    /// as they exist by the time the group is resolved.
    pub fn add_group(&mut self, group: ComputeGroup) -> Result<NodeId, GraphError> {
        let name = group.name().to_owned();
        self.insert(name, NodeKind::Group(group))
    }

    /// Look up a node by name.
    pub fn id(&self, name: &str) -> Result<NodeId, GraphError> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::UnknownNode { name: name.into() })
    }

    /// Number of registered nodes and groups.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Node name. Panics on an id from another graph.
    pub fn name(&self, id: NodeId) -> &str {
        &self.entries[id.index()].name
    }

    /// Buffers the node reads; for groups, the derived external inputs.
    pub fn requested(&self, id: NodeId) -> &BufferSet {
        &self.entries[id.index()].requested
    }

    /// Buffers the node writes; for groups, the derived external outputs.
    pub fn supplied(&self, id: NodeId) -> &BufferSet {
        &self.entries[id.index()].supplied
    }

    /// The group behind `id`, or `None` for a leaf.
    pub fn group(&self, id: NodeId) -> Option<&ComputeGroup> {
        match &self.entries[id.index()].kind {
            NodeKind::Group(g) => Some(g),
            NodeKind::Leaf(_) => None,
        }
    }

    /// Names of a group's members in resolved execution order.
    pub fn order_names(&self, id: NodeId) -> Vec<&str> {
        self.group(id)
            .map(|g| g.order().iter().map(|&c| self.name(c)).collect())
            .unwrap_or_default()
    }

    /// How many times the node has executed.
    pub fn execution_count(&self, id: NodeId) -> u64 {
        self.entries[id.index()].executions
    }

    /// Whether the node was entered during the current resolution pass.
    pub fn is_visited(&self, id: NodeId) -> bool {
        self.entries[id.index()].visited
    }

    /// Start a new resolution pass: clear every node's `visited` flag.
    pub fn reset_visited(&mut self) {
        for e in &mut self.entries {
            e.visited = false;
            e.pass_done = false;
        }
    }

    /// In checked mode every requested buffer must be defined before a
    /// leaf runs; otherwise it fails with [`NodeError::UndefinedInput`].
    pub fn set_checked(&mut self, checked: bool) {
        self.checked = checked;
    }

    /// Resolve the node tree under `root`.
    ///
    /// Starts a fresh pass (visited flags reset), then resolves bottom-up.
    /// Re-resolve after any structural change.
    ///
    /// # Errors
    ///
    /// - [`GraphError::UnresolvableDependency`] on a cycle, a group that
    ///   contains itself, or a requested buffer that is not registered.
    /// - [`GraphError::UnknownNode`] when a group lists a missing member.
    /// - [`GraphError::Store`] when a supplied buffer is not registered.
    pub fn resolve(&mut self, root: NodeId, store: &BufferStore) -> Result<(), GraphError> {
        self.resolve_all(&[root], store)
    }

    /// Resolve several trees in one pass. Nodes shared between trees are
    /// resolved once.
    pub fn resolve_all(&mut self, roots: &[NodeId], store: &BufferStore) -> Result<(), GraphError> {
        self.reset_visited();
        for &root in roots {
            self.update_dependencies(root, store)?;
        }
        Ok(())
    }

    fn update_dependencies(&mut self, id: NodeId, store: &BufferStore) -> Result<(), GraphError> {
        let idx = id.index();
        if self.entries[idx].pass_done {
            return Ok(());
        }
        if self.entries[idx].visited {
            let name = self.entries[idx].name.clone();
            return Err(GraphError::UnresolvableDependency {
                reason: format!("{name} is using itself"),
                node: name,
            });
        }
        self.entries[idx].visited = true;

        let members = match &self.entries[idx].kind {
            NodeKind::Leaf(node) => {
                let sets = (node.requested_items(), node.supplied_items());
                return self.bind_leaf(idx, sets, store);
            }
            NodeKind::Group(group) => group.members().to_vec(),
        };

        // 1. Look up and resolve children first, so nested groups have
        //    their boundaries before this group sorts them.
        let mut children = Vec::with_capacity(members.len());
        for member in &members {
            let child = self.id(member)?;
            if children.contains(&child) {
                return Err(GraphError::UnresolvableDependency {
                    node: self.entries[idx].name.clone(),
                    reason: format!("member '{member}' is listed twice"),
                });
            }
            children.push(child);
        }
        for &child in &children {
            self.update_dependencies(child, store)?;
        }

        // 2. Sort members and derive the boundary.
        let (order, requested, supplied) = {
            let views: Vec<&Entry> = children.iter().map(|c| &self.entries[c.index()]).collect();
            let perm = DependencyResolver::order(&views)?;
            let (requested, supplied) = boundary(&views);
            let order: Vec<NodeId> = perm.into_iter().map(|i| children[i]).collect();
            (order, requested, supplied)
        };

        let entry = &self.entries[idx];
        tracing::debug!(
            group = %entry.name,
            order = ?order.iter().map(|&c| self.name(c)).collect::<Vec<_>>(),
            %requested,
            %supplied,
            "group resolved"
        );

        let entry = &mut self.entries[idx];
        entry.requested = requested;
        entry.supplied = supplied;
        if let NodeKind::Group(group) = &mut entry.kind {
            group.order = order;
        }
        entry.pass_done = true;
        entry.resolved = true;
        Ok(())
    }

    fn bind_leaf(
        &mut self,
        idx: usize,
        (requested, supplied): (BufferSet, BufferSet),
        store: &BufferStore,
    ) -> Result<(), GraphError> {
        let entry = &mut self.entries[idx];
        entry.readable = bind_requested(&entry.name, &requested, store)?;
        entry.writable = supplied
            .iter()
            .map(|b| store.handle(b))
            .collect::<Result<_, _>>()?;
        entry.requested = requested;
        entry.supplied = supplied;
        entry.pass_done = true;
        entry.resolved = true;
        Ok(())
    }

    /// Execute a node, or every member of a group in resolved order.
    ///
    /// # Errors
    ///
    /// [`SolveError::NodeFailed`] naming the first leaf that failed, or
    /// the node itself if it was never resolved.
    pub fn execute(
        &mut self,
        id: NodeId,
        store: &mut BufferStore,
        domain: &dyn Domain,
        time: f64,
        dt: f64,
    ) -> Result<(), SolveError> {
        let idx = id.index();
        let checked = self.checked;
        let entry = &mut self.entries[idx];
        if !entry.resolved {
            return Err(SolveError::NodeFailed {
                node: entry.name.clone(),
                reason: NodeError::ExecutionFailed {
                    reason: "executed before its dependencies were resolved".into(),
                },
            });
        }
        entry.executions += 1;

        let group_order = match &mut entry.kind {
            NodeKind::Group(g) => Some(std::mem::take(&mut g.order)),
            NodeKind::Leaf(_) => None,
        };
        if let Some(order) = group_order {
            let result = order
                .iter()
                .try_for_each(|&child| self.execute(child, store, domain, time, dt));
            if let NodeKind::Group(g) = &mut self.entries[idx].kind {
                g.order = order;
            }
            return result;
        }

        let entry = &mut self.entries[idx];
        if checked {
            for &h in &entry.readable {
                if !store.get(h)?.is_defined() {
                    return Err(SolveError::NodeFailed {
                        node: entry.name.clone(),
                        reason: NodeError::UndefinedInput {
                            node: entry.name.clone(),
                            buffer: store.name(h)?.to_owned(),
                        },
                    });
                }
            }
        }
        if let NodeKind::Leaf(node) = &mut entry.kind {
            tracing::trace!(node = %entry.name, time, dt, "execute");
            let mut ctx = ExecContext::new(store, &entry.name, &entry.writable, domain, time, dt);
            node.execute(&mut ctx)
                .map_err(|reason| SolveError::NodeFailed {
                    node: entry.name.clone(),
                    reason,
                })?;
        }
        Ok(())
    }
}

fn bind_requested(
    node: &str,
    requested: &BufferSet,
    store: &BufferStore,
) -> Result<Vec<BufferHandle>, GraphError> {
    requested
        .iter()
        .map(|b| {
            store
                .handle(b)
                .map_err(|_| GraphError::UnresolvableDependency {
                    node: node.to_owned(),
                    reason: format!("requests '{b}', which no node supplies and is not registered"),
                })
        })
        .collect()
}
