//! Strongly-typed handles for buffers and compute nodes.

use std::fmt;

/// Stable handle to a buffer registered in a buffer store.
///
/// Handles are plain indices into the store's slot arena. Registering new
/// buffers never invalidates or moves an existing handle, so nodes and
/// solvers resolve names once at construction and keep the handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[must_use]
pub struct BufferHandle(pub u32);

impl BufferHandle {
    /// Slot index of this handle.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u32> for BufferHandle {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Identifies a compute node inside a compute graph registry.
///
/// `NodeId(n)` is the n-th node added to the graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Registry index of this node.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}
