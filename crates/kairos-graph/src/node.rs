//! The [`ComputeNode`] trait implemented by kernel authors.

use crate::context::ExecContext;
use kairos_core::{BufferSet, NodeError};

/// A unit of work that reads and writes named buffers.
///
/// # Contract
///
/// - `requested_items()` and `supplied_items()` are queried when the graph
///   is resolved, not per step. They must not change afterwards.
/// - `execute()` may read any buffer but writes only supplied buffers;
///   the [`ExecContext`] rejects anything else with
///   [`NodeError::NotWritable`].
/// - Buffer handles are resolved at construction. A node never resolves a
///   new buffer name during `execute()`.
///
/// # Examples
///
/// A kernel that scales one buffer into another:
///
/// ```
/// use kairos_core::{BufferHandle, BufferSet, NodeError};
/// use kairos_graph::{ComputeNode, ExecContext};
/// use kairos_store::BufferStore;
///
/// struct Scale {
///     input: BufferHandle,
///     output: BufferHandle,
///     factor: f64,
/// }
///
/// impl ComputeNode for Scale {
///     fn name(&self) -> &str { "scale" }
///
///     fn requested_items(&self) -> BufferSet { BufferSet::from(["u"]) }
///
///     fn supplied_items(&self) -> BufferSet { BufferSet::from(["v"]) }
///
///     fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Result<(), NodeError> {
///         let (u, v) = ctx.read_write(self.input, self.output)?;
///         v.assign(u);
///         v.scale(self.factor);
///         Ok(())
///     }
/// }
///
/// let mut store = BufferStore::new();
/// let input = store.register("u").unwrap();
/// let output = store.register("v").unwrap();
/// let node = Scale { input, output, factor: 2.0 };
/// assert_eq!(node.name(), "scale");
/// ```
pub trait ComputeNode: Send + 'static {
    /// Name for diagnostics. Unique within a graph.
    fn name(&self) -> &str;

    /// Buffers this node reads.
    fn requested_items(&self) -> BufferSet;

    /// Buffers this node writes.
    fn supplied_items(&self) -> BufferSet;

    /// Run the node once.
    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Result<(), NodeError>;
}
