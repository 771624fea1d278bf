//! Execution context passed to compute nodes.
//!
//! [`ExecContext`] gives a node handle-based access to the buffer store:
//! any buffer may be read, but only buffers in the node's supplied set may
//! be written. Nodes cannot look up buffers by name here; every handle was
//! resolved when the node was constructed.

use kairos_core::{BufferHandle, Domain, NodeError, Tensor};
use kairos_store::{BufferStore, History};

/// Execution context passed to each node's `execute()` method.
pub struct ExecContext<'a> {
    store: &'a mut BufferStore,
    node: &'a str,
    writable: &'a [BufferHandle],
    domain: &'a dyn Domain,
    time: f64,
    dt: f64,
}

impl<'a> ExecContext<'a> {
    /// Construct a context for one node execution.
    ///
    /// Called by the compute graph. Tests may build one directly around a
    /// scratch store.
    pub fn new(
        store: &'a mut BufferStore,
        node: &'a str,
        writable: &'a [BufferHandle],
        domain: &'a dyn Domain,
        time: f64,
        dt: f64,
    ) -> Self {
        Self {
            store,
            node,
            writable,
            domain,
            time,
            dt,
        }
    }

    /// Name of the executing node.
    pub fn node_name(&self) -> &str {
        self.node
    }

    /// Simulation time at the start of the current sub-step.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Current sub-step size.
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// The grid and transform collaborator.
    pub fn domain(&self) -> &dyn Domain {
        self.domain
    }

    /// Read any buffer.
    pub fn read(&self, h: BufferHandle) -> Result<&Tensor, NodeError> {
        Ok(self.store.get(h)?)
    }

    /// Read a buffer's committed history.
    pub fn history(&self, h: BufferHandle) -> Result<&History, NodeError> {
        Ok(self.store.history_of(h)?)
    }

    fn check_writable(&self, h: BufferHandle) -> Result<(), NodeError> {
        if self.writable.contains(&h) {
            return Ok(());
        }
        Err(NodeError::NotWritable {
            node: self.node.to_owned(),
            buffer: self.store.name(h)?.to_owned(),
        })
    }

    /// Mutable access to a supplied buffer.
    pub fn write(&mut self, h: BufferHandle) -> Result<&mut Tensor, NodeError> {
        self.check_writable(h)?;
        Ok(self.store.get_mut(h)?)
    }

    /// Replace a supplied buffer's value.
    pub fn set(&mut self, h: BufferHandle, value: Tensor) -> Result<(), NodeError> {
        self.check_writable(h)?;
        Ok(self.store.set(h, value)?)
    }

    /// Borrow one buffer for reading and a supplied buffer for writing.
    pub fn read_write(
        &mut self,
        read: BufferHandle,
        write: BufferHandle,
    ) -> Result<(&Tensor, &mut Tensor), NodeError> {
        self.check_writable(write)?;
        Ok(self.store.read_write(read, write)?)
    }

    /// Compute a supplied buffer from any number of other buffers.
    ///
    /// `f` receives the output tensor and a [`Reads`] view of the store.
    /// The output's previous value is visible through the `&mut Tensor`.
    pub fn write_with<R>(
        &mut self,
        write: BufferHandle,
        f: impl FnOnce(&mut Tensor, &Reads<'_>) -> Result<R, NodeError>,
    ) -> Result<R, NodeError> {
        self.check_writable(write)?;
        self.store
            .with_output(write, |out, store| f(out, &Reads { store }))?
    }
}

/// Read-only view of the store handed to [`ExecContext::write_with`].
pub struct Reads<'a> {
    store: &'a BufferStore,
}

impl Reads<'_> {
    /// Read any buffer other than the one being written.
    pub fn get(&self, h: BufferHandle) -> Result<&Tensor, NodeError> {
        Ok(self.store.get(h)?)
    }

    /// Read a buffer's committed history.
    pub fn history(&self, h: BufferHandle) -> Result<&History, NodeError> {
        Ok(self.store.history_of(h)?)
    }
}
