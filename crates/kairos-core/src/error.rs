//! Error types for the Kairos engine.
//!
//! Organized by subsystem: buffer store, compute graph, node execution,
//! and time integration. Store and graph errors are configuration-time
//! failures and abort setup. Solve errors are run-time numerical failures
//! that a driver may recover from by cutting the step size.

use std::error::Error;
use std::fmt;

use crate::id::BufferHandle;

/// Errors from buffer registration and lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreError {
    /// A buffer with this name is already registered.
    DuplicateBuffer {
        /// The duplicated name.
        name: String,
    },
    /// No buffer with this name is registered.
    UnknownBuffer {
        /// The unknown name.
        name: String,
    },
    /// A handle that does not belong to this store.
    UnknownHandle {
        /// The foreign handle.
        handle: BufferHandle,
    },
    /// A value did not have the shape the buffer was registered with.
    ShapeMismatch {
        /// Buffer being written.
        name: String,
        /// Shape of the buffer's current value.
        expected: Vec<usize>,
        /// Shape of the rejected value.
        actual: Vec<usize>,
    },
    /// The same buffer was requested for reading and writing at once.
    AliasedAccess {
        /// Buffer that was aliased.
        name: String,
    },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateBuffer { name } => write!(f, "buffer '{name}' is already registered"),
            Self::UnknownBuffer { name } => write!(f, "unknown buffer '{name}'"),
            Self::UnknownHandle { handle } => write!(f, "buffer handle {handle} is not registered"),
            Self::ShapeMismatch {
                name,
                expected,
                actual,
            } => write!(
                f,
                "shape mismatch on buffer '{name}': expected {expected:?}, got {actual:?}"
            ),
            Self::AliasedAccess { name } => {
                write!(f, "buffer '{name}' cannot be read and written at the same time")
            }
        }
    }
}

impl Error for StoreError {}

/// Errors from building and resolving the compute graph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GraphError {
    /// No valid execution order exists: a dependency cycle, a node that
    /// contains itself, or a requested buffer that nothing provides.
    UnresolvableDependency {
        /// Name of the offending node.
        node: String,
        /// Human-readable cause.
        reason: String,
    },
    /// A node name that is not in the graph.
    UnknownNode {
        /// The unknown name.
        name: String,
    },
    /// Two nodes registered under the same name.
    DuplicateNode {
        /// The duplicated name.
        name: String,
    },
    /// Buffer resolution failed while wiring the graph.
    Store(StoreError),
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnresolvableDependency { node, reason } => {
                write!(f, "unresolvable dependency in '{node}': {reason}")
            }
            Self::UnknownNode { name } => write!(f, "unknown compute node '{name}'"),
            Self::DuplicateNode { name } => {
                write!(f, "compute node '{name}' is already registered")
            }
            Self::Store(e) => write!(f, "buffer store: {e}"),
        }
    }
}

impl Error for GraphError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for GraphError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

/// Errors raised while a single node executes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeError {
    /// The kernel itself reported a failure.
    ExecutionFailed {
        /// Human-readable cause.
        reason: String,
    },
    /// The node tried to write a buffer outside its supplied set.
    NotWritable {
        /// Name of the node.
        node: String,
        /// Buffer it attempted to write.
        buffer: String,
    },
    /// Checked mode only: a requested buffer had no value yet.
    UndefinedInput {
        /// Name of the node.
        node: String,
        /// Buffer that was still undefined.
        buffer: String,
    },
    /// Buffer access failed.
    Store(StoreError),
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExecutionFailed { reason } => write!(f, "execution failed: {reason}"),
            Self::NotWritable { node, buffer } => {
                write!(f, "'{node}' wrote '{buffer}', which it does not supply")
            }
            Self::UndefinedInput { node, buffer } => {
                write!(f, "'{node}' requested '{buffer}' before it was defined")
            }
            Self::Store(e) => write!(f, "buffer store: {e}"),
        }
    }
}

impl Error for NodeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for NodeError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

/// Errors from a time integrator during one outer step.
#[derive(Clone, Debug, PartialEq)]
pub enum SolveError {
    /// An iterative solve ran out of iterations or diverged.
    NotConverged {
        /// Name of the solver.
        solver: String,
        /// Iterations performed.
        iterations: u32,
        /// Last residual norm (may be NaN on divergence).
        residual: f64,
    },
    /// A batched dense solve met a singular system.
    DegenerateLinearSystem {
        /// Flat index of the first singular grid point.
        point: usize,
    },
    /// A node inside the root group failed.
    NodeFailed {
        /// Name of the failing node.
        node: String,
        /// The underlying node error.
        reason: NodeError,
    },
    /// Buffer access failed.
    Store(StoreError),
}

impl SolveError {
    /// Whether a driver may retry the step with a smaller step size.
    ///
    /// Only numerical failures are recoverable; node and store errors
    /// indicate misconfiguration.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotConverged { .. } | Self::DegenerateLinearSystem { .. }
        )
    }
}

impl fmt::Display for SolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConverged {
                solver,
                iterations,
                residual,
            } => write!(
                f,
                "{solver} did not converge after {iterations} iterations (residual {residual:e})"
            ),
            Self::DegenerateLinearSystem { point } => {
                write!(f, "degenerate linear system at grid point {point}")
            }
            Self::NodeFailed { node, reason } => write!(f, "node '{node}' failed: {reason}"),
            Self::Store(e) => write!(f, "buffer store: {e}"),
        }
    }
}

impl Error for SolveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::NodeFailed { reason, .. } => Some(reason),
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for SolveError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}
