//! Reusable compute-node fixtures.
//!
//! - [`TagNode`]: declares buffer sets, records its executions, writes nothing.
//! - [`ConstNode`]: fills a buffer with a constant.
//! - [`CopyNode`]: copies one buffer into another.
//! - [`FailingNode`]: succeeds N times, then fails.
//! - [`TransformNode`]: forward transform of a real-space buffer.
//! - [`PointwiseRhsNode`]: transformed pointwise function of a real-space buffer.
//! - [`LinearOperatorNode`]: linear operator coefficients from reciprocal wave numbers.
//!
//! Constructors resolve buffer names once, registering missing buffers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use kairos_core::{BufferHandle, BufferSet, NodeError, Tensor};
use kairos_graph::{ComputeNode, ExecContext};
use kairos_store::BufferStore;

/// Shared record of node executions, in execution order.
pub type ExecutionLog = Arc<Mutex<Vec<String>>>;

/// A fresh, empty execution log.
pub fn execution_log() -> ExecutionLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Snapshot of a log's contents.
pub fn logged(log: &ExecutionLog) -> Vec<String> {
    log.lock().map(|l| l.clone()).unwrap_or_default()
}

fn record(log: &Option<ExecutionLog>, name: &str) {
    if let Some(log) = log {
        if let Ok(mut l) = log.lock() {
            l.push(name.to_owned());
        }
    }
}

/// Declares requested/supplied sets and records executions.
///
/// Holds no buffer handles; the buffers it names must still be registered
/// before the graph resolves. Used for ordering and boundary tests.
pub struct TagNode {
    pub name: String,
    pub requested: BufferSet,
    pub supplied: BufferSet,
    log: Option<ExecutionLog>,
}

impl TagNode {
    pub fn new<const R: usize, const S: usize>(
        name: impl Into<String>,
        requested: [&str; R],
        supplied: [&str; S],
    ) -> Self {
        Self {
            name: name.into(),
            requested: BufferSet::from(requested),
            supplied: BufferSet::from(supplied),
            log: None,
        }
    }

    pub fn with_log(mut self, log: &ExecutionLog) -> Self {
        self.log = Some(Arc::clone(log));
        self
    }
}

impl ComputeNode for TagNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn requested_items(&self) -> BufferSet {
        self.requested.clone()
    }

    fn supplied_items(&self) -> BufferSet {
        self.supplied.clone()
    }

    fn execute(&mut self, _ctx: &mut ExecContext<'_>) -> Result<(), NodeError> {
        record(&self.log, &self.name);
        Ok(())
    }
}

/// Fills its output with a constant of a fixed shape.
pub struct ConstNode {
    pub name: String,
    output_name: String,
    output: BufferHandle,
    shape: Vec<usize>,
    pub value: f64,
}

impl ConstNode {
    pub fn new(
        name: impl Into<String>,
        store: &mut BufferStore,
        output: &str,
        shape: &[usize],
        value: f64,
    ) -> Self {
        Self {
            name: name.into(),
            output_name: output.to_owned(),
            output: store.handle_or_register(output),
            shape: shape.to_vec(),
            value,
        }
    }
}

impl ComputeNode for ConstNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn requested_items(&self) -> BufferSet {
        BufferSet::empty()
    }

    fn supplied_items(&self) -> BufferSet {
        BufferSet::from([self.output_name.as_str()])
    }

    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Result<(), NodeError> {
        ctx.set(self.output, Tensor::filled(&self.shape, self.value))
    }
}

/// Copies `input` into `output`.
pub struct CopyNode {
    pub name: String,
    names: (String, String),
    input: BufferHandle,
    output: BufferHandle,
}

impl CopyNode {
    pub fn new(name: impl Into<String>, store: &mut BufferStore, input: &str, output: &str) -> Self {
        Self {
            name: name.into(),
            names: (input.to_owned(), output.to_owned()),
            input: store.handle_or_register(input),
            output: store.handle_or_register(output),
        }
    }
}

impl ComputeNode for CopyNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn requested_items(&self) -> BufferSet {
        BufferSet::from([self.names.0.as_str()])
    }

    fn supplied_items(&self) -> BufferSet {
        BufferSet::from([self.names.1.as_str()])
    }

    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Result<(), NodeError> {
        let (src, dst) = ctx.read_write(self.input, self.output)?;
        dst.assign(src);
        Ok(())
    }
}

/// Writes `1.0` into its output on the first `succeed_count` calls, then
/// fails on every later call.
pub struct FailingNode {
    pub name: String,
    output_name: String,
    output: BufferHandle,
    succeed_count: usize,
    call_count: Arc<AtomicUsize>,
}

impl FailingNode {
    pub fn new(
        name: impl Into<String>,
        store: &mut BufferStore,
        output: &str,
        succeed_count: usize,
    ) -> Self {
        Self {
            name: name.into(),
            output_name: output.to_owned(),
            output: store.handle_or_register(output),
            succeed_count,
            call_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared call counter, readable after the node moves into a graph.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.call_count)
    }
}

impl ComputeNode for FailingNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn requested_items(&self) -> BufferSet {
        BufferSet::empty()
    }

    fn supplied_items(&self) -> BufferSet {
        BufferSet::from([self.output_name.as_str()])
    }

    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Result<(), NodeError> {
        let n = self.call_count.fetch_add(1, Ordering::Relaxed);
        if n >= self.succeed_count {
            return Err(NodeError::ExecutionFailed {
                reason: format!("{} failed on call {}", self.name, n + 1),
            });
        }
        ctx.write(self.output)?.fill(1.0);
        Ok(())
    }
}

/// `output = transform(input)`.
pub struct TransformNode {
    pub name: String,
    names: (String, String),
    input: BufferHandle,
    output: BufferHandle,
}

impl TransformNode {
    pub fn new(name: impl Into<String>, store: &mut BufferStore, input: &str, output: &str) -> Self {
        Self {
            name: name.into(),
            names: (input.to_owned(), output.to_owned()),
            input: store.handle_or_register(input),
            output: store.handle_or_register(output),
        }
    }
}

impl ComputeNode for TransformNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn requested_items(&self) -> BufferSet {
        BufferSet::from([self.names.0.as_str()])
    }

    fn supplied_items(&self) -> BufferSet {
        BufferSet::from([self.names.1.as_str()])
    }

    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Result<(), NodeError> {
        let value = ctx.domain().transform(ctx.read(self.input)?);
        ctx.set(self.output, value)
    }
}

/// Pointwise function applied to a real-space buffer, then transformed.
pub type PointwiseFn = Box<dyn Fn(f64) -> f64 + Send>;

/// `output = transform(f(input))`.
pub struct PointwiseRhsNode {
    pub name: String,
    names: (String, String),
    input: BufferHandle,
    output: BufferHandle,
    f: PointwiseFn,
}

impl PointwiseRhsNode {
    pub fn new(
        name: impl Into<String>,
        store: &mut BufferStore,
        input: &str,
        output: &str,
        f: impl Fn(f64) -> f64 + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            names: (input.to_owned(), output.to_owned()),
            input: store.handle_or_register(input),
            output: store.handle_or_register(output),
            f: Box::new(f),
        }
    }
}

impl ComputeNode for PointwiseRhsNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn requested_items(&self) -> BufferSet {
        BufferSet::from([self.names.0.as_str()])
    }

    fn supplied_items(&self) -> BufferSet {
        BufferSet::from([self.names.1.as_str()])
    }

    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Result<(), NodeError> {
        let mut values = ctx.read(self.input)?.clone();
        values.map_inplace(&self.f);
        let transformed = ctx.domain().transform(&values);
        ctx.set(self.output, transformed)
    }
}

/// Wave-number function for [`LinearOperatorNode`].
pub type OperatorFn = Box<dyn Fn(f64) -> f64 + Send>;

/// Fills `output` with `f(k)` over the reciprocal axis of dimension 0.
///
/// `LinearOperatorNode::new(.., |k| -kappa * k * k)` is a diffusion operator
/// on a [`HartleyDomain`](crate::HartleyDomain).
pub struct LinearOperatorNode {
    pub name: String,
    output_name: String,
    output: BufferHandle,
    f: OperatorFn,
}

impl LinearOperatorNode {
    pub fn new(
        name: impl Into<String>,
        store: &mut BufferStore,
        output: &str,
        f: impl Fn(f64) -> f64 + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            output_name: output.to_owned(),
            output: store.handle_or_register(output),
            f: Box::new(f),
        }
    }
}

impl ComputeNode for LinearOperatorNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn requested_items(&self) -> BufferSet {
        BufferSet::empty()
    }

    fn supplied_items(&self) -> BufferSet {
        BufferSet::from([self.output_name.as_str()])
    }

    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Result<(), NodeError> {
        let domain = ctx.domain();
        let k = domain
            .reciprocal_axis(0)
            .ok_or_else(|| NodeError::ExecutionFailed {
                reason: "domain has no reciprocal axis 0".into(),
            })?;
        let mut values = domain.reciprocal_zeros();
        for (v, &k) in values.as_mut_slice().iter_mut().zip(k.as_slice()) {
            *v = (self.f)(k);
        }
        ctx.set(self.output, values)
    }
}
