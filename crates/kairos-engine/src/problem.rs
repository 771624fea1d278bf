//! The problem driver: owns the buffers, the graph and the solver, and
//! advances simulation time one outer step at a time.
//!
//! # Step sequence
//!
//! ```text
//! step()
//! ├── initial node + output frame 0     (first call only)
//! ├── wait for previous output frame
//! ├── checkpoint
//! ├── solver.execute()  ──failure──▶ restore, restart, cut dt, retry
//! ├── postprocess node
//! ├── rotate history (final sub-step)
//! ├── time += dt, step += 1
//! └── refresh mirrors, start output frame
//! ```
//!
//! `Problem` is [`Send`]: every node, solver and sink it owns is `Send`,
//! and all mutation goes through `&mut self`.

use std::error::Error;
use std::fmt;
use std::time::Instant;

use indexmap::IndexMap;
use kairos_core::{BufferHandle, Domain, GraphError, NodeId, SolveError, StoreError};
use kairos_graph::ComputeGraph;
use kairos_store::BufferStore;

use crate::config::{ConfigError, ProblemConfig};
use crate::metrics::StepMetrics;
use crate::output::{OutputError, OutputFrame, OutputWorker};
use crate::solver::{SolveEnv, SolveReport, TimeIntegrator};
use crate::timestep::{Cutback, StepSizeController};

const _: () = {
    #[allow(dead_code)]
    fn assert_send<T: Send>() {}
    #[allow(dead_code)]
    fn check() {
        assert_send::<Problem>();
    }
};

// ── ProblemError ───────────────────────────────────────────────────

/// Errors from building or stepping a [`Problem`].
#[derive(Debug, PartialEq)]
pub enum ProblemError {
    /// Invalid configuration or wiring.
    Config(ConfigError),
    /// The solver failed and the step could not be retried.
    Solve(SolveError),
    /// The initial or post-processing node failed.
    Node {
        /// `"initial"` or `"postprocess"`.
        phase: &'static str,
        /// The underlying failure.
        reason: SolveError,
    },
    /// The output worker failed.
    Output(OutputError),
    /// A cutback would take the step size below its minimum.
    TimeStepTooSmall {
        /// Step size that failed.
        dt: f64,
        /// Smallest allowed step size.
        dt_min: f64,
    },
}

impl fmt::Display for ProblemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Solve(e) => write!(f, "solve: {e}"),
            Self::Node { phase, reason } => write!(f, "{phase} node: {reason}"),
            Self::Output(e) => write!(f, "output: {e}"),
            Self::TimeStepTooSmall { dt, dt_min } => {
                write!(f, "step of {dt:e} failed and cannot be cut below {dt_min:e}")
            }
        }
    }
}

impl Error for ProblemError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Solve(e) => Some(e),
            Self::Node { reason, .. } => Some(reason),
            Self::Output(e) => Some(e),
            Self::TimeStepTooSmall { .. } => None,
        }
    }
}

impl From<ConfigError> for ProblemError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<GraphError> for ProblemError {
    fn from(e: GraphError) -> Self {
        Self::Config(ConfigError::Graph(e))
    }
}

impl From<StoreError> for ProblemError {
    fn from(e: StoreError) -> Self {
        Self::Config(ConfigError::Store(e))
    }
}

impl From<OutputError> for ProblemError {
    fn from(e: OutputError) -> Self {
        Self::Output(e)
    }
}

fn elapsed_us(since: Instant) -> u64 {
    since.elapsed().as_micros() as u64
}

// ── Problem ────────────────────────────────────────────────────────

/// A time-dependent problem ready to step.
pub struct Problem {
    store: BufferStore,
    graph: ComputeGraph,
    domain: Box<dyn Domain>,
    root: NodeId,
    initial: Option<NodeId>,
    postprocess: Option<NodeId>,
    solver: Option<Box<dyn TimeIntegrator>>,
    time_step: Box<dyn StepSizeController>,
    output: Option<OutputWorker>,
    outputs: Vec<(String, BufferHandle)>,
    max_retries: u32,
    time: f64,
    step: u64,
    dt: f64,
    previous_dt: Option<f64>,
    initialized: bool,
    metrics: StepMetrics,
}

impl Problem {
    /// Resolve the graph from every configured entry node and start the
    /// output thread.
    ///
    /// The solver in `config` must have been built against `store`.
    pub fn new(
        config: ProblemConfig,
        mut store: BufferStore,
        mut graph: ComputeGraph,
        domain: Box<dyn Domain>,
    ) -> Result<Self, ProblemError> {
        config.validate()?;
        graph.set_checked(config.checked);
        let roots: Vec<NodeId> = std::iter::once(config.root)
            .chain(config.initial)
            .chain(config.postprocess)
            .collect();
        graph.resolve_all(&roots, &store)?;
        tracing::debug!(order = ?graph.order_names(config.root), "root execution order");

        let mut outputs = Vec::with_capacity(config.outputs.len());
        for name in &config.outputs {
            let h = store.handle(name)?;
            store.request_mirror(h)?;
            outputs.push((name.clone(), h));
        }
        let output = config.sink.map(OutputWorker::spawn).transpose()?;

        let dt = config.time_step.initial_dt();
        tracing::info!(
            nodes = graph.len(),
            buffers = store.len(),
            solver = config.solver.as_ref().map_or("none", |s| s.name()),
            dt,
            "problem created"
        );
        Ok(Self {
            store,
            graph,
            domain,
            root: config.root,
            initial: config.initial,
            postprocess: config.postprocess,
            solver: config.solver,
            time_step: config.time_step,
            output,
            outputs,
            max_retries: config.max_retries,
            time: config.start_time,
            step: 0,
            dt,
            previous_dt: None,
            initialized: false,
            metrics: StepMetrics::default(),
        })
    }

    /// Current simulation time.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Completed outer steps.
    pub fn step_count(&self) -> u64 {
        self.step
    }

    /// Size the next step will try first.
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Size of the last accepted step.
    pub fn previous_dt(&self) -> Option<f64> {
        self.previous_dt
    }

    /// Metrics of the last accepted step.
    pub fn metrics(&self) -> &StepMetrics {
        &self.metrics
    }

    /// The buffer store.
    pub fn store(&self) -> &BufferStore {
        &self.store
    }

    /// Mutable access to the buffer store, e.g. to set initial values.
    pub fn store_mut(&mut self) -> &mut BufferStore {
        &mut self.store
    }

    /// The resolved graph.
    pub fn graph(&self) -> &ComputeGraph {
        &self.graph
    }

    /// The domain nodes run on.
    pub fn domain(&self) -> &dyn Domain {
        self.domain.as_ref()
    }

    /// Stability limit of the explicit part, if the solver knows one.
    pub fn critical_dt(&self) -> Option<f64> {
        self.solver.as_ref()?.critical_dt(&self.store)
    }

    /// Run the initial node and emit frame 0. Called by the first `step`.
    fn initialize(&mut self) -> Result<(), ProblemError> {
        if let Some(id) = self.initial {
            self.graph
                .execute(id, &mut self.store, self.domain.as_ref(), self.time, self.dt)
                .map_err(|reason| ProblemError::Node {
                    phase: "initial",
                    reason,
                })?;
            tracing::info!(time = self.time, "initial conditions applied");
        }
        self.initialized = true;
        self.emit()
    }

    /// Snapshot the output buffers and hand them to the worker.
    fn emit(&mut self) -> Result<(), ProblemError> {
        let Some(worker) = self.output.as_mut() else {
            return Ok(());
        };
        self.store.refresh_mirrors();
        let mut buffers = IndexMap::with_capacity(self.outputs.len());
        for (name, h) in &self.outputs {
            if let Some(mirror) = self.store.mirror(*h)? {
                buffers.insert(name.clone(), mirror);
            }
        }
        worker.start(OutputFrame {
            step: self.step,
            time: self.time,
            buffers,
        })?;
        Ok(())
    }

    fn solve(&mut self, dt: f64) -> Result<SolveReport, SolveError> {
        let mut env = SolveEnv {
            store: &mut self.store,
            graph: &mut self.graph,
            domain: self.domain.as_ref(),
            root: self.root,
            time: self.time,
            dt,
        };
        match self.solver.as_mut() {
            Some(solver) => solver.execute(&mut env),
            None => {
                env.graph
                    .execute(env.root, env.store, env.domain, env.time, dt)?;
                Ok(SolveReport {
                    substeps: 1,
                    ..SolveReport::default()
                })
            }
        }
    }

    /// Advance one outer step, retrying with smaller steps after
    /// recoverable solver failures.
    ///
    /// # Errors
    ///
    /// On any error the buffers are left as they were before the step.
    pub fn step(&mut self) -> Result<&StepMetrics, ProblemError> {
        let start = Instant::now();
        let mut metrics = StepMetrics::default();

        if !self.initialized {
            self.initialize()?;
        }
        let t = Instant::now();
        if let Some(worker) = self.output.as_mut() {
            worker.wait()?;
        }
        metrics.output_us += elapsed_us(t);

        let executions = self.graph.execution_count(self.root);
        let checkpoint = self.store.checkpoint();
        let report = loop {
            let dt = self.dt;
            let t = Instant::now();
            let result = self.solve(dt);
            metrics.solve_us += elapsed_us(t);
            let error = match result {
                Ok(report) => break report,
                Err(e) => e,
            };
            self.store.restore(&checkpoint);
            if let Some(solver) = self.solver.as_mut() {
                solver.restart();
            }
            if !error.is_recoverable() || metrics.retries >= self.max_retries {
                return Err(ProblemError::Solve(error));
            }
            match self.time_step.rejected(dt) {
                Cutback::Retry(next) => {
                    tracing::warn!(step = self.step, dt, next, %error, "step failed, cutting back");
                    self.dt = next;
                    metrics.retries += 1;
                }
                Cutback::GiveUp => return Err(ProblemError::Solve(error)),
                Cutback::BelowMinimum { dt_min } => {
                    return Err(ProblemError::TimeStepTooSmall { dt, dt_min });
                }
            }
        };
        let dt = self.dt;

        if let Some(id) = self.postprocess {
            let t = Instant::now();
            let result = self.graph.execute(
                id,
                &mut self.store,
                self.domain.as_ref(),
                self.time + dt,
                dt,
            );
            if let Err(reason) = result {
                self.store.restore(&checkpoint);
                if let Some(solver) = self.solver.as_mut() {
                    solver.restart();
                }
                return Err(ProblemError::Node {
                    phase: "postprocess",
                    reason,
                });
            }
            metrics.postprocess_us = elapsed_us(t);
        }

        self.store.rotate_all();
        self.time += dt;
        self.step += 1;
        self.previous_dt = Some(dt);
        self.dt = self.time_step.accepted(dt, &report);

        let t = Instant::now();
        self.emit()?;
        metrics.output_us += elapsed_us(t);

        metrics.substeps = report.substeps;
        metrics.root_executions = self.graph.execution_count(self.root) - executions;
        metrics.predictor_lookback = report.predictor_lookback;
        metrics.corrector_lookback = report.corrector_lookback;
        metrics.iterations = report.iterations;
        metrics.residual = report.residual;
        metrics.dt = dt;
        metrics.total_us = elapsed_us(start);
        tracing::debug!(
            step = self.step,
            time = self.time,
            dt,
            total_us = metrics.total_us,
            solve_us = metrics.solve_us,
            "step complete"
        );
        self.metrics = metrics;
        Ok(&self.metrics)
    }

    /// Step until `end_time`, shortening the last step to land on it.
    /// Returns the number of steps taken.
    pub fn run_until(&mut self, end_time: f64) -> Result<u64, ProblemError> {
        let slack = 1e-12 * end_time.abs().max(1.0);
        let first = self.step;
        while self.time < end_time - slack {
            let remaining = end_time - self.time;
            if self.dt > remaining {
                self.dt = remaining;
            }
            self.step()?;
        }
        Ok(self.step - first)
    }

    /// Wait for the last output frame to be consumed.
    pub fn finish(&mut self) -> Result<(), ProblemError> {
        if let Some(worker) = self.output.as_mut() {
            worker.wait()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::CollectSink;
    use kairos_core::Tensor;
    use kairos_graph::ComputeGroup;
    use kairos_test_utils::{ConstNode, CopyNode, FailingNode, IdentityDomain};

    fn counter_problem() -> (BufferStore, ComputeGraph, NodeId) {
        let mut store = BufferStore::new();
        store.register_with("x", Tensor::filled(&[2], 0.0)).unwrap();
        let mut graph = ComputeGraph::new();
        let root = graph
            .add_node(Box::new(CopyNode::new("copy", &mut store, "x", "y")))
            .unwrap();
        (store, graph, root)
    }

    #[test]
    fn bare_root_advances_time() {
        let (store, graph, root) = counter_problem();
        let mut problem = Problem::new(
            ProblemConfig::new(root, 0.25),
            store,
            graph,
            Box::new(IdentityDomain::new(&[2])),
        )
        .unwrap();
        let metrics = problem.step().unwrap();
        assert_eq!(metrics.root_executions, 1);
        assert_eq!(metrics.substeps, 1);
        assert_eq!(problem.time(), 0.25);
        assert_eq!(problem.step_count(), 1);
        assert_eq!(problem.previous_dt(), Some(0.25));
        assert!(problem.critical_dt().is_none());
    }

    #[test]
    fn run_until_lands_on_end_time() {
        let (store, graph, root) = counter_problem();
        let mut problem = Problem::new(
            ProblemConfig::new(root, 0.3),
            store,
            graph,
            Box::new(IdentityDomain::new(&[2])),
        )
        .unwrap();
        assert_eq!(problem.run_until(1.0).unwrap(), 4);
        assert!((problem.time() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn initial_and_postprocess_run_in_order() {
        let mut store = BufferStore::new();
        let mut graph = ComputeGraph::new();
        let init = graph
            .add_node(Box::new(ConstNode::new("init", &mut store, "x", &[2], 5.0)))
            .unwrap();
        let root = graph
            .add_node(Box::new(CopyNode::new("copy", &mut store, "x", "y")))
            .unwrap();
        let post = graph
            .add_node(Box::new(CopyNode::new("post", &mut store, "y", "z")))
            .unwrap();
        let mut config = ProblemConfig::new(root, 0.1);
        config.initial = Some(init);
        config.postprocess = Some(post);
        config.outputs = vec!["z".into()];
        let sink = CollectSink::new();
        config.sink = Some(Box::new(sink.clone()));
        let mut problem =
            Problem::new(config, store, graph, Box::new(IdentityDomain::new(&[2]))).unwrap();
        problem.step().unwrap();
        problem.finish().unwrap();
        assert_eq!(problem.store_mut().current("z").unwrap().as_slice(), &[5.0; 2]);
        let frames = sink.frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].step, 0);
        assert!(!frames[0].buffers["z"].is_defined());
        assert_eq!(frames[1].buffers["z"].as_slice(), &[5.0; 2]);
    }

    #[test]
    fn node_failure_is_not_retried() {
        let mut store = BufferStore::new();
        let mut graph = ComputeGraph::new();
        let failing = FailingNode::new("flaky", &mut store, "x", 0);
        let calls = failing.counter();
        graph.add_node(Box::new(failing)).unwrap();
        let root = graph.add_group(ComputeGroup::new("root", ["flaky"])).unwrap();
        let mut problem = Problem::new(
            ProblemConfig::new(root, 0.1),
            store,
            graph,
            Box::new(IdentityDomain::new(&[1])),
        )
        .unwrap();
        let err = problem.step().unwrap_err();
        assert!(matches!(
            err,
            ProblemError::Solve(SolveError::NodeFailed { ref node, .. }) if node == "flaky"
        ));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(problem.time(), 0.0);
    }

    #[test]
    fn outputs_without_sink_are_rejected() {
        let (store, graph, root) = counter_problem();
        let mut config = ProblemConfig::new(root, 0.1);
        config.outputs = vec!["x".into()];
        assert!(matches!(
            Problem::new(config, store, graph, Box::new(IdentityDomain::new(&[2]))),
            Err(ProblemError::Config(ConfigError::InvalidParameter { name: "outputs", .. }))
        ));
    }
}
