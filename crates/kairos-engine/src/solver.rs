//! The [`TimeIntegrator`] trait and the environment solvers step in.

use kairos_core::{Domain, NodeId, SolveError};
use kairos_graph::ComputeGraph;
use kairos_store::BufferStore;

use crate::variable::Forwarding;

/// Everything a solver touches during one outer step.
///
/// The driver builds a fresh environment per step; solvers never keep
/// references to it.
pub struct SolveEnv<'a> {
    /// Buffers and their histories.
    pub store: &'a mut BufferStore,
    /// The resolved node registry.
    pub graph: &'a mut ComputeGraph,
    /// Grid and transforms.
    pub domain: &'a dyn Domain,
    /// Node executed once per right-hand-side evaluation.
    pub root: NodeId,
    /// Simulation time at the start of the step.
    pub time: f64,
    /// Outer step size.
    pub dt: f64,
}

impl SolveEnv<'_> {
    /// Execute the root node at `time` with sub-step size `dt`, then apply
    /// buffer forwarding.
    pub(crate) fn evaluate(
        &mut self,
        forwarding: &Forwarding,
        time: f64,
        dt: f64,
    ) -> Result<(), SolveError> {
        self.graph
            .execute(self.root, self.store, self.domain, time, dt)?;
        forwarding.apply(self.store)?;
        Ok(())
    }

    /// Run `f` as one atomic sub-step: on error every buffer is restored to
    /// its value before `f` started.
    pub fn atomic<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<R, SolveError>,
    ) -> Result<R, SolveError> {
        let checkpoint = self.store.checkpoint();
        let result = f(self);
        if result.is_err() {
            self.store.restore(&checkpoint);
        }
        result
    }
}

/// What a solver did during one outer step.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SolveReport {
    /// Sub-steps completed.
    pub substeps: u32,
    /// History entries consumed by the predictor, per sub-step.
    pub predictor_lookback: Vec<usize>,
    /// History entries consumed by the corrector, per sub-step. Empty when
    /// no corrector ran.
    pub corrector_lookback: Vec<usize>,
    /// Nonlinear iterations summed over sub-steps; 0 for direct methods.
    pub iterations: u32,
    /// Final residual norm of an iterative solve.
    pub residual: Option<f64>,
}

impl SolveReport {
    pub(crate) fn absorb(&mut self, other: SolveReport) {
        self.substeps += other.substeps;
        self.predictor_lookback.extend(other.predictor_lookback);
        self.corrector_lookback.extend(other.corrector_lookback);
        self.iterations += other.iterations;
        if other.residual.is_some() {
            self.residual = other.residual;
        }
    }
}

/// A time-integration scheme driving the root node.
///
/// `execute` advances every bound variable by `env.dt`, split into the
/// scheme's sub-steps. Between sub-steps it rotates buffer history itself;
/// the rotation after the final sub-step belongs to the driver. A failed
/// sub-step must leave the store as it was when that sub-step began (see
/// [`SolveEnv::atomic`]).
pub trait TimeIntegrator: Send {
    /// Scheme name for logs and errors.
    fn name(&self) -> &str;

    /// Advance one outer step.
    ///
    /// # Errors
    ///
    /// [`SolveError::NotConverged`] and
    /// [`SolveError::DegenerateLinearSystem`] are recoverable by retrying
    /// with a smaller step; node and store failures are not.
    fn execute(&mut self, env: &mut SolveEnv<'_>) -> Result<SolveReport, SolveError>;

    /// Forget step-size history so the next step starts at the lowest
    /// order. Called by the driver after a failed step.
    fn restart(&mut self) {}

    /// Largest stable step for the explicit part of the scheme, if the
    /// scheme can estimate one from the current buffers.
    fn critical_dt(&self, _store: &BufferStore) -> Option<f64> {
        None
    }
}

/// Sub-step bookkeeping shared by the schemes: tracks how many completed
/// sub-steps were taken at the current sub-step size.
#[derive(Clone, Debug, Default)]
pub(crate) struct StepHistory {
    sub_dt: Option<f64>,
    steps: usize,
}

impl StepHistory {
    /// Record the sub-step size about to be used. Resets the count when it
    /// differs from the previous one.
    pub fn begin(&mut self, sub_dt: f64) {
        if self.sub_dt != Some(sub_dt) {
            if let Some(previous) = self.sub_dt {
                tracing::debug!(from = previous, to = sub_dt, "sub-step size changed, order reset");
            }
            self.sub_dt = Some(sub_dt);
            self.steps = 0;
        }
    }

    /// Completed sub-steps at the current size.
    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn complete(&mut self) {
        self.steps += 1;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Largest `|L|` across the given linear operator buffers turned into a
/// stability limit `1 / max|L|`.
pub(crate) fn inverse_spectral_radius<'a>(
    operators: impl IntoIterator<Item = &'a kairos_core::Tensor>,
) -> Option<f64> {
    let max = operators
        .into_iter()
        .map(|l| l.max_abs())
        .fold(0.0_f64, f64::max);
    (max > 0.0).then(|| 1.0 / max)
}
