//! Per-step metrics for the problem driver.
//!
//! [`StepMetrics`] records what one outer step cost and what the solver
//! did, for logging, profiling, and step-size tuning.

/// Timing and solver statistics for a single outer step.
///
/// Durations are wall-clock microseconds. The driver fills these after
/// each successful `step()`; retried attempts are folded into the totals.
#[derive(Clone, Debug, Default)]
pub struct StepMetrics {
    /// Wall-clock time for the entire step, in microseconds.
    pub total_us: u64,
    /// Time spent in the solver (or the bare root node), in microseconds.
    pub solve_us: u64,
    /// Time spent in the post-processing node, in microseconds.
    pub postprocess_us: u64,
    /// Time spent waiting for the previous output and mirroring, in
    /// microseconds.
    pub output_us: u64,
    /// Sub-steps completed by the accepted attempt.
    pub substeps: u32,
    /// Root node executions across all attempts.
    pub root_executions: u64,
    /// Predictor lookback per sub-step of the accepted attempt.
    pub predictor_lookback: Vec<usize>,
    /// Corrector lookback per sub-step of the accepted attempt.
    pub corrector_lookback: Vec<usize>,
    /// Nonlinear iterations of the accepted attempt.
    pub iterations: u32,
    /// Final residual norm of an iterative solve.
    pub residual: Option<f64>,
    /// Failed attempts before the step was accepted.
    pub retries: u32,
    /// Step size of the accepted attempt.
    pub dt: f64,
}
