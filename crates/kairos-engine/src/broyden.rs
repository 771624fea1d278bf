//! Fully implicit backward-Euler steps solved by Broyden iteration.
//!
//! For each variable the sub-step solves
//!
//! ```text
//! R(ū) = dt·(N(ū) + L·ū) + ū_old − ū = 0
//! ```
//!
//! in reciprocal space. Every residual evaluation writes the iterate back
//! to real space and re-executes the root node, so `N` may couple the
//! variables arbitrarily. The inverse Jacobian is kept as one small dense
//! matrix per grid point, coupling the variables at that point only.

use kairos_core::{SolveError, Tensor};
use kairos_store::BufferStore;
use nalgebra::{DMatrix, DVector};

use crate::config::{BroydenConfig, ConfigError, IterationLimits};
use crate::predictor::Predictor;
use crate::solver::{SolveEnv, SolveReport, TimeIntegrator};
use crate::variable::{bind_all, check_common_shape, Forwarding, Variable};

/// Outcome of a converged quasi-Newton solve.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Convergence {
    /// Residual evaluations after the initial one.
    pub iterations: u32,
    /// Final residual norm.
    pub residual: f64,
    /// Final residual relative to the initial one.
    pub relative: f64,
    /// Rank-one updates skipped for a vanishing denominator.
    pub skipped_updates: u32,
}

/// Euclidean norm over a set of tensors.
pub fn norm(tensors: &[Tensor]) -> f64 {
    tensors
        .iter()
        .flat_map(|t| t.as_slice())
        .map(|v| v * v)
        .sum::<f64>()
        .sqrt()
}

fn point_vector(tensors: &[Tensor], point: usize) -> DVector<f64> {
    DVector::from_iterator(tensors.len(), tensors.iter().map(|t| t.as_slice()[point]))
}

/// Solve `residual(x) = 0` by Broyden's method, starting from `x` with
/// `initial_residual = residual(x)` already evaluated.
///
/// `inverse_jacobian` holds one `n×n` matrix per grid point, `n` being
/// `x.len()`; it is updated in place. On success `x` holds the solution
/// and the last call to `residual` was made at that `x`.
///
/// # Errors
///
/// [`SolveError::NotConverged`] when the residual becomes non-finite,
/// grows past `divergence_limit` times its initial value, or is still
/// above tolerance after `max_iterations`. Errors from `residual` are
/// passed through.
pub fn broyden<F>(
    x: &mut [Tensor],
    inverse_jacobian: &mut [DMatrix<f64>],
    initial_residual: Vec<Tensor>,
    limits: &IterationLimits,
    mut residual: F,
) -> Result<Convergence, SolveError>
where
    F: FnMut(&[Tensor]) -> Result<Vec<Tensor>, SolveError>,
{
    let not_converged = |iterations: u32, residual: f64| SolveError::NotConverged {
        solver: "broyden".into(),
        iterations,
        residual,
    };

    let r0 = norm(&initial_residual);
    if !r0.is_finite() {
        return Err(not_converged(0, r0));
    }
    if r0 < limits.absolute_tolerance {
        return Ok(Convergence {
            iterations: 0,
            residual: r0,
            relative: 0.0,
            skipped_updates: 0,
        });
    }

    let points = inverse_jacobian.len();
    let mut r = initial_residual;
    let mut skipped = 0;
    let mut last = r0;
    for iteration in 1..=limits.max_iterations {
        let mut steps = Vec::with_capacity(points);
        for (point, m) in inverse_jacobian.iter().enumerate() {
            let s = m * point_vector(&r, point) * -limits.damping;
            for (xi, si) in x.iter_mut().zip(s.iter()) {
                xi.as_mut_slice()[point] += si;
            }
            steps.push(s);
        }

        let r_new = residual(x)?;
        last = norm(&r_new);
        let relative = last / r0;
        tracing::trace!(iteration, residual = last, relative, "broyden iteration");
        if !last.is_finite() || last > limits.divergence_limit * r0 {
            return Err(not_converged(iteration, last));
        }
        if last < limits.absolute_tolerance || relative < limits.relative_tolerance {
            if skipped > 0 {
                tracing::warn!(skipped, "skipped Broyden updates with vanishing denominator");
            }
            return Ok(Convergence {
                iterations: iteration,
                residual: last,
                relative,
                skipped_updates: skipped,
            });
        }

        for ((point, m), s) in inverse_jacobian.iter_mut().enumerate().zip(&steps) {
            let y = point_vector(&r_new, point) - point_vector(&r, point);
            let denominator = s.dot(&y);
            if denominator.abs() <= f64::EPSILON * s.norm() * y.norm() {
                skipped += 1;
                continue;
            }
            let correction = (s - &*m * &y) * s.transpose() / denominator;
            *m += correction;
        }
        r = r_new;
    }

    if skipped > 0 {
        tracing::warn!(skipped, "skipped Broyden updates with vanishing denominator");
    }
    Err(not_converged(limits.max_iterations, last))
}

/// Write `x` into the reciprocal buffers and their real-space inverses.
pub(crate) fn write_iterate(
    variables: &[Variable],
    env: &mut SolveEnv<'_>,
    x: &[Tensor],
) -> Result<(), SolveError> {
    for (var, xi) in variables.iter().zip(x) {
        let u = env.domain.inverse_transform(xi);
        env.store.set(var.buffer, u)?;
        env.store.set(var.reciprocal, xi.clone())?;
    }
    Ok(())
}

/// `dt·(N + L·x) + u_old − x` with `N` read from the store.
pub(crate) fn backward_euler_residual(
    variables: &[Variable],
    store: &BufferStore,
    dt: f64,
    u_old: &[Tensor],
    x: &[Tensor],
) -> Result<Vec<Tensor>, SolveError> {
    let mut residuals = Vec::with_capacity(variables.len());
    for ((var, old), xi) in variables.iter().zip(u_old).zip(x) {
        let mut r = old.clone();
        r.axpy(-1.0, xi);
        r.axpy(dt, store.get(var.nonlinear)?);
        if let Some(l) = var.linear {
            let l = store.get(l)?.as_slice();
            for ((r, l), x) in r.as_mut_slice().iter_mut().zip(l).zip(xi.as_slice()) {
                *r += dt * l * x;
            }
        }
        residuals.push(r);
    }
    Ok(residuals)
}

/// Snapshot the reciprocal state, apply predictors, and re-evaluate the
/// root if any of them moved the state.
pub(crate) fn start_implicit_step(
    variables: &[Variable],
    predictors: &mut [Box<dyn Predictor>],
    forwarding: &Forwarding,
    env: &mut SolveEnv<'_>,
    time: f64,
    dt: f64,
) -> Result<Vec<Tensor>, SolveError> {
    env.evaluate(forwarding, time, dt)?;
    let mut u_old = Vec::with_capacity(variables.len());
    for var in variables {
        var.check_shapes(env.store)?;
        u_old.push(env.store.get(var.reciprocal)?.clone());
    }
    let mut predicted = false;
    for p in predictors.iter_mut() {
        if p.apply(env.store)? {
            tracing::trace!(predictor = p.name(), "applied");
            predicted = true;
        }
    }
    if predicted {
        env.evaluate(forwarding, time + dt, dt)?;
    }
    Ok(u_old)
}

/// Broyden-iterated backward Euler.
pub struct BroydenSolver {
    variables: Vec<Variable>,
    forwarding: Forwarding,
    predictors: Vec<Box<dyn Predictor>>,
    substeps: u32,
    limits: IterationLimits,
}

impl BroydenSolver {
    /// Bind `config` against `store`.
    pub fn new(config: BroydenConfig, store: &mut BufferStore) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            variables: bind_all(&config.variables, store, 0)?,
            forwarding: Forwarding::bind(store, &config.forward)?,
            predictors: Vec::new(),
            substeps: config.substeps,
            limits: config.limits,
        })
    }

    /// Run `predictor` before every sub-step's iteration.
    pub fn with_predictor(mut self, predictor: Box<dyn Predictor>) -> Self {
        self.predictors.push(predictor);
        self
    }

    /// `diag(1 / (dt·L_i − 1))` per point: the exact inverse Jacobian when
    /// `N` does not depend on `ū`.
    fn seed_inverse_jacobian(&self, store: &BufferStore, dt: f64, points: usize) -> Result<Vec<DMatrix<f64>>, SolveError> {
        let n = self.variables.len();
        let operators = self
            .variables
            .iter()
            .map(|v| v.linear.map(|h| store.get(h)).transpose())
            .collect::<Result<Vec<_>, _>>()?;
        let mut matrices = Vec::with_capacity(points);
        for point in 0..points {
            let diagonal = operators.iter().map(|l| {
                let d = l.map_or(-1.0, |l| dt * l.as_slice()[point] - 1.0);
                if d == 0.0 || !d.is_finite() {
                    -1.0
                } else {
                    1.0 / d
                }
            });
            matrices.push(DMatrix::from_diagonal(&DVector::from_iterator(n, diagonal)));
        }
        Ok(matrices)
    }

    fn substep(&mut self, env: &mut SolveEnv<'_>, time: f64, dt: f64) -> Result<SolveReport, SolveError> {
        let u_old = start_implicit_step(
            &self.variables,
            &mut self.predictors,
            &self.forwarding,
            env,
            time,
            dt,
        )?;
        check_common_shape(&self.variables, env.store)?;
        let mut x = self
            .variables
            .iter()
            .map(|v| env.store.get(v.reciprocal).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        let points = x.first().map_or(0, Tensor::len);
        let mut m = self.seed_inverse_jacobian(env.store, dt, points)?;
        let r0 = backward_euler_residual(&self.variables, env.store, dt, &u_old, &x)?;

        let variables = &self.variables;
        let forwarding = &self.forwarding;
        let convergence = broyden(&mut x, &mut m, r0, &self.limits, |x| {
            write_iterate(variables, env, x)?;
            env.evaluate(forwarding, time + dt, dt)?;
            backward_euler_residual(variables, env.store, dt, &u_old, x)
        })?;
        // A zero-iteration solve never wrote the iterate back.
        if convergence.iterations == 0 {
            write_iterate(variables, env, &x)?;
        }
        tracing::trace!(time, dt, iterations = convergence.iterations, "broyden sub-step");
        Ok(SolveReport {
            substeps: 1,
            iterations: convergence.iterations,
            residual: Some(convergence.residual),
            ..SolveReport::default()
        })
    }
}

impl TimeIntegrator for BroydenSolver {
    fn name(&self) -> &str {
        "broyden"
    }

    fn execute(&mut self, env: &mut SolveEnv<'_>) -> Result<SolveReport, SolveError> {
        let sub_dt = env.dt / f64::from(self.substeps);
        let mut report = SolveReport::default();
        for k in 0..self.substeps {
            let time = env.time + f64::from(k) * sub_dt;
            report.absorb(env.atomic(|env| self.substep(env, time, sub_dt))?);
            if k + 1 < self.substeps {
                env.store.rotate_all();
            }
        }
        Ok(report)
    }
}
