//! Backward Euler solved by a pointwise secant iteration.
//!
//! Same residual as [`BroydenSolver`](crate::broyden::BroydenSolver), but
//! the Jacobian is approximated per grid point and per variable by the
//! scalar secant slope `ΔR/Δu`. The first iteration uses the exact
//! Jacobian of the linear part, `dt·L − 1`.

use kairos_core::{SolveError, Tensor};
use kairos_store::BufferStore;

use crate::broyden::{backward_euler_residual, norm, start_implicit_step, write_iterate};
use crate::config::{ConfigError, IterationLimits, SecantConfig};
use crate::predictor::Predictor;
use crate::solver::{SolveEnv, SolveReport, TimeIntegrator};
use crate::variable::{bind_all, Forwarding, Variable};

/// Secant-iterated backward Euler.
pub struct SecantSolver {
    variables: Vec<Variable>,
    forwarding: Forwarding,
    predictors: Vec<Box<dyn Predictor>>,
    substeps: u32,
    limits: IterationLimits,
}

impl SecantSolver {
    /// Bind `config` against `store`.
    pub fn new(config: SecantConfig, store: &mut BufferStore) -> Result<Self, ConfigError> {
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

    /// Every variable passes the absolute or the relative test.
    fn converged(&self, residuals: &[Tensor], initial: &[f64]) -> bool {
        residuals.iter().zip(initial).all(|(r, &r0)| {
            let r = r.norm();
            r < self.limits.absolute_tolerance || r < self.limits.relative_tolerance * r0
        })
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
        let mut x = Vec::with_capacity(self.variables.len());
        let mut linear = Vec::with_capacity(self.variables.len());
        for var in &self.variables {
            x.push(env.store.get(var.reciprocal)?.clone());
            linear.push(var.linear.map(|h| env.store.get(h).cloned()).transpose()?);
        }
        let mut r = backward_euler_residual(&self.variables, env.store, dt, &u_old, &x)?;
        let r0: Vec<f64> = r.iter().map(Tensor::norm).collect();
        let total0 = norm(&r);

        let mut iterations = 0;
        let mut previous: Option<(Vec<Tensor>, Vec<Tensor>)> = None;
        while !self.converged(&r, &r0) {
            if iterations == self.limits.max_iterations {
                return Err(self.not_converged(iterations, norm(&r)));
            }
            iterations += 1;

            let mut steps = Vec::with_capacity(x.len());
            for (i, (xi, ri)) in x.iter_mut().zip(&r).enumerate() {
                let mut step = ri.zeros_like();
                for (point, s) in step.as_mut_slice().iter_mut().enumerate() {
                    let residual = ri.as_slice()[point];
                    let slope = previous.as_ref().and_then(|(dx, r_prev)| {
                        let dy = residual - r_prev[i].as_slice()[point];
                        (dy != 0.0).then(|| dx[i].as_slice()[point] / dy)
                    });
                    let du = match slope {
                        Some(inverse_slope) => -residual * inverse_slope,
                        None => {
                            let l = linear[i].as_ref().map_or(0.0, |l| l.as_slice()[point]);
                            let denominator = 1.0 - dt * l;
                            if denominator == 0.0 || !denominator.is_finite() {
                                return Err(SolveError::DegenerateLinearSystem { point });
                            }
                            residual / denominator
                        }
                    };
                    *s = self.limits.damping * du;
                }
                xi.axpy(1.0, &step);
                steps.push(step);
            }

            write_iterate(&self.variables, env, &x)?;
            env.evaluate(&self.forwarding, time + dt, dt)?;
            let r_new = backward_euler_residual(&self.variables, env.store, dt, &u_old, &x)?;
            let total = norm(&r_new);
            tracing::trace!(iteration = iterations, residual = total, "secant iteration");
            if !total.is_finite() || total > self.limits.divergence_limit * total0 {
                return Err(self.not_converged(iterations, total));
            }
            previous = Some((steps, std::mem::replace(&mut r, r_new)));
        }
        if iterations == 0 {
            write_iterate(&self.variables, env, &x)?;
        }
        tracing::trace!(time, dt, iterations, "secant sub-step");
        Ok(SolveReport {
            substeps: 1,
            iterations,
            residual: Some(norm(&r)),
            ..SolveReport::default()
        })
    }

    fn not_converged(&self, iterations: u32, residual: f64) -> SolveError {
        SolveError::NotConverged {
            solver: self.name().to_owned(),
            iterations,
            residual,
        }
    }
}

impl TimeIntegrator for SecantSolver {
    fn name(&self) -> &str {
        "secant"
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
