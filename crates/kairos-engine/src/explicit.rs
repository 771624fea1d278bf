//! Explicit one-step integrators: forward Euler and first-order damped
//! Runge–Kutta–Chebyshev.
//!
//! Both advance `∂ū/∂t = N + L·ū` with everything evaluated explicitly.
//! RKC spends `s` root evaluations per sub-step to stretch the real
//! stability interval from 2 to about `2s²`, which suits diffusive
//! problems whose stiffness sits on the negative real axis.

use kairos_core::{SolveError, Tensor};
use kairos_store::BufferStore;

use crate::broyden::write_iterate;
use crate::config::{ChebyshevConfig, ConfigError, ForwardEulerConfig};
use crate::solver::{inverse_spectral_radius, SolveEnv, SolveReport, TimeIntegrator};
use crate::variable::{bind_all, Forwarding, Variable, VariableSpec};

/// Stage coefficients of the damped first-order Chebyshev method.
///
/// With `w0 = 1 + ε/s²` and `w1 = T_s(w0) / T_s'(w0)` the stability
/// polynomial is `T_s(w0 + w1·z) / T_s(w0)`.
#[derive(Clone, Debug, PartialEq)]
pub struct ChebyshevCoefficients {
    w0: f64,
    w1: f64,
    /// `1 / T_j(w0)` for `j = 0..=s`.
    b: Vec<f64>,
    /// Stage abscissae `c_j = w1·T_j'(w0) / T_j(w0)`.
    c: Vec<f64>,
}

impl ChebyshevCoefficients {
    /// Coefficients for `stages >= 1` and damping `eps >= 0`.
    pub fn new(stages: u32, eps: f64) -> Self {
        let s = stages.max(1) as usize;
        let w0 = 1.0 + eps / (s * s) as f64;
        let mut t = vec![1.0, w0];
        let mut u = vec![1.0, 2.0 * w0];
        for j in 2..=s {
            t.push(2.0 * w0 * t[j - 1] - t[j - 2]);
            u.push(2.0 * w0 * u[j - 1] - u[j - 2]);
        }
        // T_j' = j·U_{j−1}
        let t_prime = |j: usize| if j == 0 { 0.0 } else { j as f64 * u[j - 1] };
        let w1 = t[s] / t_prime(s);
        let b = t[..=s].iter().map(|t| 1.0 / t).collect();
        let c = (0..=s).map(|j| w1 * t_prime(j) / t[j]).collect();
        Self { w0, w1, b, c }
    }

    /// Number of stages.
    pub fn stages(&self) -> usize {
        self.b.len() - 1
    }

    /// Length of the real stability interval `[−β, 0]` in units of `dt·λ`.
    pub fn stability_bound(&self) -> f64 {
        (1.0 + self.w0) / self.w1
    }

    /// Weights `(μ, ν, μ̃)` of stage `j >= 2`.
    fn stage(&self, j: usize) -> (f64, f64, f64) {
        let b = &self.b;
        (
            2.0 * self.w0 * b[j] / b[j - 1],
            -b[j] / b[j - 2],
            2.0 * self.w1 * b[j] / b[j - 1],
        )
    }
}

/// Shared stepping core: variables, forwarding and the stage table.
struct ExplicitStepper {
    variables: Vec<Variable>,
    forwarding: Forwarding,
    substeps: u32,
    coefficients: ChebyshevCoefficients,
}

impl ExplicitStepper {
    fn bind(
        specs: &[VariableSpec],
        forward: &[(String, String)],
        substeps: u32,
        coefficients: ChebyshevCoefficients,
        store: &mut BufferStore,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            variables: bind_all(specs, store, 0)?,
            forwarding: Forwarding::bind(store, forward)?,
            substeps,
            coefficients,
        })
    }

    fn derivatives(&self, store: &BufferStore) -> Result<Vec<Tensor>, SolveError> {
        self.variables
            .iter()
            .map(|v| v.time_derivative(store).map_err(SolveError::from))
            .collect()
    }

    fn substep(&self, env: &mut SolveEnv<'_>, time: f64, dt: f64) -> Result<SolveReport, SolveError> {
        env.evaluate(&self.forwarding, time, dt)?;
        let mut y0 = Vec::with_capacity(self.variables.len());
        for var in &self.variables {
            var.check_shapes(env.store)?;
            y0.push(env.store.get(var.reciprocal)?.clone());
        }
        let f0 = self.derivatives(env.store)?;

        let k = &self.coefficients;
        let mut older = y0.clone();
        let mut newer = y0.clone();
        for (y, f) in newer.iter_mut().zip(&f0) {
            y.axpy(k.c[1] * dt, f);
        }
        for j in 2..=k.stages() {
            write_iterate(&self.variables, env, &newer)?;
            env.evaluate(&self.forwarding, time + k.c[j - 1] * dt, dt)?;
            let f = self.derivatives(env.store)?;
            let (mu, nu, mu_tilde) = k.stage(j);
            let mut next = Vec::with_capacity(y0.len());
            for (((y0, y1), y2), f) in y0.iter().zip(&newer).zip(&older).zip(&f) {
                let mut y = y0.clone();
                y.scale(1.0 - mu - nu);
                y.axpy(mu, y1);
                y.axpy(nu, y2);
                y.axpy(mu_tilde * dt, f);
                next.push(y);
            }
            older = std::mem::replace(&mut newer, next);
            tracing::trace!(stage = j, "chebyshev stage");
        }
        write_iterate(&self.variables, env, &newer)?;
        if newer.iter().any(Tensor::has_non_finite) {
            return Err(SolveError::NotConverged {
                solver: "explicit".into(),
                iterations: k.stages() as u32,
                residual: f64::NAN,
            });
        }
        Ok(SolveReport {
            substeps: 1,
            ..SolveReport::default()
        })
    }

    fn execute(&self, env: &mut SolveEnv<'_>) -> Result<SolveReport, SolveError> {
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

    fn critical_dt(&self, store: &BufferStore) -> Option<f64> {
        let operators = self
            .variables
            .iter()
            .filter_map(|v| v.linear)
            .filter_map(|h| store.get(h).ok());
        inverse_spectral_radius(operators).map(|dt| dt * self.coefficients.stability_bound())
    }
}

/// `ū_{n+1} = ū_n + dt·(N + L·ū_n)`.
pub struct ForwardEuler {
    stepper: ExplicitStepper,
}

impl ForwardEuler {
    /// Bind `config` against `store`.
    pub fn new(config: ForwardEulerConfig, store: &mut BufferStore) -> Result<Self, ConfigError> {
        config.validate()?;
        let stepper = ExplicitStepper::bind(
            &config.variables,
            &config.forward,
            config.substeps,
            ChebyshevCoefficients::new(1, 0.0),
            store,
        )?;
        Ok(Self { stepper })
    }
}

impl TimeIntegrator for ForwardEuler {
    fn name(&self) -> &str {
        "forward-euler"
    }

    fn execute(&mut self, env: &mut SolveEnv<'_>) -> Result<SolveReport, SolveError> {
        self.stepper.execute(env)
    }

    fn critical_dt(&self, store: &BufferStore) -> Option<f64> {
        self.stepper.critical_dt(store)
    }
}

/// First-order damped Runge–Kutta–Chebyshev.
pub struct RungeKuttaChebyshev {
    stepper: ExplicitStepper,
}

impl RungeKuttaChebyshev {
    /// Bind `config` against `store`.
    pub fn new(config: ChebyshevConfig, store: &mut BufferStore) -> Result<Self, ConfigError> {
        config.validate()?;
        let stepper = ExplicitStepper::bind(
            &config.variables,
            &config.forward,
            config.substeps,
            ChebyshevCoefficients::new(config.stages, config.damping),
            store,
        )?;
        Ok(Self { stepper })
    }
}

impl TimeIntegrator for RungeKuttaChebyshev {
    fn name(&self) -> &str {
        "runge-kutta-chebyshev"
    }

    fn execute(&mut self, env: &mut SolveEnv<'_>) -> Result<SolveReport, SolveError> {
        self.stepper.execute(env)
    }

    fn critical_dt(&self, store: &BufferStore) -> Option<f64> {
        self.stepper.critical_dt(store)
    }
}
