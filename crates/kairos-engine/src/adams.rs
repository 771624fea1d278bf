//! Semi-implicit Adams–Bashforth predictor with optional Adams–Moulton
//! corrector.
//!
//! Each variable is advanced in reciprocal space as
//!
//! ```text
//! (I − dt·L) ū_{n+1} = ū_n + dt · Σ_j b_j · N_{n−j}
//! ```
//!
//! with the linear operator `L` treated implicitly and the nonlinear term
//! `N` extrapolated from its history. The order used on each sub-step is
//! capped by how many sub-steps were taken at the current step size, so a
//! change of `dt` drops back to first order and climbs again.

use kairos_core::{SolveError, Tensor};
use kairos_store::BufferStore;

use crate::coefficients::{adams_bashforth, adams_moulton};
use crate::config::{AdamsConfig, ConfigError};
use crate::dense::LinearCoupling;
use crate::solver::{inverse_spectral_radius, SolveEnv, SolveReport, StepHistory, TimeIntegrator};
use crate::variable::{bind_all, check_common_shape, Forwarding, Variable};

/// Multistep integrator for `∂ū/∂t = L·ū + N(u)`.
pub struct AdamsBashforthMoulton {
    variables: Vec<Variable>,
    forwarding: Forwarding,
    linear: LinearCoupling,
    substeps: u32,
    predictor_order: usize,
    corrector_order: usize,
    corrector_steps: usize,
    history: StepHistory,
}

impl AdamsBashforthMoulton {
    /// Bind `config` against `store` and request the nonlinear history the
    /// configured orders need.
    pub fn new(config: AdamsConfig, store: &mut BufferStore) -> Result<Self, ConfigError> {
        config.validate()?;
        let variables = bind_all(&config.variables, store, config.history_depth())?;
        let forwarding = Forwarding::bind(store, &config.forward)?;
        let linear = LinearCoupling::bind(&variables, config.coupling.as_ref(), store)?;
        Ok(Self {
            variables,
            forwarding,
            linear,
            substeps: config.substeps,
            predictor_order: config.predictor_order,
            corrector_order: config.corrector_order,
            corrector_steps: config.corrector_steps,
            history: StepHistory::default(),
        })
    }

    /// History entries usable at the current step size.
    fn available(&self, store: &BufferStore) -> Result<usize, SolveError> {
        let mut available = self.history.steps();
        for var in &self.variables {
            available = available.min(store.history_of(var.nonlinear)?.len());
        }
        Ok(available)
    }

    /// Solve for the new reciprocal values and write both representations.
    fn commit(&self, env: &mut SolveEnv<'_>, dt: f64, mut rhs: Vec<Tensor>) -> Result<(), SolveError> {
        self.linear.solve(env.store, dt, &mut rhs)?;
        for (var, u_hat) in self.variables.iter().zip(rhs) {
            let u = env.domain.inverse_transform(&u_hat);
            env.store.set(var.buffer, u)?;
            env.store.set(var.reciprocal, u_hat)?;
        }
        Ok(())
    }

    fn substep(
        &mut self,
        env: &mut SolveEnv<'_>,
        time: f64,
        dt: f64,
    ) -> Result<SolveReport, SolveError> {
        self.history.begin(dt);
        env.evaluate(&self.forwarding, time, dt)?;
        for var in &self.variables {
            var.check_shapes(env.store)?;
        }
        if self.linear.is_coupled() {
            check_common_shape(&self.variables, env.store)?;
        }
        let available = self.available(env.store)?;

        let order = (available + 1).min(self.predictor_order);
        let b = adams_bashforth(order);
        let mut start = Vec::with_capacity(self.variables.len());
        let mut rhs = Vec::with_capacity(self.variables.len());
        for var in &self.variables {
            let u_hat = env.store.get(var.reciprocal)?.clone();
            let n_now = env.store.get(var.nonlinear)?.clone();
            let mut r = u_hat.clone();
            r.axpy(dt * b[0], &n_now);
            let past = env.store.history_of(var.nonlinear)?;
            for (n_old, b) in past.iter().zip(&b[1..]) {
                r.axpy(dt * b, n_old);
            }
            rhs.push(r);
            start.push((u_hat, n_now));
        }
        self.commit(env, dt, rhs)?;
        tracing::trace!(time, dt, order, "predictor");

        let mut report = SolveReport {
            substeps: 1,
            predictor_lookback: vec![order - 1],
            ..SolveReport::default()
        };

        if self.corrector_steps > 0 {
            let order = (available + 2).min(self.corrector_order);
            let a = adams_moulton(order);
            for pass in 0..self.corrector_steps {
                env.evaluate(&self.forwarding, time + dt, dt)?;
                let mut rhs = Vec::with_capacity(self.variables.len());
                for (var, (u_hat, n_now)) in self.variables.iter().zip(&start) {
                    let mut r = u_hat.clone();
                    r.axpy(dt * a[0], env.store.get(var.nonlinear)?);
                    if let Some(&a1) = a.get(1) {
                        r.axpy(dt * a1, n_now);
                    }
                    let past = env.store.history_of(var.nonlinear)?;
                    for (n_old, a) in past.iter().zip(a.iter().skip(2)) {
                        r.axpy(dt * a, n_old);
                    }
                    rhs.push(r);
                }
                self.commit(env, dt, rhs)?;
                tracing::trace!(time, dt, order, pass, "corrector");
            }
            // History must receive N(u_n), not the corrector's N(u_pred).
            for (var, (_, n_now)) in self.variables.iter().zip(start) {
                env.store.set(var.nonlinear, n_now)?;
            }
            report.corrector_lookback.push(order.saturating_sub(2));
        }

        self.history.complete();
        Ok(report)
    }
}

impl TimeIntegrator for AdamsBashforthMoulton {
    fn name(&self) -> &str {
        "adams-bashforth-moulton"
    }

    fn execute(&mut self, env: &mut SolveEnv<'_>) -> Result<SolveReport, SolveError> {
        let sub_dt = env.dt / f64::from(self.substeps);
        let mut report = SolveReport::default();
        for k in 0..self.substeps {
            let time = env.time + f64::from(k) * sub_dt;
            let step = env.atomic(|env| self.substep(env, time, sub_dt))?;
            report.absorb(step);
            if k + 1 < self.substeps {
                env.store.rotate_all();
            }
        }
        Ok(report)
    }

    fn restart(&mut self) {
        self.history.reset();
    }

    fn critical_dt(&self, store: &BufferStore) -> Option<f64> {
        let operators = self
            .variables
            .iter()
            .filter_map(|v| v.linear)
            .filter_map(|h| store.get(h).ok());
        inverse_spectral_radius(operators)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::VariableSpec;
    use kairos_core::Domain;
    use kairos_graph::ComputeGraph;
    use kairos_test_utils::{IdentityDomain, LinearOperatorNode, PointwiseRhsNode};

    /// `du/dt = λu` split as `N = λu`, no linear operator.
    fn explicit_decay(
        order: usize,
        lambda: f64,
    ) -> (BufferStore, ComputeGraph, AdamsBashforthMoulton, kairos_core::NodeId) {
        let mut store = BufferStore::new();
        store
            .register_with("u", Tensor::filled(&[1], 1.0))
            .unwrap();
        let mut graph = ComputeGraph::new();
        let root = graph
            .add_node(Box::new(PointwiseRhsNode::new(
                "rhs",
                &mut store,
                "u",
                "n_hat",
                move |u| lambda * u,
            )))
            .unwrap();
        store.register("u_hat").unwrap();
        graph.resolve(root, &store).unwrap();
        let config = AdamsConfig {
            variables: vec![VariableSpec::new("u", "u_hat", "n_hat")],
            predictor_order: order,
            ..AdamsConfig::default()
        };
        let solver = AdamsBashforthMoulton::new(config, &mut store).unwrap();
        (store, graph, solver, root)
    }

    fn step(
        store: &mut BufferStore,
        graph: &mut ComputeGraph,
        solver: &mut AdamsBashforthMoulton,
        root: kairos_core::NodeId,
        domain: &dyn Domain,
        time: f64,
        dt: f64,
    ) -> SolveReport {
        let mut env = SolveEnv {
            store,
            graph,
            domain,
            root,
            time,
            dt,
        };
        let report = solver.execute(&mut env).unwrap();
        env.store.rotate_all();
        report
    }

    #[test]
    fn first_order_is_forward_euler() {
        let domain = IdentityDomain::new(&[1]);
        let (mut store, mut graph, mut solver, root) = explicit_decay(1, -1.0);
        // The reciprocal buffer is written by the solver only; seed it the
        // way a transform node would.
        store.set(store.handle("u_hat").unwrap(), Tensor::filled(&[1], 1.0)).unwrap();
        step(&mut store, &mut graph, &mut solver, root, &domain, 0.0, 0.1);
        let u = store.current("u").unwrap().as_slice()[0];
        assert!((u - 0.9).abs() < 1e-14);
    }

    #[test]
    fn order_climbs_with_history() {
        let domain = IdentityDomain::new(&[1]);
        let (mut store, mut graph, mut solver, root) = explicit_decay(3, -1.0);
        store.set(store.handle("u_hat").unwrap(), Tensor::filled(&[1], 1.0)).unwrap();
        let mut lookbacks = Vec::new();
        for n in 0..4 {
            let r = step(&mut store, &mut graph, &mut solver, root, &domain, n as f64 * 0.1, 0.1);
            lookbacks.extend(r.predictor_lookback);
        }
        assert_eq!(lookbacks, [0, 1, 2, 2]);
    }

    #[test]
    fn implicit_linear_part_is_unconditionally_stable() {
        let domain = IdentityDomain::new(&[4]);
        let mut store = BufferStore::new();
        store.register_with("u", Tensor::filled(&[4], 1.0)).unwrap();
        store.register_with("u_hat", Tensor::filled(&[4], 1.0)).unwrap();
        store.register_with("n_hat", Tensor::zeros(&[4])).unwrap();
        let mut graph = ComputeGraph::new();
        let root = graph
            .add_node(Box::new(LinearOperatorNode::new(
                "op",
                &mut store,
                "l_hat",
                |_| -1000.0,
            )))
            .unwrap();
        graph.resolve(root, &store).unwrap();
        let config = AdamsConfig {
            variables: vec![VariableSpec::new("u", "u_hat", "n_hat").with_linear("l_hat")],
            ..AdamsConfig::default()
        };
        let mut solver = AdamsBashforthMoulton::new(config, &mut store).unwrap();
        for n in 0..5 {
            step(&mut store, &mut graph, &mut solver, root, &domain, n as f64, 1.0);
        }
        let u = store.current("u").unwrap();
        assert!(u.as_slice().iter().all(|v| v.abs() < 1e-12));
        assert_eq!(solver.critical_dt(&store), Some(1e-3));
    }
}
