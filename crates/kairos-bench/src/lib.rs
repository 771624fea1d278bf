//! Benchmark profiles for the Kairos engine.
//!
//! Provides a ready-made problem for benchmarks and examples:
//!
//! - [`allen_cahn`]: periodic 1-D Allen–Cahn `u_t = κ·u_xx + u − u³` on a
//!   Hartley grid, with the diffusion as a linear operator.
//! - [`allen_cahn_problem`]: the same profile wrapped in a [`Problem`]
//!   stepped by the chosen [`Integrator`].

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::f64::consts::PI;

use kairos_core::NodeId;
use kairos_engine::{
    AdamsBashforthMoulton, AdamsConfig, BroydenConfig, BroydenSolver, ChebyshevConfig, Problem,
    ProblemConfig, ProblemError, RungeKuttaChebyshev, TimeIntegrator, VariableSpec,
};
use kairos_graph::{ComputeGraph, ComputeGroup, ComputeNode};
use kairos_store::BufferStore;
use kairos_test_utils::{
    random_tensor, HartleyDomain, LinearOperatorNode, PointwiseRhsNode, TransformNode,
};

/// Time integrator a profile is stepped with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Integrator {
    /// Second-order Adams–Bashforth with an implicit linear operator.
    Adams,
    /// Broyden-iterated backward Euler.
    Broyden,
    /// Four-stage Runge–Kutta–Chebyshev.
    Chebyshev,
}

/// Store, graph and domain of a benchmark problem.
pub struct Profile {
    /// Buffers, with `u` holding the initial condition.
    pub store: BufferStore,
    /// Registered nodes; `root` is not yet resolved.
    pub graph: ComputeGraph,
    /// Root group evaluating `u_hat`, `n_hat` and `l_hat`.
    pub root: NodeId,
    /// Periodic grid of length 2π.
    pub domain: HartleyDomain,
}

/// Allen–Cahn on `n` points with diffusivity `kappa`, starting from
/// uniform noise in `[-0.1, 0.1)` drawn from `seed`.
pub fn allen_cahn(n: usize, kappa: f64, seed: u64) -> Result<Profile, ProblemError> {
    let domain = HartleyDomain::new(n, 2.0 * PI);
    let mut store = BufferStore::new();
    store.register_with("u", random_tensor(&[n], seed, -0.1, 0.1))?;
    let mut graph = ComputeGraph::new();
    let nodes: [Box<dyn ComputeNode>; 3] = [
        Box::new(TransformNode::new("forward", &mut store, "u", "u_hat")),
        Box::new(PointwiseRhsNode::new("reaction", &mut store, "u", "n_hat", |u| {
            u - u * u * u
        })),
        Box::new(LinearOperatorNode::new("diffusion", &mut store, "l_hat", move |k| {
            -kappa * k * k
        })),
    ];
    let mut names = Vec::with_capacity(nodes.len());
    for node in nodes {
        names.push(node.name().to_owned());
        graph.add_node(node)?;
    }
    let root = graph.add_group(ComputeGroup::new("allen-cahn", names))?;
    Ok(Profile {
        store,
        graph,
        root,
        domain,
    })
}

/// [`allen_cahn`] ready to step with `integrator` at a constant `dt`.
pub fn allen_cahn_problem(
    n: usize,
    kappa: f64,
    seed: u64,
    integrator: Integrator,
    dt: f64,
) -> Result<Problem, ProblemError> {
    let Profile {
        mut store,
        graph,
        root,
        domain,
    } = allen_cahn(n, kappa, seed)?;
    let variables = vec![VariableSpec::new("u", "u_hat", "n_hat").with_linear("l_hat")];
    let solver: Box<dyn TimeIntegrator> = match integrator {
        Integrator::Adams => Box::new(AdamsBashforthMoulton::new(
            AdamsConfig {
                variables,
                ..AdamsConfig::default()
            },
            &mut store,
        )?),
        Integrator::Broyden => Box::new(BroydenSolver::new(
            BroydenConfig {
                variables,
                ..BroydenConfig::default()
            },
            &mut store,
        )?),
        Integrator::Chebyshev => Box::new(RungeKuttaChebyshev::new(
            ChebyshevConfig {
                variables,
                ..ChebyshevConfig::default()
            },
            &mut store,
        )?),
    };
    let mut config = ProblemConfig::new(root, dt);
    config.solver = Some(solver);
    Problem::new(config, store, graph, Box::new(domain))
}
