//! Time integration for the Kairos engine.
//!
//! Solvers advance the variables bound to a resolved compute graph:
//!
//! - [`AdamsBashforthMoulton`]: semi-implicit multistep method with an
//!   implicit linear operator, diagonal or densely coupled, and an
//!   optional Adams–Moulton corrector.
//! - [`BroydenSolver`] and [`SecantSolver`]: fully implicit backward
//!   Euler, solved by quasi-Newton iteration.
//! - [`ForwardEuler`] and [`RungeKuttaChebyshev`]: explicit one-step
//!   methods.
//!
//! The [`Problem`] driver owns the store, graph and solver, retries failed
//! steps with smaller step sizes, and streams mirrored buffers to an
//! [`OutputSink`] on a background thread.
//!
//! ```
//! use kairos_core::Tensor;
//! use kairos_engine::{AdamsBashforthMoulton, AdamsConfig, Problem, ProblemConfig, VariableSpec};
//! use kairos_graph::{ComputeGraph, ComputeGroup};
//! use kairos_store::BufferStore;
//! use kairos_test_utils::{IdentityDomain, PointwiseRhsNode, TransformNode};
//!
//! // du/dt = -u
//! let mut store = BufferStore::new();
//! store.register_with("u", Tensor::filled(&[8], 1.0)).unwrap();
//! let mut graph = ComputeGraph::new();
//! graph.add_node(Box::new(TransformNode::new("fwd", &mut store, "u", "u_hat"))).unwrap();
//! graph.add_node(Box::new(PointwiseRhsNode::new("rhs", &mut store, "u", "n_hat", |u| -u))).unwrap();
//! let root = graph.add_group(ComputeGroup::new("root", ["fwd", "rhs"])).unwrap();
//!
//! let solver = AdamsBashforthMoulton::new(
//!     AdamsConfig {
//!         variables: vec![VariableSpec::new("u", "u_hat", "n_hat")],
//!         ..AdamsConfig::default()
//!     },
//!     &mut store,
//! )
//! .unwrap();
//! let mut config = ProblemConfig::new(root, 0.01);
//! config.solver = Some(Box::new(solver));
//! let mut problem = Problem::new(config, store, graph, Box::new(IdentityDomain::new(&[8]))).unwrap();
//! problem.run_until(1.0).unwrap();
//!
//! let u = problem.store_mut().current("u").unwrap().as_slice()[0];
//! assert!((u - (-1.0f64).exp()).abs() < 1e-3);
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod adams;
pub mod broyden;
pub mod coefficients;
pub mod config;
mod dense;
pub mod explicit;
pub mod metrics;
pub mod output;
pub mod predictor;
pub mod problem;
pub mod secant;
pub mod solver;
pub mod timestep;
pub mod variable;

pub use adams::AdamsBashforthMoulton;
pub use broyden::{broyden, BroydenSolver, Convergence};
pub use config::{
    AdamsConfig, AdaptiveDtConfig, BroydenConfig, ChebyshevConfig, ConfigError, CouplingConfig,
    ForwardEulerConfig, IterationLimits, OffDiagonal, ProblemConfig, SecantConfig,
};
pub use explicit::{ChebyshevCoefficients, ForwardEuler, RungeKuttaChebyshev};
pub use metrics::StepMetrics;
pub use output::{CollectSink, OutputError, OutputFrame, OutputSink, OutputWorker, SinkError};
pub use predictor::{LinearPredictor, Predictor};
pub use problem::{Problem, ProblemError};
pub use secant::SecantSolver;
pub use solver::{SolveEnv, SolveReport, TimeIntegrator};
pub use timestep::{ConstantDt, Cutback, IterationAdaptiveDt, StepSizeController};
pub use variable::VariableSpec;
