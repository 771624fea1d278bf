//! Kairos: time stepping over dependency-resolved compute graphs.
//!
//! This is the top-level facade crate that re-exports the public API of
//! the Kairos sub-crates. For most users, adding `kairos` as a single
//! dependency is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use kairos::prelude::*;
//! use kairos_test_utils::IdentityDomain;
//!
//! /// `u_hat = transform(u)`, `n_hat = -rate · u_hat`.
//! struct Decay {
//!     u: BufferHandle,
//!     u_hat: BufferHandle,
//!     n_hat: BufferHandle,
//!     rate: f64,
//! }
//!
//! impl ComputeNode for Decay {
//!     fn name(&self) -> &str { "decay" }
//!     fn requested_items(&self) -> BufferSet { BufferSet::from(["u"]) }
//!     fn supplied_items(&self) -> BufferSet { BufferSet::from(["u_hat", "n_hat"]) }
//!     fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Result<(), NodeError> {
//!         let u_hat = ctx.domain().transform(ctx.read(self.u)?);
//!         let mut n_hat = u_hat.clone();
//!         n_hat.scale(-self.rate);
//!         ctx.set(self.u_hat, u_hat)?;
//!         ctx.set(self.n_hat, n_hat)
//!     }
//! }
//!
//! let mut store = BufferStore::new();
//! let u = store.register_with("u", Tensor::filled(&[16], 1.0)).unwrap();
//! let decay = Decay {
//!     u,
//!     u_hat: store.handle_or_register("u_hat"),
//!     n_hat: store.handle_or_register("n_hat"),
//!     rate: 2.0,
//! };
//! let mut graph = ComputeGraph::new();
//! let root = graph.add_node(Box::new(decay)).unwrap();
//!
//! let solver = AdamsBashforthMoulton::new(
//!     AdamsConfig {
//!         variables: vec![VariableSpec::new("u", "u_hat", "n_hat")],
//!         predictor_order: 3,
//!         ..AdamsConfig::default()
//!     },
//!     &mut store,
//! )
//! .unwrap();
//! let mut config = ProblemConfig::new(root, 1e-3);
//! config.solver = Some(Box::new(solver));
//! let mut problem = Problem::new(config, store, graph, Box::new(IdentityDomain::new(&[16]))).unwrap();
//! problem.run_until(0.5).unwrap();
//!
//! let u = problem.store_mut().current("u").unwrap().as_slice()[0];
//! assert!((u - (-1.0f64).exp()).abs() < 1e-5);
//! ```
//!
//! # Modules
//!
//! Each module corresponds to a sub-crate. Use them for types not in the prelude:
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `kairos-core` | `Tensor`, handles, `BufferSet`, `Domain`, errors |
//! | [`store`] | `kairos-store` | `BufferStore`, histories, checkpoints, mirrors |
//! | [`graph`] | `kairos-graph` | `ComputeNode`, `ComputeGroup`, dependency resolution |
//! | [`engine`] | `kairos-engine` | Integrators, step-size control, the `Problem` driver |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core types and the error taxonomy (`kairos-core`).
pub use kairos_core as types;

/// Named buffers with negotiated history depth (`kairos-store`).
///
/// [`store::BufferStore`] owns every buffer; [`store::Checkpoint`]s roll a
/// failed step back.
pub use kairos_store as store;

/// Compute nodes, groups and ordering (`kairos-graph`).
///
/// The [`graph::ComputeNode`] trait is the main extension point for
/// user-defined physics.
pub use kairos_graph as graph;

/// Time integrators and the problem driver (`kairos-engine`).
///
/// [`engine::AdamsBashforthMoulton`] for semi-implicit multistep
/// stepping, [`engine::BroydenSolver`] and [`engine::SecantSolver`] for
/// fully implicit steps, [`engine::RungeKuttaChebyshev`] for explicit
/// stiff-ish problems.
pub use kairos_engine as engine;

/// Common imports for typical Kairos usage.
///
/// ```rust
/// use kairos::prelude::*;
/// ```
pub mod prelude {
    // Core
    pub use kairos_core::{BufferHandle, BufferSet, Domain, NodeId, Tensor};

    // Errors
    pub use kairos_core::{GraphError, NodeError, SolveError, StoreError};

    // Store and graph
    pub use kairos_graph::{ComputeGraph, ComputeGroup, ComputeNode, ExecContext};
    pub use kairos_store::BufferStore;

    // Engine
    pub use kairos_engine::{
        AdamsBashforthMoulton, AdamsConfig, BroydenConfig, BroydenSolver, IterationAdaptiveDt,
        OutputFrame, OutputSink, Problem, ProblemConfig, ProblemError, SecantConfig,
        SecantSolver, StepMetrics, TimeIntegrator, VariableSpec,
    };
}
