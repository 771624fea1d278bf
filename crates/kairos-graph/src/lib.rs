//! Compute nodes, dependency resolution, and groups for Kairos.
//!
//! Kernels implement [`ComputeNode`], declaring the buffers they request
//! and supply. A [`ComputeGraph`] registers kernels and [`ComputeGroup`]s,
//! orders each group's members with the [`DependencyResolver`] (Kahn's
//! algorithm, ties broken by configured order), and derives each group's
//! net boundary so nested groups hide their intermediate buffers.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod context;
pub mod graph;
pub mod group;
pub mod node;
pub mod resolver;

pub use context::{ExecContext, Reads};
pub use graph::ComputeGraph;
pub use group::ComputeGroup;
pub use node::ComputeNode;
pub use resolver::{DepView, Dependencies, DependencyResolver};
