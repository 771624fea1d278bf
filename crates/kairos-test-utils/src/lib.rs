//! Test utilities and fixtures for Kairos development.
//!
//! - [`domain`]: an identity domain and a periodic 1-D Hartley domain whose
//!   transform diagonalizes the Laplacian.
//! - [`fixtures`]: small compute nodes for graph and solver tests.
//! - [`random`]: seeded random tensors.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod domain;
pub mod fixtures;
pub mod random;

pub use domain::{HartleyDomain, IdentityDomain};
pub use fixtures::{
    execution_log, logged, ConstNode, CopyNode, ExecutionLog, FailingNode, LinearOperatorNode,
    PointwiseRhsNode, TagNode, TransformNode,
};
pub use random::random_tensor;
