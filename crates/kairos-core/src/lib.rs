//! Core types and traits for the Kairos time-stepping engine.
//!
//! This is the leaf crate with no internal dependencies. It defines the
//! vocabulary shared by every other crate in the workspace: the
//! [`Tensor`] value type, buffer and node handles, the [`BufferSet`]
//! used to declare node inputs and outputs, the [`Domain`] collaborator
//! trait, and the error taxonomy.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod domain;
pub mod error;
pub mod id;
pub mod set;
pub mod tensor;

pub use domain::Domain;
pub use error::{GraphError, NodeError, SolveError, StoreError};
pub use id::{BufferHandle, NodeId};
pub use set::BufferSet;
pub use tensor::{Shape, Tensor};
