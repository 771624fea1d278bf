//! Buffer storage for the Kairos engine.
//!
//! The [`BufferStore`] owns every named buffer of a problem. Each buffer
//! carries:
//!
//! ```text
//! Slot
//! ├── current   (Tensor, written by exactly the nodes that supply it)
//! ├── history   (newest first, capacity = deepest request so far)
//! └── mirror    (Arc<Tensor> snapshot, refreshed once per step)
//! ```
//!
//! Buffers are addressed by stable [`BufferHandle`](kairos_core::BufferHandle)s
//! resolved once from their names. History capacity is negotiated: any
//! consumer may ask for a deeper history at any time and capacity only
//! grows. [`Checkpoint`]s capture current values and histories so a failed
//! step can be rolled back exactly.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod history;
pub mod store;

pub use history::History;
pub use store::{BufferStore, Checkpoint};
