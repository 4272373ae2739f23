//! Cluster-State Model and Store
//!
//! The persisted snapshot of a provisioned cluster: one `ClusterState` per
//! cluster name, held as an indented JSON object in S3-compatible object
//! storage and fully rewritten at the end of every reconciliation run.
//!
//! The model mirrors the wire schema exactly: optional fields are omitted
//! when empty so a load/save round trip reproduces the stored object
//! byte-for-byte apart from `last_updated`.

pub mod error;
pub mod model;
pub mod store;

pub use error::StateError;
pub use model::{ClusterState, DiskRecord, NodeRecord, NodeRole, STATE_VERSION};
pub use store::StateStore;
