//! State store errors

use thiserror::Error;

/// Errors that can occur when loading or saving cluster state
#[derive(Debug, Error)]
pub enum StateError {
    /// Object-storage backend cannot be reached or refused the operation.
    /// A missing state object is NOT an error; `load` returns `Ok(None)`.
    #[error("state backend unavailable: {0}")]
    BackendUnavailable(#[source] object_store::Error),

    /// State object exists but cannot be (de)serialized
    #[error("state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
