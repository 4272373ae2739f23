//! CLI-level error types.
//!
//! This module defines the error type shared by the reconciler, the
//! provisioner and the maintenance commands; upstream library errors are
//! wrapped via `#[from]`.

use compute_client::ComputeError;
use fleet_state::StateError;
use thiserror::Error;

/// Errors that can occur while provisioning or maintaining a fleet.
#[derive(Debug, Error)]
pub enum FleetError {
    /// Compute API error
    #[error("compute API error: {0}")]
    Compute(#[from] ComputeError),

    /// State store error
    #[error("state store error: {0}")]
    State(#[from] StateError),

    /// Malformed configuration or missing credentials
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A previously known server no longer resolves; callers treat this as
    /// "node gone", not as a transient fault
    #[error("server {0} no longer resolves")]
    DetailLookup(String),

    /// A named object is absent from the persisted state
    #[error("not found in state: {0}")]
    NotInState(String),

    /// Filesystem error (config or inventory files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML (de)serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
