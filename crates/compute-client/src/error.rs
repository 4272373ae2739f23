//! Compute client errors

use thiserror::Error;

/// Errors that can occur when interacting with the compute API
#[derive(Debug, Error)]
pub enum ComputeError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Compute API returned an error status
    #[error("compute API error ({status}): {message}")]
    Api {
        /// HTTP status code returned by the API
        status: u16,
        /// Response body or status text
        message: String,
    },

    /// JSON serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Resource not found (deleted out-of-band, bad ID)
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid request (e.g., missing required fields)
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}
