//! Cloud Compute REST API Client
//!
//! A Rust client library for the cloud provider's compute API.
//! Provides type-safe request/response models and methods for server,
//! volume, address and load-balancer operations.
//!
//! # Example
//!
//! ```no_run
//! use compute_client::{ComputeClient, ServerStatus};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Create a client
//! let client = ComputeClient::new(
//!     "https://api.example.cloud/v2".to_string(),
//!     "your-api-token".to_string(),
//!     "your-project-id".to_string(),
//! )?;
//!
//! // List servers in the project
//! let servers = client.list_servers().await?;
//!
//! // Poll a server until it is running
//! let wait = client
//!     .wait_for_status(
//!         &servers[0].id,
//!         &[ServerStatus::Active, ServerStatus::Running],
//!         60,
//!         Duration::from_secs(10),
//!     )
//!     .await?;
//! println!("reached target: {}", wait.reached);
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Server Operations**: create, delete, inspect and poll servers
//! - **Volume Operations**: list, attach and delete project volumes
//! - **Address Operations**: project address inventory, free-IP lookup
//! - **Retry Logic**: transient 5xx/429/transport failures retried in-place
//! - **Typed Payloads**: every endpoint takes a validated request struct

pub mod client;
pub mod error;
pub mod models;
pub mod requests;
#[path = "trait.rs"]
pub mod compute_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::{ComputeClient, generate_password};
pub use compute_trait::ComputeClientTrait;
pub use error::ComputeError;
pub use models::*;
pub use requests::*;
#[cfg(feature = "test-util")]
pub use mock::MockComputeClient;
