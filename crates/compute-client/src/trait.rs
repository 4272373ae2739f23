//! ComputeClient trait for mocking
//!
//! This trait abstracts the ComputeClient to enable mocking in unit tests.
//! The concrete ComputeClient implements this trait, and tests can use mock
//! implementations.

use crate::error::ComputeError;
use crate::models::*;
use crate::requests::*;
use std::collections::HashMap;
use std::time::Duration;

/// Trait for compute API client operations
///
/// This trait enables mocking of compute API calls for unit testing.
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ComputeClientTrait: Send + Sync {
    /// Get the base URL
    fn base_url(&self) -> &str;

    // Server operations
    /// List all servers in the project
    async fn list_servers(&self) -> Result<Vec<ServerSummary>, ComputeError>;
    /// Get the detail of a single server
    async fn get_server_detail(&self, server_id: &str) -> Result<ServerDetail, ComputeError>;
    /// Create a server, returning its ID
    async fn create_server(&self, request: &CreateServerRequest) -> Result<String, ComputeError>;
    /// Delete a server, optionally cascading to volumes and addresses
    async fn delete_server(
        &self,
        server_id: &str,
        request: &DeleteServerRequest,
    ) -> Result<(), ComputeError>;
    /// Poll a server until it reaches one of the target statuses
    async fn wait_for_status(
        &self,
        server_id: &str,
        targets: &[ServerStatus],
        max_attempts: u32,
        interval: Duration,
    ) -> Result<WaitOutcome, ComputeError>;
    /// Set the root password on a server
    async fn set_server_password(
        &self,
        server_id: &str,
        password: &str,
    ) -> Result<(), ComputeError>;

    // Address operations
    /// Map of all project addresses keyed by address ID
    async fn project_addresses(&self) -> Result<HashMap<String, AddressDetail>, ComputeError>;
    /// First external project address bound to nothing, if any
    async fn find_available_external_ip(&self) -> Result<Option<String>, ComputeError>;
    /// Delete a project address
    async fn delete_address(&self, address_id: &str) -> Result<(), ComputeError>;

    // Volume operations
    /// List all volumes in the project
    async fn list_volumes(&self) -> Result<Vec<Volume>, ComputeError>;
    /// Get a single volume
    async fn get_volume(&self, volume_id: &str) -> Result<Volume, ComputeError>;
    /// Attach a volume to a server, returning the device path
    async fn attach_volume(
        &self,
        volume_id: &str,
        server_id: &str,
    ) -> Result<String, ComputeError>;
    /// Delete a volume
    async fn delete_volume(&self, volume_id: &str) -> Result<(), ComputeError>;

    // Load balancer operations
    /// List all load balancers in the project
    async fn list_load_balancers(&self) -> Result<Vec<LoadBalancerSummary>, ComputeError>;
    /// Create a load balancer, returning its ID
    async fn create_load_balancer(
        &self,
        request: &CreateLoadBalancerRequest,
    ) -> Result<String, ComputeError>;
    /// Delete a load balancer
    async fn delete_load_balancer(&self, lb_id: &str) -> Result<(), ComputeError>;
}
