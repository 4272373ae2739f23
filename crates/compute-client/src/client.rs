//! Compute API client
//!
//! Implements the provider's compute REST API: project-scoped server,
//! volume and address inventories plus the per-resource mutation endpoints.
//! Transient failures (transport errors, 5xx, 429) are retried here with a
//! fixed delay so callers only ever see terminal outcomes.

use crate::compute_trait::ComputeClientTrait;
use crate::error::ComputeError;
use crate::models::*;
use crate::requests::*;
use rand::Rng;
use rand::distributions::Alphanumeric;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

const MAX_SEND_ATTEMPTS: u32 = 5;
const SEND_RETRY_DELAY: Duration = Duration::from_secs(5);
const PASSWORD_LENGTH: usize = 64;

/// Compute API client
#[derive(Debug)]
pub struct ComputeClient {
    client: Client,
    base_url: String,
    token: String,
    project_id: String,
}

/// Generate a random 64-character alphanumeric password.
pub fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LENGTH)
        .map(char::from)
        .collect()
}

impl ComputeClient {
    /// Create a new compute client
    ///
    /// # Arguments
    /// * `base_url` - API base URL (e.g., "https://api.example.cloud/v2")
    /// * `token` - bearer token for authentication
    /// * `project_id` - project scoping all inventory endpoints
    pub fn new(base_url: String, token: String, project_id: String) -> Result<Self, ComputeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(ComputeError::Http)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            project_id,
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a request, retrying transport errors, 5xx and 429 in place.
    ///
    /// Client errors (4xx other than 429) and success statuses are returned
    /// to the caller together with the response body.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<(StatusCode, String), ComputeError> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut request = self
                .client
                .request(method.clone(), &url)
                .header("Authorization", format!("Bearer {}", self.token))
                .header("Accept", "application/json");
            if let Some(payload) = &body {
                request = request.json(payload);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    let retryable = status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS;
                    if retryable && attempt < MAX_SEND_ATTEMPTS {
                        warn!(
                            "compute API {} {} returned {} (attempt {}/{}), retrying in {}s",
                            method,
                            path,
                            status,
                            attempt,
                            MAX_SEND_ATTEMPTS,
                            SEND_RETRY_DELAY.as_secs()
                        );
                        tokio::time::sleep(SEND_RETRY_DELAY).await;
                        continue;
                    }
                    return Ok((status, text));
                }
                Err(e) if attempt < MAX_SEND_ATTEMPTS => {
                    warn!(
                        "compute API {} {} transport error: {} (attempt {}/{}), retrying in {}s",
                        method,
                        path,
                        e,
                        attempt,
                        MAX_SEND_ATTEMPTS,
                        SEND_RETRY_DELAY.as_secs()
                    );
                    tokio::time::sleep(SEND_RETRY_DELAY).await;
                }
                Err(e) => return Err(ComputeError::Http(e)),
            }
        }
    }

    /// Decode a response body, mapping 404 and non-success statuses to errors.
    fn decode<T: DeserializeOwned>(
        status: StatusCode,
        body: &str,
        context: &str,
    ) -> Result<T, ComputeError> {
        if status == StatusCode::NOT_FOUND {
            return Err(ComputeError::NotFound(context.to_string()));
        }
        if !status.is_success() {
            return Err(ComputeError::Api {
                status: status.as_u16(),
                message: format!("{}: {}", context, body),
            });
        }
        Ok(serde_json::from_str(body)?)
    }

    /// Require one of the allowed statuses for a bodiless operation.
    fn expect_status(
        status: StatusCode,
        allowed: &[StatusCode],
        context: &str,
        body: &str,
    ) -> Result<(), ComputeError> {
        if status == StatusCode::NOT_FOUND {
            return Err(ComputeError::NotFound(context.to_string()));
        }
        if allowed.contains(&status) {
            return Ok(());
        }
        Err(ComputeError::Api {
            status: status.as_u16(),
            message: format!("{}: {}", context, body),
        })
    }

    pub async fn list_servers(&self) -> Result<Vec<ServerSummary>, ComputeError> {
        let path = format!("/projects/{}/servers", self.project_id);
        debug!("listing project servers");
        let (status, body) = self.send(Method::GET, &path, None).await?;
        let list: ListEnvelope<ServerSummary> = Self::decode(status, &body, "list servers")?;
        Ok(list.result)
    }

    pub async fn get_server_detail(&self, server_id: &str) -> Result<ServerDetail, ComputeError> {
        let path = format!("/servers/{}/detail", server_id);
        let (status, body) = self.send(Method::GET, &path, None).await?;
        let detail: Envelope<ServerDetail> =
            Self::decode(status, &body, &format!("server {}", server_id))?;
        Ok(detail.result)
    }

    pub async fn create_server(&self, request: &CreateServerRequest) -> Result<String, ComputeError> {
        let path = format!("/projects/{}/servers", self.project_id);
        debug!("creating server '{}'", request.name);
        let (status, body) = self
            .send(Method::POST, &path, Some(serde_json::to_value(request)?))
            .await?;
        let created: Envelope<CreatedResource> =
            Self::decode(status, &body, &format!("create server '{}'", request.name))?;
        if created.result.id.is_empty() {
            return Err(ComputeError::Api {
                status: status.as_u16(),
                message: format!("no server ID in create response: {}", body),
            });
        }
        Ok(created.result.id)
    }

    pub async fn delete_server(
        &self,
        server_id: &str,
        request: &DeleteServerRequest,
    ) -> Result<(), ComputeError> {
        let path = format!("/servers/{}", server_id);
        debug!("deleting server {}", server_id);
        let (status, body) = self
            .send(Method::DELETE, &path, Some(serde_json::to_value(request)?))
            .await?;
        Self::expect_status(
            status,
            &[StatusCode::OK, StatusCode::ACCEPTED, StatusCode::NO_CONTENT],
            &format!("delete server {}", server_id),
            &body,
        )
    }

    pub async fn wait_for_status(
        &self,
        server_id: &str,
        targets: &[ServerStatus],
        max_attempts: u32,
        interval: Duration,
    ) -> Result<WaitOutcome, ComputeError> {
        let mut outcome = WaitOutcome::default();
        for attempt in 1..=max_attempts {
            match self.get_server_detail(server_id).await {
                // The server vanished mid-wait; no point polling further.
                Err(ComputeError::NotFound(_)) => {
                    return Err(ComputeError::NotFound(format!(
                        "server {} disappeared while waiting for status",
                        server_id
                    )));
                }
                Err(e) => {
                    warn!(
                        "status poll {}/{} for {} failed: {}",
                        attempt, max_attempts, server_id, e
                    );
                }
                Ok(detail) => {
                    outcome.last_status = Some(detail.status);
                    outcome.address_ids = detail.addresses;
                    outcome.volume_ids = detail.storages.into_iter().map(|s| s.id).collect();

                    if detail.status == ServerStatus::Error {
                        return Ok(outcome);
                    }
                    if targets.contains(&detail.status) {
                        outcome.reached = true;
                        return Ok(outcome);
                    }
                    debug!("server {} status: {}", server_id, detail.status);
                }
            }
            tokio::time::sleep(interval).await;
        }
        Ok(outcome)
    }

    pub async fn set_server_password(
        &self,
        server_id: &str,
        password: &str,
    ) -> Result<(), ComputeError> {
        let path = format!("/servers/{}/password", server_id);
        let request = SetPasswordRequest {
            password: password.to_string(),
        };
        let (status, body) = self
            .send(Method::POST, &path, Some(serde_json::to_value(&request)?))
            .await?;
        Self::expect_status(
            status,
            &[StatusCode::OK, StatusCode::ACCEPTED, StatusCode::NO_CONTENT],
            &format!("set password on {}", server_id),
            &body,
        )
    }

    pub async fn project_addresses(
        &self,
    ) -> Result<HashMap<String, AddressDetail>, ComputeError> {
        let path = format!("/projects/{}/addresses", self.project_id);
        let (status, body) = self.send(Method::GET, &path, None).await?;
        let list: ListEnvelope<AddressDetail> = Self::decode(status, &body, "list addresses")?;
        Ok(list
            .result
            .into_iter()
            .map(|addr| (addr.id.clone(), addr))
            .collect())
    }

    pub async fn find_available_external_ip(&self) -> Result<Option<String>, ComputeError> {
        let addresses = self.project_addresses().await?;
        Ok(addresses
            .into_iter()
            .find(|(_, addr)| addr.external && addr.is_unbound())
            .map(|(id, _)| id))
    }

    pub async fn delete_address(&self, address_id: &str) -> Result<(), ComputeError> {
        let path = format!("/addresses/{}", address_id);
        let (status, body) = self.send(Method::DELETE, &path, None).await?;
        Self::expect_status(
            status,
            &[StatusCode::OK, StatusCode::NO_CONTENT],
            &format!("delete address {}", address_id),
            &body,
        )
    }

    pub async fn list_volumes(&self) -> Result<Vec<Volume>, ComputeError> {
        let path = format!("/projects/{}/volumes", self.project_id);
        let (status, body) = self.send(Method::GET, &path, None).await?;
        let list: ListEnvelope<Volume> = Self::decode(status, &body, "list volumes")?;
        Ok(list.result)
    }

    pub async fn get_volume(&self, volume_id: &str) -> Result<Volume, ComputeError> {
        let path = format!("/volumes/{}", volume_id);
        let (status, body) = self.send(Method::GET, &path, None).await?;
        let detail: Envelope<Volume> =
            Self::decode(status, &body, &format!("volume {}", volume_id))?;
        Ok(detail.result)
    }

    pub async fn attach_volume(
        &self,
        volume_id: &str,
        server_id: &str,
    ) -> Result<String, ComputeError> {
        let path = format!("/volumes/{}/attach", volume_id);
        let request = AttachVolumeRequest {
            server_id: server_id.to_string(),
        };
        debug!("attaching volume {} to server {}", volume_id, server_id);
        let (status, body) = self
            .send(Method::POST, &path, Some(serde_json::to_value(&request)?))
            .await?;
        let attached: Envelope<AttachResult> = Self::decode(
            status,
            &body,
            &format!("attach volume {} to {}", volume_id, server_id),
        )?;
        Ok(attached.result.attached_to_server.device)
    }

    pub async fn delete_volume(&self, volume_id: &str) -> Result<(), ComputeError> {
        let path = format!("/volumes/{}", volume_id);
        let request = DeleteVolumeRequest::default();
        let (status, body) = self
            .send(Method::DELETE, &path, Some(serde_json::to_value(&request)?))
            .await?;
        Self::expect_status(
            status,
            &[StatusCode::OK, StatusCode::ACCEPTED, StatusCode::NO_CONTENT],
            &format!("delete volume {}", volume_id),
            &body,
        )
    }

    pub async fn list_load_balancers(&self) -> Result<Vec<LoadBalancerSummary>, ComputeError> {
        let path = format!("/projects/{}/loadbalancers", self.project_id);
        let (status, body) = self.send(Method::GET, &path, None).await?;
        let list: ListEnvelope<LoadBalancerSummary> =
            Self::decode(status, &body, "list load balancers")?;
        Ok(list.result)
    }

    pub async fn create_load_balancer(
        &self,
        request: &CreateLoadBalancerRequest,
    ) -> Result<String, ComputeError> {
        let path = format!("/projects/{}/loadbalancers", self.project_id);
        let (status, body) = self
            .send(Method::POST, &path, Some(serde_json::to_value(request)?))
            .await?;
        let created: Envelope<CreatedResource> = Self::decode(
            status,
            &body,
            &format!("create load balancer '{}'", request.name),
        )?;
        Ok(created.result.id)
    }

    pub async fn delete_load_balancer(&self, lb_id: &str) -> Result<(), ComputeError> {
        let path = format!("/loadbalancers/{}", lb_id);
        let (status, body) = self.send(Method::DELETE, &path, None).await?;
        Self::expect_status(
            status,
            &[StatusCode::OK, StatusCode::ACCEPTED, StatusCode::NO_CONTENT],
            &format!("delete load balancer {}", lb_id),
            &body,
        )
    }
}

#[async_trait::async_trait]
impl ComputeClientTrait for ComputeClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn list_servers(&self) -> Result<Vec<ServerSummary>, ComputeError> {
        self.list_servers().await
    }

    async fn get_server_detail(&self, server_id: &str) -> Result<ServerDetail, ComputeError> {
        self.get_server_detail(server_id).await
    }

    async fn create_server(&self, request: &CreateServerRequest) -> Result<String, ComputeError> {
        self.create_server(request).await
    }

    async fn delete_server(
        &self,
        server_id: &str,
        request: &DeleteServerRequest,
    ) -> Result<(), ComputeError> {
        self.delete_server(server_id, request).await
    }

    async fn wait_for_status(
        &self,
        server_id: &str,
        targets: &[ServerStatus],
        max_attempts: u32,
        interval: Duration,
    ) -> Result<WaitOutcome, ComputeError> {
        self.wait_for_status(server_id, targets, max_attempts, interval)
            .await
    }

    async fn set_server_password(
        &self,
        server_id: &str,
        password: &str,
    ) -> Result<(), ComputeError> {
        self.set_server_password(server_id, password).await
    }

    async fn project_addresses(&self) -> Result<HashMap<String, AddressDetail>, ComputeError> {
        self.project_addresses().await
    }

    async fn find_available_external_ip(&self) -> Result<Option<String>, ComputeError> {
        self.find_available_external_ip().await
    }

    async fn delete_address(&self, address_id: &str) -> Result<(), ComputeError> {
        self.delete_address(address_id).await
    }

    async fn list_volumes(&self) -> Result<Vec<Volume>, ComputeError> {
        self.list_volumes().await
    }

    async fn get_volume(&self, volume_id: &str) -> Result<Volume, ComputeError> {
        self.get_volume(volume_id).await
    }

    async fn attach_volume(
        &self,
        volume_id: &str,
        server_id: &str,
    ) -> Result<String, ComputeError> {
        self.attach_volume(volume_id, server_id).await
    }

    async fn delete_volume(&self, volume_id: &str) -> Result<(), ComputeError> {
        self.delete_volume(volume_id).await
    }

    async fn list_load_balancers(&self) -> Result<Vec<LoadBalancerSummary>, ComputeError> {
        self.list_load_balancers().await
    }

    async fn create_load_balancer(
        &self,
        request: &CreateLoadBalancerRequest,
    ) -> Result<String, ComputeError> {
        self.create_load_balancer(request).await
    }

    async fn delete_load_balancer(&self, lb_id: &str) -> Result<(), ComputeError> {
        self.delete_load_balancer(lb_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_password_shape() {
        let password = generate_password();
        assert_eq!(password.len(), 64);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_generated_passwords_differ() {
        assert_ne!(generate_password(), generate_password());
    }
}
