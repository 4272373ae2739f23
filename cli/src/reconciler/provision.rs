//! Concurrent node provisioner.
//!
//! Creates pending nodes in parallel, bounded by a counting semaphore; each
//! worker owns its node's full lifecycle and failures never cross node
//! boundaries. Results are collected over a bounded channel which closes
//! once the last worker drops its sender, so the orchestrator drains with a
//! plain receive loop.
//!
//! Per-node lifecycle:
//! `Preparing -> Requested -> (Active | Failed) -> Attached-disks -> Resolved -> Done`.
//! On failure the half-built server and its volumes are deleted and the
//! sequence restarts from `Preparing`, up to 3 total attempts.

use crate::config::NodeGroup;
use crate::reconciler::disks::plan_disks;
use crate::reconciler::now_rfc3339;
use crate::reconciler::resolver::{NodeDetails, resolve_node_details};
use compute_client::{
    AddressRequest, ComputeClientTrait, CreateServerRequest, DeleteServerRequest, FlavorSpec,
    ServerStatus, VolumeStatus,
};
use fleet_state::{DiskRecord, NodeRecord};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};
use tracing::{info, warn};

/// Tunables of the provisioning fan-out.
#[derive(Debug, Clone)]
pub struct ProvisionSettings {
    /// Maximum simultaneous in-flight creations
    pub concurrency: usize,
    /// Total attempts per node before it is reported as failed
    pub max_attempts: u32,
    /// Delay between attempts for one node
    pub retry_delay: Duration,
    /// Settle time after deleting a failed server
    pub cleanup_delay: Duration,
    /// Settle time after attaching matched volumes
    pub attach_settle: Duration,
    /// Status poll attempts while waiting for a server to come up
    pub status_attempts: u32,
    /// Interval between status polls
    pub status_interval: Duration,
    /// Image new servers boot from
    pub image: String,
    /// SSH keypair IDs installed on new servers
    pub keypairs: Vec<String>,
}

impl ProvisionSettings {
    /// Production defaults for the given image and keypairs.
    pub fn new(image: String, keypairs: Vec<String>) -> Self {
        Self {
            concurrency: 5,
            max_attempts: 3,
            retry_delay: Duration::from_secs(10),
            cleanup_delay: Duration::from_secs(15),
            attach_settle: Duration::from_secs(15),
            status_attempts: 60,
            status_interval: Duration::from_secs(10),
            image,
            keypairs,
        }
    }
}

/// One node queued for creation.
#[derive(Debug, Clone)]
pub struct PendingNode {
    /// Derived node name
    pub name: String,
    /// Group the node belongs to
    pub group: NodeGroup,
    /// Group labels merged with instance labels
    pub labels: BTreeMap<String, String>,
    /// Disk records from the previous state, for continuity matching
    pub prior_disks: Vec<DiskRecord>,
}

/// Terminal per-node provisioning failure.
///
/// Reported to the operator and excluded from the final node list; it never
/// aborts the batch or the run.
#[derive(Debug, Clone, Error)]
#[error("node '{node}' failed after {attempts} attempts: {last_error}")]
pub struct ProvisionError {
    /// Node name
    pub node: String,
    /// Attempts consumed
    pub attempts: u32,
    /// Last error observed
    pub last_error: String,
}

/// Semaphore-bounded worker pool creating pending nodes.
pub struct Provisioner {
    client: Arc<dyn ComputeClientTrait>,
    settings: ProvisionSettings,
}

impl std::fmt::Debug for Provisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Provisioner {
    /// New provisioner over the given client.
    pub fn new(client: Arc<dyn ComputeClientTrait>, settings: ProvisionSettings) -> Self {
        Self { client, settings }
    }

    /// Create every pending node, collecting results in completion order.
    pub async fn run(
        &self,
        pending: Vec<PendingNode>,
        password: &str,
    ) -> Vec<Result<NodeRecord, ProvisionError>> {
        let total = pending.len();
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency));
        let (tx, mut rx) = mpsc::channel(total.max(1));

        for node in pending {
            let semaphore = Arc::clone(&semaphore);
            let client = Arc::clone(&self.client);
            let settings = self.settings.clone();
            let password = password.to_string();
            let tx = tx.clone();
            tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let result = provision_node(client.as_ref(), &settings, &node, &password).await;
                let _ = tx.send(result).await;
            });
        }
        // The receive loop ends once every worker has dropped its sender.
        drop(tx);

        let mut results = Vec::with_capacity(total);
        while let Some(result) = rx.recv().await {
            results.push(result);
        }
        results
    }
}

async fn provision_node(
    client: &dyn ComputeClientTrait,
    settings: &ProvisionSettings,
    node: &PendingNode,
    password: &str,
) -> Result<NodeRecord, ProvisionError> {
    let mut last_error = String::new();

    for attempt in 1..=settings.max_attempts {
        if attempt > 1 {
            tokio::time::sleep(settings.retry_delay).await;
        }
        info!(
            "[{}] preparing (attempt {}/{})",
            node.name, attempt, settings.max_attempts
        );

        // Preparing: snapshot available volumes and plan disk continuity.
        let available = match client.list_volumes().await {
            Ok(volumes) => volumes
                .into_iter()
                .filter(|v| v.status == VolumeStatus::Available)
                .collect(),
            Err(e) => {
                warn!("[{}] volume snapshot unavailable: {}", node.name, e);
                Vec::new()
            }
        };
        let plan = plan_disks(&node.group.disks, &node.prior_disks, &available);

        // Requested: pick addressing, then ask for the server.
        let address = resolve_address(client, &node.group.static_ip, node.group.external_ip).await;
        let request = match CreateServerRequest::new(
            &node.name,
            FlavorSpec::shared(node.group.flavor.ram, node.group.flavor.vcpus),
            plan.provision.clone(),
            vec![address],
            &settings.image,
            settings.keypairs.clone(),
        ) {
            Ok(request) => request,
            // A malformed request will not improve on retry.
            Err(e) => {
                return Err(ProvisionError {
                    node: node.name.clone(),
                    attempts: attempt,
                    last_error: e.to_string(),
                });
            }
        };

        let server_id = match client.create_server(&request).await {
            Ok(id) => id,
            Err(e) => {
                warn!("[{}] create failed: {}", node.name, e);
                last_error = e.to_string();
                continue;
            }
        };

        let wait = match client
            .wait_for_status(
                &server_id,
                &[ServerStatus::Active, ServerStatus::Running],
                settings.status_attempts,
                settings.status_interval,
            )
            .await
        {
            Ok(wait) => wait,
            Err(e) => {
                warn!("[{}] lost server {} mid-wait: {}", node.name, server_id, e);
                last_error = e.to_string();
                continue;
            }
        };
        if !wait.reached {
            let status = wait
                .last_status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            warn!(
                "[{}] server {} did not come up (status {}), deleting",
                node.name, server_id, status
            );
            let cleanup = DeleteServerRequest {
                clear_fstab: true,
                delete_volumes: wait.volume_ids,
                delete_addresses: Vec::new(),
            };
            if let Err(e) = client.delete_server(&server_id, &cleanup).await {
                warn!("[{}] cleanup of {} failed: {}", node.name, server_id, e);
            }
            last_error = format!("server never reached a running state (last: {})", status);
            tokio::time::sleep(settings.cleanup_delay).await;
            continue;
        }

        // Attached-disks: reattach matched volumes, then let them settle.
        if !plan.reattach.is_empty() {
            for matched in &plan.reattach {
                if let Err(e) = client.attach_volume(&matched.volume_id, &server_id).await {
                    warn!(
                        "[{}] attach of {} failed: {}",
                        node.name, matched.volume_id, e
                    );
                }
            }
            tokio::time::sleep(settings.attach_settle).await;
        }

        // Resolved: final addressing and disk devices.
        let details = match resolve_node_details(
            client,
            &server_id,
            &node.prior_disks,
            Some(&node.group.disks),
        )
        .await
        {
            Ok(details) => details,
            Err(e) => {
                warn!("[{}] detail resolution failed: {}", node.name, e);
                NodeDetails::default()
            }
        };

        if let Err(e) = client.set_server_password(&server_id, password).await {
            warn!("[{}] password set failed: {}", node.name, e);
        }

        let now = now_rfc3339();
        return Ok(NodeRecord {
            name: node.name.clone(),
            role: node.group.role,
            id: server_id,
            ip: details.ip,
            ssh_port: 0,
            address_id: details.address_id,
            labels: node.labels.clone(),
            taints: node.group.taints.clone(),
            disks: details.disks,
            created: details.created.or_else(|| Some(now.clone())),
            updated: Some(now),
        });
    }

    Err(ProvisionError {
        node: node.name.clone(),
        attempts: settings.max_attempts,
        last_error,
    })
}

/// Static IP if configured, else a free unbound external address, else a
/// fresh allocation.
async fn resolve_address(
    client: &dyn ComputeClientTrait,
    static_ip: &Option<String>,
    external: bool,
) -> AddressRequest {
    if !external {
        return AddressRequest::internal();
    }
    if let Some(address_id) = static_ip {
        return AddressRequest::existing(address_id.clone());
    }
    match client.find_available_external_ip().await {
        Ok(Some(address_id)) => AddressRequest::existing(address_id),
        Ok(None) => AddressRequest::external(),
        Err(e) => {
            warn!("free external address lookup failed: {}", e);
            AddressRequest::external()
        }
    }
}
