//! Cluster reconciliation.
//!
//! Reconciles the declarative node-group configuration against two
//! independently drifting sources of truth: the persisted cluster-state
//! snapshot and the live cloud inventory. Every configured slot is
//! classified as retained, adopted or pending-create; state records with no
//! configured counterpart are orphans. Missing nodes are created by the
//! concurrent provisioner, and the converged node list is fully rewritten
//! into the state store.

pub mod disks;
pub mod provision;
pub mod resolver;

#[cfg(test)]
mod disks_test;
#[cfg(test)]
mod reconcile_test;

use crate::config::FleetConfig;
use crate::error::FleetError;
use crate::inventory::write_inventory;
use crate::reconciler::provision::{PendingNode, ProvisionError, ProvisionSettings, Provisioner};
use crate::reconciler::resolver::resolve_node_details;
use chrono::{SecondsFormat, Utc};
use compute_client::{ComputeClientTrait, DeleteServerRequest};
use fleet_state::{ClusterState, NodeRecord, StateStore};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Current time in RFC3339 at second precision, the format used across the
/// persisted state.
pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Immutable per-run options.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Skip alive-verification of persisted nodes; every slot is
    /// re-classified against live inventory
    pub force: bool,
    /// Physically delete orphaned servers (each after confirmation)
    pub gc: bool,
    /// Report the classification without mutating cloud or persisted state
    pub dry_run: bool,
}

/// Outcome of one reconciliation run.
#[derive(Debug)]
pub struct ReconcileReport {
    /// Converged node list, sorted by name
    pub nodes: Vec<NodeRecord>,
    /// Terminal per-node provisioning failures
    pub failures: Vec<ProvisionError>,
    /// Names of state records with no configured counterpart
    pub orphans: Vec<String>,
}

/// Interactive confirmation hook; the CLI wires a stdin prompt, tests a
/// canned answer.
pub type ConfirmFn = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Top-level reconciliation orchestrator.
pub struct Reconciler {
    client: Arc<dyn ComputeClientTrait>,
    store: StateStore,
    settings: ProvisionSettings,
    confirm: ConfirmFn,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// New reconciler over the given client and state store.
    pub fn new(
        client: Arc<dyn ComputeClientTrait>,
        store: StateStore,
        settings: ProvisionSettings,
        confirm: ConfirmFn,
    ) -> Self {
        Self {
            client,
            store,
            settings,
            confirm,
        }
    }

    /// Run one full reconciliation for `cluster`.
    ///
    /// Per-node provisioning failures are collected into the report, not
    /// propagated; only configuration and persistence problems are fatal.
    pub async fn reconcile(
        &self,
        cluster: &str,
        config: &FleetConfig,
        options: RunOptions,
        password: Option<&str>,
        inventory_path: Option<&Path>,
    ) -> Result<ReconcileReport, FleetError> {
        info!("querying cloud server inventory");
        let cloud_servers: HashMap<String, String> = match self.client.list_servers().await {
            Ok(servers) => servers.into_iter().map(|s| (s.name, s.id)).collect(),
            Err(e) => {
                warn!("cloud inventory unavailable: {}", e);
                HashMap::new()
            }
        };

        info!("loading persisted state '{}'", cluster);
        let existing = self.store.load().await?;

        // Alive index: persisted records whose server still resolves.
        let mut alive: BTreeMap<String, NodeRecord> = BTreeMap::new();
        match (&existing, options.force) {
            (Some(state), false) => {
                info!("verifying {} persisted nodes against the cloud", state.nodes.len());
                for node in &state.nodes {
                    match resolve_node_details(self.client.as_ref(), &node.id, &node.disks, None)
                        .await
                    {
                        Err(e) => {
                            info!("node '{}' no longer resolves, dropping: {}", node.name, e);
                        }
                        Ok(details) => {
                            // A non-default SSH port marks an LB-fronted
                            // address; keep the persisted IP in that case.
                            let ip = if node.ssh_port != 0
                                && !node.ip.is_empty()
                                && node.ip != details.ip
                            {
                                node.ip.clone()
                            } else {
                                details.ip
                            };
                            alive.insert(
                                node.name.clone(),
                                NodeRecord {
                                    name: node.name.clone(),
                                    role: node.role,
                                    id: node.id.clone(),
                                    ip,
                                    ssh_port: node.ssh_port,
                                    address_id: details.address_id,
                                    labels: node.labels.clone(),
                                    taints: node.taints.clone(),
                                    disks: details.disks,
                                    created: details.created.or_else(|| node.created.clone()),
                                    updated: Some(now_rfc3339()),
                                },
                            );
                        }
                    }
                }
            }
            (Some(_), true) => warn!("--force: ignoring persisted state"),
            (None, _) => info!("no persisted state yet"),
        }

        // Classify every configured slot, in configuration order.
        let mut final_nodes: Vec<NodeRecord> = Vec::new();
        let mut pending: Vec<PendingNode> = Vec::new();
        for group in &config.groups {
            for (slot, instance) in &group.instances {
                if !instance.enabled {
                    continue;
                }
                let name = group.node_name(cluster, *slot);
                let labels = group.merged_labels(instance);

                if let Some(existing_node) = alive.get(&name) {
                    final_nodes.push(NodeRecord {
                        role: group.role,
                        labels,
                        taints: group.taints.clone(),
                        ..existing_node.clone()
                    });
                    continue;
                }

                if let Some(server_id) = cloud_servers.get(&name) {
                    if options.dry_run {
                        info!("dry run: would adopt '{}' ({})", name, server_id);
                        continue;
                    }
                    info!("adopting existing server '{}' ({})", name, server_id);
                    match resolve_node_details(
                        self.client.as_ref(),
                        server_id,
                        &[],
                        Some(&group.disks),
                    )
                    .await
                    {
                        Ok(details) => final_nodes.push(NodeRecord {
                            name,
                            role: group.role,
                            id: server_id.clone(),
                            ip: details.ip,
                            ssh_port: 0,
                            address_id: details.address_id,
                            labels,
                            taints: group.taints.clone(),
                            disks: details.disks,
                            created: details.created,
                            updated: Some(now_rfc3339()),
                        }),
                        Err(e) => warn!("cannot adopt '{}': {}", name, e),
                    }
                    continue;
                }

                let prior_disks = existing
                    .as_ref()
                    .and_then(|s| s.find_node(&name))
                    .map(|n| n.disks.clone())
                    .unwrap_or_default();
                pending.push(PendingNode {
                    name,
                    group: group.clone(),
                    labels,
                    prior_disks,
                });
            }
        }

        // State records with no configured counterpart.
        let desired: HashSet<String> = config.desired_names(cluster).into_iter().collect();
        let orphans: Vec<String> = alive
            .keys()
            .filter(|name| !desired.contains(*name))
            .cloned()
            .collect();

        if options.dry_run {
            info!(
                "dry run: {} retained, {} to create, {} orphaned",
                final_nodes.len(),
                pending.len(),
                orphans.len()
            );
            for node in &pending {
                info!("dry run: would create '{}'", node.name);
            }
            for name in &orphans {
                info!("dry run: orphan '{}'", name);
            }
            return Ok(ReconcileReport {
                nodes: final_nodes,
                failures: Vec::new(),
                orphans,
            });
        }

        // Create what is missing.
        let mut failures = Vec::new();
        if pending.is_empty() {
            info!("all configured nodes are present");
        } else {
            if self.settings.image.is_empty() {
                return Err(FleetError::InvalidConfig(
                    "no image configured for node creation".to_string(),
                ));
            }
            info!(
                "creating {} nodes (concurrency {})",
                pending.len(),
                self.settings.concurrency
            );
            let generated;
            let password = match password {
                Some(p) => p,
                None => {
                    generated = compute_client::generate_password();
                    &generated
                }
            };
            let provisioner = Provisioner::new(Arc::clone(&self.client), self.settings.clone());
            for result in provisioner.run(pending, password).await {
                match result {
                    Ok(node) => {
                        info!("[{}] created ({})", node.name, node.ip);
                        final_nodes.push(node);
                    }
                    Err(e) => {
                        error!("{}", e);
                        failures.push(e);
                    }
                }
            }
        }

        // Orphans: reported always, deleted only on explicit opt-in and
        // per-server confirmation.
        let critical = existing
            .as_ref()
            .map(ClusterState::critical_disk_ids)
            .unwrap_or_default();
        for name in &orphans {
            let Some(record) = alive.get(name) else {
                continue;
            };
            warn!("orphaned node detected: '{}' ({})", name, record.id);
            if !options.gc {
                info!("orphan '{}' left in place (--delnodes not set)", name);
                continue;
            }
            if !(self.confirm)(&format!("Delete server '{}'?", name)) {
                info!("deletion of '{}' declined", name);
                continue;
            }
            if let Err(e) = delete_server_cascade(self.client.as_ref(), &record.id, &critical).await
            {
                error!("failed to delete orphan '{}': {}", name, e);
            }
        }

        // Persist the converged result in stable order.
        final_nodes.sort_by(|a, b| a.name.cmp(&b.name));
        let state = ClusterState {
            version: fleet_state::STATE_VERSION.to_string(),
            last_updated: Utc::now(),
            ssh_user: config.ssh_user.clone(),
            nodes: final_nodes,
        };
        self.store.save(&state).await?;
        info!("state '{}' saved ({} nodes)", cluster, state.nodes.len());

        if let Some(path) = inventory_path {
            write_inventory(path, &config.ssh_user, &state.nodes)?;
            info!("inventory written to {}", path.display());
        }

        Ok(ReconcileReport {
            nodes: state.nodes,
            failures,
            orphans,
        })
    }
}

/// Delete a server together with its bootable volumes and non-external
/// addresses. Data volumes are preserved, and the critical set is checked
/// before every volume delete.
pub(crate) async fn delete_server_cascade(
    client: &dyn ComputeClientTrait,
    server_id: &str,
    critical: &HashSet<String>,
) -> Result<(), FleetError> {
    let detail = match client.get_server_detail(server_id).await {
        Ok(detail) => detail,
        Err(e) => {
            warn!("could not inspect {} before deletion: {}", server_id, e);
            client
                .delete_server(server_id, &DeleteServerRequest::default())
                .await?;
            return Ok(());
        }
    };

    let addresses = client.project_addresses().await.unwrap_or_default();
    let delete_addresses: Vec<String> = detail
        .addresses
        .iter()
        .filter(|id| addresses.get(*id).is_some_and(|a| !a.external))
        .cloned()
        .collect();

    let mut delete_volumes = Vec::new();
    for storage in &detail.storages {
        if critical.contains(&storage.id) {
            info!("volume {} is critical, preserved", storage.id);
            continue;
        }
        match client.get_volume(&storage.id).await {
            Ok(volume) if volume.bootable => delete_volumes.push(storage.id.clone()),
            Ok(_) => info!("data volume {} preserved", storage.id),
            Err(e) => warn!("volume {} not inspectable, preserved: {}", storage.id, e),
        }
    }

    client
        .delete_server(
            server_id,
            &DeleteServerRequest {
                clear_fstab: true,
                delete_volumes,
                delete_addresses,
            },
        )
        .await?;
    Ok(())
}
