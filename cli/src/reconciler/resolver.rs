//! Node detail resolver.
//!
//! Queries the cloud API for a single node's current addressing and
//! attached volumes, merging mount metadata back in from the prior disk
//! records (by volume ID) or, failing that, from the size-matching
//! configured disk spec. A server ID that no longer resolves is "node
//! gone", not a transient fault.

use crate::config::DiskSpec;
use crate::error::FleetError;
use crate::reconciler::now_rfc3339;
use compute_client::{ComputeClientTrait, ComputeError};
use fleet_state::DiskRecord;
use tracing::warn;

/// Resolved view of a live node.
#[derive(Debug, Clone, Default)]
pub struct NodeDetails {
    /// External IP, or the first bound address when none is external
    pub ip: String,
    /// ID of the resolved address binding
    pub address_id: Option<String>,
    /// Disk records for attached volumes, plus remembered detached ones
    pub disks: Vec<DiskRecord>,
    /// Server creation timestamp
    pub created: Option<String>,
}

/// Resolve a server's current IP, address binding and disk records.
///
/// `prior_disks` seeds mount metadata and the `critical` flag; `disk_specs`
/// is the fallback metadata source for adopted nodes with no prior records.
pub async fn resolve_node_details(
    client: &dyn ComputeClientTrait,
    server_id: &str,
    prior_disks: &[DiskRecord],
    disk_specs: Option<&[DiskSpec]>,
) -> Result<NodeDetails, FleetError> {
    let detail = match client.get_server_detail(server_id).await {
        Ok(detail) => detail,
        Err(ComputeError::NotFound(_)) => {
            return Err(FleetError::DetailLookup(server_id.to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    let addresses = match client.project_addresses().await {
        Ok(addresses) => addresses,
        Err(e) => {
            warn!("project addresses unavailable: {}", e);
            Default::default()
        }
    };

    let mut ip = String::new();
    let mut address_id = None;
    for addr_id in &detail.addresses {
        if let Some(info) = addresses.get(addr_id)
            && info.external
        {
            ip = info.address.clone();
            address_id = Some(addr_id.clone());
            break;
        }
    }
    if ip.is_empty()
        && let Some(first) = detail.addresses.first()
    {
        address_id = Some(first.clone());
        if let Some(info) = addresses.get(first) {
            ip = info.address.clone();
        }
    }

    let volumes = match client.list_volumes().await {
        Ok(volumes) => volumes,
        Err(e) => {
            warn!("project volumes unavailable: {}", e);
            Vec::new()
        }
    };

    let now = now_rfc3339();
    let mut disks = Vec::new();
    for volume in &volumes {
        let Some(attachment) = volume
            .attached_to_server
            .as_ref()
            .filter(|a| a.id == server_id)
        else {
            continue;
        };

        let prior = prior_disks.iter().find(|d| d.id == volume.id);
        let spec = if volume.bootable {
            None
        } else {
            disk_specs.and_then(|specs| {
                specs
                    .iter()
                    .find(|s| !s.bootable && s.mount_point.is_some() && s.size == volume.size)
            })
        };

        let mount_point = prior
            .and_then(|d| d.mount_point.clone())
            .or_else(|| spec.and_then(|s| s.mount_point.clone()))
            .or_else(|| {
                if volume.bootable {
                    None
                } else {
                    Some(generated_mount_point(&attachment.device))
                }
            });

        disks.push(DiskRecord {
            id: volume.id.clone(),
            size: volume.size,
            disk_type: volume.storage_type.clone(),
            bootable: volume.bootable,
            device: Some(attachment.device.clone()).filter(|d| !d.is_empty()),
            mount_point,
            owner: prior
                .and_then(|d| d.owner.clone())
                .or_else(|| spec.and_then(|s| s.owner.clone())),
            group: prior
                .and_then(|d| d.group.clone())
                .or_else(|| spec.and_then(|s| s.group.clone())),
            mode: prior
                .and_then(|d| d.mode.clone())
                .or_else(|| spec.and_then(|s| s.mode.clone())),
            critical: prior.is_some_and(|d| d.critical),
            created: volume.created.clone(),
            updated: Some(now.clone()),
        });
    }

    // A remembered data disk whose volume still exists but is detached is
    // carried forward without a device so it is not forgotten.
    for old in prior_disks.iter().filter(|d| !d.bootable) {
        if disks.iter().any(|d| d.id == old.id) {
            continue;
        }
        if let Some(volume) = volumes.iter().find(|v| v.id == old.id) {
            disks.push(DiskRecord {
                id: volume.id.clone(),
                size: volume.size,
                disk_type: volume.storage_type.clone(),
                bootable: false,
                device: None,
                mount_point: old.mount_point.clone(),
                owner: old.owner.clone(),
                group: old.group.clone(),
                mode: old.mode.clone(),
                critical: old.critical,
                created: volume.created.clone(),
                updated: Some(now.clone()),
            });
        }
    }

    Ok(NodeDetails {
        ip,
        address_id,
        disks,
        created: detail.created,
    })
}

fn generated_mount_point(device: &str) -> String {
    let leaf = device.rsplit('/').next().unwrap_or(device);
    format!("/mnt/disks/{}", leaf)
}
