//! State maintenance commands.
//!
//! Everything here operates on an already-provisioned fleet: refreshing the
//! persisted state from live inventory, reattaching recorded disks, marking
//! disks critical, pruning volumes and rotating passwords. Destructive
//! actions prompt for interactive confirmation.

use crate::error::FleetError;
use crate::reconciler::now_rfc3339;
use crate::reconciler::resolver::resolve_node_details;
use compute_client::{ComputeClientTrait, Volume, VolumeStatus, generate_password};
use fleet_state::StateStore;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::io::{BufRead, Write};
use std::time::Duration;
use tracing::{info, warn};

/// Ask the operator a yes/no question on stdin; only a literal "yes" accepts.
pub fn confirm(prompt: &str) -> bool {
    print!("{} [yes/N]: ", prompt);
    let _ = std::io::stdout().flush();
    let mut input = String::new();
    if std::io::stdin().lock().read_line(&mut input).is_err() {
        return false;
    }
    input.trim().eq_ignore_ascii_case("yes")
}

fn read_line(prompt: &str) -> Option<String> {
    print!("{}", prompt);
    let _ = std::io::stdout().flush();
    let mut input = String::new();
    std::io::stdin().lock().read_line(&mut input).ok()?;
    let input = input.trim().to_string();
    if input.is_empty() { None } else { Some(input) }
}

/// Print the persisted state as indented JSON.
pub async fn show_state(store: &StateStore) -> Result<(), FleetError> {
    match store.load().await? {
        None => println!("no state found"),
        Some(state) => println!(
            "{}",
            serde_json::to_string_pretty(&state).map_err(fleet_state::StateError::from)?
        ),
    }
    Ok(())
}

/// Refresh the persisted state from the live cloud inventory.
///
/// Vanished nodes are dropped, drifted IPs/address bindings/disk devices
/// updated; nothing is saved without confirmation.
pub async fn sync_state(
    client: &dyn ComputeClientTrait,
    store: &StateStore,
) -> Result<(), FleetError> {
    let Some(mut state) = store.load().await? else {
        info!("no state to sync");
        return Ok(());
    };

    let mut updated_nodes = Vec::new();
    let mut changed = false;
    for mut node in state.nodes.clone() {
        match resolve_node_details(client, &node.id, &node.disks, None).await {
            Err(e) => {
                warn!("node '{}' gone, dropping from state: {}", node.name, e);
                changed = true;
            }
            Ok(details) => {
                if node.ip != details.ip {
                    info!("node '{}': IP {} -> {}", node.name, node.ip, details.ip);
                    node.ip = details.ip;
                    changed = true;
                }
                if node.address_id != details.address_id {
                    node.address_id = details.address_id;
                    changed = true;
                }
                let disk_drift = node.disks.len() != details.disks.len()
                    || node
                        .disks
                        .iter()
                        .zip(&details.disks)
                        .any(|(a, b)| a.id != b.id || a.device != b.device);
                if disk_drift {
                    node.disks = details.disks;
                    changed = true;
                }
                node.created = details.created.or(node.created);
                node.updated = Some(now_rfc3339());
                updated_nodes.push(node);
            }
        }
    }

    if !changed {
        info!("state is up to date");
        return Ok(());
    }
    if !confirm("Save refreshed state?") {
        info!("sync discarded");
        return Ok(());
    }
    state.nodes = updated_nodes;
    state.last_updated = Utc::now();
    store.save(&state).await?;
    info!("state saved");
    Ok(())
}

/// Remove a single node from the persisted state only.
pub async fn remove_node_from_state(store: &StateStore, name: &str) -> Result<(), FleetError> {
    let Some(mut state) = store.load().await? else {
        return Err(FleetError::NotInState(name.to_string()));
    };
    if state.find_node(name).is_none() {
        return Err(FleetError::NotInState(name.to_string()));
    }
    if !confirm(&format!("Remove node '{}' from state?", name)) {
        return Ok(());
    }
    state.nodes.retain(|n| n.name != name);
    state.last_updated = Utc::now();
    store.save(&state).await?;
    info!("node '{}' removed from state", name);
    Ok(())
}

/// Mark a disk record as critical, protecting the volume from deletion.
///
/// This is the only code path that sets the flag; nothing ever clears it.
pub async fn mark_disk_critical(store: &StateStore, disk_id: &str) -> Result<(), FleetError> {
    let Some(mut state) = store.load().await? else {
        return Err(FleetError::NotInState(format!("disk {}", disk_id)));
    };

    let mut found = false;
    'nodes: for node in &mut state.nodes {
        for disk in &mut node.disks {
            if disk.id == disk_id {
                disk.critical = true;
                disk.updated = Some(now_rfc3339());
                info!(
                    "disk {} (node '{}') marked critical, protected from deletion",
                    disk_id, node.name
                );
                found = true;
                break 'nodes;
            }
        }
    }
    if !found {
        return Err(FleetError::NotInState(format!("disk {}", disk_id)));
    }

    state.last_updated = Utc::now();
    store.save(&state).await?;
    Ok(())
}

/// Reattach-only mode: bring every recorded but detached data disk back to
/// its node and refresh recorded device paths, bypassing full
/// reconciliation.
pub async fn attach_recorded_disks(
    client: &dyn ComputeClientTrait,
    store: &StateStore,
) -> Result<(), FleetError> {
    let Some(mut state) = store.load().await? else {
        warn!("state not found");
        return Ok(());
    };

    info!("searching for detached disks");
    let volumes: HashMap<String, Volume> = client
        .list_volumes()
        .await?
        .into_iter()
        .map(|v| (v.id.clone(), v))
        .collect();

    let mut attached = 0u32;
    let mut changed = false;
    for node in &mut state.nodes {
        if node.id.is_empty() {
            continue;
        }
        for disk in &mut node.disks {
            if disk.bootable || disk.id.is_empty() {
                continue;
            }
            let Some(volume) = volumes.get(&disk.id) else {
                warn!("[{}] disk {} from state not found in cloud", node.name, disk.id);
                continue;
            };
            match volume.status {
                VolumeStatus::Available => {
                    info!(
                        "[{}] attaching detached disk {} ({} GB)",
                        node.name, disk.id, disk.size
                    );
                    match client.attach_volume(&disk.id, &node.id).await {
                        Ok(device) => {
                            disk.device = Some(device);
                            disk.updated = Some(now_rfc3339());
                            changed = true;
                            attached += 1;
                        }
                        Err(e) => warn!("[{}] attach of {} failed: {}", node.name, disk.id, e),
                    }
                }
                VolumeStatus::InUse => {
                    let Some(binding) = &volume.attached_to_server else {
                        continue;
                    };
                    if binding.id != node.id {
                        warn!(
                            "[{}] disk {} is attached to another server ({})",
                            node.name, disk.id, binding.id
                        );
                    } else if !binding.device.is_empty()
                        && disk.device.as_deref() != Some(binding.device.as_str())
                    {
                        info!(
                            "[{}] device path of {} refreshed to {}",
                            node.name, disk.id, binding.device
                        );
                        disk.device = Some(binding.device.clone());
                        changed = true;
                    }
                }
                _ => {}
            }
        }
    }

    if attached == 0 && !changed {
        info!("no action, all disks in place");
        return Ok(());
    }
    if attached > 0 {
        // Let the attachments settle before recording device paths.
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
    state.last_updated = Utc::now();
    store.save(&state).await?;
    info!("state updated ({} disks attached)", attached);
    Ok(())
}

/// Generate one fresh password and set it on every node in state.
pub async fn reset_password(
    client: &dyn ComputeClientTrait,
    store: &StateStore,
) -> Result<(), FleetError> {
    let Some(state) = store.load().await? else {
        warn!("state not found");
        return Ok(());
    };
    let password = generate_password();
    for node in &state.nodes {
        match client.set_server_password(&node.id, &password).await {
            Ok(()) => info!("password updated on '{}'", node.name),
            Err(e) => warn!("password update failed on '{}': {}", node.name, e),
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    println!("NEW PASSWORD: {}", password);
    Ok(())
}

/// Interactive volume garbage collection.
///
/// Lists every project volume and offers a bootable-only sweep, a full
/// sweep, or a single deletion by ID. The critical set built from the
/// persisted state is checked before every delete call.
pub async fn prune_volumes(
    client: &dyn ComputeClientTrait,
    store: &StateStore,
) -> Result<(), FleetError> {
    let critical: HashSet<String> = match store.load().await {
        Ok(Some(state)) => state.critical_disk_ids(),
        Ok(None) => {
            warn!("state not found; critical-disk protection inactive");
            HashSet::new()
        }
        Err(e) => {
            warn!("state load failed ({}); critical-disk protection inactive", e);
            HashSet::new()
        }
    };

    let volumes = client.list_volumes().await?;
    if volumes.is_empty() {
        println!("no volumes found");
        return Ok(());
    }

    println!("{:<38} {:>6} {:>6} {:>9} {:>10}", "ID", "SIZE", "BOOT", "CRITICAL", "STATUS");
    for volume in &volumes {
        println!(
            "{:<38} {:>4}Gb {:>6} {:>9} {:>10?}",
            volume.id,
            volume.size,
            volume.bootable,
            if critical.contains(&volume.id) { "YES" } else { "" },
            volume.status,
        );
    }
    println!();
    println!("Enter 'all' to delete every BOOTABLE (system) volume,");
    println!("'force' to delete every volume including data,");
    println!("or a single volume ID.");

    let Some(choice) = read_line("Your choice > ") else {
        println!("cancelled");
        return Ok(());
    };

    match choice.as_str() {
        "all" => {
            for volume in volumes.iter().filter(|v| v.bootable) {
                delete_guarded(client, &critical, &volume.id).await;
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }
        "force" => {
            for volume in &volumes {
                delete_guarded(client, &critical, &volume.id).await;
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }
        id => delete_guarded(client, &critical, id).await,
    }
    Ok(())
}

/// Delete one volume unless the critical set protects it.
async fn delete_guarded(
    client: &dyn ComputeClientTrait,
    critical: &HashSet<String>,
    volume_id: &str,
) {
    if critical.contains(volume_id) {
        info!("volume {} is protected (critical), skipped", volume_id);
        return;
    }
    match client.delete_volume(volume_id).await {
        Ok(()) => info!("volume {} deleted", volume_id),
        Err(e) => warn!("failed to delete volume {}: {}", volume_id, e),
    }
}
