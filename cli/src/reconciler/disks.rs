//! Disk continuity matcher.
//!
//! Pure, single-pass matching of a node's configured disk specs against the
//! previously recorded disks and the currently AVAILABLE cloud volumes.
//! Runs once per provisioning attempt against a project-wide volume
//! snapshot; each node's matching is independent and greedy, with no
//! backtracking and no attempt at a globally optimal assignment. When two
//! available volumes tie on size, provider list order decides.

use crate::config::DiskSpec;
use compute_client::{StorageRequest, Volume};
use fleet_state::DiskRecord;
use std::collections::HashSet;

/// An available volume selected for reattachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedVolume {
    /// Cloud volume ID to attach
    pub volume_id: String,
    /// Protection flag carried over from the prior record
    pub critical: bool,
}

/// Result of matching one node's disk specs.
#[derive(Debug, Clone, Default)]
pub struct DiskPlan {
    /// Existing volumes to reattach, in spec order
    pub reattach: Vec<MatchedVolume>,
    /// Volumes to provision fresh, in spec order
    pub provision: Vec<StorageRequest>,
}

/// Match configured disk specs against prior records and available volumes.
///
/// Per non-bootable spec, in spec order: prefer the available volume whose
/// ID matches a prior record of the same size, then any unused available
/// volume of the same size, else provision a new volume. Bootable specs
/// always provision a fresh boot volume. A volume is never assigned twice
/// within one plan.
pub fn plan_disks(specs: &[DiskSpec], prior: &[DiskRecord], available: &[Volume]) -> DiskPlan {
    let mut plan = DiskPlan::default();
    let mut used: HashSet<&str> = HashSet::new();

    for spec in specs {
        if spec.bootable {
            plan.provision
                .push(StorageRequest::boot(spec.size, &spec.disk_type));
            continue;
        }

        let mut found: Option<&Volume> = None;
        'prior: for old in prior.iter().filter(|d| !d.bootable && d.size == spec.size) {
            for volume in available {
                if volume.id == old.id && !used.contains(volume.id.as_str()) {
                    found = Some(volume);
                    break 'prior;
                }
            }
        }
        if found.is_none() {
            found = available
                .iter()
                .find(|v| !used.contains(v.id.as_str()) && v.size == spec.size);
        }

        match found {
            Some(volume) => {
                used.insert(volume.id.as_str());
                plan.reattach.push(MatchedVolume {
                    volume_id: volume.id.clone(),
                    critical: prior
                        .iter()
                        .any(|d| d.id == volume.id && d.critical),
                });
            }
            None => {
                plan.provision
                    .push(StorageRequest::data(spec.size, &spec.disk_type));
            }
        }
    }

    plan
}
