//! Unit tests for the disk continuity matcher

#[cfg(test)]
mod tests {
    use crate::config::DiskSpec;
    use crate::reconciler::disks::plan_disks;
    use compute_client::{Volume, VolumeStatus};
    use fleet_state::DiskRecord;

    fn spec(size: u32, bootable: bool) -> DiskSpec {
        DiskSpec {
            size,
            bootable,
            disk_type: "storage".to_string(),
            mount_point: None,
            owner: None,
            group: None,
            mode: None,
        }
    }

    fn record(id: &str, size: u32, critical: bool) -> DiskRecord {
        DiskRecord {
            id: id.to_string(),
            size,
            disk_type: "storage".to_string(),
            bootable: false,
            device: None,
            mount_point: Some("/mnt/disks/data".to_string()),
            owner: None,
            group: None,
            mode: None,
            critical,
            created: None,
            updated: None,
        }
    }

    fn volume(id: &str, size: u32) -> Volume {
        Volume {
            id: id.to_string(),
            name: format!("volume-{}", id),
            size,
            status: VolumeStatus::Available,
            storage_type: "storage".to_string(),
            bootable: false,
            created: None,
            attached_to_server: None,
        }
    }

    #[test]
    fn test_prior_id_preferred_over_list_order_and_critical_kept() {
        // V2 comes first in provider order, but V1 matches the prior record.
        let prior = vec![record("V1", 15, true)];
        let available = vec![volume("V2", 15), volume("V1", 15)];
        let plan = plan_disks(&[spec(15, false)], &prior, &available);

        assert_eq!(plan.reattach.len(), 1);
        assert_eq!(plan.reattach[0].volume_id, "V1");
        assert!(plan.reattach[0].critical, "critical flag must be preserved");
        assert!(plan.provision.is_empty());
    }

    #[test]
    fn test_size_match_fallback_when_prior_id_gone() {
        let prior = vec![record("V1", 15, false)];
        let available = vec![volume("V9", 15)];
        let plan = plan_disks(&[spec(15, false)], &prior, &available);

        assert_eq!(plan.reattach.len(), 1);
        assert_eq!(plan.reattach[0].volume_id, "V9");
        assert!(!plan.reattach[0].critical);
    }

    #[test]
    fn test_prior_record_with_wrong_size_is_ignored() {
        // The prior record's size no longer matches the spec; its volume
        // must not be picked via the ID path.
        let prior = vec![record("V1", 10, true)];
        let available = vec![volume("V1", 10), volume("V2", 15)];
        let plan = plan_disks(&[spec(15, false)], &prior, &available);

        assert_eq!(plan.reattach.len(), 1);
        assert_eq!(plan.reattach[0].volume_id, "V2");
    }

    #[test]
    fn test_no_match_provisions_new_volume() {
        let plan = plan_disks(&[spec(30, false)], &[], &[volume("V1", 15)]);
        assert!(plan.reattach.is_empty());
        assert_eq!(plan.provision.len(), 1);
        assert_eq!(plan.provision[0].size, 30);
        assert!(!plan.provision[0].bootable);
    }

    #[test]
    fn test_bootable_specs_always_provision_fresh() {
        // A matching available volume must not be reused for the boot disk.
        let prior = vec![DiskRecord {
            bootable: true,
            ..record("V1", 20, false)
        }];
        let available = vec![volume("V1", 20)];
        let plan = plan_disks(&[spec(20, true)], &prior, &available);

        assert!(plan.reattach.is_empty());
        assert_eq!(plan.provision.len(), 1);
        assert!(plan.provision[0].bootable);
    }

    #[test]
    fn test_volume_never_assigned_twice() {
        let available = vec![volume("V1", 15)];
        let plan = plan_disks(&[spec(15, false), spec(15, false)], &[], &available);

        assert_eq!(plan.reattach.len(), 1);
        assert_eq!(plan.reattach[0].volume_id, "V1");
        assert_eq!(plan.provision.len(), 1, "second spec gets a new volume");
    }

    #[test]
    fn test_ambiguous_size_tie_takes_provider_order() {
        let available = vec![volume("V7", 15), volume("V3", 15)];
        let plan = plan_disks(&[spec(15, false)], &[], &available);
        assert_eq!(plan.reattach[0].volume_id, "V7");
    }

    #[test]
    fn test_spec_order_preserved_in_plan() {
        let specs = vec![spec(20, true), spec(15, false), spec(30, false)];
        let plan = plan_disks(&specs, &[], &[volume("V1", 15)]);

        assert_eq!(plan.provision.len(), 2);
        assert!(plan.provision[0].bootable);
        assert_eq!(plan.provision[1].size, 30);
        assert_eq!(plan.reattach[0].volume_id, "V1");
    }
}
