//! Unit tests for the cluster reconciler

#[cfg(test)]
mod tests {
    use crate::config::{DiskSpec, FleetConfig, Flavor, InstanceConfig, NodeGroup};
    use crate::reconciler::provision::ProvisionSettings;
    use crate::reconciler::{Reconciler, RunOptions};
    use compute_client::{MockComputeClient, ServerStatus};
    use fleet_state::{ClusterState, DiskRecord, NodeRecord, NodeRole, StateStore};
    use object_store::memory::InMemory;
    use object_store::ObjectStore;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn fast_settings() -> ProvisionSettings {
        ProvisionSettings {
            concurrency: 5,
            max_attempts: 3,
            retry_delay: Duration::from_millis(5),
            cleanup_delay: Duration::from_millis(5),
            attach_settle: Duration::from_millis(5),
            status_attempts: 3,
            status_interval: Duration::from_millis(5),
            image: "img-1".to_string(),
            keypairs: vec!["kp-1".to_string()],
        }
    }

    fn boot_spec() -> DiskSpec {
        DiskSpec {
            size: 20,
            bootable: true,
            disk_type: "storage".to_string(),
            mount_point: None,
            owner: None,
            group: None,
            mode: None,
        }
    }

    fn masters_config(slots: &[u32]) -> FleetConfig {
        FleetConfig {
            ssh_user: "root".to_string(),
            image: "img-1".to_string(),
            keypairs: Vec::new(),
            load_balancer_ip: None,
            groups: vec![NodeGroup {
                name_prefix: "master".to_string(),
                role: NodeRole::Master,
                instances: slots
                    .iter()
                    .map(|slot| {
                        (
                            *slot,
                            InstanceConfig {
                                enabled: true,
                                labels: BTreeMap::new(),
                            },
                        )
                    })
                    .collect(),
                flavor: Flavor { ram: 2, vcpus: 2 },
                disks: vec![boot_spec()],
                external_ip: false,
                static_ip: None,
                labels: BTreeMap::new(),
                taints: Vec::new(),
                lb_rules: Vec::new(),
            }],
        }
    }

    fn record(name: &str, server_id: &str, ip: &str) -> NodeRecord {
        NodeRecord {
            name: name.to_string(),
            role: NodeRole::Master,
            id: server_id.to_string(),
            ip: ip.to_string(),
            ssh_port: 0,
            address_id: None,
            labels: BTreeMap::new(),
            taints: Vec::new(),
            disks: Vec::new(),
            created: Some("2026-01-01T00:00:00Z".to_string()),
            updated: Some("2026-01-01T00:00:00Z".to_string()),
        }
    }

    fn reconciler(
        mock: &MockComputeClient,
        backend: &Arc<dyn ObjectStore>,
        confirm: bool,
    ) -> Reconciler {
        Reconciler::new(
            Arc::new(mock.clone()),
            StateStore::new(Arc::clone(backend), "c1"),
            fast_settings(),
            Box::new(move |_| confirm),
        )
    }

    async fn seed_state(backend: &Arc<dyn ObjectStore>, nodes: Vec<NodeRecord>) -> ClusterState {
        let store = StateStore::new(Arc::clone(backend), "c1");
        let mut state = ClusterState::new("root");
        state.last_updated = "2026-01-01T00:00:00Z".parse().unwrap();
        state.nodes = nodes;
        store.save(&state).await.unwrap();
        state
    }

    #[tokio::test]
    async fn test_retain_and_create_scenario() {
        let mock = MockComputeClient::new();
        let srv_a = mock.add_server("c1-master-1", ServerStatus::Active);
        mock.add_address("10.0.0.4", false, Some(&srv_a));
        let backend: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let initial =
            seed_state(&backend, vec![record("c1-master-1", &srv_a, "10.0.0.4")]).await;

        let report = reconciler(&mock, &backend, false)
            .reconcile("c1", &masters_config(&[1, 2]), RunOptions::default(), Some("pw"), None)
            .await
            .unwrap();

        assert!(report.failures.is_empty());
        assert!(report.orphans.is_empty(), "no orphan may be reported");
        assert_eq!(report.nodes.len(), 2);
        assert_eq!(report.nodes[0].name, "c1-master-1");
        assert_eq!(report.nodes[0].id, srv_a, "retained node keeps its server");
        assert_eq!(report.nodes[0].ip, "10.0.0.4");
        assert_eq!(report.nodes[1].name, "c1-master-2");
        assert_ne!(report.nodes[1].id, srv_a);

        let saved = StateStore::new(Arc::clone(&backend), "c1")
            .load()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.nodes.len(), 2);
        assert!(saved.last_updated > initial.last_updated);
    }

    #[tokio::test]
    async fn test_reconciliation_is_idempotent() {
        let mock = MockComputeClient::new();
        let backend: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let config = masters_config(&[1, 2]);

        let first = reconciler(&mock, &backend, false)
            .reconcile("c1", &config, RunOptions::default(), Some("pw"), None)
            .await
            .unwrap();
        let servers_after_first = mock.server_names().len();

        let second = reconciler(&mock, &backend, false)
            .reconcile("c1", &config, RunOptions::default(), Some("pw"), None)
            .await
            .unwrap();

        assert!(second.failures.is_empty());
        assert_eq!(mock.server_names().len(), servers_after_first, "no new servers");
        let shape = |nodes: &[NodeRecord]| {
            nodes
                .iter()
                .map(|n| (n.name.clone(), n.id.clone(), n.ip.clone(), n.role))
                .collect::<Vec<_>>()
        };
        assert_eq!(shape(&first.nodes), shape(&second.nodes));
    }

    #[tokio::test]
    async fn test_existing_server_is_adopted_not_recreated() {
        let mock = MockComputeClient::new();
        let srv = mock.add_server("c1-master-1", ServerStatus::Active);
        mock.add_address("10.0.0.7", false, Some(&srv));
        let backend: Arc<dyn ObjectStore> = Arc::new(InMemory::new());

        let report = reconciler(&mock, &backend, false)
            .reconcile("c1", &masters_config(&[1]), RunOptions::default(), Some("pw"), None)
            .await
            .unwrap();

        assert_eq!(report.nodes.len(), 1);
        assert_eq!(report.nodes[0].id, srv, "existing server must be reused");
        assert_eq!(
            mock.server_names(),
            vec!["c1-master-1".to_string()],
            "a duplicate-name server must never be created"
        );
    }

    #[tokio::test]
    async fn test_force_still_prefers_adoption_over_recreation() {
        let mock = MockComputeClient::new();
        let srv = mock.add_server("c1-master-1", ServerStatus::Active);
        let backend: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        seed_state(&backend, vec![record("c1-master-1", &srv, "10.0.0.4")]).await;

        let options = RunOptions {
            force: true,
            ..Default::default()
        };
        let report = reconciler(&mock, &backend, false)
            .reconcile("c1", &masters_config(&[1]), options, Some("pw"), None)
            .await
            .unwrap();

        assert_eq!(report.nodes.len(), 1);
        assert_eq!(report.nodes[0].id, srv);
        assert_eq!(mock.server_names().len(), 1);
    }

    #[tokio::test]
    async fn test_orphan_reported_but_not_deleted_by_default() {
        let mock = MockComputeClient::new();
        let srv_old = mock.add_server("c1-old-1", ServerStatus::Active);
        let backend: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        seed_state(&backend, vec![record("c1-old-1", &srv_old, "10.0.0.9")]).await;

        let report = reconciler(&mock, &backend, true)
            .reconcile("c1", &masters_config(&[1]), RunOptions::default(), Some("pw"), None)
            .await
            .unwrap();

        assert_eq!(report.orphans, vec!["c1-old-1".to_string()]);
        assert!(
            mock.server_id_by_name("c1-old-1").is_some(),
            "orphan must survive without the GC flag"
        );
        // The orphan is dropped from the persisted state either way.
        let saved = StateStore::new(Arc::clone(&backend), "c1")
            .load()
            .await
            .unwrap()
            .unwrap();
        assert!(saved.find_node("c1-old-1").is_none());
    }

    #[tokio::test]
    async fn test_orphan_survives_declined_confirmation() {
        let mock = MockComputeClient::new();
        let srv_old = mock.add_server("c1-old-1", ServerStatus::Active);
        let backend: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        seed_state(&backend, vec![record("c1-old-1", &srv_old, "10.0.0.9")]).await;

        let options = RunOptions {
            gc: true,
            ..Default::default()
        };
        let report = reconciler(&mock, &backend, false)
            .reconcile("c1", &masters_config(&[1]), options, Some("pw"), None)
            .await
            .unwrap();

        assert_eq!(report.orphans.len(), 1);
        assert!(
            mock.server_id_by_name("c1-old-1").is_some(),
            "declined confirmation must block deletion"
        );
    }

    #[tokio::test]
    async fn test_orphan_deleted_with_gc_and_confirmation() {
        let mock = MockComputeClient::new();
        let srv_old = mock.add_server("c1-old-1", ServerStatus::Active);
        let backend: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        seed_state(&backend, vec![record("c1-old-1", &srv_old, "10.0.0.9")]).await;

        let options = RunOptions {
            gc: true,
            ..Default::default()
        };
        reconciler(&mock, &backend, true)
            .reconcile("c1", &masters_config(&[1]), options, Some("pw"), None)
            .await
            .unwrap();

        assert!(mock.server_id_by_name("c1-old-1").is_none(), "orphan deleted");
    }

    #[tokio::test]
    async fn test_dry_run_mutates_nothing() {
        let mock = MockComputeClient::new();
        let backend: Arc<dyn ObjectStore> = Arc::new(InMemory::new());

        let options = RunOptions {
            dry_run: true,
            ..Default::default()
        };
        let report = reconciler(&mock, &backend, true)
            .reconcile("c1", &masters_config(&[1, 2]), options, Some("pw"), None)
            .await
            .unwrap();

        assert!(report.nodes.is_empty());
        assert!(mock.server_names().is_empty(), "dry run must not create servers");
        let saved = StateStore::new(Arc::clone(&backend), "c1")
            .load()
            .await
            .unwrap();
        assert!(saved.is_none(), "dry run must not persist state");
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_siblings_in_state() {
        let mock = MockComputeClient::new();
        mock.fail_creates("c1-master-2", 3);
        let backend: Arc<dyn ObjectStore> = Arc::new(InMemory::new());

        let report = reconciler(&mock, &backend, false)
            .reconcile("c1", &masters_config(&[1, 2, 3]), RunOptions::default(), Some("pw"), None)
            .await
            .unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].node, "c1-master-2");
        assert_eq!(report.nodes.len(), 2);

        let saved = StateStore::new(Arc::clone(&backend), "c1")
            .load()
            .await
            .unwrap()
            .unwrap();
        assert!(saved.find_node("c1-master-1").is_some());
        assert!(saved.find_node("c1-master-3").is_some());
        assert!(saved.find_node("c1-master-2").is_none());
    }

    #[tokio::test]
    async fn test_critical_flag_survives_reconciliation() {
        let mock = MockComputeClient::new();
        let srv = mock.add_server("c1-master-1", ServerStatus::Active);
        mock.add_address("10.0.0.4", false, Some(&srv));
        mock.add_attached_volume("vol-crit", 15, false, &srv);
        let backend: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let mut node = record("c1-master-1", &srv, "10.0.0.4");
        node.disks = vec![DiskRecord {
            id: "vol-crit".to_string(),
            size: 15,
            disk_type: "storage".to_string(),
            bootable: false,
            device: Some("/dev/vdb".to_string()),
            mount_point: Some("/mnt/disks/vdb".to_string()),
            owner: None,
            group: None,
            mode: None,
            critical: true,
            created: None,
            updated: None,
        }];
        seed_state(&backend, vec![node]).await;

        let report = reconciler(&mock, &backend, false)
            .reconcile("c1", &masters_config(&[1]), RunOptions::default(), Some("pw"), None)
            .await
            .unwrap();

        let disk = report.nodes[0]
            .disks
            .iter()
            .find(|d| d.id == "vol-crit")
            .expect("critical disk must stay recorded");
        assert!(disk.critical, "reconciliation must never clear critical");
    }
}
