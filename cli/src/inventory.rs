//! Ansible inventory artifact.
//!
//! Renders the converged node list into the inventory document consumed by
//! the deployment tooling. Group membership is derived purely from each
//! node's role; `data_disks` lists every non-bootable disk with a resolved
//! device path.

use crate::error::FleetError;
use fleet_state::{NodeRecord, NodeRole};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Serialize)]
struct Inventory {
    all: AllGroup,
}

#[derive(Debug, Serialize)]
struct AllGroup {
    hosts: BTreeMap<String, HostVars>,
    children: Children,
}

#[derive(Debug, Serialize)]
struct HostVars {
    ansible_host: String,
    ip: String,
    ansible_user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    ansible_port: Option<u16>,
    kube_override_hostname: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    node_labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    node_taints: Vec<String>,
    data_disks: Vec<DataDisk>,
}

#[derive(Debug, Serialize)]
struct DataDisk {
    device: String,
    mount: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<String>,
}

#[derive(Debug, Serialize)]
struct Children {
    kube_control_plane: HostsGroup,
    kube_node: HostsGroup,
    etcd: HostsGroup,
    k8s_cluster: K8sClusterGroup,
    calico_rr: HostsGroup,
    bastion: HostsGroup,
}

#[derive(Debug, Default, Serialize)]
struct HostsGroup {
    hosts: BTreeMap<String, ()>,
}

#[derive(Debug, Serialize)]
struct K8sClusterGroup {
    vars: KubeClusterVars,
    children: BTreeMap<String, ()>,
}

#[derive(Debug, Serialize)]
struct KubeClusterVars {
    download_run_once: bool,
    kube_network_plugin: String,
    enable_network_policy: bool,
    calico_datastore: String,
    kube_pods_subnet: String,
    kube_service_addresses: String,
    metrics_server_enabled: bool,
    local_volume_provisioner_enabled: bool,
}

impl Default for KubeClusterVars {
    fn default() -> Self {
        Self {
            download_run_once: true,
            kube_network_plugin: "calico".to_string(),
            enable_network_policy: true,
            calico_datastore: "kdd".to_string(),
            kube_pods_subnet: "10.42.0.0/16".to_string(),
            kube_service_addresses: "10.43.0.0/16".to_string(),
            metrics_server_enabled: true,
            local_volume_provisioner_enabled: true,
        }
    }
}

/// Render the inventory document for the given nodes.
pub fn render_inventory(ssh_user: &str, nodes: &[NodeRecord]) -> Result<String, FleetError> {
    let mut hosts = BTreeMap::new();
    let mut control_plane = HostsGroup::default();
    let mut workers = HostsGroup::default();
    let mut etcd = HostsGroup::default();
    let mut bastion = HostsGroup::default();

    for node in nodes {
        let data_disks = node
            .disks
            .iter()
            .filter(|d| !d.bootable)
            .filter_map(|d| {
                let device = d.device.clone()?;
                Some(DataDisk {
                    device,
                    mount: d.mount_point.clone().unwrap_or_default(),
                    owner: d.owner.clone(),
                    group: d.group.clone(),
                    mode: d.mode.clone(),
                })
            })
            .collect();

        hosts.insert(
            node.name.clone(),
            HostVars {
                ansible_host: node.ip.clone(),
                ip: node.ip.clone(),
                ansible_user: ssh_user.to_string(),
                ansible_port: (node.ssh_port != 0).then_some(node.ssh_port),
                kube_override_hostname: node.name.clone(),
                node_labels: node.labels.clone(),
                node_taints: node.taints.clone(),
                data_disks,
            },
        );

        match node.role {
            NodeRole::Master => {
                control_plane.hosts.insert(node.name.clone(), ());
                etcd.hosts.insert(node.name.clone(), ());
            }
            NodeRole::Worker => {
                workers.hosts.insert(node.name.clone(), ());
            }
            NodeRole::Bastion => {
                bastion.hosts.insert(node.name.clone(), ());
            }
        }
    }

    let inventory = Inventory {
        all: AllGroup {
            hosts,
            children: Children {
                kube_control_plane: control_plane,
                kube_node: workers,
                etcd,
                k8s_cluster: K8sClusterGroup {
                    vars: KubeClusterVars::default(),
                    children: BTreeMap::from([
                        ("kube_control_plane".to_string(), ()),
                        ("kube_node".to_string(), ()),
                    ]),
                },
                calico_rr: HostsGroup::default(),
                bastion,
            },
        },
    };
    Ok(serde_yaml::to_string(&inventory)?)
}

/// Write the inventory document to a file.
pub fn write_inventory(path: &Path, ssh_user: &str, nodes: &[NodeRecord]) -> Result<(), FleetError> {
    let rendered = render_inventory(ssh_user, nodes)?;
    std::fs::write(path, rendered)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_state::DiskRecord;

    fn node(name: &str, role: NodeRole) -> NodeRecord {
        NodeRecord {
            name: name.to_string(),
            role,
            id: format!("srv-{}", name),
            ip: "10.0.0.4".to_string(),
            ssh_port: 0,
            address_id: None,
            labels: BTreeMap::new(),
            taints: Vec::new(),
            disks: Vec::new(),
            created: None,
            updated: None,
        }
    }

    #[test]
    fn test_group_membership_follows_role() {
        let nodes = vec![
            node("c1-master-1", NodeRole::Master),
            node("c1-web-1", NodeRole::Worker),
            node("c1-bastion-1", NodeRole::Bastion),
        ];
        let rendered = render_inventory("root", &nodes).unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&rendered).unwrap();
        let children = &parsed["all"]["children"];
        assert!(children["kube_control_plane"]["hosts"].get("c1-master-1").is_some());
        assert!(children["kube_control_plane"]["hosts"].get("c1-web-1").is_none());
        assert!(children["kube_node"]["hosts"].get("c1-web-1").is_some());
        assert!(children["etcd"]["hosts"].get("c1-master-1").is_some());
        assert!(children["bastion"]["hosts"].get("c1-bastion-1").is_some());
    }

    #[test]
    fn test_data_disks_require_device_and_skip_boot() {
        let mut worker = node("c1-web-1", NodeRole::Worker);
        worker.disks = vec![
            DiskRecord {
                id: "vol-boot".to_string(),
                size: 20,
                disk_type: "storage".to_string(),
                bootable: true,
                device: Some("/dev/vda".to_string()),
                mount_point: None,
                owner: None,
                group: None,
                mode: None,
                critical: false,
                created: None,
                updated: None,
            },
            DiskRecord {
                id: "vol-data".to_string(),
                size: 15,
                disk_type: "local".to_string(),
                bootable: false,
                device: Some("/dev/vdb".to_string()),
                mount_point: Some("/mnt/disks/vdb".to_string()),
                owner: Some("1000".to_string()),
                group: None,
                mode: Some("0750".to_string()),
                critical: false,
                created: None,
                updated: None,
            },
            DiskRecord {
                id: "vol-detached".to_string(),
                size: 15,
                disk_type: "local".to_string(),
                bootable: false,
                device: None,
                mount_point: Some("/mnt/disks/old".to_string()),
                owner: None,
                group: None,
                mode: None,
                critical: true,
                created: None,
                updated: None,
            },
        ];
        let rendered = render_inventory("root", &[worker]).unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&rendered).unwrap();
        let disks = parsed["all"]["hosts"]["c1-web-1"]["data_disks"]
            .as_sequence()
            .unwrap();
        assert_eq!(disks.len(), 1);
        assert_eq!(disks[0]["device"].as_str(), Some("/dev/vdb"));
        assert_eq!(disks[0]["mount"].as_str(), Some("/mnt/disks/vdb"));
        assert_eq!(disks[0]["owner"].as_str(), Some("1000"));
        assert!(disks[0].get("group").is_none());
    }

    #[test]
    fn test_ssh_port_rendered_only_when_set() {
        let mut fronted = node("c1-web-1", NodeRole::Worker);
        fronted.ssh_port = 2205;
        let plain = node("c1-web-2", NodeRole::Worker);
        let rendered = render_inventory("root", &[fronted, plain]).unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&rendered).unwrap();
        assert_eq!(
            parsed["all"]["hosts"]["c1-web-1"]["ansible_port"].as_u64(),
            Some(2205)
        );
        assert!(parsed["all"]["hosts"]["c1-web-2"].get("ansible_port").is_none());
    }
}
