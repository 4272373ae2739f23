//! Persisted cluster-state schema
//!
//! Field order and omit-when-empty behavior match the stored JSON layout;
//! label maps are ordered so serialization is stable across runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Schema version written into every saved state object.
pub const STATE_VERSION: &str = "1.9";

fn is_zero_port(port: &u16) -> bool {
    *port == 0
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

/// Role a node plays in the cluster.
///
/// Inventory group membership is derived purely from this field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    /// Control-plane and etcd member
    #[serde(rename = "master")]
    Master,
    /// Workload node
    #[serde(rename = "worker")]
    Worker,
    /// SSH jump host fronting the cluster
    #[serde(rename = "BASTION")]
    Bastion,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Master => "master",
            Self::Worker => "worker",
            Self::Bastion => "BASTION",
        };
        f.write_str(s)
    }
}

/// One disk as observed in the cloud and recorded in state.
///
/// Unlike a configured disk spec, a record carries the cloud volume ID, the
/// resolved device path and the `critical` protection flag. `critical` is
/// set only by an explicit operator action and is never cleared by
/// reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskRecord {
    /// Cloud volume ID
    pub id: String,
    /// Size in GB
    pub size: u32,
    /// Storage backend type
    #[serde(rename = "type")]
    pub disk_type: String,
    /// Whether this is the boot volume
    pub bootable: bool,
    /// Device path on the node, e.g. `/dev/vdb`; empty while detached
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// Mount point on the node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<String>,
    /// Mount owner (UID)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Mount group (GID)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Mount permissions, e.g. "0750"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Deletion protection; operator-set, never cleared by reconciliation
    #[serde(default, skip_serializing_if = "is_false")]
    pub critical: bool,
    /// Volume creation timestamp
    #[serde(rename = "created_at", default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    /// Last time this record was refreshed
    #[serde(rename = "updated_at", default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
}

/// One provisioned node.
///
/// `name` is derived as `{cluster}-{group-prefix}-{slot}` and is the join
/// key across configuration, persisted state and cloud inventory; it is
/// unique within a `ClusterState`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Node name, the cross-source join key
    pub name: String,
    /// Node role
    pub role: NodeRole,
    /// Cloud server ID
    pub id: String,
    /// Current IP address
    pub ip: String,
    /// SSH port; 0 means the default 22
    #[serde(default, skip_serializing_if = "is_zero_port")]
    pub ssh_port: u16,
    /// External address binding ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_id: Option<String>,
    /// Kubernetes node labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Kubernetes node taints
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<String>,
    /// Disks attached to (or remembered for) the node
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<DiskRecord>,
    /// Server creation timestamp
    #[serde(rename = "created_at", default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    /// Last time this record was refreshed
    #[serde(rename = "updated_at", default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
}

/// Persisted snapshot of one cluster.
///
/// Read at the start of every reconciliation, fully rewritten at the end.
/// There is no lock or version check between concurrent runs; the last
/// writer wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterState {
    /// Schema version tag
    pub version: String,
    /// Stamp of the last full rewrite
    pub last_updated: DateTime<Utc>,
    /// Default SSH user for the cluster
    pub ssh_user: String,
    /// All nodes, ordered by name
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
}

impl ClusterState {
    /// Fresh empty state for a cluster.
    pub fn new(ssh_user: impl Into<String>) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            last_updated: Utc::now(),
            ssh_user: ssh_user.into(),
            nodes: Vec::new(),
        }
    }

    /// Look up a node by name.
    pub fn find_node(&self, name: &str) -> Option<&NodeRecord> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// IDs of all disks marked critical, across every node.
    ///
    /// Built once per run and consulted before any volume delete call.
    pub fn critical_disk_ids(&self) -> HashSet<String> {
        self.nodes
            .iter()
            .flat_map(|n| n.disks.iter())
            .filter(|d| d.critical)
            .map(|d| d.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATE_FIXTURE: &str = r#"{
  "version": "1.9",
  "last_updated": "2026-03-01T12:00:00Z",
  "ssh_user": "root",
  "nodes": [
    {
      "name": "prod-master-1",
      "role": "master",
      "id": "srv-1",
      "ip": "10.0.0.4",
      "disks": [
        {
          "id": "vol-1",
          "size": 20,
          "type": "storage",
          "bootable": true,
          "device": "/dev/vda",
          "created_at": "2026-01-01T00:00:00Z"
        }
      ],
      "created_at": "2026-01-01T00:00:00Z",
      "updated_at": "2026-03-01T12:00:00Z"
    },
    {
      "name": "prod-pg-1",
      "role": "worker",
      "id": "srv-2",
      "ip": "10.0.0.5",
      "ssh_port": 2205,
      "address_id": "addr-9",
      "labels": {
        "pginstance": "num1",
        "pgnode": "yes"
      },
      "taints": [
        "pgtaint=yes:NoSchedule"
      ],
      "disks": [
        {
          "id": "vol-2",
          "size": 15,
          "type": "local",
          "bootable": false,
          "device": "/dev/vdb",
          "mount_point": "/mnt/disks/vdb",
          "owner": "1000",
          "group": "1000",
          "mode": "0750",
          "critical": true
        }
      ]
    }
  ]
}"#;

    #[test]
    fn test_round_trip_is_byte_equivalent() {
        let state: ClusterState = serde_json::from_str(STATE_FIXTURE).unwrap();
        let rendered = serde_json::to_string_pretty(&state).unwrap();
        assert_eq!(rendered, STATE_FIXTURE);
    }

    #[test]
    fn test_zero_and_empty_fields_are_omitted() {
        let state: ClusterState = serde_json::from_str(STATE_FIXTURE).unwrap();
        let rendered = serde_json::to_string_pretty(&state).unwrap();
        // prod-master-1 has no ssh_port, labels or taints; none may appear
        // in its serialized block.
        let master_block = &rendered[..rendered.find("prod-pg-1").unwrap()];
        assert!(!master_block.contains("ssh_port"));
        assert!(!master_block.contains("labels"));
        assert!(!master_block.contains("taints"));
        assert!(!master_block.contains("critical"));
    }

    #[test]
    fn test_critical_disk_ids() {
        let state: ClusterState = serde_json::from_str(STATE_FIXTURE).unwrap();
        let critical = state.critical_disk_ids();
        assert_eq!(critical.len(), 1);
        assert!(critical.contains("vol-2"));
    }

    #[test]
    fn test_find_node() {
        let state: ClusterState = serde_json::from_str(STATE_FIXTURE).unwrap();
        assert!(state.find_node("prod-master-1").is_some());
        assert!(state.find_node("prod-master-9").is_none());
    }

    #[test]
    fn test_role_wire_names() {
        assert_eq!(
            serde_json::to_value(NodeRole::Bastion).unwrap(),
            serde_json::json!("BASTION")
        );
        assert_eq!(
            serde_json::to_value(NodeRole::Master).unwrap(),
            serde_json::json!("master")
        );
    }
}
