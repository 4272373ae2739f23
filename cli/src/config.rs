//! Declarative node-group configuration.
//!
//! A `FleetConfig` is loaded once per run from a YAML file (or the built-in
//! default) and is immutable afterwards. Instance slots are a sparse map of
//! slot index to per-instance settings, so disabling slot 2 of 3 does not
//! renumber the remaining nodes.

use crate::error::FleetError;
use fleet_state::NodeRole;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::info;

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_disk_type() -> String {
    "storage".to_string()
}

/// Top-level fleet configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    /// SSH user recorded in state and inventory
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,
    /// Image ID new servers boot from
    #[serde(default)]
    pub image: String,
    /// SSH keypair IDs installed on new servers
    #[serde(default)]
    pub keypairs: Vec<String>,
    /// Specific frontend IP for the cluster load balancer
    #[serde(default)]
    pub load_balancer_ip: Option<String>,
    /// Node groups making up the fleet
    #[serde(default)]
    pub groups: Vec<NodeGroup>,
}

/// Per-instance settings within a group.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstanceConfig {
    /// Whether this slot is provisioned
    #[serde(default)]
    pub enabled: bool,
    /// Extra labels merged over the group labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Compute flavor of a group.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Flavor {
    /// RAM in GB
    pub ram: u32,
    /// Number of virtual CPUs
    pub vcpus: u32,
}

/// Declared disk shape; carries no cloud identity.
#[derive(Debug, Clone, Deserialize)]
pub struct DiskSpec {
    /// Size in GB
    pub size: u32,
    /// Whether this is the boot volume
    #[serde(default)]
    pub bootable: bool,
    /// Storage backend type
    #[serde(rename = "type", default = "default_disk_type")]
    pub disk_type: String,
    /// Mount point for a data disk
    #[serde(default)]
    pub mount_point: Option<String>,
    /// Mount owner (UID)
    #[serde(default)]
    pub owner: Option<String>,
    /// Mount group (GID)
    #[serde(default)]
    pub group: Option<String>,
    /// Mount permissions, e.g. "0750"
    #[serde(default)]
    pub mode: Option<String>,
}

/// Load-balancer forwarding rule declared on a group.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LbRuleConfig {
    /// Externally exposed port
    pub ext_port: u16,
    /// Backend port
    pub int_port: u16,
}

/// One node group: a name prefix, a sparse slot map and the shape every
/// node in the group shares.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeGroup {
    /// Name prefix; node names are `{cluster}-{prefix}-{slot}`
    pub name_prefix: String,
    /// Role of every node in the group
    pub role: NodeRole,
    /// Sparse slot index -> instance settings
    #[serde(default)]
    pub instances: BTreeMap<u32, InstanceConfig>,
    /// Compute flavor
    pub flavor: Flavor,
    /// Ordered disk declarations; first bootable disk is the boot volume
    #[serde(default)]
    pub disks: Vec<DiskSpec>,
    /// Whether nodes get an external address
    #[serde(default)]
    pub external_ip: bool,
    /// Specific external address ID to bind
    #[serde(default)]
    pub static_ip: Option<String>,
    /// Labels applied to every node in the group
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Taints applied to every node in the group
    #[serde(default)]
    pub taints: Vec<String>,
    /// Load-balancer rules fronting this group
    #[serde(default)]
    pub lb_rules: Vec<LbRuleConfig>,
}

impl NodeGroup {
    /// Deterministic node name for a slot; the join key across
    /// configuration, persisted state and cloud inventory.
    pub fn node_name(&self, cluster: &str, slot: u32) -> String {
        format!("{}-{}-{}", cluster, self.name_prefix, slot)
    }

    /// Group labels with the instance labels merged over them.
    pub fn merged_labels(&self, instance: &InstanceConfig) -> BTreeMap<String, String> {
        let mut labels = self.labels.clone();
        labels.extend(
            instance
                .labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        labels
    }
}

impl FleetConfig {
    /// Load from a YAML file, or fall back to the built-in default.
    pub fn load(path: Option<&Path>) -> Result<Self, FleetError> {
        let config = match path {
            Some(path) => {
                info!("reading configuration from {}", path.display());
                let data = std::fs::read_to_string(path)?;
                serde_yaml::from_str(&data)?
            }
            None => Self::default_config(),
        };
        config.validate()?;
        Ok(config)
    }

    /// All desired node names for a cluster, in configuration order.
    pub fn desired_names(&self, cluster: &str) -> Vec<String> {
        self.groups
            .iter()
            .flat_map(|group| {
                group
                    .instances
                    .iter()
                    .filter(|(_, instance)| instance.enabled)
                    .map(|(slot, _)| group.node_name(cluster, *slot))
            })
            .collect()
    }

    /// Reject configurations the reconciler cannot act on.
    pub fn validate(&self) -> Result<(), FleetError> {
        let mut prefixes = HashSet::new();
        for group in &self.groups {
            if group.name_prefix.is_empty() {
                return Err(FleetError::InvalidConfig(
                    "node group with empty name_prefix".to_string(),
                ));
            }
            if !prefixes.insert(group.name_prefix.as_str()) {
                return Err(FleetError::InvalidConfig(format!(
                    "duplicate group prefix '{}'",
                    group.name_prefix
                )));
            }
            let has_enabled = group.instances.values().any(|i| i.enabled);
            if has_enabled && !group.disks.iter().any(|d| d.bootable) {
                return Err(FleetError::InvalidConfig(format!(
                    "group '{}' has enabled instances but no bootable disk",
                    group.name_prefix
                )));
            }
        }
        Ok(())
    }

    /// Built-in configuration used when no file is given.
    fn default_config() -> Self {
        let boot = DiskSpec {
            size: 20,
            bootable: true,
            disk_type: "storage".to_string(),
            mount_point: None,
            owner: None,
            group: None,
            mode: None,
        };
        Self {
            ssh_user: default_ssh_user(),
            image: String::new(),
            keypairs: Vec::new(),
            load_balancer_ip: None,
            groups: vec![
                NodeGroup {
                    name_prefix: "master".to_string(),
                    role: NodeRole::Master,
                    instances: (1..=3)
                        .map(|slot| {
                            (
                                slot,
                                InstanceConfig {
                                    enabled: true,
                                    labels: BTreeMap::new(),
                                },
                            )
                        })
                        .collect(),
                    flavor: Flavor { ram: 4, vcpus: 2 },
                    disks: vec![boot.clone()],
                    external_ip: false,
                    static_ip: None,
                    labels: BTreeMap::new(),
                    taints: Vec::new(),
                    lb_rules: Vec::new(),
                },
                NodeGroup {
                    name_prefix: "postgres".to_string(),
                    role: NodeRole::Worker,
                    instances: (1..=3)
                        .map(|slot| {
                            (
                                slot,
                                InstanceConfig {
                                    enabled: true,
                                    labels: BTreeMap::from([(
                                        "postgresinstance".to_string(),
                                        format!("num{}", slot),
                                    )]),
                                },
                            )
                        })
                        .collect(),
                    flavor: Flavor { ram: 4, vcpus: 2 },
                    disks: vec![
                        boot.clone(),
                        DiskSpec {
                            size: 15,
                            bootable: false,
                            disk_type: "local".to_string(),
                            mount_point: None,
                            owner: Some("1000".to_string()),
                            group: Some("1000".to_string()),
                            mode: Some("0750".to_string()),
                        },
                    ],
                    external_ip: false,
                    static_ip: None,
                    labels: BTreeMap::from([("postgresnode".to_string(), "yes".to_string())]),
                    taints: vec!["postgrestaint=yes:NoSchedule".to_string()],
                    lb_rules: Vec::new(),
                },
                NodeGroup {
                    name_prefix: "bastion".to_string(),
                    role: NodeRole::Bastion,
                    instances: BTreeMap::from([(
                        1,
                        InstanceConfig {
                            enabled: true,
                            labels: BTreeMap::new(),
                        },
                    )]),
                    flavor: Flavor { ram: 2, vcpus: 2 },
                    disks: vec![boot],
                    external_ip: false,
                    static_ip: None,
                    labels: BTreeMap::new(),
                    taints: Vec::new(),
                    lb_rules: vec![LbRuleConfig {
                        ext_port: 2205,
                        int_port: 22,
                    }],
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = FleetConfig::default_config();
        config.validate().unwrap();
        assert_eq!(config.ssh_user, "root");
        assert!(!config.groups.is_empty());
    }

    #[test]
    fn test_desired_names_are_unique_and_ordered() {
        let config = FleetConfig::default_config();
        let names = config.desired_names("c1");
        let unique: HashSet<&String> = names.iter().collect();
        assert_eq!(unique.len(), names.len(), "names must be unique");
        assert!(names.contains(&"c1-master-1".to_string()));
        assert!(names.contains(&"c1-bastion-1".to_string()));
    }

    #[test]
    fn test_disabled_slots_do_not_produce_names() {
        let yaml = r#"
ssh_user: root
groups:
  - name_prefix: web
    role: worker
    flavor: { ram: 2, vcpus: 2 }
    disks:
      - { size: 20, bootable: true }
    instances:
      1: { enabled: true }
      2: { enabled: false }
      5: { enabled: true }
"#;
        let config: FleetConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
        assert_eq!(
            config.desired_names("c1"),
            vec!["c1-web-1".to_string(), "c1-web-5".to_string()]
        );
    }

    #[test]
    fn test_duplicate_prefixes_rejected() {
        let yaml = r#"
groups:
  - name_prefix: web
    role: worker
    flavor: { ram: 2, vcpus: 2 }
    disks: [{ size: 20, bootable: true }]
  - name_prefix: web
    role: worker
    flavor: { ram: 2, vcpus: 2 }
    disks: [{ size: 20, bootable: true }]
"#;
        let config: FleetConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_enabled_group_without_boot_disk_rejected() {
        let yaml = r#"
groups:
  - name_prefix: web
    role: worker
    flavor: { ram: 2, vcpus: 2 }
    disks: [{ size: 20 }]
    instances:
      1: { enabled: true }
"#;
        let config: FleetConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_instance_labels_override_group_labels() {
        let group = NodeGroup {
            name_prefix: "web".to_string(),
            role: NodeRole::Worker,
            instances: BTreeMap::new(),
            flavor: Flavor { ram: 2, vcpus: 2 },
            disks: Vec::new(),
            external_ip: false,
            static_ip: None,
            labels: BTreeMap::from([
                ("tier".to_string(), "web".to_string()),
                ("zone".to_string(), "a".to_string()),
            ]),
            taints: Vec::new(),
            lb_rules: Vec::new(),
        };
        let instance = InstanceConfig {
            enabled: true,
            labels: BTreeMap::from([("zone".to_string(), "b".to_string())]),
        };
        let merged = group.merged_labels(&instance);
        assert_eq!(merged.get("tier").map(String::as_str), Some("web"));
        assert_eq!(merged.get("zone").map(String::as_str), Some("b"));
    }
}
