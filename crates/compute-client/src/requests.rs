//! Typed request payloads for the compute API
//!
//! Every mutating endpoint takes an explicit request struct, validated at
//! construction, so payload shapes are compiler-checked instead of being
//! assembled from loose key-value maps.

use crate::error::ComputeError;
use serde::Serialize;

const DEFAULT_BANDWIDTH_MBPS: u32 = 1024;

/// Compute flavor for a new server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlavorSpec {
    /// RAM in GB
    pub ram: u32,
    /// Number of virtual CPUs
    pub vcpus: u32,
    /// CPU sharing class
    pub cpu_type: String,
}

impl FlavorSpec {
    /// Shared-CPU flavor, the only class the provisioner requests.
    pub fn shared(ram: u32, vcpus: u32) -> Self {
        Self {
            ram,
            vcpus,
            cpu_type: "SHARED".to_string(),
        }
    }
}

/// One storage to provision together with a server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageRequest {
    /// Whether this is the boot volume
    pub bootable: bool,
    /// Storage backend type
    pub storage_type: String,
    /// Size in GB
    pub size: u32,
}

impl StorageRequest {
    /// Boot volume of the given size.
    pub fn boot(size: u32, storage_type: &str) -> Self {
        Self {
            bootable: true,
            storage_type: non_empty_type(storage_type),
            size,
        }
    }

    /// Data volume of the given size.
    pub fn data(size: u32, storage_type: &str) -> Self {
        Self {
            bootable: false,
            storage_type: non_empty_type(storage_type),
            size,
        }
    }
}

fn non_empty_type(storage_type: &str) -> String {
    if storage_type.is_empty() {
        "storage".to_string()
    } else {
        storage_type.to_string()
    }
}

/// Address assignment for a new server: reuse an existing project address
/// or have the provider allocate a fresh one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AddressRequest {
    /// Bind an already-allocated address by ID
    Existing {
        /// Project address ID
        address_id: String,
    },
    /// Allocate a new address
    New {
        /// DDoS protection flag
        ddos_protection: bool,
        /// Whether the address must be externally routable
        external: bool,
        /// IP version
        version: u8,
        /// Bandwidth cap in Mbps
        bandwidth_max_mbps: u32,
    },
}

impl AddressRequest {
    /// Reuse an existing project address.
    pub fn existing(address_id: impl Into<String>) -> Self {
        Self::Existing {
            address_id: address_id.into(),
        }
    }

    /// Allocate a fresh external address.
    pub fn external() -> Self {
        Self::New {
            ddos_protection: false,
            external: true,
            version: 4,
            bandwidth_max_mbps: DEFAULT_BANDWIDTH_MBPS,
        }
    }

    /// Allocate a fresh internal address.
    pub fn internal() -> Self {
        Self::New {
            ddos_protection: false,
            external: false,
            version: 4,
            bandwidth_max_mbps: DEFAULT_BANDWIDTH_MBPS,
        }
    }
}

/// Create-server payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateServerRequest {
    /// Server name
    pub name: String,
    /// Compute flavor
    pub flavor: FlavorSpec,
    /// Storages to provision with the server
    pub storages: Vec<StorageRequest>,
    /// Addresses to bind
    pub addresses: Vec<AddressRequest>,
    /// Image ID to boot from
    pub image: String,
    /// SSH keypair IDs to install
    pub keypairs: Vec<String>,
}

impl CreateServerRequest {
    /// Build a create-server payload, rejecting shapes the API would refuse.
    pub fn new(
        name: impl Into<String>,
        flavor: FlavorSpec,
        storages: Vec<StorageRequest>,
        addresses: Vec<AddressRequest>,
        image: impl Into<String>,
        keypairs: Vec<String>,
    ) -> Result<Self, ComputeError> {
        let name = name.into();
        let image = image.into();
        if name.is_empty() {
            return Err(ComputeError::InvalidRequest(
                "server name must not be empty".to_string(),
            ));
        }
        if image.is_empty() {
            return Err(ComputeError::InvalidRequest(
                "image ID must not be empty".to_string(),
            ));
        }
        if !storages.iter().any(|s| s.bootable) {
            return Err(ComputeError::InvalidRequest(format!(
                "server '{}' has no bootable storage",
                name
            )));
        }
        if addresses.is_empty() {
            return Err(ComputeError::InvalidRequest(format!(
                "server '{}' has no address assignment",
                name
            )));
        }
        Ok(Self {
            name,
            flavor,
            storages,
            addresses,
            image,
            keypairs,
        })
    }
}

/// Delete-server payload with cascading resource deletion
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeleteServerRequest {
    /// Remove fstab entries for deleted volumes
    pub clear_fstab: bool,
    /// Volume IDs to delete together with the server
    pub delete_volumes: Vec<String>,
    /// Address IDs to delete together with the server
    pub delete_addresses: Vec<String>,
}

/// Delete-volume payload
#[derive(Debug, Clone, Serialize)]
pub struct DeleteVolumeRequest {
    /// Remove fstab entries referencing the volume
    pub clear_fstab: bool,
    /// Force deletion even when attached
    pub force: bool,
}

impl Default for DeleteVolumeRequest {
    fn default() -> Self {
        Self {
            clear_fstab: true,
            force: false,
        }
    }
}

/// Attach-volume payload
#[derive(Debug, Clone, Serialize)]
pub struct AttachVolumeRequest {
    /// Server to attach the volume to
    pub server_id: String,
}

/// Set-password payload
#[derive(Debug, Clone, Serialize)]
pub struct SetPasswordRequest {
    /// New root password
    pub password: String,
}

/// One forwarding rule of a load balancer
#[derive(Debug, Clone, Serialize)]
pub struct LbRule {
    /// Externally exposed port
    #[serde(rename = "external_protocol_port")]
    pub external_port: u16,
    /// Backend port
    #[serde(rename = "internal_protocol_port")]
    pub internal_port: u16,
    /// Backend address ID
    pub address_id: String,
}

/// Health monitor settings of a load balancer
#[derive(Debug, Clone, Serialize)]
pub struct LbHealthMonitor {
    /// Probe interval in seconds
    pub delay: u32,
    /// Probe failures before a backend is marked down
    pub max_retries: u32,
    /// Probe timeout in seconds
    pub timeout: u32,
    /// Probe type, e.g. "TCP"
    #[serde(rename = "type")]
    pub monitor_type: String,
}

/// Frontend address settings of a load balancer
#[derive(Debug, Clone, Default, Serialize)]
pub struct LbAddress {
    /// DDoS protection for a freshly allocated address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ddos_protection: Option<bool>,
    /// Existing address to reuse
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Create-load-balancer payload
#[derive(Debug, Clone, Serialize)]
pub struct CreateLoadBalancerRequest {
    /// Balancing algorithm, e.g. "ROUND_ROBIN"
    pub algorithm: String,
    /// Frontend address settings
    pub address: LbAddress,
    /// Health monitor settings
    #[serde(rename = "healthmonitor")]
    pub health_monitor: LbHealthMonitor,
    /// Load balancer name
    pub name: String,
    /// Sticky-session flag
    pub session_persistence: bool,
    /// Forwarding rules
    pub rules: Vec<LbRule>,
}
