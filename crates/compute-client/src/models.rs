//! Response models for the compute API
//!
//! Every endpoint wraps its payload in a `result` envelope; list endpoints
//! additionally carry a `count`. The envelopes are deserialization-only.

use serde::{Deserialize, Serialize};

/// Single-object response envelope
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    /// Wrapped payload
    pub result: T,
}

/// List response envelope
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ListEnvelope<T> {
    /// Total number of objects
    #[serde(default)]
    pub count: u32,
    /// Wrapped payload
    #[serde(default)]
    pub result: Vec<T>,
}

/// Lifecycle status of a server as reported by the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerStatus {
    /// Server is provisioned and active
    Active,
    /// Server is powered on and running
    Running,
    /// Server is still being built
    Building,
    /// Server is stopped
    Stopped,
    /// Server entered a terminal error state
    Error,
    /// Any status this client does not model
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "ACTIVE",
            Self::Running => "RUNNING",
            Self::Building => "BUILDING",
            Self::Stopped => "STOPPED",
            Self::Error => "ERROR",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Lifecycle status of a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolumeStatus {
    /// Detached and free to attach
    Available,
    /// Attached to a server
    InUse,
    /// Volume entered an error state
    Error,
    /// Any status this client does not model
    #[serde(other)]
    Unknown,
}

/// Entity an address is bound to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachedTo {
    /// Entity kind, e.g. "server"
    pub entity: String,
    /// Entity ID
    pub id: String,
}

/// One IP address in the project inventory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressDetail {
    /// Address ID
    pub id: String,
    /// Address status
    #[serde(default)]
    pub status: Option<String>,
    /// Literal IP address
    pub address: String,
    /// Whether the address is externally routable
    #[serde(default)]
    pub external: bool,
    /// Whether this is the primary address of its binding
    #[serde(default)]
    pub is_primary: bool,
    /// Binding, if the address is attached to anything
    #[serde(default)]
    pub attached_to: Option<AttachedTo>,
    /// Server the address is bound to, if any
    #[serde(default)]
    pub server_id: Option<String>,
    /// Load balancer the address is bound to, if any
    #[serde(default)]
    pub loadbalancer_id: Option<String>,
}

impl AddressDetail {
    /// True when the address is bound to neither a server nor a load balancer.
    pub fn is_unbound(&self) -> bool {
        self.attached_to.is_none()
            && self.server_id.as_deref().unwrap_or("").is_empty()
            && self.loadbalancer_id.as_deref().unwrap_or("").is_empty()
    }
}

/// Server as it appears in the project list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSummary {
    /// Server ID
    pub id: String,
    /// Server name
    pub name: String,
}

/// Reference to a storage attached to a server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageRef {
    /// Volume ID
    pub id: String,
}

/// Full server detail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerDetail {
    /// Server ID
    pub id: String,
    /// Current lifecycle status
    pub status: ServerStatus,
    /// Server name
    pub name: String,
    /// Creation timestamp as reported by the provider
    #[serde(default)]
    pub created: Option<String>,
    /// IDs of addresses bound to the server
    #[serde(default)]
    pub addresses: Vec<String>,
    /// Attached storages
    #[serde(default)]
    pub storages: Vec<StorageRef>,
}

/// Attachment binding of a volume to a server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeAttachment {
    /// Server ID
    pub id: String,
    /// Device path on the server, e.g. `/dev/vdb`
    #[serde(default)]
    pub device: String,
}

/// One volume in the project inventory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    /// Volume ID
    pub id: String,
    /// Volume name
    #[serde(default)]
    pub name: String,
    /// Size in GB
    pub size: u32,
    /// Lifecycle status
    pub status: VolumeStatus,
    /// Storage backend type
    #[serde(rename = "storage_type", default)]
    pub storage_type: String,
    /// Whether the volume is a boot volume
    #[serde(default)]
    pub bootable: bool,
    /// Creation timestamp (provider uses a `created_in` key here)
    #[serde(rename = "created_in", default)]
    pub created: Option<String>,
    /// Attachment, when the volume is in use
    #[serde(default)]
    pub attached_to_server: Option<VolumeAttachment>,
}

/// Newly created resource, as returned by create endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedResource {
    /// ID of the created resource
    #[serde(default)]
    pub id: String,
}

/// Attach-volume response payload
#[derive(Debug, Clone, Deserialize)]
pub struct AttachResult {
    /// Resulting attachment
    pub attached_to_server: VolumeAttachment,
}

/// One load balancer in the project list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancerSummary {
    /// Load balancer ID
    pub id: String,
    /// Load balancer name
    pub name: String,
}

/// Terminal result of polling a server's status.
///
/// `reached` is false when the server entered ERROR or the attempt budget
/// ran out; the resource IDs seen last are carried either way so a caller
/// can clean up a half-built server.
#[derive(Debug, Clone, Default)]
pub struct WaitOutcome {
    /// Whether one of the target statuses was reached
    pub reached: bool,
    /// Last status observed, if any poll succeeded
    pub last_status: Option<ServerStatus>,
    /// Address IDs bound to the server at the last successful poll
    pub address_ids: Vec<String>,
    /// Volume IDs attached to the server at the last successful poll
    pub volume_ids: Vec<String>,
}
