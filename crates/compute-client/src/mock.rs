//! Mock ComputeClient for unit testing
//!
//! This module provides a mock implementation of ComputeClientTrait that can
//! be used in unit tests without requiring a live cloud project. The mock
//! stores inventory in memory, supports per-server failure injection for
//! create and status-wait calls, and records an in-flight high-water mark so
//! tests can assert concurrency bounds.

use crate::error::ComputeError;
use crate::models::*;
use crate::requests::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const MOCK_CREATED_AT: &str = "2026-01-01T00:00:00Z";

#[derive(Debug, Clone)]
struct MockServer {
    id: String,
    name: String,
    status: ServerStatus,
    created: String,
    address_ids: Vec<String>,
    volume_ids: Vec<String>,
}

/// Mock ComputeClient for testing
///
/// Inventory maps are ordered (`BTreeMap`) so listings are deterministic
/// across runs regardless of insertion order.
#[derive(Clone, Default)]
pub struct MockComputeClient {
    servers: Arc<Mutex<BTreeMap<String, MockServer>>>,
    volumes: Arc<Mutex<BTreeMap<String, Volume>>>,
    addresses: Arc<Mutex<BTreeMap<String, AddressDetail>>>,
    load_balancers: Arc<Mutex<BTreeMap<String, LoadBalancerSummary>>>,
    passwords: Arc<Mutex<HashMap<String, String>>>,
    deleted_servers: Arc<Mutex<Vec<(String, DeleteServerRequest)>>>,
    deleted_volumes: Arc<Mutex<Vec<String>>>,
    fail_creates: Arc<Mutex<HashMap<String, u32>>>,
    fail_waits: Arc<Mutex<HashMap<String, u32>>>,
    create_delay: Arc<Mutex<Option<Duration>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    next_id: Arc<Mutex<u64>>,
}

impl std::fmt::Debug for MockComputeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockComputeClient").finish_non_exhaustive()
    }
}

impl MockComputeClient {
    /// Create a new empty mock client
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> u64 {
        let mut id = self.next_id.lock().unwrap();
        *id += 1;
        *id
    }

    /// Add a server to the mock inventory (for test setup); returns its ID.
    pub fn add_server(&self, name: &str, status: ServerStatus) -> String {
        let id = format!("srv-{}", self.next_id());
        self.servers.lock().unwrap().insert(
            id.clone(),
            MockServer {
                id: id.clone(),
                name: name.to_string(),
                status,
                created: MOCK_CREATED_AT.to_string(),
                address_ids: Vec::new(),
                volume_ids: Vec::new(),
            },
        );
        id
    }

    /// Add an address to the mock inventory (for test setup); returns its ID.
    pub fn add_address(&self, address: &str, external: bool, server_id: Option<&str>) -> String {
        let id = format!("addr-{}", self.next_id());
        self.addresses.lock().unwrap().insert(
            id.clone(),
            AddressDetail {
                id: id.clone(),
                status: Some("ACTIVE".to_string()),
                address: address.to_string(),
                external,
                is_primary: true,
                attached_to: server_id.map(|sid| AttachedTo {
                    entity: "server".to_string(),
                    id: sid.to_string(),
                }),
                server_id: server_id.map(str::to_string),
                loadbalancer_id: None,
            },
        );
        if let Some(sid) = server_id
            && let Some(server) = self.servers.lock().unwrap().get_mut(sid)
        {
            server.address_ids.push(id.clone());
        }
        id
    }

    /// Add a detached AVAILABLE volume (for test setup).
    pub fn add_available_volume(&self, id: &str, size: u32, bootable: bool) {
        self.volumes.lock().unwrap().insert(
            id.to_string(),
            Volume {
                id: id.to_string(),
                name: format!("volume-{}", id),
                size,
                status: VolumeStatus::Available,
                storage_type: "storage".to_string(),
                bootable,
                created: Some(MOCK_CREATED_AT.to_string()),
                attached_to_server: None,
            },
        );
    }

    /// Add a volume already attached to a server (for test setup).
    pub fn add_attached_volume(&self, id: &str, size: u32, bootable: bool, server_id: &str) {
        let device = self.next_device(server_id, bootable);
        self.volumes.lock().unwrap().insert(
            id.to_string(),
            Volume {
                id: id.to_string(),
                name: format!("volume-{}", id),
                size,
                status: VolumeStatus::InUse,
                storage_type: "storage".to_string(),
                bootable,
                created: Some(MOCK_CREATED_AT.to_string()),
                attached_to_server: Some(VolumeAttachment {
                    id: server_id.to_string(),
                    device: device.clone(),
                }),
            },
        );
        if let Some(server) = self.servers.lock().unwrap().get_mut(server_id) {
            server.volume_ids.push(id.to_string());
        }
    }

    /// Fail the next `count` create calls for servers with this name.
    pub fn fail_creates(&self, name: &str, count: u32) {
        self.fail_creates
            .lock()
            .unwrap()
            .insert(name.to_string(), count);
    }

    /// Fail the next `count` status waits for servers with this name.
    pub fn fail_waits(&self, name: &str, count: u32) {
        self.fail_waits
            .lock()
            .unwrap()
            .insert(name.to_string(), count);
    }

    /// Delay every create call (for concurrency-bound assertions).
    pub fn set_create_delay(&self, delay: Duration) {
        *self.create_delay.lock().unwrap() = Some(delay);
    }

    /// Highest number of create calls ever in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Server ID for a name, if present.
    pub fn server_id_by_name(&self, name: &str) -> Option<String> {
        self.servers
            .lock()
            .unwrap()
            .values()
            .find(|s| s.name == name)
            .map(|s| s.id.clone())
    }

    /// Names of all servers currently in the inventory.
    pub fn server_names(&self) -> Vec<String> {
        self.servers
            .lock()
            .unwrap()
            .values()
            .map(|s| s.name.clone())
            .collect()
    }

    /// Delete-server calls recorded so far.
    pub fn deleted_servers(&self) -> Vec<(String, DeleteServerRequest)> {
        self.deleted_servers.lock().unwrap().clone()
    }

    /// Delete-volume calls recorded so far.
    pub fn deleted_volumes(&self) -> Vec<String> {
        self.deleted_volumes.lock().unwrap().clone()
    }

    /// Password last set on a server, if any.
    pub fn password_for(&self, server_id: &str) -> Option<String> {
        self.passwords.lock().unwrap().get(server_id).cloned()
    }

    fn next_device(&self, server_id: &str, bootable: bool) -> String {
        if bootable {
            return "/dev/vda".to_string();
        }
        let attached = self
            .volumes
            .lock()
            .unwrap()
            .values()
            .filter(|v| {
                v.attached_to_server
                    .as_ref()
                    .is_some_and(|a| a.id == server_id)
            })
            .count();
        let letter = (b'b' + attached as u8) as char;
        format!("/dev/vd{}", letter)
    }

    fn take_failure(map: &Mutex<HashMap<String, u32>>, name: &str) -> bool {
        let mut map = map.lock().unwrap();
        match map.get_mut(name) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait::async_trait]
impl crate::compute_trait::ComputeClientTrait for MockComputeClient {
    fn base_url(&self) -> &str {
        "http://mock-compute"
    }

    async fn list_servers(&self) -> Result<Vec<ServerSummary>, ComputeError> {
        Ok(self
            .servers
            .lock()
            .unwrap()
            .values()
            .map(|s| ServerSummary {
                id: s.id.clone(),
                name: s.name.clone(),
            })
            .collect())
    }

    async fn get_server_detail(&self, server_id: &str) -> Result<ServerDetail, ComputeError> {
        let servers = self.servers.lock().unwrap();
        let server = servers
            .get(server_id)
            .ok_or_else(|| ComputeError::NotFound(format!("server {}", server_id)))?;
        Ok(ServerDetail {
            id: server.id.clone(),
            status: server.status,
            name: server.name.clone(),
            created: Some(server.created.clone()),
            addresses: server.address_ids.clone(),
            storages: server
                .volume_ids
                .iter()
                .map(|id| StorageRef { id: id.clone() })
                .collect(),
        })
    }

    async fn create_server(&self, request: &CreateServerRequest) -> Result<String, ComputeError> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.load(Ordering::SeqCst);
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let delay = *self.create_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let result = (|| {
            if Self::take_failure(&self.fail_creates, &request.name) {
                return Err(ComputeError::Api {
                    status: 500,
                    message: format!("injected create failure for '{}'", request.name),
                });
            }

            let id = format!("srv-{}", self.next_id());
            let status = if Self::take_failure(&self.fail_waits, &request.name) {
                ServerStatus::Error
            } else {
                ServerStatus::Active
            };
            self.servers.lock().unwrap().insert(
                id.clone(),
                MockServer {
                    id: id.clone(),
                    name: request.name.clone(),
                    status,
                    created: MOCK_CREATED_AT.to_string(),
                    address_ids: Vec::new(),
                    volume_ids: Vec::new(),
                },
            );

            for address in &request.addresses {
                match address {
                    AddressRequest::Existing { address_id } => {
                        let mut addresses = self.addresses.lock().unwrap();
                        if let Some(addr) = addresses.get_mut(address_id) {
                            addr.server_id = Some(id.clone());
                            addr.attached_to = Some(AttachedTo {
                                entity: "server".to_string(),
                                id: id.clone(),
                            });
                        }
                        if let Some(server) = self.servers.lock().unwrap().get_mut(&id) {
                            server.address_ids.push(address_id.clone());
                        }
                    }
                    AddressRequest::New { external, .. } => {
                        let n = self.next_id();
                        let literal = if *external {
                            format!("198.51.100.{}", n)
                        } else {
                            format!("10.1.0.{}", n)
                        };
                        self.add_address(&literal, *external, Some(&id));
                    }
                }
            }

            for storage in &request.storages {
                let vol_id = format!("vol-{}", self.next_id());
                self.add_attached_volume(&vol_id, storage.size, storage.bootable, &id);
            }

            Ok(id)
        })();

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn delete_server(
        &self,
        server_id: &str,
        request: &DeleteServerRequest,
    ) -> Result<(), ComputeError> {
        let removed = self.servers.lock().unwrap().remove(server_id);
        if removed.is_none() {
            return Err(ComputeError::NotFound(format!("server {}", server_id)));
        }
        {
            let mut volumes = self.volumes.lock().unwrap();
            for vol_id in &request.delete_volumes {
                volumes.remove(vol_id);
            }
            // Volumes not listed for deletion become detached.
            for volume in volumes.values_mut() {
                if volume
                    .attached_to_server
                    .as_ref()
                    .is_some_and(|a| a.id == server_id)
                {
                    volume.attached_to_server = None;
                    volume.status = VolumeStatus::Available;
                }
            }
        }
        {
            let mut addresses = self.addresses.lock().unwrap();
            for addr_id in &request.delete_addresses {
                addresses.remove(addr_id);
            }
        }
        self.deleted_servers
            .lock()
            .unwrap()
            .push((server_id.to_string(), request.clone()));
        Ok(())
    }

    async fn wait_for_status(
        &self,
        server_id: &str,
        targets: &[ServerStatus],
        _max_attempts: u32,
        _interval: Duration,
    ) -> Result<WaitOutcome, ComputeError> {
        let detail = self.get_server_detail(server_id).await?;
        Ok(WaitOutcome {
            reached: detail.status != ServerStatus::Error && targets.contains(&detail.status),
            last_status: Some(detail.status),
            address_ids: detail.addresses,
            volume_ids: detail.storages.into_iter().map(|s| s.id).collect(),
        })
    }

    async fn set_server_password(
        &self,
        server_id: &str,
        password: &str,
    ) -> Result<(), ComputeError> {
        if !self.servers.lock().unwrap().contains_key(server_id) {
            return Err(ComputeError::NotFound(format!("server {}", server_id)));
        }
        self.passwords
            .lock()
            .unwrap()
            .insert(server_id.to_string(), password.to_string());
        Ok(())
    }

    async fn project_addresses(&self) -> Result<HashMap<String, AddressDetail>, ComputeError> {
        Ok(self
            .addresses
            .lock()
            .unwrap()
            .iter()
            .map(|(id, addr)| (id.clone(), addr.clone()))
            .collect())
    }

    async fn find_available_external_ip(&self) -> Result<Option<String>, ComputeError> {
        Ok(self
            .addresses
            .lock()
            .unwrap()
            .values()
            .find(|addr| addr.external && addr.is_unbound())
            .map(|addr| addr.id.clone()))
    }

    async fn delete_address(&self, address_id: &str) -> Result<(), ComputeError> {
        self.addresses
            .lock()
            .unwrap()
            .remove(address_id)
            .map(|_| ())
            .ok_or_else(|| ComputeError::NotFound(format!("address {}", address_id)))
    }

    async fn list_volumes(&self) -> Result<Vec<Volume>, ComputeError> {
        Ok(self.volumes.lock().unwrap().values().cloned().collect())
    }

    async fn get_volume(&self, volume_id: &str) -> Result<Volume, ComputeError> {
        self.volumes
            .lock()
            .unwrap()
            .get(volume_id)
            .cloned()
            .ok_or_else(|| ComputeError::NotFound(format!("volume {}", volume_id)))
    }

    async fn attach_volume(
        &self,
        volume_id: &str,
        server_id: &str,
    ) -> Result<String, ComputeError> {
        if !self.servers.lock().unwrap().contains_key(server_id) {
            return Err(ComputeError::NotFound(format!("server {}", server_id)));
        }
        let bootable = self
            .volumes
            .lock()
            .unwrap()
            .get(volume_id)
            .ok_or_else(|| ComputeError::NotFound(format!("volume {}", volume_id)))?
            .bootable;
        let device = self.next_device(server_id, bootable);
        {
            let mut volumes = self.volumes.lock().unwrap();
            let volume = volumes
                .get_mut(volume_id)
                .ok_or_else(|| ComputeError::NotFound(format!("volume {}", volume_id)))?;
            volume.status = VolumeStatus::InUse;
            volume.attached_to_server = Some(VolumeAttachment {
                id: server_id.to_string(),
                device: device.clone(),
            });
        }
        if let Some(server) = self.servers.lock().unwrap().get_mut(server_id) {
            server.volume_ids.push(volume_id.to_string());
        }
        Ok(device)
    }

    async fn delete_volume(&self, volume_id: &str) -> Result<(), ComputeError> {
        self.volumes
            .lock()
            .unwrap()
            .remove(volume_id)
            .ok_or_else(|| ComputeError::NotFound(format!("volume {}", volume_id)))?;
        self.deleted_volumes
            .lock()
            .unwrap()
            .push(volume_id.to_string());
        Ok(())
    }

    async fn list_load_balancers(&self) -> Result<Vec<LoadBalancerSummary>, ComputeError> {
        Ok(self
            .load_balancers
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect())
    }

    async fn create_load_balancer(
        &self,
        request: &CreateLoadBalancerRequest,
    ) -> Result<String, ComputeError> {
        let id = format!("lb-{}", self.next_id());
        self.load_balancers.lock().unwrap().insert(
            id.clone(),
            LoadBalancerSummary {
                id: id.clone(),
                name: request.name.clone(),
            },
        );
        Ok(id)
    }

    async fn delete_load_balancer(&self, lb_id: &str) -> Result<(), ComputeError> {
        self.load_balancers
            .lock()
            .unwrap()
            .remove(lb_id)
            .map(|_| ())
            .ok_or_else(|| ComputeError::NotFound(format!("load balancer {}", lb_id)))
    }
}
