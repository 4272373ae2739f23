//! Object-storage state store
//!
//! One JSON object per cluster under `clusters/{name}/state.json`. `save`
//! is an unconditional full-object overwrite: there is no compare-and-swap,
//! so two concurrent runs against the same cluster name race and the last
//! writer wins.

use crate::error::StateError;
use crate::model::ClusterState;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use std::sync::Arc;
use tracing::debug;

/// Versioned cluster-state snapshot store on an object-storage backend.
#[derive(Debug)]
pub struct StateStore {
    store: Arc<dyn ObjectStore>,
    key: Path,
}

impl StateStore {
    /// Store on an arbitrary backend (tests use `object_store::memory::InMemory`).
    pub fn new(store: Arc<dyn ObjectStore>, cluster: &str) -> Self {
        Self {
            store,
            key: Path::from(format!("clusters/{}/state.json", cluster)),
        }
    }

    /// Store on an S3-compatible backend.
    pub fn s3(
        endpoint: &str,
        region: &str,
        bucket: &str,
        access_key: &str,
        secret_key: &str,
        cluster: &str,
    ) -> Result<Self, StateError> {
        let store = AmazonS3Builder::new()
            .with_endpoint(endpoint)
            .with_region(region)
            .with_bucket_name(bucket)
            .with_access_key_id(access_key)
            .with_secret_access_key(secret_key)
            .with_allow_http(endpoint.starts_with("http://"))
            .build()
            .map_err(StateError::BackendUnavailable)?;
        Ok(Self::new(Arc::new(store), cluster))
    }

    /// Object key this store reads and writes.
    pub fn key(&self) -> &Path {
        &self.key
    }

    /// Load the persisted state.
    ///
    /// Returns `Ok(None)` when no state object exists yet; an unreachable
    /// backend is `StateError::BackendUnavailable`.
    pub async fn load(&self) -> Result<Option<ClusterState>, StateError> {
        debug!("loading state object {}", self.key);
        match self.store.get(&self.key).await {
            Ok(object) => {
                let bytes = object
                    .bytes()
                    .await
                    .map_err(StateError::BackendUnavailable)?;
                Ok(Some(serde_json::from_slice(&bytes)?))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(StateError::BackendUnavailable(e)),
        }
    }

    /// Persist the state as indented JSON, overwriting any previous object.
    pub async fn save(&self, state: &ClusterState) -> Result<(), StateError> {
        let body = serde_json::to_vec_pretty(state)?;
        debug!("saving state object {} ({} bytes)", self.key, body.len());
        self.store
            .put(&self.key, PutPayload::from(body))
            .await
            .map_err(StateError::BackendUnavailable)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NodeRecord, NodeRole};
    use object_store::memory::InMemory;

    fn store() -> StateStore {
        StateStore::new(Arc::new(InMemory::new()), "testcluster")
    }

    #[tokio::test]
    async fn test_load_absent_is_none_not_error() {
        let store = store();
        let loaded = store.load().await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_save_then_load_round_trips() {
        let store = store();
        let mut state = ClusterState::new("root");
        state.nodes.push(NodeRecord {
            name: "testcluster-master-1".to_string(),
            role: NodeRole::Master,
            id: "srv-1".to_string(),
            ip: "10.0.0.4".to_string(),
            ssh_port: 0,
            address_id: None,
            labels: Default::default(),
            taints: Vec::new(),
            disks: Vec::new(),
            created: None,
            updated: None,
        });

        store.save(&state).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn test_save_overwrites_previous_object() {
        let store = store();
        let state = ClusterState::new("root");
        store.save(&state).await.unwrap();

        let mut second = ClusterState::new("admin");
        second.nodes.clear();
        store.save(&second).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.ssh_user, "admin");
    }

    #[test]
    fn test_key_layout() {
        let store = store();
        assert_eq!(store.key().as_ref(), "clusters/testcluster/state.json");
    }
}
