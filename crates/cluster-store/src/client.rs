//! ObjectStore backed by the Kubernetes API server.

use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::StoreError;
use crate::key::ObjectKey;
use crate::store_trait::{ObjectStore, StoreObject};

/// Reads and writes cluster objects through `kube::Api`.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl KubeStore {
    /// Wraps an existing client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: StoreObject>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Merge patch carrying the status and, when known, the resourceVersion
/// precondition so a stale write is rejected with 409.
fn status_patch<K: StoreObject>(obj: &K) -> Result<Value, StoreError> {
    let status = serde_json::to_value(obj)?
        .get("status")
        .cloned()
        .unwrap_or(Value::Null);

    let mut metadata = Map::new();
    if let Some(rv) = obj.meta().resource_version.as_ref() {
        metadata.insert("resourceVersion".to_string(), Value::String(rv.clone()));
    }

    Ok(json!({
        "metadata": metadata,
        "status": status,
    }))
}

#[async_trait::async_trait]
impl<K: StoreObject> ObjectStore<K> for KubeStore {
    async fn get(&self, key: &ObjectKey) -> Result<K, StoreError> {
        debug!(kind = %K::kind(&()), %key, "get");
        Ok(self.api::<K>(&key.namespace).get(&key.name).await?)
    }

    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        let key = ObjectKey::for_object(obj)?;
        debug!(kind = %K::kind(&()), %key, "create");
        Ok(self
            .api::<K>(&key.namespace)
            .create(&PostParams::default(), obj)
            .await?)
    }

    async fn update(&self, obj: &K) -> Result<K, StoreError> {
        let key = ObjectKey::for_object(obj)?;
        debug!(kind = %K::kind(&()), %key, "replace");
        Ok(self
            .api::<K>(&key.namespace)
            .replace(&key.name, &PostParams::default(), obj)
            .await?)
    }

    async fn update_status(&self, obj: &K) -> Result<K, StoreError> {
        let key = ObjectKey::for_object(obj)?;
        let patch = status_patch(obj)?;
        debug!(kind = %K::kind(&()), %key, "patch status");
        Ok(self
            .api::<K>(&key.namespace)
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }
}
