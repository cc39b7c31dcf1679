//! ObjectStore trait for mocking
//!
//! This trait abstracts cluster object access to enable mocking in unit tests.
//! `KubeStore` implements it against the API server, `MockStore` in memory.

use std::fmt::Debug;

use kube::Resource;
use kube::core::NamespaceResourceScope;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreError;
use crate::key::ObjectKey;

/// Namespaced Kubernetes object types the store can read and write.
pub trait StoreObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> StoreObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Typed get/create/update by namespaced key
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
/// Writes carry the object's `resourceVersion`; a stale one fails with
/// [`StoreError::Conflict`], never silently overwrites.
#[async_trait::async_trait]
pub trait ObjectStore<K: StoreObject>: Send + Sync {
    /// Fetches the object, [`StoreError::NotFound`] when absent.
    async fn get(&self, key: &ObjectKey) -> Result<K, StoreError>;

    /// Creates the object and returns it as stored.
    async fn create(&self, obj: &K) -> Result<K, StoreError>;

    /// Replaces the object's spec and metadata. Status is left untouched.
    async fn update(&self, obj: &K) -> Result<K, StoreError>;

    /// Writes only the status subresource. Spec is left untouched.
    async fn update_status(&self, obj: &K) -> Result<K, StoreError>;
}
