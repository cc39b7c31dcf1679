//! Cluster object store access
//!
//! A thin typed layer over the Kubernetes API used by the nginx operator.
//! Reads and writes are addressed by namespace+name and use optimistic
//! concurrency through `metadata.resourceVersion`.
//!
//! # Example
//!
//! ```no_run
//! use cluster_store::{KubeStore, ObjectKey, ObjectStore};
//! use k8s_openapi::api::apps::v1::Deployment;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = KubeStore::new(kube::Client::try_default().await?);
//! let key = ObjectKey::new("default", "nginx-web");
//! let deployment: Deployment = store.get(&key).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Distinct failures**: not-found and conflict are separate error kinds
//! - **Status writes**: `update_status` touches only the status subresource
//! - **Mock store** (`test-util`): in-memory store with write counting,
//!   failure injection and owner-reference cascade deletion

pub mod client;
pub mod error;
pub mod key;
#[path = "trait.rs"]
pub mod store_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::KubeStore;
pub use error::StoreError;
pub use key::ObjectKey;
pub use store_trait::{ObjectStore, StoreObject};
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockStore, Operation, WriteCounts};
