//! Controller-specific error types.
//!
//! Every variant names the reconcile step that failed so the runtime's error
//! channel tells the operator where a pass stopped.

use cluster_store::{ObjectKey, StoreError};
use thiserror::Error;

/// Errors that can occur in the Nginx Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Loading the Nginx object failed for a reason other than NotFound
    #[error("fetching Nginx {key}: {source}")]
    FetchSpec {
        key: ObjectKey,
        #[source]
        source: StoreError,
    },

    /// Reading the current child failed for a reason other than NotFound
    #[error("getting {kind} {key}: {source}")]
    FetchChild {
        kind: String,
        key: ObjectKey,
        #[source]
        source: StoreError,
    },

    /// Creating the child failed
    #[error("creating {kind} {key}: {source}")]
    CreateChild {
        kind: String,
        key: ObjectKey,
        #[source]
        source: StoreError,
    },

    /// Updating the child failed
    #[error("updating {kind} {key}: {source}")]
    UpdateChild {
        kind: String,
        key: ObjectKey,
        #[source]
        source: StoreError,
    },

    /// The owner reference could not be built
    #[error("setting ownerref: {0}")]
    OwnerReference(String),

    /// Writing the Nginx status failed
    #[error("updating Nginx {key} status: {source}")]
    UpdateStatus {
        key: ObjectKey,
        #[source]
        source: StoreError,
    },

    /// The pass was cancelled before it could write
    #[error("reconcile of {0} cancelled")]
    Cancelled(ObjectKey),

    /// The pass exceeded its deadline
    #[error("reconcile of {0} timed out")]
    Timeout(ObjectKey),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Kubernetes client error outside of a reconcile pass
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Resource watch or background task failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// The store error underneath, when the failure came from the store.
    #[must_use]
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            Self::FetchSpec { source, .. }
            | Self::FetchChild { source, .. }
            | Self::CreateChild { source, .. }
            | Self::UpdateChild { source, .. }
            | Self::UpdateStatus { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Lost an optimistic concurrency race; the next pass will see fresh state.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        self.store_error().is_some_and(StoreError::is_conflict)
    }

    /// Step label used for logs and metrics.
    #[must_use]
    pub fn step(&self) -> &'static str {
        match self {
            Self::FetchSpec { .. } => "fetch_spec",
            Self::FetchChild { .. } => "fetch_child",
            Self::CreateChild { .. } => "create_child",
            Self::UpdateChild { .. } => "update_child",
            Self::OwnerReference(_) => "owner_reference",
            Self::UpdateStatus { .. } => "update_status",
            Self::Cancelled(_) => "cancelled",
            Self::Timeout(_) => "timeout",
            Self::InvalidConfig(_) => "config",
            Self::Kube(_) => "kube",
            Self::Watch(_) => "watch",
        }
    }
}
