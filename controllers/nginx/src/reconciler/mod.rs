//! Reconciliation logic for the Nginx CRD.
//!
//! One pass drives the owned Deployment toward the shape derived from the
//! Nginx spec, then projects the Deployment's availability onto the Nginx
//! status:
//! - `desired`: pure construction of the Deployment
//! - `apply`: generic create-or-update against the store
//! - `status`: availability checks and condition bookkeeping

pub mod apply;
pub mod desired;
pub mod status;

use std::sync::Arc;

use chrono::Utc;
use cluster_store::{ObjectKey, ObjectStore};
use crds::{Nginx, NginxPhase};
use k8s_openapi::api::apps::v1::Deployment;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::ControllerError;
use crate::key_lock::KeyLocks;
use apply::{ConvergeAction, converge};
use desired::desired_deployment;
use status::{apply_availability, child_available, child_caught_up};

/// How a successful pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The Nginx no longer exists; nothing was written.
    Deleted,
    /// The Deployment has not caught up with its latest spec; status untouched.
    ChildPending,
    /// The status subresource was written.
    StatusUpdated { phase: NginxPhase },
    /// The computed status equals the stored one; no write was needed.
    StatusUnchanged { phase: NginxPhase },
}

impl ReconcileOutcome {
    /// Label used for logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deleted => "deleted",
            Self::ChildPending => "child_pending",
            Self::StatusUpdated { .. } => "status_updated",
            Self::StatusUnchanged { .. } => "status_unchanged",
        }
    }

    /// Phase reported by the pass, when it got as far as computing one.
    #[must_use]
    pub fn phase(&self) -> Option<NginxPhase> {
        match self {
            Self::StatusUpdated { phase } | Self::StatusUnchanged { phase } => Some(*phase),
            Self::Deleted | Self::ChildPending => None,
        }
    }
}

/// Reconciles Nginx objects against any store holding both Nginx and
/// Deployment objects.
pub struct Reconciler<S> {
    store: Arc<S>,
    locks: KeyLocks,
}

impl<S> std::fmt::Debug for Reconciler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("locked_keys", &self.locks.len())
            .finish_non_exhaustive()
    }
}

impl<S> Reconciler<S>
where
    S: ObjectStore<Nginx> + ObjectStore<Deployment>,
{
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            locks: KeyLocks::new(),
        }
    }

    /// Runs one pass for the Nginx at `key`.
    ///
    /// Never retries internally: every failure after the spec fetch aborts
    /// the pass without a status write and is returned to the caller.
    pub async fn reconcile(
        &self,
        key: &ObjectKey,
        cancel: &CancellationToken,
    ) -> Result<ReconcileOutcome, ControllerError> {
        let _guard = self.locks.lock(key).await;
        let store = self.store.as_ref();

        let nginx = match <S as ObjectStore<Nginx>>::get(store, key).await {
            Ok(nginx) => nginx,
            Err(e) if e.is_not_found() => {
                debug!(%key, "Nginx not found, assuming deleted");
                return Ok(ReconcileOutcome::Deleted);
            }
            Err(source) => {
                return Err(ControllerError::FetchSpec {
                    key: key.clone(),
                    source,
                });
            }
        };

        let desired = desired_deployment(&nginx)?;
        let converged = converge(store, desired).await?;
        match converged.action {
            ConvergeAction::Created => info!(%key, "created Deployment"),
            ConvergeAction::Updated => info!(%key, "updated Deployment"),
            ConvergeAction::Unchanged => debug!(%key, "Deployment up-to-date"),
        }
        let child = converged.object;

        if !child_caught_up(&child) {
            debug!(
                %key,
                generation = ?child.metadata.generation,
                observed = ?child.status.as_ref().and_then(|s| s.observed_generation),
                "Deployment has not observed its latest spec yet"
            );
            return Ok(ReconcileOutcome::ChildPending);
        }

        let mut status = nginx.status.clone().unwrap_or_default();
        let phase = apply_availability(
            &mut status,
            child_available(&child),
            nginx.metadata.generation,
            Utc::now(),
        );

        if nginx.status.as_ref() == Some(&status) {
            debug!(%key, %phase, "status up-to-date");
            return Ok(ReconcileOutcome::StatusUnchanged { phase });
        }

        if let Some(delay) = nginx.spec.reconcile_delay.filter(|d| !d.is_zero()) {
            debug!(%key, ?delay, "delaying status update");
            tokio::select! {
                () = cancel.cancelled() => return Err(ControllerError::Cancelled(key.clone())),
                () = tokio::time::sleep(delay) => {}
            }
        }
        if cancel.is_cancelled() {
            return Err(ControllerError::Cancelled(key.clone()));
        }

        let mut next = nginx;
        next.status = Some(status);
        <S as ObjectStore<Nginx>>::update_status(store, &next)
            .await
            .map_err(|source| ControllerError::UpdateStatus {
                key: key.clone(),
                source,
            })?;

        info!(%key, %phase, "status updated");
        Ok(ReconcileOutcome::StatusUpdated { phase })
    }
}
