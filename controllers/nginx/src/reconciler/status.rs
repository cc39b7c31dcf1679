//! Status derivation from the owned Deployment.

use chrono::{DateTime, Utc};
use crds::{
    Condition, ConditionStatus, NGINX_AVAILABLE, NginxPhase, NginxStatus, set_status_condition,
};
use k8s_openapi::api::apps::v1::Deployment;

/// Deployment condition type signalling minimum availability.
const DEPLOYMENT_AVAILABLE: &str = "Available";

pub const REASON_SETUP: &str = "Setup";
pub const REASON_NOT_AVAILABLE: &str = "NotAvailable";
pub const MESSAGE_SETUP: &str = "Nginx is up and running.";
pub const MESSAGE_NOT_AVAILABLE: &str = "Nginx deployment is not available.";

/// Whether the Deployment controller has processed the latest Deployment spec.
///
/// A Deployment without status, or without a generation, has not been
/// observed yet.
#[must_use]
pub fn child_caught_up(deploy: &Deployment) -> bool {
    let observed = deploy.status.as_ref().and_then(|s| s.observed_generation);
    match (observed, deploy.metadata.generation) {
        (Some(observed), Some(generation)) => observed == generation,
        _ => false,
    }
}

/// Whether the Deployment reports `Available=True`.
#[must_use]
pub fn child_available(deploy: &Deployment) -> bool {
    deploy
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == DEPLOYMENT_AVAILABLE && c.status == "True")
        })
}

/// Writes the availability verdict onto `status` and returns the new phase.
///
/// `generation` is the Nginx generation the verdict was computed for; it
/// lands on both the condition and `status.observedGeneration`.
pub fn apply_availability(
    status: &mut NginxStatus,
    available: bool,
    generation: Option<i64>,
    now: DateTime<Utc>,
) -> NginxPhase {
    let (reason, message) = if available {
        (REASON_SETUP, MESSAGE_SETUP)
    } else {
        (REASON_NOT_AVAILABLE, MESSAGE_NOT_AVAILABLE)
    };
    set_status_condition(
        &mut status.conditions,
        Condition::new(NGINX_AVAILABLE, ConditionStatus::from(available), reason, message)
            .with_observed_generation(generation),
        now,
    );
    status.phase = NginxPhase::from_available(available);
    status.observed_generation = generation;
    status.phase
}
