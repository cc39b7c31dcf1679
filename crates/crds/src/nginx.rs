//! Nginx CRD
//!
//! Declares a single nginx workload. The controller derives a Deployment from
//! the spec and reports the Deployment's availability back onto the status.

use std::time::Duration;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::conditions::{Condition, ConditionStatus, find_status_condition};

/// Condition type reporting whether the nginx workload is serving.
pub const NGINX_AVAILABLE: &str = "Available";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[kube(
    group = "example.nginx-operator.io",
    version = "v1alpha1",
    kind = "Nginx",
    plural = "nginxes",
    namespaced,
    status = "NginxStatus",
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NginxSpec {
    /// Nginx version to deploy (image tag)
    pub version: String,

    /// Artificial delay applied before status is written ("500ms", "2s", "1m 30s")
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "humantime_serde"
    )]
    #[schemars(with = "Option<String>")]
    pub reconcile_delay: Option<Duration>,
}

/// Observed state of an Nginx, owned by the controller.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NginxStatus {
    /// The most recent generation observed by the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Latest observations, keyed by condition type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// DEPRECATED: human readable projection of the Available condition.
    /// Kept for `kubectl get` output only; read `conditions` from code.
    #[serde(default)]
    pub phase: NginxPhase,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
/// Coarse-grained phase shown in the `Status` printer column
///
/// Serializes as PascalCase ("Pending", "Ready", "NotReady").
#[serde(rename_all = "PascalCase")]
pub enum NginxPhase {
    /// No status has been written yet
    #[default]
    Pending,

    /// The Deployment reports Available=True
    Ready,

    /// The Deployment is not (yet) available
    NotReady,
}

impl NginxPhase {
    /// Projects an availability boolean onto the phase.
    #[must_use]
    pub fn from_available(available: bool) -> Self {
        if available { Self::Ready } else { Self::NotReady }
    }
}

impl std::fmt::Display for NginxPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Ready => "Ready",
            Self::NotReady => "NotReady",
        };
        f.write_str(s)
    }
}

impl Nginx {
    /// Phase as currently reported, `Pending` when no status exists.
    #[must_use]
    pub fn phase(&self) -> NginxPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// The controller-owned Available condition, if it has been set.
    #[must_use]
    pub fn available_condition(&self) -> Option<&Condition> {
        self.status
            .as_ref()
            .and_then(|s| find_status_condition(&s.conditions, NGINX_AVAILABLE))
    }

    /// Whether phase and Available condition agree.
    ///
    /// Holds for every status written by the controller; `Pending` with no
    /// condition also counts as coherent.
    #[must_use]
    pub fn status_is_coherent(&self) -> bool {
        match (self.phase(), self.available_condition()) {
            (NginxPhase::Pending, None) => true,
            (NginxPhase::Ready, Some(c)) => c.status == ConditionStatus::True,
            (NginxPhase::NotReady, Some(c)) => c.status == ConditionStatus::False,
            _ => false,
        }
    }
}
