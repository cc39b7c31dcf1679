//! Generic create-or-update of a single managed object.
//!
//! `converge` fetches the current object, creates it when missing, and
//! otherwise only writes when the managed fields differ. Fields owned by
//! someone else (e.g. replicas set by an autoscaler or by hand) are carried
//! over from the live object before comparing.
//!
//! Comparison is semantic: a field the desired shape leaves unset is not
//! managed, so values the API server defaults in (strategy, revision history
//! limit, termination grace period, ...) never count as drift.

use std::collections::BTreeMap;

use crate::error::ControllerError;
use cluster_store::{ObjectKey, ObjectStore, StoreObject};
use k8s_openapi::api::apps::v1::Deployment;
use kube::Resource;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

/// An object whose shape the controller owns only partially.
pub trait ManagedResource: StoreObject {
    /// Copies fields outside the controller's authority from `current`.
    fn preserve_external_state(&mut self, current: &Self);

    /// Whether every managed field of `current` already matches `self`.
    fn matches(&self, current: &Self) -> bool;

    /// Writes the managed fields of `self` onto `current`, leaving the rest.
    fn apply_to(self, current: &mut Self);
}

/// What `converge` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergeAction {
    Created,
    Updated,
    Unchanged,
}

/// The live object after convergence.
#[derive(Debug, Clone)]
pub struct Converged<K> {
    pub object: K,
    pub action: ConvergeAction,
}

fn kind<K: StoreObject>() -> String {
    K::kind(&()).into_owned()
}

/// Converges one object toward `desired`. Failures are returned, never retried.
pub async fn converge<K, S>(store: &S, mut desired: K) -> Result<Converged<K>, ControllerError>
where
    K: ManagedResource,
    S: ObjectStore<K> + ?Sized,
{
    let key = ObjectKey::for_object(&desired).map_err(|source| ControllerError::FetchChild {
        kind: kind::<K>(),
        key: ObjectKey::new(
            desired.meta().namespace.clone().unwrap_or_default(),
            desired.meta().name.clone().unwrap_or_default(),
        ),
        source,
    })?;

    let current = match store.get(&key).await {
        Ok(current) => current,
        Err(e) if e.is_not_found() => {
            info!(kind = %kind::<K>(), %key, "creating");
            let created = store
                .create(&desired)
                .await
                .map_err(|source| ControllerError::CreateChild {
                    kind: kind::<K>(),
                    key: key.clone(),
                    source,
                })?;
            // Freshly created, nothing to compare against.
            return Ok(Converged {
                object: created,
                action: ConvergeAction::Created,
            });
        }
        Err(source) => {
            return Err(ControllerError::FetchChild {
                kind: kind::<K>(),
                key,
                source,
            });
        }
    };

    desired.preserve_external_state(&current);

    if desired.matches(&current) {
        debug!(kind = %kind::<K>(), %key, "up-to-date");
        return Ok(Converged {
            object: current,
            action: ConvergeAction::Unchanged,
        });
    }

    info!(kind = %kind::<K>(), %key, "updating");
    let mut next = current;
    desired.apply_to(&mut next);
    let updated = store
        .update(&next)
        .await
        .map_err(|source| ControllerError::UpdateChild {
            kind: kind::<K>(),
            key,
            source,
        })?;

    Ok(Converged {
        object: updated,
        action: ConvergeAction::Updated,
    })
}

/// Whether every field set in `desired` holds the same value in `current`.
/// Arrays must match element-wise with equal length.
fn value_contains(desired: &Value, current: &Value) -> bool {
    match (desired, current) {
        (Value::Null, _) => true,
        (Value::Object(d), Value::Object(c)) => d
            .iter()
            .all(|(k, v)| v.is_null() || c.get(k).is_some_and(|cv| value_contains(v, cv))),
        (Value::Array(d), Value::Array(c)) => {
            d.len() == c.len() && d.iter().zip(c).all(|(dv, cv)| value_contains(dv, cv))
        }
        (d, c) => d == c,
    }
}

/// Semantic equality of the managed part of `current`. Serialization
/// failures count as drift so the object gets rewritten.
fn semantically_matches<T: Serialize>(desired: &T, current: &T) -> bool {
    match (serde_json::to_value(desired), serde_json::to_value(current)) {
        (Ok(d), Ok(c)) => value_contains(&d, &c),
        _ => false,
    }
}

/// Whether every label in `desired` is present with the same value.
fn labels_contained(
    desired: Option<&BTreeMap<String, String>>,
    current: Option<&BTreeMap<String, String>>,
) -> bool {
    let Some(desired) = desired else {
        return true;
    };
    let empty = BTreeMap::new();
    let current = current.unwrap_or(&empty);
    desired.iter().all(|(k, v)| current.get(k) == Some(v))
}

impl ManagedResource for Deployment {
    fn preserve_external_state(&mut self, current: &Self) {
        let replicas = current.spec.as_ref().and_then(|s| s.replicas);
        if let (Some(replicas), Some(spec)) = (replicas, self.spec.as_mut()) {
            spec.replicas = Some(replicas);
        }
    }

    fn matches(&self, current: &Self) -> bool {
        semantically_matches(&self.spec, &current.spec)
            && labels_contained(self.metadata.labels.as_ref(), current.metadata.labels.as_ref())
            && self.metadata.owner_references == current.metadata.owner_references
    }

    fn apply_to(self, current: &mut Self) {
        current.spec = self.spec;
        if let Some(labels) = self.metadata.labels {
            current
                .metadata
                .labels
                .get_or_insert_with(BTreeMap::new)
                .extend(labels);
        }
        current.metadata.owner_references = self.metadata.owner_references;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::desired::desired_deployment;
    use crate::test_utils::create_test_nginx;
    use cluster_store::mock::Failure;
    use cluster_store::{MockStore, Operation, StoreError};

    fn key() -> ObjectKey {
        ObjectKey::new("default", "nginx-web")
    }

    fn image_of(deploy: &Deployment) -> Option<String> {
        deploy.spec.as_ref()?.template.spec.as_ref()?.containers.first()?.image.clone()
    }

    #[tokio::test]
    async fn test_converge_creates_missing_object() {
        let store = MockStore::new();
        let desired = desired_deployment(&create_test_nginx("web", "default", "1.25")).unwrap();

        let converged = converge(&store, desired).await.unwrap();
        assert_eq!(converged.action, ConvergeAction::Created);
        assert_eq!(image_of(&converged.object).as_deref(), Some("nginx:1.25"));
        assert_eq!(store.writes::<Deployment>().creates, 1);
        assert_eq!(store.writes::<Deployment>().updates, 0);
    }

    #[tokio::test]
    async fn test_converge_twice_writes_once() {
        let store = MockStore::new();
        let nginx = create_test_nginx("web", "default", "1.25");

        converge(&store, desired_deployment(&nginx).unwrap()).await.unwrap();
        let second = converge(&store, desired_deployment(&nginx).unwrap()).await.unwrap();

        assert_eq!(second.action, ConvergeAction::Unchanged);
        assert_eq!(store.writes::<Deployment>().total(), 1);
    }

    #[tokio::test]
    async fn test_converge_preserves_external_replicas() {
        let store = MockStore::new();
        converge(
            &store,
            desired_deployment(&create_test_nginx("web", "default", "1.25")).unwrap(),
        )
        .await
        .unwrap();

        // Scaled to zero by someone else.
        store
            .mutate(&key(), |d: &mut Deployment| {
                d.spec.as_mut().unwrap().replicas = Some(0);
            })
            .unwrap();

        // Unchanged spec: the replica drift alone must not trigger a write.
        let unchanged = converge(
            &store,
            desired_deployment(&create_test_nginx("web", "default", "1.25")).unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(unchanged.action, ConvergeAction::Unchanged);

        // Unrelated drift: image changes, replicas survive.
        let updated = converge(
            &store,
            desired_deployment(&create_test_nginx("web", "default", "1.26")).unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(updated.action, ConvergeAction::Updated);
        assert_eq!(updated.object.spec.as_ref().unwrap().replicas, Some(0));
        assert_eq!(image_of(&updated.object).as_deref(), Some("nginx:1.26"));
        assert_eq!(store.writes::<Deployment>().updates, 1);
    }

    #[tokio::test]
    async fn test_converge_ignores_server_defaulted_fields() {
        let store = MockStore::new();
        converge(
            &store,
            desired_deployment(&create_test_nginx("web", "default", "1.25")).unwrap(),
        )
        .await
        .unwrap();

        // What the API server fills in on admission.
        store
            .mutate(&key(), |d: &mut Deployment| {
                let spec = d.spec.as_mut().unwrap();
                spec.revision_history_limit = Some(10);
                spec.progress_deadline_seconds = Some(600);
                let pod = spec.template.spec.as_mut().unwrap();
                pod.restart_policy = Some("Always".to_string());
                pod.containers[0].image_pull_policy = Some("IfNotPresent".to_string());
            })
            .unwrap();

        let again = converge(
            &store,
            desired_deployment(&create_test_nginx("web", "default", "1.25")).unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(again.action, ConvergeAction::Unchanged);
        assert_eq!(store.writes::<Deployment>().total(), 1);
    }

    #[test]
    fn test_value_contains_requires_equal_array_length() {
        let desired = serde_json::json!({"ports": [{"containerPort": 80}]});
        let current = serde_json::json!({"ports": [{"containerPort": 80}, {"containerPort": 443}]});
        assert!(!value_contains(&desired, &current));
        assert!(value_contains(&desired, &serde_json::json!({
            "ports": [{"containerPort": 80, "protocol": "TCP"}]
        })));
    }

    #[tokio::test]
    async fn test_converge_keeps_foreign_labels() {
        let store = MockStore::new();
        converge(
            &store,
            desired_deployment(&create_test_nginx("web", "default", "1.25")).unwrap(),
        )
        .await
        .unwrap();
        store
            .mutate(&key(), |d: &mut Deployment| {
                d.metadata
                    .labels
                    .get_or_insert_with(BTreeMap::new)
                    .insert("team".to_string(), "edge".to_string());
            })
            .unwrap();

        let unchanged = converge(
            &store,
            desired_deployment(&create_test_nginx("web", "default", "1.25")).unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(unchanged.action, ConvergeAction::Unchanged);

        let updated = converge(
            &store,
            desired_deployment(&create_test_nginx("web", "default", "1.26")).unwrap(),
        )
        .await
        .unwrap();
        let labels = updated.object.metadata.labels.unwrap();
        assert_eq!(labels["team"], "edge");
        assert_eq!(labels["app.kubernetes.io/version"], "1.26");
    }

    #[tokio::test]
    async fn test_converge_propagates_fetch_error() {
        let store = MockStore::new();
        store.fail_next::<Deployment>(Operation::Get, Failure::Unavailable);

        let err = converge(
            &store,
            desired_deployment(&create_test_nginx("web", "default", "1.25")).unwrap(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ControllerError::FetchChild { source: StoreError::Unavailable(_), .. }
        ));
        assert_eq!(store.writes::<Deployment>().total(), 0);
    }

    #[tokio::test]
    async fn test_converge_propagates_create_and_update_errors() {
        let store = MockStore::new();
        store.fail_next::<Deployment>(Operation::Create, Failure::Unavailable);
        let err = converge(
            &store,
            desired_deployment(&create_test_nginx("web", "default", "1.25")).unwrap(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.step(), "create_child");

        converge(
            &store,
            desired_deployment(&create_test_nginx("web", "default", "1.25")).unwrap(),
        )
        .await
        .unwrap();
        store.fail_next::<Deployment>(Operation::Update, Failure::Conflict);
        let err = converge(
            &store,
            desired_deployment(&create_test_nginx("web", "default", "1.26")).unwrap(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.step(), "update_child");
        assert!(err.is_conflict());
    }
}
