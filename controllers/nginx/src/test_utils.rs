//! Test utilities for unit testing the reconciler
//!
//! Fixture builders and helpers that play the part of the Deployment
//! controller against a `MockStore`.

use cluster_store::{MockStore, ObjectKey};
use crds::{Nginx, NginxSpec};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentCondition, DeploymentStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Helper to create a test Nginx with uid and generation set, as the API
/// server would return it.
pub fn create_test_nginx(name: &str, namespace: &str, version: &str) -> Nginx {
    Nginx {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("{namespace}-{name}-uid")),
            generation: Some(1),
            ..Default::default()
        },
        spec: NginxSpec {
            version: version.to_string(),
            reconcile_delay: None,
        },
        status: None,
    }
}

/// Key of the Deployment owned by the Nginx `name` in `namespace`.
pub fn deployment_key(namespace: &str, name: &str) -> ObjectKey {
    ObjectKey::new(namespace, format!("nginx-{name}"))
}

/// Reports the stored Deployment as processed by the Deployment controller,
/// with `Available` set to the given condition status ("True", "False", ...)
/// or absent.
pub fn observe_deployment(
    store: &MockStore,
    key: &ObjectKey,
    available: Option<&str>,
) -> Deployment {
    store
        .mutate(key, |deploy: &mut Deployment| {
            deploy.status = Some(DeploymentStatus {
                observed_generation: deploy.metadata.generation,
                replicas: Some(1),
                conditions: available.map(|status| {
                    vec![DeploymentCondition {
                        type_: "Available".to_string(),
                        status: status.to_string(),
                        reason: Some("MinimumReplicasAvailable".to_string()),
                        ..Default::default()
                    }]
                }),
                ..Default::default()
            });
        })
        .expect("deployment exists")
}
