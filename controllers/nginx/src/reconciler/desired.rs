//! Desired Deployment for an Nginx.
//!
//! Everything here is a pure function of the Nginx object: no I/O, no clock,
//! no randomness. Repeated passes over an unchanged spec must produce the
//! same Deployment, which is what lets the applier detect a no-op.

use std::collections::BTreeMap;

use crate::error::ControllerError;
use crds::Nginx;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, ContainerPort, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::{Resource, ResourceExt};

pub const DEPLOYMENT_PREFIX: &str = "nginx-";
pub const IMAGE: &str = "nginx";
pub const CONTAINER_NAME: &str = "nginx";
pub const HTTP_PORT_NAME: &str = "http";
pub const HTTP_PORT: i32 = 80;

pub const LABEL_NAME: &str = "app.kubernetes.io/name";
pub const LABEL_INSTANCE: &str = "app.kubernetes.io/instance";
pub const LABEL_VERSION: &str = "app.kubernetes.io/version";
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "nginx-operator";

/// Name of the Deployment owned by the Nginx called `nginx_name`.
#[must_use]
pub fn deployment_name(nginx_name: &str) -> String {
    format!("{DEPLOYMENT_PREFIX}{nginx_name}")
}

/// Selector labels. Stable across version changes, since a Deployment's
/// selector is immutable once created.
#[must_use]
pub fn selector_labels(nginx_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_NAME.to_string(), IMAGE.to_string()),
        (LABEL_INSTANCE.to_string(), nginx_name.to_string()),
        (LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string()),
    ])
}

/// Labels stamped on the Deployment object itself.
#[must_use]
pub fn deployment_labels(nginx_name: &str, version: &str) -> BTreeMap<String, String> {
    let mut labels = selector_labels(nginx_name);
    labels.insert(LABEL_VERSION.to_string(), version.to_string());
    labels
}

/// Builds the Deployment the given Nginx should own, including the
/// controller owner reference back to the Nginx.
pub fn desired_deployment(nginx: &Nginx) -> Result<Deployment, ControllerError> {
    let name = nginx.name_any();
    let namespace = nginx
        .namespace()
        .ok_or_else(|| ControllerError::OwnerReference(format!("Nginx {name} has no namespace")))?;
    let owner = nginx
        .controller_owner_ref(&())
        .ok_or_else(|| {
            ControllerError::OwnerReference(format!("Nginx {namespace}/{name} has no uid"))
        })?;

    let version = &nginx.spec.version;
    let selector = selector_labels(&name);

    Ok(Deployment {
        metadata: ObjectMeta {
            name: Some(deployment_name(&name)),
            namespace: Some(namespace),
            labels: Some(deployment_labels(&name, version)),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            selector: LabelSelector {
                match_labels: Some(selector.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(selector),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: CONTAINER_NAME.to_string(),
                        image: Some(format!("{IMAGE}:{version}")),
                        ports: Some(vec![ContainerPort {
                            name: Some(HTTP_PORT_NAME.to_string()),
                            container_port: HTTP_PORT,
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    })
}
