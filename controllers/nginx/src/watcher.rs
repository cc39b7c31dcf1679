//! Kubernetes resource watcher.
//!
//! Drives the Reconciler from a `kube_runtime::Controller` watching Nginx
//! objects and the Deployments they own. The runtime delivers one key at a
//! time per object, bounded by the configured concurrency, and handles
//! reconnection. Retry timing lives in `error_policy`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cluster_store::{KubeStore, ObjectKey, ObjectStore};
use crds::Nginx;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::{self, Action, Config as ControllerConfig};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{Controller, watcher};
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, error, info, warn};

use crate::backoff::BackoffStates;
use crate::config::Config;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use crate::reconciler::desired::{LABEL_MANAGED_BY, MANAGED_BY};

/// Requeue delay after losing an optimistic concurrency race.
pub const CONFLICT_REQUEUE: Duration = Duration::from_secs(1);

/// Shared state handed to every reconcile and error policy call.
pub struct Context<S> {
    pub reconciler: Reconciler<S>,
    pub metrics: Metrics,
    pub backoff: BackoffStates,
    pub shutdown: CancellationToken,
    pub reconcile_timeout: Duration,
}

impl<S> std::fmt::Debug for Context<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("reconciler", &self.reconciler)
            .field("backoff_keys", &self.backoff.len())
            .field("reconcile_timeout", &self.reconcile_timeout)
            .finish_non_exhaustive()
    }
}

impl<S> Context<S>
where
    S: ObjectStore<Nginx> + ObjectStore<Deployment>,
{
    pub fn new(
        store: Arc<S>,
        metrics: Metrics,
        shutdown: CancellationToken,
        reconcile_timeout: Duration,
    ) -> Self {
        Self {
            reconciler: Reconciler::new(store),
            metrics,
            backoff: BackoffStates::new(),
            shutdown,
            reconcile_timeout,
        }
    }
}

fn key_of(nginx: &Nginx) -> ObjectKey {
    ObjectKey::new(nginx.namespace().unwrap_or_default(), nginx.name_any())
}

/// One reconcile pass as seen by the runtime: deadline, cancellation,
/// logging and metrics around `Reconciler::reconcile`.
pub async fn reconcile_nginx<S>(
    nginx: Arc<Nginx>,
    ctx: Arc<Context<S>>,
) -> Result<Action, ControllerError>
where
    S: ObjectStore<Nginx> + ObjectStore<Deployment> + 'static,
{
    let key = key_of(&nginx);
    let cancel = ctx.shutdown.child_token();
    let started = Instant::now();
    debug!(%key, "reconciling Nginx");

    let result = tokio::time::timeout(
        ctx.reconcile_timeout,
        ctx.reconciler.reconcile(&key, &cancel),
    )
    .await
    .unwrap_or_else(|_| Err(ControllerError::Timeout(key.clone())));

    match result {
        Ok(outcome) => {
            ctx.backoff.reset(&key);
            ctx.metrics.observe(outcome.as_str(), started.elapsed());
            debug!(
                %key,
                outcome = outcome.as_str(),
                phase = ?outcome.phase(),
                "reconcile finished"
            );
            Ok(Action::await_change())
        }
        Err(e) => {
            ctx.metrics.observe_error(&e, started.elapsed());
            if e.is_conflict() {
                warn!(%key, step = e.step(), error = %e, "reconcile lost an update race");
            } else {
                error!(%key, step = e.step(), error = %e, "reconcile failed");
            }
            Err(e)
        }
    }
}

/// Conflicts retry quickly; everything else backs off per key.
pub fn error_policy<S>(nginx: Arc<Nginx>, err: &ControllerError, ctx: Arc<Context<S>>) -> Action {
    if err.is_conflict() {
        return Action::requeue(CONFLICT_REQUEUE);
    }
    let key = key_of(&nginx);
    let delay = ctx.backoff.next_delay(&key);
    debug!(%key, ?delay, "requeueing after failure");
    Action::requeue(delay)
}

type RuntimeError = controller::Error<ControllerError, watcher::Error>;

/// Level a runtime error is logged at, `None` when it was already logged.
///
/// Reconcile failures are logged with their key by `reconcile_nginx`. A
/// Deployment whose owner falls outside this instance's selector surfaces as
/// `ObjectNotFound` and is expected.
fn runtime_error_level(err: &RuntimeError) -> Option<Level> {
    match err {
        controller::Error::ReconcilerFailed(..) => None,
        controller::Error::ObjectNotFound(_) => Some(Level::DEBUG),
        _ => Some(Level::WARN),
    }
}

fn log_result(res: Result<(ObjectRef<Nginx>, Action), RuntimeError>) {
    match res {
        Ok((obj, _action)) => debug!(object = %obj, "reconciled"),
        Err(e) => match runtime_error_level(&e) {
            None => {}
            Some(level) if level == Level::DEBUG => {
                debug!(error = %e, "owner not watched by this instance");
            }
            Some(_) => warn!(error = %e, "controller error"),
        },
    }
}

/// Watches Nginx objects and owned Deployments until `ctx.shutdown` fires.
pub async fn run(
    client: Client,
    config: Config,
    ctx: Arc<Context<KubeStore>>,
) -> Result<(), ControllerError> {
    let (nginx_api, deployment_api): (Api<Nginx>, Api<Deployment>) = match &config.namespace {
        Some(ns) => (Api::namespaced(client.clone(), ns), Api::namespaced(client, ns)),
        None => (Api::all(client.clone()), Api::all(client)),
    };

    let mut nginx_watch = watcher::Config::default();
    if let Some(selector) = &config.label_selector {
        nginx_watch = nginx_watch.labels(selector);
    }
    let owned_watch =
        watcher::Config::default().labels(&format!("{LABEL_MANAGED_BY}={MANAGED_BY}"));

    info!(
        namespace = config.namespace.as_deref().unwrap_or("all namespaces"),
        selector = config.label_selector.as_deref().unwrap_or(""),
        concurrency = config.concurrency,
        "Starting Nginx watcher"
    );

    let shutdown = ctx.shutdown.clone().cancelled_owned();
    ctx.metrics.set_ready(true);

    Controller::new(nginx_api, nginx_watch)
        .owns(deployment_api, owned_watch)
        .with_config(ControllerConfig::default().concurrency(config.concurrency))
        .graceful_shutdown_on(shutdown)
        .run(reconcile_nginx::<KubeStore>, error_policy::<KubeStore>, Arc::clone(&ctx))
        .for_each(|res| async move { log_result(res) })
        .await;

    ctx.metrics.set_ready(false);
    info!("Nginx watcher stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_nginx, deployment_key, observe_deployment};
    use cluster_store::mock::Failure;
    use cluster_store::{MockStore, Operation};

    fn context(store: &Arc<MockStore>, timeout: Duration) -> Arc<Context<MockStore>> {
        Arc::new(Context::new(
            Arc::clone(store),
            Metrics::new("test").unwrap(),
            CancellationToken::new(),
            timeout,
        ))
    }

    fn seeded() -> (Arc<MockStore>, Arc<Nginx>) {
        let store = Arc::new(MockStore::new());
        let nginx = store.insert(&create_test_nginx("web", "default", "1.25")).unwrap();
        (store, Arc::new(nginx))
    }

    #[tokio::test]
    async fn test_success_waits_for_next_change() {
        let (store, nginx) = seeded();
        let ctx = context(&store, Duration::from_secs(30));

        let action = reconcile_nginx(Arc::clone(&nginx), Arc::clone(&ctx)).await.unwrap();
        assert_eq!(action, Action::await_change());
        let text = ctx.metrics.render().unwrap();
        assert!(text.contains(r#"nginx_operator_reconciliations_total{outcome="child_pending"} 1"#));
    }

    #[tokio::test]
    async fn test_failures_back_off_until_success() {
        let (store, nginx) = seeded();
        let ctx = context(&store, Duration::from_secs(30));

        for expected in [5, 5, 10] {
            store.fail_next::<Deployment>(Operation::Get, Failure::Unavailable);
            let err = reconcile_nginx(Arc::clone(&nginx), Arc::clone(&ctx))
                .await
                .unwrap_err();
            assert_eq!(err.step(), "fetch_child");
            let action = error_policy(Arc::clone(&nginx), &err, Arc::clone(&ctx));
            assert_eq!(action, Action::requeue(Duration::from_secs(expected)));
        }

        reconcile_nginx(Arc::clone(&nginx), Arc::clone(&ctx)).await.unwrap();
        assert!(ctx.backoff.is_empty());

        let text = ctx.metrics.render().unwrap();
        assert!(text.contains(r#"nginx_operator_reconcile_errors_total{step="fetch_child"} 3"#));
    }

    #[tokio::test]
    async fn test_conflict_requeues_quickly() {
        let (store, nginx) = seeded();
        let ctx = context(&store, Duration::from_secs(30));
        reconcile_nginx(Arc::clone(&nginx), Arc::clone(&ctx)).await.unwrap();
        observe_deployment(&store, &deployment_key("default", "web"), Some("True"));
        store.fail_next::<Nginx>(Operation::UpdateStatus, Failure::Conflict);

        let err = reconcile_nginx(Arc::clone(&nginx), Arc::clone(&ctx))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        let action = error_policy(Arc::clone(&nginx), &err, Arc::clone(&ctx));
        assert_eq!(action, Action::requeue(CONFLICT_REQUEUE));
        // Conflicts do not advance the backoff sequence.
        assert!(ctx.backoff.is_empty());
    }

    #[tokio::test]
    async fn test_pass_deadline_skips_status_write() {
        let (store, nginx) = seeded();
        let key = ObjectKey::new("default", "web");
        store
            .mutate(&key, |n: &mut Nginx| {
                n.spec.reconcile_delay = Some(Duration::from_secs(3600));
            })
            .unwrap();
        let ctx = context(&store, Duration::from_millis(50));
        reconcile_nginx(Arc::clone(&nginx), Arc::clone(&ctx)).await.unwrap();
        observe_deployment(&store, &deployment_key("default", "web"), Some("True"));

        let err = reconcile_nginx(Arc::clone(&nginx), Arc::clone(&ctx))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Timeout(_)));
        assert_eq!(store.writes::<Nginx>().status_updates, 0);
    }

    #[test]
    fn test_unwatched_owner_is_not_a_warning() {
        let owner = ObjectRef::<Nginx>::new("other").within("default").erase();
        assert_eq!(
            runtime_error_level(&controller::Error::ObjectNotFound(owner.clone())),
            Some(Level::DEBUG)
        );

        let failed = controller::Error::ReconcilerFailed(
            ControllerError::Cancelled(ObjectKey::new("default", "other")),
            owner,
        );
        assert_eq!(runtime_error_level(&failed), None);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_pending_delay() {
        let (store, nginx) = seeded();
        let key = ObjectKey::new("default", "web");
        store
            .mutate(&key, |n: &mut Nginx| {
                n.spec.reconcile_delay = Some(Duration::from_secs(3600));
            })
            .unwrap();
        let ctx = context(&store, Duration::from_secs(30));
        reconcile_nginx(Arc::clone(&nginx), Arc::clone(&ctx)).await.unwrap();
        observe_deployment(&store, &deployment_key("default", "web"), Some("True"));

        ctx.shutdown.cancel();
        let err = reconcile_nginx(Arc::clone(&nginx), Arc::clone(&ctx))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Cancelled(_)));
        assert_eq!(store.writes::<Nginx>().status_updates, 0);
    }
}
