//! Main controller implementation.
//!
//! Owns the background tasks (the Nginx watcher and the metrics server) and
//! the shutdown token shared between them.

use std::sync::Arc;

use cluster_store::KubeStore;
use kube::Client;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::error::ControllerError;
use crate::metrics::{self, Metrics};
use crate::watcher::{self, Context};

type Task = JoinHandle<Result<(), ControllerError>>;

/// Main controller for Nginx resources.
#[derive(Debug)]
pub struct Controller {
    nginx_watcher: Task,
    metrics_server: Option<Task>,
    shutdown: CancellationToken,
}

impl Controller {
    /// Connects to the cluster and starts the background tasks.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing Nginx Controller");

        let client = Client::try_default().await?;
        let metrics = Metrics::new(&config.version)
            .map_err(|e| ControllerError::InvalidConfig(format!("registering metrics: {e}")))?;
        let shutdown = CancellationToken::new();

        let metrics_server = config.metrics_addr.map(|addr| {
            tokio::spawn(metrics::serve(addr, metrics.clone(), shutdown.clone()))
        });

        let ctx = Arc::new(Context::new(
            Arc::new(KubeStore::new(client.clone())),
            metrics,
            shutdown.clone(),
            config.reconcile_timeout,
        ));
        let nginx_watcher = tokio::spawn(watcher::run(client, config, ctx));

        Ok(Self {
            nginx_watcher,
            metrics_server,
            shutdown,
        })
    }

    /// Runs until a shutdown signal arrives or a background task fails.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("Nginx Controller running");

        let signal_token = self.shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            signal_token.cancel();
        });

        let Self {
            nginx_watcher,
            metrics_server,
            shutdown,
        } = self;

        let metrics_server = async move {
            match metrics_server {
                Some(task) => join(task, "metrics server").await,
                None => std::future::pending().await,
            }
        };

        let result = tokio::select! {
            res = join(nginx_watcher, "Nginx watcher") => res,
            res = metrics_server => res,
        };

        shutdown.cancel();
        if let Err(e) = &result {
            error!(error = %e, "controller stopped with error");
        } else {
            info!("Nginx Controller stopped");
        }
        result
    }
}

async fn join(task: Task, name: &str) -> Result<(), ControllerError> {
    task.await
        .map_err(|e| ControllerError::Watch(format!("{name} task panicked: {e}")))?
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "installing SIGTERM handler failed, waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("shutdown signal received");
}
