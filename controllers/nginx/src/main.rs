//! Nginx Controller
//!
//! Converges `Nginx` custom resources into `apps/v1` Deployments running
//! `nginx:<version>` and reports the Deployment's availability back onto the
//! Nginx status as an `Available` condition and a `Ready`/`NotReady` phase.

mod backoff;
mod config;
mod controller;
mod error;
mod key_lock;
mod metrics;
mod reconciler;
#[cfg(test)]
mod test_utils;
mod watcher;

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::config::Args;
use crate::controller::Controller;
use crate::error::ControllerError;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    // Install rustls crypto provider before any TLS connections
    let provider_installed = rustls::crypto::ring::default_provider()
        .install_default()
        .is_ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if !provider_installed {
        debug!("rustls crypto provider was already installed");
    }

    let config = Args::parse().into_config()?;

    info!(version = %config.version, "Starting Nginx Controller");
    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Label selector: {}", config.label_selector.as_deref().unwrap_or("<none>"));
    info!("  Concurrency: {}", config.concurrency);
    info!("  Reconcile timeout: {:?}", config.reconcile_timeout);
    match config.metrics_addr {
        Some(addr) => info!("  Metrics address: {}", addr),
        None => info!("  Metrics server disabled"),
    }

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
