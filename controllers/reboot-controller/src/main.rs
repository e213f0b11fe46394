//! Reboot Controller
//!
//! Cluster-wide admission control for node reboots.
//!
//! Watches every `Node`, and when a node carries `reboot-requested` moves it to
//! `reboot-now` as long as fewer than `MAX_UNAVAILABLE` nodes are rebooting or
//! not ready. The reboot agent on the node takes it from there.

mod config;
mod controller;
mod error;
mod metrics;
mod reconciler;
mod watcher;

use crate::config::Config;
use crate::error::ControllerError;
use controller::Controller;
use controller_runtime::shutdown;
use node_client::KubeNodeStore;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt::init();

    // kube uses rustls; pin the ring provider before any TLS config is built
    let _ = rustls::crypto::ring::default_provider().install_default();

    info!("Starting Reboot Controller v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration from environment variables
    let config = Config::from_env()?;

    info!("Configuration:");
    info!("  Max unavailable: {}", config.max_unavailable);
    info!("  Resync interval: {:?}", config.resync_interval);
    info!("  Workers: {}", config.worker_count);
    info!("  Max retries: {}", config.max_retries);
    info!("  Metrics address: {}", config.metrics_addr);

    // In-cluster service account, or KUBECONFIG when run outside the cluster
    let client = kube::Client::try_default().await?;
    let store = Arc::new(KubeNodeStore::new(client));

    let (trigger, signal) = shutdown::channel();
    tokio::spawn(async move {
        shutdown::os_signal().await;
        let _ = trigger.send(true);
    });

    // Initialize and run controller
    let controller = Controller::new(config, store)?;
    controller.run(signal).await?;

    info!("Reboot Controller stopped");
    Ok(())
}
