//! Reboot Agent
//!
//! Runs on every node (DaemonSet). Watches only its own `Node` object and, once
//! the controller has set `reboot-now`, records `reboot-in-progress` and reboots
//! the host. After the node comes back the agent clears `reboot-in-progress`.

mod agent;
mod config;
mod error;
mod reboot;
mod reconciler;

use agent::Agent;
use anyhow::{Context, Result};
use config::Config;
use controller_runtime::shutdown;
use node_client::KubeNodeStore;
use reboot::{DryRunReboot, RebootAction, SystemdReboot};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    // kube uses rustls; pin the ring provider before any TLS config is built
    let _ = rustls::crypto::ring::default_provider().install_default();

    info!("Starting Reboot Agent v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration from environment variables
    let config = Config::from_env().context("failed to load agent configuration")?;

    info!("Configuration:");
    info!("  Node: {}", config.node_name);
    info!("  Resync interval: {:?}", config.resync_interval);
    info!("  Dry run: {}", config.dry_run);

    let reboot: Arc<dyn RebootAction> = if config.dry_run {
        warn!("Dry run enabled: the host will not be rebooted");
        Arc::new(DryRunReboot::new(config.dry_run_sleep))
    } else {
        Arc::new(SystemdReboot)
    };

    let client = kube::Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    let store = Arc::new(KubeNodeStore::new(client));

    let (trigger, signal) = shutdown::channel();
    tokio::spawn(async move {
        shutdown::os_signal().await;
        let _ = trigger.send(true);
    });

    Agent::new(&config, store, reboot).run(signal).await;

    info!("Reboot Agent stopped");
    Ok(())
}
