//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the node informer,
//! the event pump, the reconcile workers and the metrics server together and
//! runs them until shutdown.

use crate::config::Config;
use crate::error::ControllerError;
use crate::metrics::{self, Metrics};
use crate::reconciler::{handle_result, Reconciler};
use crate::watcher::run_event_pump;
use controller_runtime::shutdown::{self, wait_for_shutdown, ShutdownSignal};
use controller_runtime::{Informer, InformerConfig, WorkQueue};
use node_client::{NodeStore, Selector};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Main controller for cluster-wide reboot admission.
pub struct Controller {
    config: Config,
    store: Arc<dyn NodeStore>,
    metrics: Arc<Metrics>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Creates a new controller instance.
    pub fn new(config: Config, store: Arc<dyn NodeStore>) -> Result<Self, ControllerError> {
        info!("Initializing Reboot Controller");
        Ok(Self {
            config,
            store,
            metrics: Arc::new(Metrics::new()?),
        })
    }

    /// Runs the controller until `shutdown` fires or the metrics server fails.
    ///
    /// Workers start only once the node cache has synced. On shutdown the queue
    /// is closed and every worker finishes its current reconcile before exiting.
    pub async fn run(self, mut shutdown: ShutdownSignal) -> Result<(), ControllerError> {
        // Stops the informer and the server, whichever way run ends
        let (stop, internal) = shutdown::channel();

        let (informer, events) = Informer::new(
            Arc::clone(&self.store),
            Selector::All,
            InformerConfig {
                resync_interval: self.config.resync_interval,
                ..InformerConfig::default()
            },
        );
        let cache = informer.reader();
        let informer_task = tokio::spawn(informer.run(internal.clone()));

        let mut server_task = tokio::spawn(metrics::serve(
            self.config.metrics_addr,
            metrics::router(Arc::clone(&self.metrics), cache.clone()),
            internal,
        ));

        info!("Waiting for node cache to sync");
        let mut sync_signal = shutdown.clone();
        let synced = tokio::select! {
            synced = cache.wait_for_sync(&mut sync_signal) => synced,
            result = &mut server_task => {
                let _ = stop.send(true);
                join_quietly("informer", informer_task).await;
                return flatten(result);
            }
        };
        if !synced {
            info!("Shutdown requested before the node cache synced");
            let _ = stop.send(true);
            join_quietly("informer", informer_task).await;
            return flatten(server_task.await);
        }
        info!("Node cache synced with {} nodes", cache.len());

        let queue: WorkQueue<String> = WorkQueue::new();
        let pump_task = tokio::spawn(run_event_pump(
            events,
            queue.clone(),
            cache.clone(),
            Arc::clone(&self.metrics),
        ));

        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&self.store),
            cache,
            self.config.max_unavailable,
            Arc::clone(&self.metrics),
        ));
        let workers: Vec<JoinHandle<()>> = (0..self.config.worker_count)
            .map(|id| {
                tokio::spawn(run_worker(
                    id,
                    queue.clone(),
                    Arc::clone(&reconciler),
                    Arc::clone(&self.metrics),
                    self.config.max_retries,
                ))
            })
            .collect();

        info!(
            "Reboot Controller running with {} workers, max unavailable {}",
            self.config.worker_count, self.config.max_unavailable
        );

        let server_result = tokio::select! {
            () = wait_for_shutdown(&mut shutdown) => None,
            result = &mut server_task => Some(flatten(result)),
        };

        info!("Shutting down Reboot Controller");
        let _ = stop.send(true);
        queue.shut_down();
        for worker in workers {
            join_quietly("worker", worker).await;
        }
        join_quietly("informer", informer_task).await;
        // The pump ends once the informer has dropped its event sender
        join_quietly("event pump", pump_task).await;

        match server_result {
            Some(result) => result,
            None => flatten(server_task.await),
        }
    }
}

/// Pulls keys until the queue shuts down.
async fn run_worker(
    id: usize,
    queue: WorkQueue<String>,
    reconciler: Arc<Reconciler>,
    metrics: Arc<Metrics>,
    max_retries: u32,
) {
    info!("Worker {} started", id);
    while let Some(key) = queue.get().await {
        let result = reconciler.reconcile(&key).await;
        handle_result(&queue, &metrics, max_retries, &key, result);
        queue.done(&key);
        metrics.set_queue_depth(queue.len());
    }
    info!("Worker {} stopped", id);
}

fn flatten(
    result: Result<Result<(), ControllerError>, tokio::task::JoinError>,
) -> Result<(), ControllerError> {
    match result {
        Ok(inner) => inner,
        Err(e) => {
            error!("Metrics server task panicked: {}", e);
            Err(ControllerError::Join(e))
        }
    }
}

async fn join_quietly(what: &str, handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        error!("{} task panicked: {}", what, e);
    }
}
