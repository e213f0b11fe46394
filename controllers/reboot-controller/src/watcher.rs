//! Cache event pump.
//!
//! Turns informer events into work-queue keys. Keys carry only the node name;
//! workers read the current state from the cache when they get to it.

use crate::metrics::Metrics;
use crate::reconciler::{is_unavailable, is_waiting};
use controller_runtime::{CacheEvent, CacheReader, WorkQueue};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Enqueues the node of every cache event until the informer goes away.
///
/// When a node stops counting as unavailable (reboot finished, became ready,
/// deleted) every node still waiting for admission is enqueued as well, so
/// pending requests do not have to wait for the next resync.
pub async fn run_event_pump(
    mut events: mpsc::UnboundedReceiver<CacheEvent>,
    queue: WorkQueue<String>,
    cache: CacheReader,
    metrics: std::sync::Arc<Metrics>,
) {
    info!("Starting node event pump");

    while let Some(event) = events.recv().await {
        let freed = match &event {
            CacheEvent::Added(_) => false,
            CacheEvent::Updated { old, new } => is_unavailable(old) && !is_unavailable(new),
            CacheEvent::Deleted(machine) => {
                debug!("Node {} deleted", machine.name);
                is_unavailable(machine)
            }
        };

        queue.add(event.name().to_string());

        if freed {
            debug!("Node {} freed capacity, re-evaluating waiting nodes", event.name());
            for machine in cache.snapshot().iter().filter(|m| is_waiting(m)) {
                queue.add(machine.name.clone());
            }
        }

        metrics.set_queue_depth(queue.len());
    }

    info!("Node event pump stopped");
}
