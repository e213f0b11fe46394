//! Agent event loop.
//!
//! Follows this node's record through an informer scoped to the node and hands
//! every added or updated snapshot to the reconciler, one at a time.

use crate::config::Config;
use crate::reboot::RebootAction;
use crate::reconciler::Reconciler;
use controller_runtime::shutdown::{wait_for_shutdown, ShutdownSignal};
use controller_runtime::{CacheEvent, Informer, InformerConfig};
use node_client::{NodeStore, Selector};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Reboot agent for one node.
pub struct Agent {
    store: Arc<dyn NodeStore>,
    reconciler: Reconciler,
    resync_interval: std::time::Duration,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("reconciler", &self.reconciler)
            .field("resync_interval", &self.resync_interval)
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Creates an agent for the node named in `config`.
    pub fn new(config: &Config, store: Arc<dyn NodeStore>, reboot: Arc<dyn RebootAction>) -> Self {
        Self {
            reconciler: Reconciler::new(Arc::clone(&store), config.node_name.clone(), reboot),
            store,
            resync_interval: config.resync_interval,
        }
    }

    /// Processes events for the node until `shutdown` fires.
    pub async fn run(self, mut shutdown: ShutdownSignal) {
        let node = self.reconciler.node_name().to_string();
        let (informer, mut events) = Informer::new(
            Arc::clone(&self.store),
            Selector::Name(node.clone()),
            InformerConfig {
                resync_interval: self.resync_interval,
                ..InformerConfig::default()
            },
        );
        let informer_task = tokio::spawn(informer.run(shutdown.clone()));

        info!("Reboot Agent watching node {}", node);

        loop {
            let event = tokio::select! {
                () = wait_for_shutdown(&mut shutdown) => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            // A reboot in flight may never return; shutdown still wins
            tokio::select! {
                () = self.handle_event(event) => {}
                () = wait_for_shutdown(&mut shutdown) => break,
            }
        }

        if let Err(e) = informer_task.await {
            error!("Informer task panicked: {}", e);
        }
        info!("Reboot Agent for node {} stopped", node);
    }

    async fn handle_event(&self, event: CacheEvent) {
        let machine = match event {
            CacheEvent::Added(machine) => {
                info!("Node {} added", machine.name);
                machine
            }
            CacheEvent::Updated { new, .. } => new,
            CacheEvent::Deleted(machine) => {
                info!("Node {} deleted", machine.name);
                return;
            }
        };

        match self.reconciler.reconcile(&machine).await {
            Ok(_) => {}
            Err(e) if e.is_conflict() => {
                debug!("Node {} changed under us, waiting for the next event: {}", machine.name, e);
            }
            Err(e) => error!("Failed to reconcile node {}: {}", machine.name, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RebootError;
    use controller_runtime::shutdown;
    use node_client::{Machine, MockNodeStore};
    use reboot_state::{derive_state, RebootState, REBOOT_NOW};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingReboot {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl RebootAction for CountingReboot {
        async fn reboot(&self) -> Result<(), RebootError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config(node: &str) -> Config {
        Config {
            node_name: node.to_string(),
            resync_interval: Duration::ZERO,
            dry_run: true,
            dry_run_sleep: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_full_cycle_for_own_node_only() {
        let store = MockNodeStore::new();
        store.insert(Machine::new("mine").with_annotation(REBOOT_NOW, "t"));
        store.insert(Machine::new("other").with_annotation(REBOOT_NOW, "t"));

        let reboot = Arc::new(CountingReboot::default());
        let agent = Agent::new(&config("mine"), Arc::new(store.clone()), reboot.clone());
        let (trigger, signal) = shutdown::channel();
        let running = tokio::spawn(agent.run(signal));

        // Now -> InProgress -> reboot, then the update event clears the marker
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let node = store.get("mine").expect("node");
                if derive_state(&node.annotations) == RebootState::Idle {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("node returned to idle");

        assert_eq!(reboot.calls.load(Ordering::SeqCst), 1);
        // The other node's agent is someone else
        assert!(store.get("other").expect("node").has_annotation(REBOOT_NOW));

        trigger.send(true).expect("agent alive");
        tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .expect("agent stops")
            .expect("joined");
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_parked_reboot() {
        struct Parked;

        #[async_trait::async_trait]
        impl RebootAction for Parked {
            async fn reboot(&self) -> Result<(), RebootError> {
                std::future::pending::<()>().await;
                Ok(())
            }
        }

        let store = MockNodeStore::new();
        store.insert(Machine::new("mine").with_annotation(REBOOT_NOW, "t"));
        let agent = Agent::new(&config("mine"), Arc::new(store.clone()), Arc::new(Parked));
        let (trigger, signal) = shutdown::channel();
        let running = tokio::spawn(agent.run(signal));

        tokio::time::timeout(Duration::from_secs(5), async {
            while derive_state(&store.get("mine").expect("node").annotations)
                != RebootState::InProgress
            {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("in-progress recorded");

        trigger.send(true).expect("agent alive");
        tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .expect("agent stops")
            .expect("joined");
    }
}
