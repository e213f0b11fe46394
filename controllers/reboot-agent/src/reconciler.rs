//! Per-node reboot reconciler.
//!
//! Drives this agent's node through the agent half of the lifecycle:
//! `Now -> InProgress` (then reboot) and `InProgress -> Idle` once the node is
//! back. Every step is a conditional update against the snapshot it was
//! computed from.

use crate::error::AgentError;
use crate::reboot::RebootAction;
use node_client::{Machine, NodeStore};
use reboot_state::{derive_state, transition_for, Actor, RebootState};
use std::sync::Arc;
use tracing::{debug, info};

/// Result of reconciling one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentOutcome {
    /// Snapshot is about another node
    Ignored,
    /// Nothing for the agent to do in this state
    NoOp,
    /// `reboot-in-progress` recorded and the reboot action returned
    Rebooted,
    /// `reboot-in-progress` cleared: the reboot cycle is complete
    Completed,
}

/// Reconciles the reboot annotations of a single node.
pub struct Reconciler {
    store: Arc<dyn NodeStore>,
    node_name: String,
    reboot: Arc<dyn RebootAction>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("node_name", &self.node_name)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a reconciler for `node_name`.
    pub fn new(
        store: Arc<dyn NodeStore>,
        node_name: impl Into<String>,
        reboot: Arc<dyn RebootAction>,
    ) -> Self {
        Self {
            store,
            node_name: node_name.into(),
            reboot,
        }
    }

    /// Name of the node this reconciler drives.
    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Reconciles one snapshot of the node.
    ///
    /// With `reboot-now` set the agent first records `reboot-in-progress` and only
    /// reboots once that write succeeded; a failed write aborts without
    /// rebooting. With `reboot-in-progress` set the node is back from its reboot
    /// and the marker is cleared. A failed write is retried on the next event.
    pub async fn reconcile(&self, machine: &Machine) -> Result<AgentOutcome, AgentError> {
        if machine.name != self.node_name {
            debug!("Ignoring event for node {}", machine.name);
            return Ok(AgentOutcome::Ignored);
        }

        let state = derive_state(&machine.annotations);
        let Some(transition) = transition_for(state, Actor::Agent) else {
            debug!("Node {} is {}, nothing to do", machine.name, state);
            return Ok(AgentOutcome::NoOp);
        };

        let mut desired = machine.annotations.clone();
        transition.apply(&mut desired);
        self.store.update_annotations(machine, &desired).await?;

        if transition.to == RebootState::InProgress {
            info!("Node {} marked {}, rebooting", machine.name, transition.to);
            self.reboot.reboot().await?;
            Ok(AgentOutcome::Rebooted)
        } else {
            info!("Node {} is back, reboot complete", machine.name);
            Ok(AgentOutcome::Completed)
        }
    }
}
