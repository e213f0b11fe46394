//! Reboot admission reconciler.
//!
//! Moves a machine from `Requested` to `Now` when doing so keeps the number of
//! unavailable machines under `max_unavailable`. Every decision reads the cache
//! afresh; nothing from an earlier attempt is reused.

use crate::error::ControllerError;
use crate::metrics::Metrics;
use controller_runtime::{CacheReader, WorkQueue};
use node_client::{Machine, NodeStore, StoreError};
use reboot_state::{derive_state, transition_for, Actor, RebootState};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Successful reconcile results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The node is not in the cache (deleted, or never seen)
    NotFound,
    /// Nothing to admit: no request, or the node is already past `Requested`
    NotRequested,
    /// `reboot-now` written
    Admitted,
}

impl Outcome {
    /// Metric label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::NotRequested => "not_requested",
            Self::Admitted => "admitted",
        }
    }
}

/// What happened to a key after a reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Success: backoff history cleared
    Forgotten,
    /// Retryable failure: re-added with backoff
    Requeued,
    /// Retryable failure past the retry ceiling: dropped
    Abandoned,
    /// Failure retrying cannot fix: dropped
    Dropped,
}

/// Admissions written by this controller that the cache has not caught up with.
///
/// Maps node name to the resource version the admission was written against.
type PendingAdmissions = HashMap<String, String>;

/// Reconciles reboot requests against the cluster-wide unavailability bound.
pub struct Reconciler {
    store: Arc<dyn NodeStore>,
    cache: CacheReader,
    max_unavailable: usize,
    metrics: Arc<Metrics>,
    /// Serializes scan + update across workers and carries the pending admissions
    admission: Mutex<PendingAdmissions>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("max_unavailable", &self.max_unavailable)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        store: Arc<dyn NodeStore>,
        cache: CacheReader,
        max_unavailable: usize,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            cache,
            max_unavailable,
            metrics,
            admission: Mutex::new(PendingAdmissions::new()),
        }
    }

    /// Reconciles the node named `name`.
    ///
    /// This method:
    /// 1. Looks the node up in the cache
    /// 2. Returns unless its derived state is `Requested`
    /// 3. Counts unavailable machines over a fresh snapshot
    /// 4. Denies if admitting would reach the bound, otherwise writes `reboot-now`
    ///    with a conditional update against the cached version
    pub async fn reconcile(&self, name: &str) -> Result<Outcome, ControllerError> {
        let Some(machine) = self.cache.get(name) else {
            debug!("Node {} not in cache, nothing to do", name);
            return Ok(Outcome::NotFound);
        };

        let state = derive_state(&machine.annotations);
        let Some(transition) = transition_for(state, Actor::Controller) else {
            debug!("Node {} is {}, nothing to admit", name, state);
            return Ok(Outcome::NotRequested);
        };

        let mut pending = self.admission.lock().await;

        let unavailable = self.count_unavailable(&mut pending);
        self.metrics.set_unavailable(unavailable);
        if unavailable >= self.max_unavailable {
            return Err(ControllerError::AdmissionDenied {
                node: name.to_string(),
                unavailable,
                max_unavailable: self.max_unavailable,
            });
        }

        let mut desired = machine.annotations.clone();
        transition.apply(&mut desired);
        self.store.update_annotations(&machine, &desired).await?;

        pending.insert(machine.name.clone(), machine.resource_version.clone());
        info!(
            "Admitted reboot of node {} ({} of {} unavailable before admission)",
            name, unavailable, self.max_unavailable
        );
        Ok(Outcome::Admitted)
    }

    /// Counts machines that are rebooting, admitted, not ready, or admitted by us
    /// but not yet visible as such in the cache. Prunes pending admissions the
    /// cache has caught up with.
    fn count_unavailable(&self, pending: &mut PendingAdmissions) -> usize {
        let snapshot = self.cache.snapshot();
        let by_name: HashMap<&str, &Machine> =
            snapshot.iter().map(|m| (m.name.as_str(), m)).collect();

        pending.retain(|name, written_against| {
            by_name
                .get(name.as_str())
                .is_some_and(|m| &m.resource_version == written_against)
        });

        snapshot
            .iter()
            .filter(|m| is_unavailable(m) || pending.contains_key(&m.name))
            .count()
    }
}

/// Applies the retry policy to a reconcile result and records its metrics.
///
/// Must be called before `done` for the key.
pub fn handle_result(
    queue: &WorkQueue<String>,
    metrics: &Metrics,
    max_retries: u32,
    key: &str,
    result: Result<Outcome, ControllerError>,
) -> Disposition {
    let key = key.to_string();
    match result {
        Ok(outcome) => {
            metrics.reconciled(outcome.as_str());
            queue.forget(&key);
            Disposition::Forgotten
        }
        Err(e) => {
            metrics.reconciled(e.kind());
            match &e {
                ControllerError::AdmissionDenied { .. } => {
                    metrics.admission_denied();
                    info!("{}", e);
                }
                ControllerError::Store(StoreError::Conflict(_)) => {
                    debug!("Node {} changed under us, will retry from the cache: {}", key, e);
                }
                _ => warn!("Failed to reconcile node {}: {}", key, e),
            }

            if !e.is_retryable() {
                warn!("Dropping node {} without retry: {}", key, e);
                queue.forget(&key);
                return Disposition::Dropped;
            }

            if queue.num_requeues(&key) < max_retries {
                metrics.requeued();
                queue.add_rate_limited(key);
                Disposition::Requeued
            } else {
                warn!(
                    "Abandoning node {} after {} retries: {}",
                    key, max_retries, e
                );
                metrics.abandoned();
                queue.forget(&key);
                Disposition::Abandoned
            }
        }
    }
}

/// Whether the cached record counts against the unavailability bound.
pub fn is_unavailable(machine: &Machine) -> bool {
    derive_state(&machine.annotations).is_unavailable() || machine.is_not_ready()
}

/// Whether the cached record is waiting for admission.
pub fn is_waiting(machine: &Machine) -> bool {
    derive_state(&machine.annotations) == RebootState::Requested
}
