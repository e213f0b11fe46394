//! Prometheus metrics and HTTP probes.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `reboot_controller_reconcile_total` | Counter | `outcome` |
//! | `reboot_controller_requeues_total` | Counter | |
//! | `reboot_controller_abandoned_total` | Counter | |
//! | `reboot_controller_admission_denied_total` | Counter | |
//! | `reboot_controller_queue_depth` | Gauge | |
//! | `reboot_controller_unavailable_machines` | Gauge | |
//!
//! Routes: `/metrics`, `/healthz` (process is up), `/readyz` (node cache synced).

use crate::error::ControllerError;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use controller_runtime::shutdown::{wait_for_shutdown, ShutdownSignal};
use controller_runtime::CacheReader;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Controller metrics, registered on a private registry.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    reconcile_total: IntCounterVec,
    requeues_total: IntCounter,
    abandoned_total: IntCounter,
    admission_denied_total: IntCounter,
    queue_depth: IntGauge,
    unavailable_machines: IntGauge,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Creates and registers every controller metric.
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new();

        let reconcile_total = IntCounterVec::new(
            Opts::new(
                "reboot_controller_reconcile_total",
                "Reconcile attempts by outcome",
            ),
            &["outcome"],
        )?;
        let requeues_total = IntCounter::new(
            "reboot_controller_requeues_total",
            "Keys requeued with backoff after a retryable failure",
        )?;
        let abandoned_total = IntCounter::new(
            "reboot_controller_abandoned_total",
            "Keys dropped after exhausting their retries",
        )?;
        let admission_denied_total = IntCounter::new(
            "reboot_controller_admission_denied_total",
            "Reboot requests held back by the unavailability bound",
        )?;
        let queue_depth = IntGauge::new(
            "reboot_controller_queue_depth",
            "Keys waiting in the work queue",
        )?;
        let unavailable_machines = IntGauge::new(
            "reboot_controller_unavailable_machines",
            "Machines counted unavailable at the last admission decision",
        )?;

        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(requeues_total.clone()))?;
        registry.register(Box::new(abandoned_total.clone()))?;
        registry.register(Box::new(admission_denied_total.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(unavailable_machines.clone()))?;

        Ok(Self {
            registry,
            reconcile_total,
            requeues_total,
            abandoned_total,
            admission_denied_total,
            queue_depth,
            unavailable_machines,
        })
    }

    /// Counts one reconcile with the given outcome label.
    pub fn reconciled(&self, outcome: &str) {
        self.reconcile_total.with_label_values(&[outcome]).inc();
    }

    /// Counts one rate-limited requeue.
    pub fn requeued(&self) {
        self.requeues_total.inc();
    }

    /// Counts one abandoned key.
    pub fn abandoned(&self) {
        self.abandoned_total.inc();
    }

    /// Counts one denied admission.
    pub fn admission_denied(&self) {
        self.admission_denied_total.inc();
    }

    /// Records the current queue length.
    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(i64::try_from(depth).unwrap_or(i64::MAX));
    }

    /// Records the unavailable count seen by the last admission decision.
    pub fn set_unavailable(&self, unavailable: usize) {
        self.unavailable_machines
            .set(i64::try_from(unavailable).unwrap_or(i64::MAX));
    }

    /// Renders every metric in the Prometheus text format.
    pub fn encode(&self) -> Result<String, ControllerError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| {
            ControllerError::Metrics(prometheus::Error::Msg(format!("non UTF-8 metrics output: {e}")))
        })
    }
}

#[derive(Clone)]
struct AppState {
    metrics: Arc<Metrics>,
    cache: CacheReader,
}

/// Routes of the metrics and probe server.
pub fn router(metrics: Arc<Metrics>, cache: CacheReader) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { metrics, cache })
}

/// Serves `router` on `addr` until shutdown.
pub async fn serve(
    addr: SocketAddr,
    router: Router,
    mut shutdown: ShutdownSignal,
) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", listener.local_addr()?);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { wait_for_shutdown(&mut shutdown).await })
        .await?;
    info!("Metrics server stopped");
    Ok(())
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics.encode() {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<AppState>) -> (StatusCode, &'static str) {
    if state.cache.has_synced() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "node cache not synced")
    }
}
