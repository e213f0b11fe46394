//! Controller-specific error types.
//!
//! Retryable errors send the key back to the work queue with backoff; the
//! others are logged and the key is dropped.

use node_client::StoreError;
use thiserror::Error;

/// Configuration could not be read from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Variable present but unusable
    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        /// Environment variable name
        key: &'static str,
        /// Raw value found
        value: String,
        /// What is wrong with it
        reason: String,
    },
}

/// Errors that can occur in the Reboot Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes client construction failed
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Node store error
    #[error("Node store error: {0}")]
    Store(#[from] StoreError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Admitting the node would exceed the unavailability bound
    #[error("Admission denied for node {node}: {unavailable} unavailable, limit {max_unavailable}")]
    AdmissionDenied {
        /// Node that asked for a reboot
        node: String,
        /// Machines counted unavailable at decision time
        unavailable: usize,
        /// Configured bound
        max_unavailable: usize,
    },

    /// Metrics registration or encoding failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Metrics server could not bind or serve
    #[error("Metrics server error: {0}")]
    Server(#[from] std::io::Error),

    /// A background task panicked or was cancelled
    #[error("Task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ControllerError {
    /// Whether the key should be requeued with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            Self::AdmissionDenied { .. } => true,
            Self::Kube(_)
            | Self::Config(_)
            | Self::Metrics(_)
            | Self::Server(_)
            | Self::Join(_) => false,
        }
    }

    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Store(StoreError::Conflict(_)) => "conflict",
            Self::Store(e) if !e.is_retryable() => "malformed",
            Self::Store(_) => "store_error",
            Self::AdmissionDenied { .. } => "admission_denied",
            Self::Kube(_)
            | Self::Config(_)
            | Self::Metrics(_)
            | Self::Server(_)
            | Self::Join(_) => "error",
        }
    }
}
