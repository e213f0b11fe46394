//! Node store errors

use thiserror::Error;

/// Errors that can occur when talking to the node store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Kubernetes API or transport error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The record changed since the version token used for the update was read
    #[error("Conflict updating node {0}: resource version is stale")]
    Conflict(String),

    /// The resume token is too old to watch from; a fresh list is required
    #[error("Resource version expired: {0}")]
    Expired(String),

    /// Node does not exist
    #[error("Node not found: {0}")]
    NotFound(String),

    /// Record does not have the expected shape (missing name, version, ...)
    #[error("Malformed node record: {0}")]
    Malformed(String),

    /// JSON serialization error while building a patch
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Watch stream or connection broke
    #[error("Transport error: {0}")]
    Transport(String),
}

impl StoreError {
    /// Maps a kube error onto the store taxonomy using the HTTP status code.
    pub fn from_kube(err: kube::Error, name: &str) -> Self {
        match &err {
            kube::Error::Api(response) if response.code == 409 => Self::Conflict(name.to_string()),
            kube::Error::Api(response) if response.code == 410 => {
                Self::Expired(response.message.clone())
            }
            kube::Error::Api(response) if response.code == 404 => Self::NotFound(name.to_string()),
            _ => Self::Kube(err),
        }
    }

    /// Optimistic concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Retrying cannot fix a structural problem with the record
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Malformed(_) | Self::Serialization(_))
    }
}
