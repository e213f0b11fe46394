//! Agent-specific error types.

use node_client::StoreError;
use thiserror::Error;

/// Configuration could not be read from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required variable not set
    #[error("{0} environment variable is required")]
    Missing(&'static str),

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

/// The reboot mechanism failed.
#[derive(Debug, Error)]
pub enum RebootError {
    /// The reboot command could not be started
    #[error("Failed to run reboot command: {0}")]
    Spawn(#[from] std::io::Error),

    /// The reboot command ran and reported failure
    #[error("Reboot command failed: {0}")]
    Failed(String),
}

/// Errors that can occur in the Reboot Agent.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Node store error
    #[error("Node store error: {0}")]
    Store(#[from] StoreError),

    /// Reboot action error
    #[error("Reboot error: {0}")]
    Reboot(#[from] RebootError),
}

impl AgentError {
    /// The node moved on since the snapshot was read; the next event carries the fresh one.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_conflict())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_store_conflicts_are_conflicts() {
        assert!(AgentError::Store(StoreError::Conflict("worker-1".into())).is_conflict());
        assert!(!AgentError::Store(StoreError::Transport("reset".into())).is_conflict());
        assert!(!AgentError::Reboot(RebootError::Failed("exit status: 1".into())).is_conflict());
    }
}
