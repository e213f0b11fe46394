//! Host reboot mechanisms.

use crate::error::RebootError;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

/// Reboots the machine the agent runs on.
///
/// Called only after `reboot-in-progress` is durably recorded.
#[async_trait::async_trait]
pub trait RebootAction: Send + Sync {
    /// Starts the reboot. May never return if the host goes down.
    async fn reboot(&self) -> Result<(), RebootError>;
}

/// Reboots through systemd.
#[derive(Debug, Clone, Default)]
pub struct SystemdReboot;

#[async_trait::async_trait]
impl RebootAction for SystemdReboot {
    async fn reboot(&self) -> Result<(), RebootError> {
        info!("Running systemctl reboot");
        let status = Command::new("systemctl").arg("reboot").status().await?;
        if !status.success() {
            return Err(RebootError::Failed(format!("systemctl reboot exited with {status}")));
        }

        info!("Reboot scheduled, waiting for the host to go down");
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Pretends to reboot: logs and sleeps.
#[derive(Debug, Clone)]
pub struct DryRunReboot {
    duration: Duration,
}

impl DryRunReboot {
    /// A dry run that takes `duration`.
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait::async_trait]
impl RebootAction for DryRunReboot {
    async fn reboot(&self) -> Result<(), RebootError> {
        warn!("Dry run: would reboot now, sleeping {:?} instead", self.duration);
        tokio::time::sleep(self.duration).await;
        info!("Dry run: reboot finished");
        Ok(())
    }
}
