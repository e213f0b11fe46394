//! Process-wide shutdown signalling.
//!
//! A `watch::channel(false)` flipped to `true` once. Every long-running task
//! holds a [`ShutdownSignal`] clone and exits when it observes the flip.

use tokio::sync::watch;
use tracing::info;

/// Receiving side handed to every task that must stop on shutdown.
pub type ShutdownSignal = watch::Receiver<bool>;

/// Sending side; `send(true)` (or dropping it) stops every holder of a [`ShutdownSignal`].
pub type ShutdownTrigger = watch::Sender<bool>;

/// Creates a fresh, not-yet-triggered shutdown pair.
pub fn channel() -> (ShutdownTrigger, ShutdownSignal) {
    watch::channel(false)
}

/// Resolves once shutdown is requested or the trigger is gone.
pub async fn wait_for_shutdown(signal: &mut ShutdownSignal) {
    // Err means every trigger was dropped, which is a shutdown as well
    let _ = signal.wait_for(|stop| *stop).await;
}

/// Resolves on Ctrl-C, or on SIGTERM where the platform has it.
pub async fn os_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                tracing::warn!("Cannot install SIGTERM handler ({}), waiting for Ctrl-C only", e);
                let _ = tokio::signal::ctrl_c().await;
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl-C");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_for_shutdown_on_send() {
        let (trigger, mut signal) = channel();
        let waiter = tokio::spawn(async move { wait_for_shutdown(&mut signal).await });
        trigger.send(true).expect("receiver alive");
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("woke up")
            .expect("joined");
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_on_drop() {
        let (trigger, mut signal) = channel();
        drop(trigger);
        tokio::time::timeout(Duration::from_secs(1), wait_for_shutdown(&mut signal))
            .await
            .expect("dropped trigger ends the wait");
    }
}
