//! Graceful Shutdown Handling
//!
//! Turns SIGTERM, SIGINT and Ctrl+C into a single broadcast that stops the
//! listener and every relay session.

use std::time::Duration;
use tokio::sync::broadcast;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use crate::Result;

/// Slack on top of the drain timeout for force-closing stragglers
const CLEANUP_GRACE: Duration = Duration::from_secs(5);

/// Shutdown coordinator that manages graceful shutdown process
pub struct ShutdownCoordinator {
    /// Broadcast sender for shutdown signal
    shutdown_tx: broadcast::Sender<()>,
    /// How long the relay may take to drain
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new(timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            shutdown_tx,
            timeout,
        }
    }

    /// Get a shutdown receiver for components to listen for shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Sender handed to the relay server so it shares this coordinator's signal
    pub fn sender(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Broadcast the shutdown signal to every subscriber
    pub fn trigger(&self) {
        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to send shutdown signal: {}", e);
        }
    }

    /// Start listening for shutdown signals (SIGTERM, SIGINT)
    pub async fn listen_for_signals(&self) -> Result<()> {
        info!("Starting shutdown signal listener");

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
                _ = signal::ctrl_c() => {
                    info!("Received Ctrl+C, initiating graceful shutdown");
                }
            }
        }

        #[cfg(windows)]
        {
            signal::ctrl_c().await?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        self.trigger();
        Ok(())
    }

    /// Wait for the server task to finish draining, aborting it past the deadline
    pub async fn wait_for_completion(&self, mut task: JoinHandle<()>) -> Result<()> {
        let deadline = self.timeout + CLEANUP_GRACE;

        match tokio::time::timeout(deadline, &mut task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if e.is_cancelled() => Ok(()),
            Ok(Err(e)) => {
                error!("Server task failed: {}", e);
                Err(anyhow::anyhow!("Server task failed: {}", e))
            }
            Err(_) => {
                task.abort();
                Err(anyhow::anyhow!("Shutdown completion timeout after {:?}", deadline))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_shutdown_signal_broadcast() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        let mut first = coordinator.subscribe();
        let mut second = coordinator.subscribe();

        coordinator.trigger();

        assert!(first.recv().await.is_ok());
        assert!(second.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_trigger_without_subscribers_does_not_panic() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        coordinator.trigger();
    }

    #[tokio::test]
    async fn test_sender_shares_the_signal() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        let mut receiver = coordinator.subscribe();

        coordinator.sender().send(()).unwrap();

        assert!(receiver.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_wait_for_completion_returns_when_task_finishes() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(100));
        let mut receiver = coordinator.subscribe();

        let task = tokio::spawn(async move {
            let _ = receiver.recv().await;
            sleep(Duration::from_millis(10)).await;
        });
        coordinator.trigger();

        tokio_test::assert_ok!(coordinator.wait_for_completion(task).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_completion_gives_up_on_stuck_task() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(100));

        let task = tokio::spawn(async {
            sleep(Duration::from_secs(3600)).await;
        });

        let result = coordinator.wait_for_completion(task).await;
        assert!(result.is_err());
    }
}
