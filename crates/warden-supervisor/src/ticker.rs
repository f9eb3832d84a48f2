use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::JobSupervisor;

/// Handle for the optional background session-cleanup loop.
#[derive(Debug)]
pub struct CleanupTicker {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl CleanupTicker {
    /// Signals the loop to stop and waits for it to exit.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(());
        let _ = self.handle.await;
    }
}

impl JobSupervisor {
    /// Spawns a periodic idle-session cleanup loop. Workspaces are never
    /// deleted by the ticker.
    pub fn spawn_cleanup_ticker(&self, interval: Duration) -> CleanupTicker {
        let supervisor = self.clone();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = tokio::time::sleep(interval) => {
                        match supervisor.cleanup(false).await {
                            Ok(report) if !report.removed.is_empty() => {
                                tracing::debug!(
                                    "cleanup ticker removed {} idle session(s)",
                                    report.removed.len()
                                );
                            }
                            Ok(_) => {}
                            Err(error) => {
                                tracing::warn!("cleanup ticker failed: {error}");
                            }
                        }
                    }
                }
            }
        });
        CleanupTicker { stop_tx, handle }
    }
}
