//! Background task that closes idle sessions.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agent::SessionRegistry;

/// Periodically reap sessions idle longer than `idle_threshold`.
///
/// Stops when `shutdown` is cancelled.
pub fn spawn_reaper(
    registry: Arc<SessionRegistry>,
    interval: Duration,
    idle_threshold: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            "Starting session reaper: interval {:?}, idle threshold {:?}",
            interval,
            idle_threshold
        );

        let mut ticker = tokio::time::interval(interval);
        // Don't scan immediately on startup
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let reaped = registry.reap_idle(idle_threshold).await;
                    if reaped > 0 {
                        tracing::debug!("{} session(s) still open", registry.len().await);
                    }
                }
            }
        }

        tracing::info!("Session reaper stopped");
    })
}
