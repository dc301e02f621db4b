//! Background eviction of idle upload sessions.

use crate::services::upload_service::UploadService;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Run `evict_expired` every `interval` until `shutdown` is cancelled.
pub fn spawn_sweeper(
    service: UploadService,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let evicted = service.evict_expired(&shutdown).await;
            if evicted > 0 {
                tracing::info!(evicted, "session sweeper evicted idle uploads");
            }
        }
        tracing::debug!("session sweeper stopped");
    })
}
