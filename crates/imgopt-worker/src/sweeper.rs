//! Retention sweeper
//!
//! Removes terminal batches older than the retention window, together with their
//! stored files. Runs on a timer while auto-purge is on and on demand from the
//! admin purge endpoint.

use chrono::Utc;
use imgopt_db::{BatchRepository, SettingsRepository};
use imgopt_storage::{reclaim_batch_artifacts, Storage};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct RetentionSweeper {
    batches: BatchRepository,
    settings: SettingsRepository,
    storage: Arc<dyn Storage>,
}

impl RetentionSweeper {
    pub fn new(
        batches: BatchRepository,
        settings: SettingsRepository,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            batches,
            settings,
            storage,
        }
    }

    /// Purge with the current retention window and return how many batches went.
    ///
    /// A batch whose files cannot be removed is still purged; the failure is logged.
    pub async fn purge_now(&self) -> usize {
        let retention_days = self.settings.snapshot().retention_days;
        let removed = self.batches.purge_expired(retention_days, Utc::now()).await;
        for batch_id in &removed {
            if let Err(e) = reclaim_batch_artifacts(self.storage.as_ref(), *batch_id).await {
                tracing::warn!(batch_id = %batch_id, error = %e, "Failed to reclaim purged batch");
            }
        }
        removed.len()
    }

    /// Sweep every `period` while auto-purge is enabled, until `shutdown` fires.
    pub fn spawn(self, period: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(interval_secs = period.as_secs(), "Retention sweeper started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if !self.settings.snapshot().auto_purge {
                            continue;
                        }
                        let purged = self.purge_now().await;
                        if purged > 0 {
                            tracing::info!(purged, "Automatic purge finished");
                        }
                    }
                }
            }

            tracing::info!("Retention sweeper stopped");
        })
    }
}
