//! Service initialization and application state setup

use anyhow::{Context, Result};
use imgopt_core::{BatchStatus, Config};
use imgopt_db::{BatchRepository, SettingsRepository};
use imgopt_processing::{ImageOptimizer, OptimizerSettings};
use imgopt_storage::{reclaim_batch_artifacts, Storage};
use imgopt_worker::{PoolConfig, RetentionSweeper, WorkerPool};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::auth::{AuthFailureLimiter, SessionStore};
use crate::constants::{LOGIN_FAILURE_WINDOW_SECS, MAX_LOGIN_FAILURES};
use crate::state::{AppState, AuthState, WorkerState};
use crate::task_handlers::WorkbookBatchHandler;

use super::storage::state_root;

pub async fn initialize_services(
    config: &Config,
    storage: Arc<dyn Storage>,
) -> Result<Arc<AppState>> {
    let root = state_root(config);
    let batches = BatchRepository::open(&root)
        .await
        .context("Failed to open batch store")?;
    let settings = SettingsRepository::open(&root, config.initial_admin_settings())
        .await
        .context("Failed to open settings store")?;
    // Batches deleted mid-processing before a restart never had their files reclaimed.
    for id in batches.ids_with_status(BatchStatus::Deleted) {
        if let Err(e) = reclaim_batch_artifacts(storage.as_ref(), id).await {
            tracing::warn!(batch_id = %id, error = %e, "Failed to reclaim deleted batch");
        }
    }

    let current = settings.snapshot();
    tracing::info!(
        queued = batches.queued_len(),
        desired_workers = current.desired_workers,
        threads_per_batch = current.threads_per_batch,
        retention_days = current.retention_days,
        auto_purge = current.auto_purge,
        "Stores opened"
    );

    let optimizer = ImageOptimizer::new(storage.clone(), OptimizerSettings::from_config(config))?;
    let handler = Arc::new(WorkbookBatchHandler::new(storage.clone(), optimizer));
    let pool = WorkerPool::start(
        batches.clone(),
        settings.clone(),
        handler,
        storage.clone(),
        PoolConfig::from_config(config),
    );

    let background = CancellationToken::new();
    let sweeper = RetentionSweeper::new(batches.clone(), settings.clone(), storage.clone());
    sweeper.clone().spawn(
        Duration::from_secs(config.purge_interval_secs()),
        background.clone(),
    );

    let cookie_path = if config.base_path().is_empty() {
        "/".to_string()
    } else {
        config.base_path().to_string()
    };
    let ttl_secs = u64::try_from(config.session_ttl_hours()).unwrap_or(0) * 3600;
    let auth = AuthState {
        sessions: SessionStore::new(Duration::from_secs(ttl_secs)),
        failures: AuthFailureLimiter::new(MAX_LOGIN_FAILURES, LOGIN_FAILURE_WINDOW_SECS),
        cookie_path,
        secure_cookie: config.is_production(),
    };

    Ok(Arc::new(AppState {
        config: config.clone(),
        batches,
        settings,
        storage,
        workers: WorkerState { pool, sweeper },
        auth,
        background,
    }))
}
