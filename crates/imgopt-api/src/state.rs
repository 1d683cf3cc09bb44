//! Application state shared by every handler.

use crate::auth::{AuthFailureLimiter, SessionStore};
use imgopt_core::Config;
use imgopt_db::{BatchRepository, SettingsRepository};
use imgopt_storage::Storage;
use imgopt_worker::{RetentionSweeper, WorkerPool};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Admin session handling.
pub struct AuthState {
    pub sessions: SessionStore,
    pub failures: AuthFailureLimiter,
    /// Path attribute of the session cookie.
    pub cookie_path: String,
    /// Adds `Secure` to the session cookie.
    pub secure_cookie: bool,
}

/// Background processing owned by the application.
pub struct WorkerState {
    pub pool: WorkerPool,
    pub sweeper: RetentionSweeper,
}

pub struct AppState {
    pub config: Config,
    pub batches: BatchRepository,
    pub settings: SettingsRepository,
    pub storage: Arc<dyn Storage>,
    pub workers: WorkerState,
    pub auth: AuthState,
    /// Stops the sweeper; the pool has its own shutdown.
    pub background: CancellationToken,
}

impl AppState {
    /// Stop background work: the sweeper at once, workers after their current batch
    /// or the pool's grace period.
    pub async fn shutdown(&self) {
        self.background.cancel();
        self.workers.pool.shutdown().await;
    }
}
