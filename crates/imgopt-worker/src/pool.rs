//! Worker pool: a supervisor that keeps `desired_workers` worker tasks alive, and
//! the worker loop that claims queued batches and runs them through a handler.
//!
//! Scaling down retires the newest workers. A retired worker finishes the batch it
//! is holding and then exits, so a batch is never abandoned by a scale change.

use imgopt_core::{BatchStatus, Config};
use imgopt_db::{BatchLease, BatchRepository, LeaseOutcome, SettingsRepository};
use imgopt_storage::{reclaim_batch_artifacts, Storage};
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::context::{BatchHandler, BatchOutcome};

const TIMED_OUT_REASON: &str = "timed out";
const PANICKED_REASON: &str = "worker panicked while processing";
const ABORTED_REASON: &str = "processing task aborted";

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// How long an idle worker sleeps before looking at the queue again.
    pub poll_interval: Duration,
    /// Wall-clock limit for one batch.
    pub batch_timeout: Duration,
    /// How often the supervisor replaces workers that died.
    pub supervise_interval: Duration,
    /// How long shutdown waits for busy workers before aborting them.
    pub shutdown_grace: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            batch_timeout: Duration::from_secs(12 * 3600),
            supervise_interval: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.worker_poll_interval_ms()),
            batch_timeout: Duration::from_secs(config.batch_timeout_secs()),
            ..Self::default()
        }
    }
}

/// Live counters of the pool, shared with the admin endpoint.
#[derive(Debug, Clone, Default)]
pub struct PoolStatus {
    live: Arc<AtomicUsize>,
    busy: Arc<AtomicUsize>,
}

impl PoolStatus {
    /// Worker tasks currently running, retiring ones included.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Workers currently holding a batch.
    pub fn busy(&self) -> usize {
        self.busy.load(Ordering::SeqCst)
    }
}

/// Increments a counter for as long as it is alive, panics included.
struct CounterGuard(Arc<AtomicUsize>);

impl CounterGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for CounterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct WorkerContext {
    batches: BatchRepository,
    settings: SettingsRepository,
    handler: Arc<dyn BatchHandler>,
    storage: Arc<dyn Storage>,
    config: PoolConfig,
    status: PoolStatus,
    /// Handler task of each busy worker, keyed by worker id.
    handler_tasks: SyncMutex<HashMap<usize, AbortHandle>>,
}

struct WorkerSlot {
    id: usize,
    retire: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct WorkerPool {
    status: PoolStatus,
    shutdown: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Start the supervisor. Workers appear as soon as it reads the current
    /// `desired_workers` setting.
    pub fn start(
        batches: BatchRepository,
        settings: SettingsRepository,
        handler: Arc<dyn BatchHandler>,
        storage: Arc<dyn Storage>,
        config: PoolConfig,
    ) -> Self {
        let status = PoolStatus::default();
        let shutdown = CancellationToken::new();
        let desired = settings.subscribe();

        tracing::info!(
            poll_interval_ms = config.poll_interval.as_millis() as u64,
            batch_timeout_secs = config.batch_timeout.as_secs(),
            "Starting worker pool"
        );

        let ctx = Arc::new(WorkerContext {
            batches,
            settings,
            handler,
            storage,
            config,
            status: status.clone(),
            handler_tasks: SyncMutex::new(HashMap::new()),
        });
        let supervisor = Supervisor {
            ctx,
            active: Vec::new(),
            retiring: Vec::new(),
            next_id: 1,
        };
        let handle = tokio::spawn(supervisor.run(desired, shutdown.clone()));

        Self {
            status,
            shutdown,
            supervisor: Mutex::new(Some(handle)),
        }
    }

    pub fn status(&self) -> PoolStatus {
        self.status.clone()
    }

    /// Retire every worker and wait for them, up to the configured grace period.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.supervisor.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker supervisor ended abnormally");
            }
        }
    }
}

struct Supervisor {
    ctx: Arc<WorkerContext>,
    /// Workers counted against `desired_workers`, oldest first.
    active: Vec<WorkerSlot>,
    /// Workers told to stop that may still be finishing a batch.
    retiring: Vec<WorkerSlot>,
    next_id: usize,
}

impl Supervisor {
    async fn run(
        mut self,
        mut desired: watch::Receiver<imgopt_core::AdminSettings>,
        shutdown: CancellationToken,
    ) {
        let mut tick = interval(self.ctx.config.supervise_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            self.reap();
            let target = desired.borrow_and_update().desired_workers;
            self.reconcile(target);

            tokio::select! {
                _ = shutdown.cancelled() => break,
                changed = desired.changed() => {
                    if changed.is_err() {
                        tracing::warn!("Settings channel closed, stopping worker supervisor");
                        break;
                    }
                }
                _ = tick.tick() => {}
            }
        }

        self.stop_all().await;
    }

    /// Drop finished slots. An active worker that ended on its own has died and
    /// is replaced by the next reconcile.
    fn reap(&mut self) {
        self.active.retain(|slot| {
            if slot.handle.is_finished() {
                tracing::error!(worker_id = slot.id, "Worker exited unexpectedly, replacing it");
                false
            } else {
                true
            }
        });
        self.retiring.retain(|slot| !slot.handle.is_finished());
    }

    fn reconcile(&mut self, target: usize) {
        let current = self.active.len();
        if target > current {
            for _ in current..target {
                self.spawn_worker();
            }
            tracing::info!(from = current, to = target, "Scaled worker pool up");
        } else if target < current {
            for slot in self.active.split_off(target) {
                tracing::debug!(worker_id = slot.id, "Retiring worker");
                slot.retire.cancel();
                self.retiring.push(slot);
            }
            tracing::info!(from = current, to = target, "Scaled worker pool down");
        }
    }

    fn spawn_worker(&mut self) {
        let id = self.next_id;
        self.next_id += 1;
        let retire = CancellationToken::new();
        let handle = tokio::spawn(worker_loop(Arc::clone(&self.ctx), id, retire.clone()));
        self.active.push(WorkerSlot { id, retire, handle });
    }

    async fn stop_all(&mut self) {
        let mut slots: Vec<WorkerSlot> = self.active.drain(..).collect();
        slots.append(&mut self.retiring);
        for slot in &slots {
            slot.retire.cancel();
        }

        let grace = self.ctx.config.shutdown_grace;
        let aborts: Vec<_> = slots.iter().map(|s| s.handle.abort_handle()).collect();
        let joined = futures::future::join_all(slots.into_iter().map(|s| s.handle));
        if tokio::time::timeout(grace, joined).await.is_err() {
            tracing::warn!(
                grace_secs = grace.as_secs(),
                "Workers still busy after shutdown grace period, aborting them"
            );
            for abort in aborts {
                abort.abort();
            }
            for (worker_id, task) in self.ctx.handler_tasks.lock().drain() {
                tracing::warn!(worker_id, "Aborting batch handler of stopped worker");
                task.abort();
            }
        }
        tracing::info!("Worker pool stopped");
    }
}

async fn worker_loop(ctx: Arc<WorkerContext>, worker_id: usize, retire: CancellationToken) {
    let _live = CounterGuard::new(&ctx.status.live);
    let signal = ctx.batches.queue_signal();
    tracing::info!(worker_id, "Worker started");

    loop {
        if retire.is_cancelled() {
            break;
        }

        let threads = ctx.settings.snapshot().threads_per_batch;
        if let Some(lease) = ctx.batches.claim_next(threads).await {
            execute(&ctx, worker_id, lease).await;
            continue;
        }

        tokio::select! {
            _ = retire.cancelled() => break,
            _ = signal.notified() => {}
            _ = sleep(ctx.config.poll_interval) => {}
        }
    }

    tracing::info!(worker_id, "Worker stopped");
}

/// Run one leased batch to its end and release the lease.
async fn execute(ctx: &WorkerContext, worker_id: usize, lease: BatchLease) {
    let _busy = CounterGuard::new(&ctx.status.busy);
    let batch_id = lease.batch_id();
    let started = std::time::Instant::now();
    tracing::info!(
        worker_id,
        batch_id = %batch_id,
        threads = lease.threads(),
        "Worker claimed batch"
    );

    let handler = Arc::clone(&ctx.handler);
    let task_lease = lease.clone();
    let task = tokio::spawn(async move { handler.process_batch(&task_lease).await });
    let abort = task.abort_handle();
    ctx.handler_tasks.lock().insert(worker_id, abort.clone());

    let joined = tokio::time::timeout(ctx.config.batch_timeout, task).await;
    ctx.handler_tasks.lock().remove(&worker_id);
    let outcome = match joined {
        Ok(Ok(Ok(BatchOutcome::Completed { result_key }))) => {
            LeaseOutcome::Completed { result_key }
        }
        Ok(Ok(Ok(BatchOutcome::Cancelled))) => LeaseOutcome::Cancelled,
        Ok(Ok(Err(e))) => {
            tracing::warn!(worker_id, batch_id = %batch_id, error = %format!("{:#}", e), "Batch failed");
            LeaseOutcome::Failed(format!("{:#}", e))
        }
        Ok(Err(join_err)) => {
            tracing::error!(worker_id, batch_id = %batch_id, error = %join_err, "Batch task crashed");
            let reason = if join_err.is_panic() {
                PANICKED_REASON
            } else {
                ABORTED_REASON
            };
            LeaseOutcome::Failed(reason.to_string())
        }
        Err(_) => {
            tracing::warn!(
                worker_id,
                batch_id = %batch_id,
                timeout_secs = ctx.config.batch_timeout.as_secs(),
                "Batch timed out"
            );
            lease.cancel_token().cancel();
            abort.abort();
            LeaseOutcome::Failed(TIMED_OUT_REASON.to_string())
        }
    };

    match lease.finish(outcome).await {
        Ok(BatchStatus::Deleted) => {
            if let Err(e) = reclaim_batch_artifacts(ctx.storage.as_ref(), batch_id).await {
                tracing::warn!(batch_id = %batch_id, error = %e, "Failed to reclaim deleted batch");
            }
        }
        Ok(status) => {
            tracing::info!(
                worker_id,
                batch_id = %batch_id,
                status = %status,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Worker released batch"
            );
        }
        Err(e) => {
            tracing::error!(worker_id, batch_id = %batch_id, error = %e, "Failed to release batch");
        }
    }
}
