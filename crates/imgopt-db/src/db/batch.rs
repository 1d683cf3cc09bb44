use chrono::{DateTime, Utc};
use imgopt_core::{AppError, Batch, BatchId, BatchStatus};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::lease::{BatchLease, LeaseOutcome};
use super::records::RecordDir;

/// Maximum number of batches returned by a list call.
pub const MAX_LIST_LIMIT: usize = 500;

const RESTART_FAILURE_REASON: &str = "interrupted by service restart";
const INTERRUPTED_REASON: &str = "processing interrupted";

pub(crate) struct BatchEntry {
    pub(crate) batch: Batch,
    /// Id of the lease currently processing this batch.
    pub(crate) lease: Option<Uuid>,
    pub(crate) cancel: Option<CancellationToken>,
    pub(crate) cancel_requested: bool,
    pub(crate) delete_requested: bool,
    pub(crate) total_known: bool,
}

impl BatchEntry {
    fn new(batch: Batch) -> Self {
        let total_known = batch.total > 0;
        Self {
            batch,
            lease: None,
            cancel: None,
            cancel_requested: false,
            delete_requested: false,
            total_known,
        }
    }

    pub(crate) fn holds(&self, lease_id: Uuid) -> bool {
        self.lease == Some(lease_id)
    }
}

/// On-disk form of a batch. A delete requested while the batch was processing has
/// to survive a restart, so the flag is stored next to the batch.
#[derive(Serialize, Deserialize)]
struct BatchRecord {
    #[serde(flatten)]
    batch: Batch,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    delete_requested: bool,
}

#[derive(Default)]
pub(crate) struct StoreState {
    pub(crate) batches: HashMap<BatchId, BatchEntry>,
    queue: VecDeque<BatchId>,
}

/// What a delete call did to the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The batch was terminal and its record is gone.
    Removed,
    /// The batch had not started; it is now `deleted` and off the queue.
    SoftDeleted,
    /// The batch is processing; it becomes `deleted` once its worker lets go.
    Deferred,
}

/// Store of batch records, the FIFO queue of `queued` batches and the leases held
/// by workers.
///
/// All mutations of a batch happen under one write lock, which is what keeps
/// `processed <= total` and the one-lease-per-batch rule intact when the API and
/// several workers touch the same batch.
#[derive(Clone)]
pub struct BatchRepository {
    pub(crate) state: Arc<RwLock<StoreState>>,
    queue_signal: Arc<Notify>,
    records: Option<Arc<RecordDir>>,
}

fn transition(batch: &mut Batch, next: BatchStatus) -> Result<(), AppError> {
    if !batch.status.can_transition_to(next) {
        return Err(AppError::Conflict(format!(
            "Batch {} is {} and cannot become {}",
            batch.id, batch.status, next
        )));
    }
    batch.status = next;
    if next.is_terminal() {
        batch.finished_at = Some(Utc::now());
    }
    Ok(())
}

fn not_found(id: BatchId) -> AppError {
    AppError::NotFound(format!("Batch {} not found", id))
}

impl BatchRepository {
    /// A store that keeps nothing on disk.
    pub fn in_memory() -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            queue_signal: Arc::new(Notify::new()),
            records: None,
        }
    }

    /// Open the store persisted under `root`, recovering batches left mid-flight.
    ///
    /// `processing` batches cannot be resumed and become `failed`, or `deleted` if a
    /// delete was pending; `uploaded` ones are queued; the queue is rebuilt oldest first.
    pub async fn open(root: impl AsRef<Path>) -> anyhow::Result<Self> {
        let records = RecordDir::open(root.as_ref().join("batches")).await?;
        let loaded: Vec<BatchRecord> = records.read_all().await?;

        let mut state = StoreState::default();
        let mut recovered = Vec::new();
        let mut queued: Vec<(DateTime<Utc>, BatchId)> = Vec::new();
        let now = Utc::now();

        for BatchRecord {
            mut batch,
            delete_requested,
        } in loaded
        {
            match batch.status {
                BatchStatus::Processing if delete_requested => {
                    batch.status = BatchStatus::Deleted;
                    batch.finished_at = Some(now);
                    recovered.push(batch.id);
                }
                BatchStatus::Processing => {
                    batch.status = BatchStatus::Failed;
                    batch.error = Some(RESTART_FAILURE_REASON.to_string());
                    batch.finished_at = Some(now);
                    recovered.push(batch.id);
                }
                BatchStatus::Uploaded => {
                    batch.status = BatchStatus::Queued;
                    queued.push((batch.created_at, batch.id));
                    recovered.push(batch.id);
                }
                BatchStatus::Queued => queued.push((batch.created_at, batch.id)),
                _ => {}
            }
            state.batches.insert(batch.id, BatchEntry::new(batch));
        }

        queued.sort();
        state.queue = queued.into_iter().map(|(_, id)| id).collect();

        let loaded_count = state.batches.len();
        let queued_count = state.queue.len();
        let repo = Self {
            state: Arc::new(RwLock::new(state)),
            queue_signal: Arc::new(Notify::new()),
            records: Some(Arc::new(records)),
        };

        for id in &recovered {
            repo.persist(*id).await?;
        }

        tracing::info!(
            batches = loaded_count,
            queued = queued_count,
            recovered = recovered.len(),
            "Batch store opened"
        );

        Ok(repo)
    }

    /// Signal notified once per enqueued batch; idle workers wait on it.
    pub fn queue_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.queue_signal)
    }

    pub fn queued_len(&self) -> usize {
        self.state.read().queue.len()
    }

    /// Ids of every batch currently in `status`.
    pub fn ids_with_status(&self, status: BatchStatus) -> Vec<BatchId> {
        self.state
            .read()
            .batches
            .values()
            .filter(|e| e.batch.status == status)
            .map(|e| e.batch.id)
            .collect()
    }

    /// Write the current state of one batch to disk, or remove its record if the
    /// batch no longer exists.
    pub(crate) async fn persist(&self, id: BatchId) -> Result<(), AppError> {
        let Some(records) = &self.records else {
            return Ok(());
        };
        let _guard = records.write_lock().lock().await;
        self.write_record(records, id).await
    }

    /// Caller must hold the record write lock.
    async fn write_record(&self, records: &RecordDir, id: BatchId) -> Result<(), AppError> {
        let snapshot = self.state.read().batches.get(&id).map(|e| BatchRecord {
            batch: e.batch.clone(),
            delete_requested: e.delete_requested,
        });
        let name = id.to_string();
        match snapshot {
            Some(record) => records.write_locked(&name, &record).await?,
            None => records.remove_locked(&name).await?,
        }
        Ok(())
    }

    /// Take the record write lock, if the store is disk backed. Mutations that must
    /// not run ahead of disk hold it from the in-memory change until the write is done.
    async fn lock_records(&self) -> Option<tokio::sync::MutexGuard<'_, ()>> {
        match &self.records {
            Some(records) => Some(records.write_lock().lock().await),
            None => None,
        }
    }

    /// Write one batch while the record lock is already held by the caller.
    async fn write_held(&self, id: BatchId) -> Result<(), AppError> {
        match &self.records {
            Some(records) => self.write_record(records, id).await,
            None => Ok(()),
        }
    }

    /// Persist progress without failing the caller; the in-memory state stays authoritative.
    pub(crate) async fn persist_logged(&self, id: BatchId) {
        if let Err(e) = self.persist(id).await {
            tracing::warn!(batch_id = %id, error = %e, "Failed to persist batch record");
        }
    }

    /// Insert a freshly uploaded batch.
    #[tracing::instrument(skip(self, batch), fields(batch_id = %batch.id))]
    pub async fn create(&self, batch: Batch) -> Result<Batch, AppError> {
        if batch.status != BatchStatus::Uploaded {
            return Err(AppError::Internal(format!(
                "New batches must start as uploaded, got {}",
                batch.status
            )));
        }
        let id = batch.id;
        {
            let mut state = self.state.write();
            if state.batches.contains_key(&id) {
                return Err(AppError::Conflict(format!("Batch {} already exists", id)));
            }
            state.batches.insert(id, BatchEntry::new(batch.clone()));
        }

        if let Err(e) = self.persist(id).await {
            self.state.write().batches.remove(&id);
            return Err(e);
        }

        tracing::debug!("Batch created");
        Ok(batch)
    }

    /// Move an uploaded batch onto the queue and wake one idle worker.
    ///
    /// The batch only becomes claimable once its `queued` record is on disk; a failed
    /// write leaves it `uploaded`.
    #[tracing::instrument(skip(self))]
    pub async fn enqueue(&self, id: BatchId) -> Result<Batch, AppError> {
        let _guard = self.lock_records().await;
        let (batch, previous) = {
            let mut state = self.state.write();
            let entry = state.batches.get_mut(&id).ok_or_else(|| not_found(id))?;
            let previous = entry.batch.clone();
            transition(&mut entry.batch, BatchStatus::Queued)?;
            (entry.batch.clone(), previous)
        };

        if let Err(e) = self.write_held(id).await {
            if let Some(entry) = self.state.write().batches.get_mut(&id) {
                entry.batch = previous;
            }
            return Err(e);
        }

        self.state.write().queue.push_back(id);
        self.queue_signal.notify_one();
        tracing::debug!("Batch queued");
        Ok(batch)
    }

    /// Batches newest first, at most `limit` (capped at [`MAX_LIST_LIMIT`]).
    pub fn list(&self, limit: usize) -> Vec<Batch> {
        let mut batches: Vec<Batch> = self
            .state
            .read()
            .batches
            .values()
            .map(|e| e.batch.clone())
            .collect();
        batches.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        batches.truncate(limit.min(MAX_LIST_LIMIT));
        batches
    }

    pub fn get(&self, id: BatchId) -> Result<Batch, AppError> {
        self.state
            .read()
            .batches
            .get(&id)
            .map(|e| e.batch.clone())
            .ok_or_else(|| not_found(id))
    }

    /// Claim the oldest queued batch for processing with `threads` parallelism.
    ///
    /// Returns `None` when the queue is empty. The returned lease is the only way to
    /// report progress on, and to finish, the batch.
    #[tracing::instrument(skip(self))]
    pub async fn claim_next(&self, threads: usize) -> Option<BatchLease> {
        let lease = {
            let mut state = self.state.write();
            let mut claimed = None;
            while let Some(id) = state.queue.pop_front() {
                let Some(entry) = state.batches.get_mut(&id) else {
                    continue;
                };
                if entry.batch.status != BatchStatus::Queued {
                    continue;
                }
                if transition(&mut entry.batch, BatchStatus::Processing).is_err() {
                    continue;
                }
                let lease_id = Uuid::new_v4();
                let token = CancellationToken::new();
                entry.batch.started_at = Some(Utc::now());
                entry.batch.threads = Some(threads);
                entry.lease = Some(lease_id);
                entry.cancel = Some(token.clone());
                claimed = Some(BatchLease::new(
                    self.clone(),
                    lease_id,
                    &entry.batch,
                    threads,
                    token,
                ));
                break;
            }
            claimed
        };

        if let Some(lease) = &lease {
            self.persist_logged(lease.batch_id()).await;
            tracing::info!(batch_id = %lease.batch_id(), threads, "Batch claimed");
        }
        lease
    }

    /// Record the item count of a leased batch. The count can only be set once.
    pub(crate) async fn set_total(
        &self,
        id: BatchId,
        lease_id: Uuid,
        total: u64,
    ) -> Result<(), AppError> {
        {
            let mut state = self.state.write();
            let entry = state.batches.get_mut(&id).ok_or_else(|| not_found(id))?;
            if !entry.holds(lease_id) {
                return Err(AppError::Conflict(format!(
                    "Lease on batch {} is no longer valid",
                    id
                )));
            }
            if entry.total_known {
                if entry.batch.total == total {
                    return Ok(());
                }
                return Err(AppError::Conflict(format!(
                    "Item count of batch {} is already set",
                    id
                )));
            }
            entry.batch.total = total;
            entry.total_known = true;
        }
        self.persist_logged(id).await;
        Ok(())
    }

    /// Count one finished item. Refused (returns `false`) once cancellation was
    /// requested, when the lease is stale, or when every item is already counted.
    pub(crate) async fn advance(&self, id: BatchId, lease_id: Uuid, item_failed: bool) -> bool {
        let advanced = {
            let mut state = self.state.write();
            match state.batches.get_mut(&id) {
                Some(entry)
                    if entry.holds(lease_id)
                        && !entry.cancel_requested
                        && entry.batch.processed < entry.batch.total =>
                {
                    entry.batch.processed += 1;
                    if item_failed {
                        entry.batch.failed_items += 1;
                    }
                    true
                }
                _ => false,
            }
        };
        if advanced {
            self.persist_logged(id).await;
        }
        advanced
    }

    /// Release a lease and move the batch to its terminal state.
    ///
    /// A requested delete wins over a requested cancel, which wins over whatever
    /// the worker reports.
    pub(crate) async fn finish(
        &self,
        id: BatchId,
        lease_id: Uuid,
        outcome: LeaseOutcome,
    ) -> Result<BatchStatus, AppError> {
        let status = {
            let mut state = self.state.write();
            let entry = state.batches.get_mut(&id).ok_or_else(|| not_found(id))?;
            if !entry.holds(lease_id) {
                return Err(AppError::Conflict(format!(
                    "Lease on batch {} is no longer valid",
                    id
                )));
            }
            entry.lease = None;
            entry.cancel = None;

            let next = if entry.delete_requested {
                BatchStatus::Deleted
            } else if entry.cancel_requested {
                BatchStatus::Cancelled
            } else {
                match outcome {
                    LeaseOutcome::Completed { result_key } => {
                        entry.batch.result_zip = Some(result_key);
                        BatchStatus::Done
                    }
                    LeaseOutcome::Failed(reason) => {
                        entry.batch.error = Some(reason);
                        BatchStatus::Failed
                    }
                    LeaseOutcome::Cancelled => {
                        entry.batch.error = Some(INTERRUPTED_REASON.to_string());
                        BatchStatus::Failed
                    }
                }
            };
            transition(&mut entry.batch, next)?;
            next
        };

        self.persist_logged(id).await;
        tracing::info!(batch_id = %id, status = %status, "Batch finished");
        Ok(status)
    }

    /// Request cancellation of a processing batch.
    ///
    /// The batch stays `processing` until its worker reaches the next item boundary
    /// and releases the lease; progress is frozen from this call on.
    #[tracing::instrument(skip(self))]
    pub fn cancel(&self, id: BatchId) -> Result<(), AppError> {
        let mut state = self.state.write();
        let entry = state.batches.get_mut(&id).ok_or_else(|| not_found(id))?;
        if entry.batch.status != BatchStatus::Processing {
            return Err(AppError::Conflict(format!(
                "Batch is {}; only processing batches can be cancelled",
                entry.batch.status
            )));
        }
        if !entry.cancel_requested {
            entry.cancel_requested = true;
            if let Some(token) = &entry.cancel {
                token.cancel();
            }
            tracing::info!(batch_id = %id, "Batch cancellation requested");
        }
        Ok(())
    }

    /// Delete a batch. See [`DeleteOutcome`] for the three cases. The caller is
    /// responsible for reclaiming stored artifacts unless the delete is deferred.
    ///
    /// The change is written to disk before it is returned; if the write fails the
    /// batch is left as it was, apart from a deferred delete's cancellation signal.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, id: BatchId) -> Result<DeleteOutcome, AppError> {
        let _guard = self.lock_records().await;
        let (outcome, undo) = {
            let mut state = self.state.write();
            let state = &mut *state;
            let entry = state.batches.get_mut(&id).ok_or_else(|| not_found(id))?;
            let status = entry.batch.status;
            match status {
                _ if status.is_terminal() => match state.batches.remove(&id) {
                    Some(entry) => (DeleteOutcome::Removed, Undo::Reinsert(Box::new(entry))),
                    None => return Err(not_found(id)),
                },
                BatchStatus::Processing => {
                    let undo = Undo::Flags {
                        delete_requested: entry.delete_requested,
                        cancel_requested: entry.cancel_requested,
                    };
                    entry.delete_requested = true;
                    entry.cancel_requested = true;
                    if let Some(token) = &entry.cancel {
                        token.cancel();
                    }
                    (DeleteOutcome::Deferred, undo)
                }
                _ => {
                    let previous = entry.batch.clone();
                    transition(&mut entry.batch, BatchStatus::Deleted)?;
                    let position = state.queue.iter().position(|queued| *queued == id);
                    if let Some(position) = position {
                        state.queue.remove(position);
                    }
                    (
                        DeleteOutcome::SoftDeleted,
                        Undo::Restore {
                            batch: Box::new(previous),
                            position,
                        },
                    )
                }
            }
        };

        if let Err(e) = self.write_held(id).await {
            self.undo(id, undo);
            return Err(e);
        }
        tracing::info!(batch_id = %id, outcome = ?outcome, "Batch delete");
        Ok(outcome)
    }

    fn undo(&self, id: BatchId, undo: Undo) {
        let mut state = self.state.write();
        match undo {
            Undo::Reinsert(entry) => {
                state.batches.insert(id, *entry);
            }
            Undo::Flags {
                delete_requested,
                cancel_requested,
            } => {
                if let Some(entry) = state.batches.get_mut(&id) {
                    entry.delete_requested = delete_requested;
                    entry.cancel_requested = cancel_requested;
                }
            }
            Undo::Restore { batch, position } => {
                if let Some(entry) = state.batches.get_mut(&id) {
                    entry.batch = *batch;
                }
                if let Some(position) = position {
                    let position = position.min(state.queue.len());
                    state.queue.insert(position, id);
                }
            }
        }
    }

    /// Remove every terminal batch older than `retention_days` and return their ids
    /// so the caller can reclaim their artifacts.
    ///
    /// Each batch leaves memory only once its record is gone from disk. A batch whose
    /// record cannot be removed is kept, logged, and retried on the next sweep.
    #[tracing::instrument(skip(self, now))]
    pub async fn purge_expired(&self, retention_days: u32, now: DateTime<Utc>) -> Vec<BatchId> {
        let _guard = self.lock_records().await;
        let expired: Vec<BatchId> = self
            .state
            .read()
            .batches
            .values()
            .filter(|e| e.lease.is_none() && e.batch.is_purge_eligible(retention_days, now))
            .map(|e| e.batch.id)
            .collect();

        let mut removed = Vec::with_capacity(expired.len());
        for id in expired {
            let entry = self.state.write().batches.remove(&id);
            let Some(entry) = entry else {
                continue;
            };
            match self.write_held(id).await {
                Ok(()) => removed.push(id),
                Err(e) => {
                    tracing::warn!(batch_id = %id, error = %e, "Failed to remove expired batch record");
                    self.state.write().batches.insert(id, entry);
                }
            }
        }

        if !removed.is_empty() {
            tracing::info!(purged = removed.len(), retention_days, "Purged expired batches");
        }
        removed
    }
}

/// How to put a batch back when its delete could not be written.
enum Undo {
    Reinsert(Box<BatchEntry>),
    Flags {
        delete_requested: bool,
        cancel_requested: bool,
    },
    Restore {
        batch: Box<Batch>,
        position: Option<usize>,
    },
}
