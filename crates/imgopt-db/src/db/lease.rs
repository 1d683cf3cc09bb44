use imgopt_core::{AppError, Batch, BatchId, BatchStatus, ProcessingMode};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::batch::BatchRepository;

/// How a worker reports the end of a leased batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseOutcome {
    /// Every item was handled and the output was stored under `result_key`.
    Completed { result_key: String },
    /// The handler stopped early because the batch token was cancelled.
    Cancelled,
    /// The batch could not be processed.
    Failed(String),
}

/// A worker's exclusive claim on a `processing` batch.
///
/// Clones share the same lease id; once one of them finishes the lease, all of
/// them go stale and further progress reports are refused.
#[derive(Clone)]
pub struct BatchLease {
    repo: BatchRepository,
    lease_id: Uuid,
    batch_id: BatchId,
    mode: ProcessingMode,
    original_filename: String,
    threads: usize,
    cancel: CancellationToken,
}

impl BatchLease {
    pub(crate) fn new(
        repo: BatchRepository,
        lease_id: Uuid,
        batch: &Batch,
        threads: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            repo,
            lease_id,
            batch_id: batch.id,
            mode: batch.mode,
            original_filename: batch.original_filename.clone(),
            threads,
            cancel,
        }
    }

    pub fn batch_id(&self) -> BatchId {
        self.batch_id
    }

    pub fn mode(&self) -> ProcessingMode {
        self.mode
    }

    pub fn original_filename(&self) -> &str {
        &self.original_filename
    }

    /// Item parallelism pinned when the batch was claimed.
    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn set_total(&self, total: u64) -> Result<(), AppError> {
        self.repo.set_total(self.batch_id, self.lease_id, total).await
    }

    /// Count one finished item; `item_failed` also bumps `failed_items`.
    pub async fn advance(&self, item_failed: bool) -> bool {
        self.repo
            .advance(self.batch_id, self.lease_id, item_failed)
            .await
    }

    /// Release the lease, returning the terminal status the batch ended in.
    pub async fn finish(self, outcome: LeaseOutcome) -> Result<BatchStatus, AppError> {
        self.repo
            .finish(self.batch_id, self.lease_id, outcome)
            .await
    }
}

impl std::fmt::Debug for BatchLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchLease")
            .field("batch_id", &self.batch_id)
            .field("lease_id", &self.lease_id)
            .field("mode", &self.mode)
            .field("threads", &self.threads)
            .finish()
    }
}
