//! Batch handler trait
//!
//! The API implements this trait with its storage and processing engine. Workers
//! call it for every batch they claim; the handler never finishes the lease itself.

use async_trait::async_trait;
use imgopt_db::BatchLease;

/// How a handler left a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The output workbook was written under `result_key`.
    Completed { result_key: String },
    /// The batch token fired and processing stopped early.
    Cancelled,
}

#[async_trait]
pub trait BatchHandler: Send + Sync {
    /// Process every item of the leased batch, reporting progress through the lease.
    ///
    /// Errors mark the batch `failed` with the error chain as the reason.
    async fn process_batch(&self, lease: &BatchLease) -> anyhow::Result<BatchOutcome>;
}
