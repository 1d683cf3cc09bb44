use anyhow::Context;
use async_trait::async_trait;
use imgopt_db::BatchLease;
use imgopt_processing::{process_workbook, ImageOptimizer, PipelineOutcome};
use imgopt_storage::{batch_input_key, batch_output_key, Storage};
use imgopt_worker::{BatchHandler, BatchOutcome};
use std::sync::Arc;

use crate::constants::XLSX_CONTENT_TYPE;

/// Processes one uploaded workbook: loads it from storage, optimizes every image
/// it points to and stores the rewritten workbook next to the input.
pub struct WorkbookBatchHandler {
    storage: Arc<dyn Storage>,
    optimizer: ImageOptimizer,
}

impl WorkbookBatchHandler {
    pub fn new(storage: Arc<dyn Storage>, optimizer: ImageOptimizer) -> Self {
        Self { storage, optimizer }
    }
}

#[async_trait]
impl BatchHandler for WorkbookBatchHandler {
    async fn process_batch(&self, lease: &BatchLease) -> anyhow::Result<BatchOutcome> {
        let batch_id = lease.batch_id();
        let input = self
            .storage
            .download(&batch_input_key(batch_id))
            .await
            .context("Failed to load uploaded workbook")?;

        match process_workbook(&self.optimizer, lease, input).await? {
            PipelineOutcome::Cancelled => Ok(BatchOutcome::Cancelled),
            PipelineOutcome::Finished {
                output,
                converted,
                failed,
            } => {
                let result_key = batch_output_key(batch_id);
                self.storage
                    .upload_with_key(&result_key, output, XLSX_CONTENT_TYPE)
                    .await
                    .context("Failed to store output workbook")?;
                tracing::info!(
                    batch_id = %batch_id,
                    converted,
                    failed,
                    "Output workbook stored"
                );
                Ok(BatchOutcome::Completed { result_key })
            }
        }
    }
}
