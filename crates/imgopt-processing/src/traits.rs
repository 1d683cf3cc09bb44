//! Seam between the item runner and the work done per item.

use async_trait::async_trait;
use imgopt_core::BatchId;

/// Handles one item (image URL cell) of a batch.
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    /// Convert the image at `source_url` and return the URL that replaces it in
    /// the output workbook.
    async fn process(&self, batch_id: BatchId, source_url: &str) -> anyhow::Result<String>;
}
