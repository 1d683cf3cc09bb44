//! Artifact storage for the image optimizer.
//!
//! Everything the service writes to disk apart from batch records lives behind the
//! [`Storage`] trait: uploaded workbooks, generated workbooks and converted JPEGs.
//! Keys are relative, `/`-separated paths; see [`keys`] for the layout.

pub mod keys;
pub mod local;
pub mod traits;

pub use keys::{batch_input_key, batch_output_key, batch_prefix, image_key, image_prefix};
pub use local::LocalStorage;
pub use traits::{ByteStream, Storage, StorageError, StorageResult};

use imgopt_core::{AppError, BatchId};

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => AppError::NotFound(format!("File not found: {}", key)),
            StorageError::InvalidKey(msg) => AppError::InvalidInput(msg),
            other => AppError::Storage(other.to_string()),
        }
    }
}

/// Remove every stored file belonging to a batch: its input, its output and its images.
///
/// Missing files are not an error, so this can be called for batches that never got
/// past upload as well as for fully processed ones.
pub async fn reclaim_batch_artifacts(storage: &dyn Storage, batch_id: BatchId) -> StorageResult<()> {
    storage.delete_prefix(&batch_prefix(batch_id)).await?;
    storage.delete_prefix(&image_prefix(batch_id)).await?;
    tracing::debug!(batch_id = %batch_id, "Reclaimed batch artifacts");
    Ok(())
}
