//! Ingest: validate an uploaded workbook, store it, and queue a batch for it.

use anyhow::Context;
use chrono::Utc;
use imgopt_core::{AppError, Batch, ProcessingMode};
use imgopt_processing::Workbook;
use imgopt_storage::batch_input_key;
use uuid::Uuid;

use crate::constants::XLSX_CONTENT_TYPE;
use crate::state::AppState;
use crate::utils::upload::{validate_file_size, validate_xlsx_filename, BatchUpload};

/// Validate `upload` and turn it into a `queued` batch.
///
/// Nothing is stored and no record is created unless every check passes.
#[tracing::instrument(skip(state, upload), fields(filename = %upload.filename, size = upload.data.len()))]
pub async fn ingest_upload(state: &AppState, upload: BatchUpload) -> Result<Batch, AppError> {
    let BatchUpload {
        data,
        filename,
        mode,
    } = upload;

    validate_xlsx_filename(&filename)?;
    validate_file_size(data.len(), state.config.max_upload_size_bytes())?;
    let mode = ProcessingMode::parse(mode.as_deref().unwrap_or_default())?;

    let data = tokio::task::spawn_blocking(move || {
        Workbook::from_xlsx_bytes(&data)
            .map(|_| data)
            .map_err(|e| AppError::InvalidInput(e.to_string()))
    })
    .await
    .context("Workbook validation task failed")??;

    let id = Uuid::new_v4();
    let input_key = batch_input_key(id);
    state
        .storage
        .upload_with_key(&input_key, data, XLSX_CONTENT_TYPE)
        .await?;

    let batch = Batch::new(id, filename, mode, Utc::now());
    if let Err(e) = state.batches.create(batch).await {
        if let Err(cleanup) = state.storage.delete(&input_key).await {
            tracing::warn!(batch_id = %id, error = %cleanup, "Failed to remove orphaned upload");
        }
        return Err(e);
    }
    let batch = state.batches.enqueue(id).await?;

    tracing::info!(batch_id = %id, mode = %mode, "Batch queued");
    Ok(batch)
}
