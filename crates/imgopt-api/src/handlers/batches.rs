use crate::constants::XLSX_CONTENT_TYPE;
use crate::error::{ErrorResponse, HttpAppError};
use crate::handlers::OkResponse;
use crate::services::ingest::ingest_upload;
use crate::state::AppState;
use crate::utils::upload::extract_batch_upload;
use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use imgopt_core::{AppError, BatchListResponse, BatchStatus, CreateBatchResponse};
use imgopt_db::{DeleteOutcome, MAX_LIST_LIMIT};
use imgopt_storage::reclaim_batch_artifacts;
use serde::Deserialize;
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    /// Maximum number of batches, capped at 500
    pub limit: Option<usize>,
}

/// Multipart body of a batch upload.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct BatchUploadForm {
    /// The `.xlsx` workbook
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
    /// `A` (image URLs in column A) or `table` (PICTURE_n columns); defaults to `A`
    mode: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/batches",
    tag = "batches",
    params(ListQuery),
    responses(
        (status = 200, description = "Batches, newest first", body = BatchListResponse)
    )
)]
#[tracing::instrument(skip(state))]
pub async fn list_batches(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Json<BatchListResponse> {
    let limit = query.limit.unwrap_or(MAX_LIST_LIMIT);
    Json(BatchListResponse {
        batches: state.batches.list(limit),
    })
}

#[utoipa::path(
    post,
    path = "/api/batches",
    tag = "batches",
    request_body(content = BatchUploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Batch queued", body = CreateBatchResponse),
        (status = 400, description = "Invalid upload", body = ErrorResponse),
        (status = 413, description = "Upload too large", body = ErrorResponse)
    )
)]
pub async fn create_batch(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<impl IntoResponse, HttpAppError> {
    let upload = extract_batch_upload(multipart).await?;
    let batch = ingest_upload(&state, upload).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateBatchResponse {
            ok: true,
            id: batch.id,
        }),
    ))
}

#[utoipa::path(
    delete,
    path = "/api/batches/{id}",
    tag = "batches",
    params(("id" = Uuid, Path, description = "Batch ID")),
    responses(
        (status = 204, description = "Batch deleted"),
        (status = 202, description = "Batch is processing; it is deleted once its worker stops"),
        (status = 404, description = "Batch not found", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state))]
pub async fn delete_batch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, HttpAppError> {
    match state.batches.delete(id).await? {
        DeleteOutcome::Deferred => Ok(StatusCode::ACCEPTED),
        DeleteOutcome::Removed | DeleteOutcome::SoftDeleted => {
            if let Err(e) = reclaim_batch_artifacts(state.storage.as_ref(), id).await {
                tracing::warn!(batch_id = %id, error = %e, "Failed to reclaim deleted batch");
            }
            Ok(StatusCode::NO_CONTENT)
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/batches/{id}/cancel",
    tag = "batches",
    params(("id" = Uuid, Path, description = "Batch ID")),
    responses(
        (status = 200, description = "Cancellation requested", body = OkResponse),
        (status = 404, description = "Batch not found", body = ErrorResponse),
        (status = 409, description = "Batch is not processing", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state))]
pub async fn cancel_batch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<OkResponse>, HttpAppError> {
    state.batches.cancel(id)?;
    Ok(Json(OkResponse::ok()))
}

#[utoipa::path(
    get,
    path = "/api/batches/{id}/download",
    tag = "batches",
    params(("id" = Uuid, Path, description = "Batch ID")),
    responses(
        (status = 200, description = "Output workbook", content_type = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
        (status = 404, description = "Batch not found or not finished", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state))]
pub async fn download_batch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Response, HttpAppError> {
    let batch = state.batches.get(id)?;
    let result_key = match (batch.status, batch.result_zip) {
        (BatchStatus::Done, Some(key)) => key,
        _ => {
            return Err(AppError::NotFound(format!(
                "Batch {} has no output to download",
                id
            ))
            .into())
        }
    };

    let stream = state.storage.download_stream(&result_key).await?;
    let body_stream = stream.map(|result| {
        result.map_err(|e| std::io::Error::other(format!("Storage stream error: {}", e)))
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, XLSX_CONTENT_TYPE)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"batch-{}.xlsx\"", id),
        )
        .body(Body::from_stream(body_stream))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)).into())
}
