use crate::error::{ErrorResponse, HttpAppError};
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::Response,
};
use futures::StreamExt;
use imgopt_core::AppError;
use imgopt_processing::image::naming::is_valid_nice_id;
use imgopt_storage::image_key;
use std::sync::Arc;
use uuid::Uuid;

/// Serve an optimized image by the id embedded in its public URL.
#[utoipa::path(
    get,
    path = "/api/i/{batch_id}/{nice_id}",
    tag = "images",
    params(
        ("batch_id" = Uuid, Path, description = "Batch ID"),
        ("nice_id" = String, Path, description = "Image ID from the public URL")
    ),
    responses(
        (status = 200, description = "Optimized image", content_type = "image/jpeg"),
        (status = 404, description = "Image not found", body = ErrorResponse)
    )
)]
pub async fn serve_image(
    State(state): State<Arc<AppState>>,
    Path((batch_id, nice_id)): Path<(Uuid, String)>,
) -> Result<Response, HttpAppError> {
    if !is_valid_nice_id(&nice_id) {
        return Err(AppError::NotFound("Image not found".to_string()).into());
    }

    let stream = state
        .storage
        .download_stream(&image_key(batch_id, &nice_id))
        .await?;
    let body_stream = stream.map(|result| {
        result.map_err(|e| std::io::Error::other(format!("Storage stream error: {}", e)))
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "image/jpeg")
        .header(header::CACHE_CONTROL, "public, max-age=31536000, immutable")
        .body(Body::from_stream(body_stream))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)).into())
}
