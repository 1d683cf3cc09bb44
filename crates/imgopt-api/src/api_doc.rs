//! OpenAPI document served at `/api/openapi.json`.

use crate::error::ErrorResponse;
use crate::handlers::{self, OkResponse};
use axum::Json;
use imgopt_core::{Batch, BatchListResponse, BatchStatus, CreateBatchResponse, ProcessingMode};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "imgopt API",
        description = "Batch image optimization for product spreadsheets"
    ),
    paths(
        handlers::health::health,
        handlers::batches::list_batches,
        handlers::batches::create_batch,
        handlers::batches::delete_batch,
        handlers::batches::cancel_batch,
        handlers::batches::download_batch,
        handlers::images::serve_image,
        handlers::admin::get_workers,
        handlers::admin::set_workers,
        handlers::admin::set_threads,
        handlers::admin::set_retention,
        handlers::admin::set_auto_purge,
        handlers::admin::purge,
        handlers::admin::login,
        handlers::admin::logout,
    ),
    components(schemas(
        Batch,
        BatchStatus,
        ProcessingMode,
        BatchListResponse,
        CreateBatchResponse,
        ErrorResponse,
        OkResponse,
        handlers::admin::WorkersResponse,
        handlers::admin::PurgeResponse,
        handlers::admin::LoginForm,
        handlers::batches::BatchUploadForm,
    )),
    tags(
        (name = "batches", description = "Upload, track, cancel and download batches"),
        (name = "images", description = "Optimized images"),
        (name = "admin", description = "Worker pool, retention and session management"),
        (name = "health", description = "Liveness")
    )
)]
pub struct ApiDoc;

pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
