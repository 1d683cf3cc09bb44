use axum::Json;
use serde_json::{json, Value};

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses((status = 200, description = "Service is running"))
)]
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
