//! Route configuration and setup.

use crate::api_doc::openapi_json;
use crate::auth::session_middleware;
use crate::constants::MULTIPART_OVERHEAD_BYTES;
use crate::handlers::{admin, batches, health, images};
use crate::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::{delete, get, post},
    Router,
};
use imgopt_core::Config;
use std::sync::Arc;
use std::time::Duration;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Build the application router, nested under `BASE_PATH` when one is set.
pub fn setup_routes(config: &Config, state: Arc<AppState>) -> Result<Router<()>, anyhow::Error> {
    let cors = setup_cors(config)?;

    let admin_routes = admin_routes().layer(axum::middleware::from_fn_with_state(
        state.clone(),
        session_middleware,
    ));
    let api = public_routes().merge(admin_routes);

    let routed = match config.base_path() {
        "" => api,
        base => Router::new().nest(base, api),
    };

    tracing::info!(
        http_concurrency_limit = config.http_concurrency_limit(),
        request_timeout_secs = config.request_timeout_secs(),
        "HTTP limits enabled"
    );

    let app = routed
        .layer(ConcurrencyLimitLayer::new(config.http_concurrency_limit().max(1)))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.request_timeout_secs().max(1),
        )))
        .layer(RequestBodyLimitLayer::new(
            config.max_upload_size_bytes() + MULTIPART_OVERHEAD_BYTES,
        ))
        .layer(DefaultBodyLimit::disable())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    Ok(app)
}

fn public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/openapi.json", get(openapi_json))
        .route(
            "/api/batches",
            get(batches::list_batches).post(batches::create_batch),
        )
        .route("/api/batches/{id}", delete(batches::delete_batch))
        .route("/api/batches/{id}/cancel", post(batches::cancel_batch))
        .route("/api/batches/{id}/download", get(batches::download_batch))
        .route("/api/i/{batch_id}/{nice_id}", get(images::serve_image))
        .route("/api/admin/login", post(admin::login))
}

fn admin_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/admin/workers", get(admin::get_workers))
        .route("/api/admin/workers/set/{n}", post(admin::set_workers))
        .route("/api/admin/threads/set/{n}", post(admin::set_threads))
        .route("/api/admin/retention/set/{days}", post(admin::set_retention))
        .route("/api/admin/auto-purge/{flag}", post(admin::set_auto_purge))
        .route("/api/admin/purge", post(admin::purge))
        .route("/api/admin/logout", post(admin::logout))
}

fn setup_cors(config: &Config) -> Result<CorsLayer, anyhow::Error> {
    let methods = [Method::GET, Method::POST, Method::DELETE, Method::OPTIONS];
    let cors = if config.cors_origins().iter().any(|o| o == "*") {
        tracing::warn!("CORS configured to allow all origins");
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any)
    } else {
        let origins = config
            .cors_origins()
            .iter()
            .map(|o| o.parse::<HeaderValue>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("Invalid CORS origin: {}", e))?;
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(Any)
    };
    Ok(cors)
}
