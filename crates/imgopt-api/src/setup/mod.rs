//! Application setup and initialization

pub mod routes;
pub mod server;
pub mod services;
pub mod storage;

use crate::state::AppState;
use anyhow::{Context, Result};
use imgopt_core::Config;
use std::sync::Arc;

/// Validate configuration, install tracing and build the application.
pub async fn initialize_app(config: Config) -> Result<(Arc<AppState>, axum::Router)> {
    config.validate().context("Configuration validation failed")?;

    crate::telemetry::init_telemetry()
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    tracing::info!(
        environment = %config.environment(),
        "Configuration loaded and validated successfully"
    );

    build_app(config).await
}

/// Open the stores, start the worker pool and sweeper, and assemble the router.
/// Leaves the global tracing subscriber alone.
pub async fn build_app(config: Config) -> Result<(Arc<AppState>, axum::Router)> {
    let storage = storage::setup_storage(&config).await?;
    let state = services::initialize_services(&config, storage).await?;
    let router = routes::setup_routes(&config, state.clone())?;
    Ok((state, router))
}
