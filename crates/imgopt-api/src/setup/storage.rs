//! Storage setup and initialization

use anyhow::{Context, Result};
use imgopt_core::Config;
use imgopt_storage::{LocalStorage, Storage};
use std::path::PathBuf;
use std::sync::Arc;

/// Artifacts live under `{STORAGE_ROOT}/files`.
pub fn files_root(config: &Config) -> PathBuf {
    config.storage_root().join("files")
}

/// Batch and settings records live under `{STORAGE_ROOT}/state`.
pub fn state_root(config: &Config) -> PathBuf {
    config.storage_root().join("state")
}

pub async fn setup_storage(config: &Config) -> Result<Arc<dyn Storage>> {
    let root = files_root(config);
    let storage = LocalStorage::new(&root)
        .await
        .with_context(|| format!("Failed to open storage at {}", root.display()))?;
    tracing::info!(root = %root.display(), "Local storage initialized");
    Ok(Arc::new(storage))
}
