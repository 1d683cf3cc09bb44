//! Storage abstraction trait

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Chunked file body, as served by download endpoints.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// Storage abstraction trait
///
/// The API writes uploaded workbooks through it, workers write converted images
/// and output workbooks, and the purge path removes whole batch prefixes.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Write `data` at `storage_key`, replacing any previous content.
    async fn upload_with_key(
        &self,
        storage_key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> StorageResult<()>;

    /// Read a whole file into memory
    async fn download(&self, storage_key: &str) -> StorageResult<Vec<u8>>;

    /// Stream a file in chunks without buffering it entirely
    async fn download_stream(&self, storage_key: &str) -> StorageResult<ByteStream>;

    /// Delete a file. Deleting a missing file succeeds.
    async fn delete(&self, storage_key: &str) -> StorageResult<()>;

    /// Delete every file under a key prefix. A missing prefix succeeds.
    async fn delete_prefix(&self, prefix: &str) -> StorageResult<()>;

    /// Check if a file exists
    async fn exists(&self, storage_key: &str) -> StorageResult<bool>;
}
