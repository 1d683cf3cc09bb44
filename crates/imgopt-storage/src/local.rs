use crate::traits::{ByteStream, Storage, StorageError, StorageResult};
use async_trait::async_trait;
use futures::StreamExt;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Local filesystem storage implementation
#[derive(Clone, Debug)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at `base_path`, creating the directory if needed.
    pub async fn new(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalStorage { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Convert a storage key to a filesystem path.
    ///
    /// Keys are relative and may only contain normal path segments, so the result
    /// always stays under the storage root.
    fn key_to_path(&self, storage_key: &str) -> StorageResult<PathBuf> {
        if storage_key.is_empty() || storage_key.contains('\\') {
            return Err(StorageError::InvalidKey(
                "Storage key contains invalid characters".to_string(),
            ));
        }

        let relative = Path::new(storage_key);
        for component in relative.components() {
            match component {
                Component::Normal(_) => {}
                _ => {
                    return Err(StorageError::InvalidKey(
                        "Storage key resolves outside storage directory".to_string(),
                    ))
                }
            }
        }

        Ok(self.base_path.join(relative))
    }

    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn upload_with_key(
        &self,
        storage_key: &str,
        data: Vec<u8>,
        _content_type: &str,
    ) -> StorageResult<()> {
        let path = self.key_to_path(storage_key)?;
        let size = data.len();
        self.ensure_parent_dir(&path).await?;

        let start = std::time::Instant::now();

        // Readers never observe a half-written file: write aside, then rename over.
        let tmp_path = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        let mut file = fs::File::create(&tmp_path).await.map_err(|e| {
            StorageError::UploadFailed(format!(
                "Failed to create file {}: {}",
                tmp_path.display(),
                e
            ))
        })?;

        file.write_all(&data).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to write file {}: {}", tmp_path.display(), e))
        })?;

        file.sync_all().await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to sync file {}: {}", tmp_path.display(), e))
        })?;
        drop(file);

        if let Err(e) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::UploadFailed(format!(
                "Failed to move file into place {}: {}",
                path.display(),
                e
            )));
        }

        tracing::debug!(
            key = %storage_key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage write successful"
        );

        Ok(())
    }

    async fn download(&self, storage_key: &str) -> StorageResult<Vec<u8>> {
        let path = self.key_to_path(storage_key)?;

        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(storage_key.to_string()))
            }
            Err(e) => Err(StorageError::DownloadFailed(format!(
                "Failed to read file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn download_stream(&self, storage_key: &str) -> StorageResult<ByteStream> {
        let path = self.key_to_path(storage_key)?;

        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(storage_key.to_string()))
            }
            Err(e) => {
                return Err(StorageError::DownloadFailed(format!(
                    "Failed to open file {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let key = storage_key.to_string();
        let stream = tokio_util::io::ReaderStream::new(file).map(move |chunk| {
            chunk.map_err(|e| {
                tracing::error!(key = %key, error = %e, "Local storage stream read error");
                StorageError::DownloadFailed(format!("Failed to read chunk: {}", e))
            })
        });

        Ok(Box::pin(stream))
    }

    async fn delete(&self, storage_key: &str) -> StorageResult<()> {
        let path = self.key_to_path(storage_key)?;

        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(key = %storage_key, "Local storage delete successful");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteFailed(format!(
                "Failed to delete file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> StorageResult<()> {
        let path = self.key_to_path(prefix.trim_end_matches('/'))?;

        match fs::remove_dir_all(&path).await {
            Ok(()) => {
                tracing::debug!(prefix = %prefix, "Local storage prefix removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteFailed(format!(
                "Failed to delete directory {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn exists(&self, storage_key: &str) -> StorageResult<bool> {
        let path = self.key_to_path(storage_key)?;
        Ok(fs::try_exists(&path).await.unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys;
    use futures::StreamExt;
    use tempfile::tempdir;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_write_then_read_back() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();

        let key = keys::batch_input_key(Uuid::new_v4());
        storage
            .upload_with_key(&key, b"workbook bytes".to_vec(), "application/octet-stream")
            .await
            .unwrap();

        assert_eq!(storage.download(&key).await.unwrap(), b"workbook bytes");
        assert!(storage.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_content_without_leftovers() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        let id = Uuid::new_v4();
        let key = keys::batch_output_key(id);

        storage.upload_with_key(&key, b"first".to_vec(), "x").await.unwrap();
        storage.upload_with_key(&key, b"second".to_vec(), "x").await.unwrap();

        assert_eq!(storage.download(&key).await.unwrap(), b"second");
        let entries: Vec<_> = std::fs::read_dir(dir.path().join(keys::batch_prefix(id)))
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();

        let result = storage.download("../../../etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage.delete("batches/../../etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage.exists("/etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage.delete_prefix("..").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found_and_delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();

        assert!(matches!(
            storage.download("batches/nope/output.xlsx").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            storage.download_stream("batches/nope/output.xlsx").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(storage.delete("batches/nope/output.xlsx").await.is_ok());
        assert!(storage.delete_prefix("images/nope").await.is_ok());
    }

    #[tokio::test]
    async fn test_stream_download_yields_full_content() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        let key = keys::image_key(Uuid::new_v4(), "photo-abcdef0123");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        storage.upload_with_key(&key, data.clone(), "image/jpeg").await.unwrap();

        let mut stream = storage.download_stream(&key).await.unwrap();
        let mut downloaded = Vec::new();
        while let Some(chunk) = stream.next().await {
            downloaded.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(downloaded, data);
    }

    #[tokio::test]
    async fn test_reclaim_removes_all_batch_artifacts() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        let id = Uuid::new_v4();
        let other = Uuid::new_v4();

        for key in [
            keys::batch_input_key(id),
            keys::batch_output_key(id),
            keys::image_key(id, "a-0000000000"),
            keys::batch_input_key(other),
        ] {
            storage.upload_with_key(&key, vec![1, 2, 3], "x").await.unwrap();
        }

        crate::reclaim_batch_artifacts(&storage, id).await.unwrap();

        assert!(!storage.exists(&keys::batch_input_key(id)).await.unwrap());
        assert!(!storage.exists(&keys::batch_output_key(id)).await.unwrap());
        assert!(!storage.exists(&keys::image_key(id, "a-0000000000")).await.unwrap());
        assert!(storage.exists(&keys::batch_input_key(other)).await.unwrap());
    }
}
