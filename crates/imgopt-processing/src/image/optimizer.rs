use anyhow::Context;
use async_trait::async_trait;
use imgopt_core::{BatchId, Config};
use imgopt_storage::{image_key, Storage};
use std::sync::Arc;
use std::time::Duration;

use super::{naming, pad};
use crate::traits::ItemProcessor;

/// Largest image body accepted from a source server.
pub const MAX_IMAGE_BYTES: u64 = 40 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct OptimizerSettings {
    pub public_base_url: String,
    pub fetch_timeout: Duration,
    pub min_side: u32,
    pub jpeg_quality: u8,
    pub max_image_bytes: u64,
}

impl OptimizerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            public_base_url: config.public_base_url().to_string(),
            fetch_timeout: Duration::from_secs(config.image_fetch_timeout_secs()),
            min_side: config.image_min_side(),
            jpeg_quality: config.jpeg_quality(),
            max_image_bytes: MAX_IMAGE_BYTES,
        }
    }
}

/// Fetches a remote image, pads and re-encodes it, and stores the JPEG under the
/// batch's image prefix.
#[derive(Clone)]
pub struct ImageOptimizer {
    client: reqwest::Client,
    storage: Arc<dyn Storage>,
    settings: OptimizerSettings,
}

impl ImageOptimizer {
    pub fn new(storage: Arc<dyn Storage>, settings: OptimizerSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.fetch_timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            storage,
            settings,
        })
    }

    /// Download `url`, refusing bodies over `max_image_bytes` whether or not the
    /// server announces a length.
    async fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let limit = self.settings.max_image_bytes;
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to download {}", url))?
            .error_for_status()
            .with_context(|| format!("Image server refused {}", url))?;
        if let Some(length) = response.content_length() {
            if length > limit {
                anyhow::bail!("Image at {} is {} bytes, over the {} byte limit", url, length, limit);
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .with_context(|| format!("Failed to read body of {}", url))?
        {
            if (body.len() + chunk.len()) as u64 > limit {
                anyhow::bail!("Image at {} exceeds the {} byte limit", url, limit);
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

#[async_trait]
impl ItemProcessor for ImageOptimizer {
    async fn process(&self, batch_id: BatchId, source_url: &str) -> anyhow::Result<String> {
        let original = self.fetch(source_url).await?;

        let min_side = self.settings.min_side;
        let quality = self.settings.jpeg_quality;
        let jpeg = tokio::task::spawn_blocking(move || pad::optimize(&original, min_side, quality))
            .await
            .context("Image conversion task failed")?
            .with_context(|| format!("Not a decodable image: {}", source_url))?;

        let nice_id = naming::nice_id(&naming::slug_from_url(source_url));
        self.storage
            .upload_with_key(&image_key(batch_id, &nice_id), jpeg, "image/jpeg")
            .await
            .context("Failed to store optimized image")?;

        tracing::debug!(batch_id = %batch_id, nice_id = %nice_id, "Image optimized");
        Ok(naming::public_image_url(
            &self.settings.public_base_url,
            batch_id,
            &nice_id,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::pad::tests::png_bytes;
    use imgopt_storage::LocalStorage;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn optimizer(dir: &std::path::Path) -> (ImageOptimizer, Arc<LocalStorage>) {
        optimizer_with_limit(dir, MAX_IMAGE_BYTES).await
    }

    async fn optimizer_with_limit(
        dir: &std::path::Path,
        max_image_bytes: u64,
    ) -> (ImageOptimizer, Arc<LocalStorage>) {
        let storage = Arc::new(LocalStorage::new(dir).await.unwrap());
        let optimizer = ImageOptimizer::new(
            storage.clone(),
            OptimizerSettings {
                public_base_url: "http://imgopt.test".to_string(),
                fetch_timeout: Duration::from_secs(5),
                min_side: 600,
                jpeg_quality: 90,
                max_image_bytes,
            },
        )
        .unwrap();
        (optimizer, storage)
    }

    #[tokio::test]
    async fn test_process_stores_jpeg_and_returns_public_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/products/Blue%20Hat.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes(20, 30)))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (optimizer, storage) = optimizer(dir.path()).await;
        let batch_id = Uuid::new_v4();

        let url = optimizer
            .process(batch_id, &format!("{}/products/Blue%20Hat.png?size=l", server.uri()))
            .await
            .unwrap();

        let prefix = format!("http://imgopt.test/api/i/{}/", batch_id);
        assert!(url.starts_with(&prefix), "unexpected url {}", url);
        let nice_id = &url[prefix.len()..];
        assert!(nice_id.starts_with("blue-20hat-png-"));

        let stored = storage.download(&image_key(batch_id, nice_id)).await.unwrap();
        let decoded = image::load_from_memory(&stored).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (600, 600));
    }

    #[tokio::test]
    async fn test_http_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (optimizer, _) = optimizer(dir.path()).await;
        let result = optimizer
            .process(Uuid::new_v4(), &format!("{}/missing.jpg", server.uri()))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_non_image_body_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (optimizer, _) = optimizer(dir.path()).await;
        let err = optimizer
            .process(Uuid::new_v4(), &format!("{}/page", server.uri()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Not a decodable image"));
    }

    #[tokio::test]
    async fn test_oversized_body_is_refused() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/huge.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 8 * 1024]))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/small.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes(4, 4)))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (optimizer, _) = optimizer_with_limit(dir.path(), 4 * 1024).await;

        let err = optimizer
            .process(Uuid::new_v4(), &format!("{}/huge.png", server.uri()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("byte limit"), "unexpected error {}", err);

        assert!(optimizer
            .process(Uuid::new_v4(), &format!("{}/small.png", server.uri()))
            .await
            .is_ok());
    }
}
