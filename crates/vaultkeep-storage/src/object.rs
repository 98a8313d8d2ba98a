//! `object_store` backed remote storage (WebDAV and S3)

use crate::traits::{validate_remote_path, RemoteStorage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use chrono_tz::Tz;
use futures::StreamExt;
use http::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use object_store::aws::AmazonS3Builder;
use object_store::http::HttpBuilder;
use object_store::path::Path as ObjectPath;
use object_store::Error as ObjectStoreError;
use object_store::{ClientOptions, ObjectStore, ObjectStoreExt, PutPayload};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use vaultkeep_core::models::backup::sort_oldest_first;
use vaultkeep_core::BackupRecord;

/// Remote storage over any `object_store` implementation
#[derive(Clone)]
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    backend: StorageBackend,
    /// Human-readable location used in logs (URL or bucket)
    target: String,
    tz: Tz,
}

impl ObjectStorage {
    /// Wrap an already-built store (used by tests with `object_store::memory`).
    pub fn from_store(
        store: Arc<dyn ObjectStore>,
        backend: StorageBackend,
        target: impl Into<String>,
        tz: Tz,
    ) -> Self {
        Self {
            store,
            backend,
            target: target.into(),
            tz,
        }
    }

    /// Create a WebDAV-backed instance
    ///
    /// # Arguments
    /// * `url` - WebDAV collection URL (e.g. "https://cloud.example.com/remote.php/dav/files/me")
    /// * `credentials` - Optional (user, password) pair sent as HTTP basic auth
    pub fn webdav(url: &str, credentials: Option<(&str, &str)>, tz: Tz) -> StorageResult<Self> {
        let mut options = ClientOptions::new().with_allow_http(url.starts_with("http://"));

        if let Some((user, password)) = credentials {
            let token = general_purpose::STANDARD.encode(format!("{}:{}", user, password));
            let mut value = HeaderValue::from_str(&format!("Basic {}", token))
                .map_err(|e| StorageError::ConfigError(format!("Invalid credentials: {}", e)))?;
            value.set_sensitive(true);

            let mut headers = HeaderMap::new();
            headers.insert(AUTHORIZATION, value);
            options = options.with_default_headers(headers);
        }

        let store = HttpBuilder::new()
            .with_url(url)
            .with_client_options(options)
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        Ok(Self::from_store(
            Arc::new(store),
            StorageBackend::WebDav,
            url,
            tz,
        ))
    }

    /// Create an S3-backed instance
    ///
    /// # Arguments
    /// * `bucket` - S3 bucket name
    /// * `region` - AWS region (or region identifier for S3-compatible providers)
    /// * `endpoint_url` - Optional custom endpoint URL for S3-compatible providers
    ///   (e.g., "http://localhost:9000" for MinIO)
    pub fn s3(
        bucket: &str,
        region: &str,
        endpoint_url: Option<&str>,
        tz: Tz,
    ) -> StorageResult<Self> {
        // Credentials come from the usual AWS_* environment variables
        let mut builder = AmazonS3Builder::from_env()
            .with_region(region)
            .with_bucket_name(bucket);

        if let Some(endpoint) = endpoint_url {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        Ok(Self::from_store(
            Arc::new(store),
            StorageBackend::S3,
            format!("s3://{}", bucket),
            tz,
        ))
    }

    fn location(remote_path: &str) -> StorageResult<ObjectPath> {
        validate_remote_path(remote_path)?;
        Ok(ObjectPath::from(remote_path))
    }
}

#[async_trait]
impl RemoteStorage for ObjectStorage {
    async fn put(&self, local_path: &Path, remote_path: &str) -> StorageResult<()> {
        let location = Self::location(remote_path)?;
        let data = tokio::fs::read(local_path).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to read {}: {}", local_path.display(), e))
        })?;
        let size = data.len() as u64;

        let start = std::time::Instant::now();

        self.store
            .put(&location, PutPayload::from(Bytes::from(data)))
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    location = %self.target,
                    path = %remote_path,
                    size_bytes = size,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Remote upload failed"
                );
                StorageError::UploadFailed(e.to_string())
            })?;

        tracing::info!(
            location = %self.target,
            path = %remote_path,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Remote upload successful"
        );

        Ok(())
    }

    async fn list(&self, remote_prefix: &str) -> StorageResult<Vec<BackupRecord>> {
        let prefix = remote_prefix.trim_matches('/');
        let prefix_path = if prefix.is_empty() {
            None
        } else {
            Some(Self::location(prefix)?)
        };

        // One level only: archives in nested folders are not ours to rotate
        let listing = self.store.list_with_delimiter(prefix_path.as_ref()).await;
        let objects = match listing {
            Ok(listing) => listing.objects,
            // A prefix that was never written to is just empty
            Err(ObjectStoreError::NotFound { .. }) => Vec::new(),
            Err(e) => return Err(StorageError::ListFailed(e.to_string())),
        };

        let mut records: Vec<BackupRecord> = objects
            .into_iter()
            .filter_map(|meta| {
                BackupRecord::from_listing(
                    meta.location.as_ref(),
                    meta.size,
                    meta.last_modified,
                    self.tz,
                )
            })
            .collect();

        sort_oldest_first(&mut records);

        tracing::debug!(
            location = %self.target,
            prefix = %prefix,
            count = records.len(),
            "Remote listing complete"
        );

        Ok(records)
    }

    async fn get(&self, remote_path: &str, local_path: &Path) -> StorageResult<()> {
        let location = Self::location(remote_path)?;
        let start = std::time::Instant::now();

        let result = self.store.get(&location).await.map_err(|e| match e {
            ObjectStoreError::NotFound { .. } => StorageError::NotFound(remote_path.to_string()),
            other => {
                tracing::error!(
                    error = %other,
                    location = %self.target,
                    path = %remote_path,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Remote download failed"
                );
                StorageError::DownloadFailed(other.to_string())
            }
        })?;

        let mut file = tokio::fs::File::create(local_path).await?;
        let mut stream = result.into_stream();
        let mut size: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| StorageError::DownloadFailed(e.to_string()))?;
            size += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.sync_all().await?;

        tracing::info!(
            location = %self.target,
            path = %remote_path,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Remote download successful"
        );

        Ok(())
    }

    async fn delete(&self, remote_path: &str) -> StorageResult<()> {
        let location = Self::location(remote_path)?;

        match self.store.delete(&location).await {
            Ok(()) | Err(ObjectStoreError::NotFound { .. }) => {
                tracing::info!(
                    location = %self.target,
                    path = %remote_path,
                    "Remote delete successful"
                );
                Ok(())
            }
            Err(e) => Err(StorageError::DeleteFailed(e.to_string())),
        }
    }

    fn backend_type(&self) -> StorageBackend {
        self.backend
    }
}
