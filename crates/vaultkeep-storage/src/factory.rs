#[cfg(feature = "storage-local")]
use crate::LocalStorage;
#[cfg(feature = "storage-object")]
use crate::ObjectStorage;
use crate::{RemoteStorage, StorageBackend, StorageError, StorageResult};
use chrono_tz::Tz;
use std::sync::Arc;
use vaultkeep_core::BackupConfig;

/// Create a storage backend based on configuration
pub async fn create_storage(config: &BackupConfig, tz: Tz) -> StorageResult<Arc<dyn RemoteStorage>> {
    match config.storage_backend {
        #[cfg(feature = "storage-object")]
        StorageBackend::WebDav => {
            let url = config.webdav_url().ok_or_else(|| {
                StorageError::ConfigError("webdav_url not configured".to_string())
            })?;
            let credentials = config
                .webdav_user()
                .map(|user| (user, config.webdav_password().unwrap_or_default()));

            let storage = ObjectStorage::webdav(url, credentials, tz)?;
            Ok(Arc::new(storage))
        }

        #[cfg(feature = "storage-object")]
        StorageBackend::S3 => {
            let bucket = config
                .s3_bucket()
                .ok_or_else(|| StorageError::ConfigError("s3_bucket not configured".to_string()))?;
            let region = config
                .s3_region()
                .ok_or_else(|| StorageError::ConfigError("s3_region not configured".to_string()))?;

            let storage = ObjectStorage::s3(bucket, region, config.s3_endpoint(), tz)?;
            Ok(Arc::new(storage))
        }

        #[cfg(not(feature = "storage-object"))]
        StorageBackend::WebDav | StorageBackend::S3 => Err(StorageError::ConfigError(
            "Object storage backends not available (storage-object feature not enabled)"
                .to_string(),
        )),

        #[cfg(feature = "storage-local")]
        StorageBackend::Local => {
            let base_path = config
                .local_path()
                .ok_or_else(|| StorageError::ConfigError("local_path not configured".to_string()))?;

            let storage = LocalStorage::new(base_path, tz).await?;
            Ok(Arc::new(storage))
        }

        #[cfg(not(feature = "storage-local"))]
        StorageBackend::Local => Err(StorageError::ConfigError(
            "Local storage backend not available (storage-local feature not enabled)".to_string(),
        )),
    }
}

#[cfg(all(test, feature = "storage-local", feature = "storage-object"))]
mod tests {
    use super::*;
    use chrono_tz::Asia::Shanghai;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_settings_are_config_errors() {
        let config = BackupConfig::default();
        let result = create_storage(&config, Shanghai).await;
        assert!(matches!(result, Err(StorageError::ConfigError(_))));

        let config = BackupConfig {
            storage_backend: StorageBackend::S3,
            s3_bucket: Some("vault".into()),
            ..Default::default()
        };
        let result = create_storage(&config, Shanghai).await;
        assert!(matches!(result, Err(StorageError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_backend_selection() {
        let dir = tempdir().unwrap();
        let config = BackupConfig {
            storage_backend: StorageBackend::Local,
            local_path: Some(dir.path().to_string_lossy().into_owned()),
            ..Default::default()
        };
        let storage = create_storage(&config, Shanghai).await.unwrap();
        assert_eq!(storage.backend_type(), StorageBackend::Local);

        let config = BackupConfig {
            webdav_url: Some("https://dav.example.com/files".into()),
            webdav_user: Some("me".into()),
            webdav_password: Some("pw".into()),
            ..Default::default()
        };
        let storage = create_storage(&config, Shanghai).await.unwrap();
        assert_eq!(storage.backend_type(), StorageBackend::WebDav);
    }
}
