use crate::traits::{validate_remote_path, RemoteStorage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::path::{Path, PathBuf};
use tokio::fs;
use vaultkeep_core::models::backup::sort_oldest_first;
use vaultkeep_core::BackupRecord;

/// Directory-backed remote storage (a mounted NAS share, a second disk)
#[derive(Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
    tz: Tz,
}

impl LocalStorage {
    /// Create a new LocalStorage instance
    ///
    /// # Arguments
    /// * `base_path` - Root directory archives are copied into (e.g. "/mnt/nas/vaultwarden")
    /// * `tz` - Zone archive names were stamped in
    pub async fn new(base_path: impl Into<PathBuf>, tz: Tz) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalStorage { base_path, tz })
    }

    fn remote_to_path(&self, remote_path: &str) -> StorageResult<PathBuf> {
        validate_remote_path(remote_path)?;
        Ok(self.base_path.join(remote_path))
    }

    fn prefix_to_dir(&self, remote_prefix: &str) -> StorageResult<PathBuf> {
        let prefix = remote_prefix.trim_matches('/');
        if prefix.is_empty() {
            return Ok(self.base_path.clone());
        }
        self.remote_to_path(prefix)
    }
}

#[async_trait]
impl RemoteStorage for LocalStorage {
    async fn put(&self, local_path: &Path, remote_path: &str) -> StorageResult<()> {
        let target = self.remote_to_path(remote_path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let start = std::time::Instant::now();

        // Copy beside the target then rename, so a listing never sees half a file
        let partial = target.with_extension("partial");
        let size = fs::copy(local_path, &partial).await.map_err(|e| {
            StorageError::UploadFailed(format!(
                "Failed to copy {} to {}: {}",
                local_path.display(),
                partial.display(),
                e
            ))
        })?;
        if let Err(e) = fs::rename(&partial, &target).await {
            let _ = fs::remove_file(&partial).await;
            return Err(StorageError::UploadFailed(format!(
                "Failed to move {} into place: {}",
                target.display(),
                e
            )));
        }

        tracing::info!(
            path = %target.display(),
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage put successful"
        );

        Ok(())
    }

    async fn list(&self, remote_prefix: &str) -> StorageResult<Vec<BackupRecord>> {
        let dir = self.prefix_to_dir(remote_prefix)?;
        let prefix = remote_prefix.trim_matches('/');

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StorageError::ListFailed(format!(
                    "Failed to read {}: {}",
                    dir.display(),
                    e
                )))
            }
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let remote_path = if prefix.is_empty() {
                name
            } else {
                format!("{}/{}", prefix, name)
            };
            let modified: DateTime<Utc> = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            if let Some(record) =
                BackupRecord::from_listing(&remote_path, metadata.len(), modified, self.tz)
            {
                records.push(record);
            }
        }

        sort_oldest_first(&mut records);
        Ok(records)
    }

    async fn get(&self, remote_path: &str, local_path: &Path) -> StorageResult<()> {
        let source = self.remote_to_path(remote_path)?;
        let start = std::time::Instant::now();

        let size = fs::copy(&source, local_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(remote_path.to_string())
            } else {
                StorageError::DownloadFailed(format!(
                    "Failed to copy {} to {}: {}",
                    source.display(),
                    local_path.display(),
                    e
                ))
            }
        })?;

        tracing::info!(
            path = %source.display(),
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage get successful"
        );

        Ok(())
    }

    async fn delete(&self, remote_path: &str) -> StorageResult<()> {
        let path = self.remote_to_path(remote_path)?;

        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(path = %path.display(), "Local storage delete successful");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteFailed(format!(
                "Failed to delete {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}
