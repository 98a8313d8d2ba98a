//! Remote storage abstraction trait
//!
//! This module defines the RemoteStorage trait that all storage backends must implement.

use crate::StorageBackend;
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;
use vaultkeep_core::{AppError, BackupRecord};

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("List failed: {0}")]
    ListFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid remote path: {0}")]
    InvalidPath(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        AppError::RemoteStorage(err.to_string())
    }
}

/// Remote storage abstraction trait
///
/// Archives are addressed by remote path `<prefix>/<archive name>`. No
/// backend retries; callers decide whether a failure is worth another attempt.
///
/// Every operation is idempotent from the caller's side: `put` overwrites and
/// `delete` of a missing path succeeds.
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// Upload a local file to `remote_path`, replacing any existing object.
    async fn put(&self, local_path: &Path, remote_path: &str) -> StorageResult<()>;

    /// List archives under `remote_prefix`, oldest first.
    ///
    /// Objects whose names do not follow the archive naming scheme are skipped.
    async fn list(&self, remote_prefix: &str) -> StorageResult<Vec<BackupRecord>>;

    /// Download `remote_path` into `local_path`.
    async fn get(&self, remote_path: &str, local_path: &Path) -> StorageResult<()>;

    /// Delete `remote_path`. Deleting a missing object is not an error.
    async fn delete(&self, remote_path: &str) -> StorageResult<()>;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}

/// Reject remote paths that could escape the configured prefix.
pub(crate) fn validate_remote_path(remote_path: &str) -> StorageResult<()> {
    if remote_path.is_empty()
        || remote_path.starts_with('/')
        || remote_path.split('/').any(|segment| segment == "..")
    {
        return Err(StorageError::InvalidPath(remote_path.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_remote_path() {
        assert!(validate_remote_path("vw_backup_20240101_000000.zip").is_ok());
        assert!(validate_remote_path("backups/vw_backup_20240101_000000.zip").is_ok());
        assert!(validate_remote_path("").is_err());
        assert!(validate_remote_path("/etc/passwd").is_err());
        assert!(validate_remote_path("backups/../../etc/passwd").is_err());
    }

    #[test]
    fn test_storage_error_maps_to_remote_storage() {
        let err: AppError = StorageError::UploadFailed("401 Unauthorized".into()).into();
        assert!(matches!(err, AppError::RemoteStorage(ref m) if m.contains("401")));
        assert_eq!(err.error_code(), "REMOTE_STORAGE_ERROR");
    }
}
