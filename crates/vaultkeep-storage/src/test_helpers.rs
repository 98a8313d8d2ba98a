//! In-memory RemoteStorage for tests

use crate::{RemoteStorage, StorageBackend, StorageError, StorageResult};
use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use vaultkeep_core::models::backup::sort_oldest_first;
use vaultkeep_core::BackupRecord;

/// Mock storage implementation that stores archives in memory
pub struct MockStorage {
    files: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    tz: Tz,
    /// Number of upcoming `put` calls that fail
    failing_puts: AtomicU32,
    put_attempts: AtomicU32,
    fail_list: Mutex<bool>,
    deleted: Mutex<Vec<String>>,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::with_tz(chrono_tz::Asia::Shanghai)
    }

    pub fn with_tz(tz: Tz) -> Self {
        Self {
            files: Arc::new(Mutex::new(BTreeMap::new())),
            tz,
            failing_puts: AtomicU32::new(0),
            put_attempts: AtomicU32::new(0),
            fail_list: Mutex::new(false),
            deleted: Mutex::new(Vec::new()),
        }
    }

    /// Set a file in the mock storage
    pub fn set_file(&self, remote_path: &str, data: Vec<u8>) {
        self.files
            .lock()
            .unwrap()
            .insert(remote_path.to_string(), data);
    }

    /// Check if a file exists in the mock storage
    pub fn has_file(&self, remote_path: &str) -> bool {
        self.files.lock().unwrap().contains_key(remote_path)
    }

    /// Get file data (for test assertions)
    pub fn get_file(&self, remote_path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(remote_path).cloned()
    }

    /// All stored paths, sorted
    pub fn paths(&self) -> Vec<String> {
        self.files.lock().unwrap().keys().cloned().collect()
    }

    /// Paths removed through `delete`, in call order
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    /// Make the next `count` uploads fail
    pub fn fail_next_puts(&self, count: u32) {
        self.failing_puts.store(count, Ordering::SeqCst);
    }

    pub fn put_attempts(&self) -> u32 {
        self.put_attempts.load(Ordering::SeqCst)
    }

    pub fn set_fail_list(&self, fail: bool) {
        *self.fail_list.lock().unwrap() = fail;
    }
}

impl Default for MockStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStorage for MockStorage {
    async fn put(&self, local_path: &Path, remote_path: &str) -> StorageResult<()> {
        self.put_attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failing_puts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_puts.store(remaining - 1, Ordering::SeqCst);
            return Err(StorageError::UploadFailed(
                "mock upload failure".to_string(),
            ));
        }
        let data = tokio::fs::read(local_path).await?;
        self.set_file(remote_path, data);
        Ok(())
    }

    async fn list(&self, remote_prefix: &str) -> StorageResult<Vec<BackupRecord>> {
        if *self.fail_list.lock().unwrap() {
            return Err(StorageError::ListFailed("mock list failure".to_string()));
        }
        let prefix = remote_prefix.trim_matches('/');
        let files = self.files.lock().unwrap();
        let mut records: Vec<BackupRecord> = files
            .iter()
            .filter(|(path, _)| {
                let parent = path.rsplit_once('/').map(|(p, _)| p).unwrap_or("");
                parent == prefix
            })
            .filter_map(|(path, data)| {
                BackupRecord::from_listing(path, data.len() as u64, Utc::now(), self.tz)
            })
            .collect();
        sort_oldest_first(&mut records);
        Ok(records)
    }

    async fn get(&self, remote_path: &str, local_path: &Path) -> StorageResult<()> {
        let data = self
            .get_file(remote_path)
            .ok_or_else(|| StorageError::NotFound(remote_path.to_string()))?;
        tokio::fs::write(local_path, data).await?;
        Ok(())
    }

    async fn delete(&self, remote_path: &str) -> StorageResult<()> {
        self.files.lock().unwrap().remove(remote_path);
        self.deleted.lock().unwrap().push(remote_path.to_string());
        Ok(())
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}
