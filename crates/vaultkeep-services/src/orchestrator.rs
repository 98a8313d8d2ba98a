//! Backup/restore orchestration
//!
//! The [`Orchestrator`] drives one operation at a time through
//! `Idle → Stopping → Building/Extracting → Transferring → Starting → Idle`.
//! Every stage failure is converted into a [`FailureRecord`], logged and sent
//! to the notifier before the error is returned to the caller.
//!
//! Service state is always settled before returning: a failure while the
//! vault is stopped is followed by a best-effort start, and if that start
//! fails too the failure is marked critical.

use chrono::Utc;
use chrono_tz::Tz;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vaultkeep_core::constants::{MAX_UPLOAD_RETRY_DELAY_SECS, UPLOAD_RETRY_BASE_DELAY_SECS};
use vaultkeep_core::{
    AppError, AppResult, BackupConfig, BackupRecord, ConfigStore, FailureRecord, OperationKind,
    OperationStatus, OrchestratorState, RuntimeSettings, Stage,
};
use vaultkeep_infra::archive::{self, ArchiveHandle};
use vaultkeep_infra::{Notifier, ServiceController};
use vaultkeep_storage::{create_storage, RemoteStorage, StorageError};

use crate::lock::OperationLock;
use crate::retention::select_for_deletion;

/// Where a restore takes its archive from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreSource {
    /// Archive name under the configured remote prefix
    Remote(String),
    /// Archive already placed in the staging directory (e.g. an operator
    /// upload). The file is consumed: it is deleted whatever the outcome.
    Staged(PathBuf),
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupOutcome {
    pub name: String,
    pub remote_path: String,
    pub size_bytes: u64,
    pub encrypted: bool,
    /// Archive names removed by retention
    pub deleted: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreOutcome {
    pub name: String,
    pub files_restored: usize,
    /// Top-level entries removed from the data directory
    pub entries_cleared: usize,
}

enum StorageSource {
    /// Built from the current config for every operation
    FromConfig,
    Fixed(Arc<dyn RemoteStorage>),
}

enum NotifierSource {
    /// Built from the current config whenever a failure is reported
    FromConfig(Duration),
    Fixed(Arc<Notifier>),
}

/// A stage error before it becomes a [`FailureRecord`].
struct StageFailure {
    stage: Stage,
    error: AppError,
    critical: bool,
}

impl StageFailure {
    fn new(stage: Stage, error: AppError) -> Self {
        Self {
            stage,
            error,
            critical: false,
        }
    }

    fn critical(mut self) -> Self {
        self.critical = true;
        self
    }
}

pub struct Orchestrator {
    config: Arc<ConfigStore>,
    lock: Arc<OperationLock>,
    service: Arc<ServiceController>,
    storage: StorageSource,
    notifier: NotifierSource,
    data_dir: PathBuf,
    temp_dir: PathBuf,
    tz: Tz,
    upload_retries: u32,
    retry_base_delay: Duration,
    status: Mutex<OperationStatus>,
}

impl Orchestrator {
    /// Orchestrator with storage and notification channels derived from the
    /// config at the time of each operation.
    pub fn new(
        config: Arc<ConfigStore>,
        lock: Arc<OperationLock>,
        service: Arc<ServiceController>,
        data_dir: impl Into<PathBuf>,
        temp_dir: impl Into<PathBuf>,
        tz: Tz,
    ) -> Self {
        Self {
            config,
            lock,
            service,
            storage: StorageSource::FromConfig,
            notifier: NotifierSource::FromConfig(Duration::from_secs(10)),
            data_dir: data_dir.into(),
            temp_dir: temp_dir.into(),
            tz,
            upload_retries: 2,
            retry_base_delay: Duration::from_secs(UPLOAD_RETRY_BASE_DELAY_SECS),
            status: Mutex::new(OperationStatus::default()),
        }
    }

    pub fn from_settings(
        settings: &RuntimeSettings,
        config: Arc<ConfigStore>,
        lock: Arc<OperationLock>,
        service: Arc<ServiceController>,
    ) -> anyhow::Result<Self> {
        let mut orchestrator = Self::new(
            config,
            lock,
            service,
            settings.data_dir.clone(),
            settings.temp_dir.clone(),
            settings.tz()?,
        );
        orchestrator.notifier = NotifierSource::FromConfig(settings.notify_timeout());
        orchestrator.upload_retries = settings.upload_retries;
        Ok(orchestrator)
    }

    /// Use `storage` instead of building a backend from the config.
    pub fn with_storage(mut self, storage: Arc<dyn RemoteStorage>) -> Self {
        self.storage = StorageSource::Fixed(storage);
        self
    }

    /// Use `notifier` instead of building channels from the config.
    pub fn with_notifier(mut self, notifier: Arc<Notifier>) -> Self {
        self.notifier = NotifierSource::Fixed(notifier);
        self
    }

    pub fn with_upload_retries(mut self, retries: u32, base_delay: Duration) -> Self {
        self.upload_retries = retries;
        self.retry_base_delay = base_delay;
        self
    }

    pub fn status(&self) -> OperationStatus {
        self.status
            .lock()
            .map(|status| status.clone())
            .unwrap_or_default()
    }

    pub fn lock(&self) -> &OperationLock {
        &self.lock
    }

    /// Stop the vault, archive its data directory, start it again and ship
    /// the archive to remote storage, then apply retention.
    #[tracing::instrument(skip(self), fields(operation = "backup"))]
    pub async fn run_backup(&self) -> AppResult<BackupOutcome> {
        let _guard = self.lock.try_acquire(OperationKind::Backup).map_err(|e| {
            tracing::warn!(error = %e, "Backup rejected");
            e
        })?;
        let config = self.config.current();
        self.begin(OperationKind::Backup, Stage::Configuration);

        match self.backup_stages(&config).await {
            Ok(outcome) => {
                self.finish();
                tracing::info!(
                    archive = %outcome.name,
                    size_bytes = outcome.size_bytes,
                    encrypted = outcome.encrypted,
                    deleted = outcome.deleted.len(),
                    "Backup completed"
                );
                Ok(outcome)
            }
            Err(failure) => Err(self.fail(OperationKind::Backup, &config, failure).await),
        }
    }

    /// Replace the data directory with the contents of an archive.
    ///
    /// The archive is fully validated (format, passphrase, entry names)
    /// before the vault is stopped. Clearing the data directory is not
    /// reversible.
    #[tracing::instrument(skip(self), fields(operation = "restore"))]
    pub async fn run_restore(&self, source: RestoreSource) -> AppResult<RestoreOutcome> {
        let _guard = match self.lock.try_acquire(OperationKind::Restore) {
            Ok(guard) => guard,
            Err(e) => {
                tracing::warn!(error = %e, "Restore rejected");
                if let RestoreSource::Staged(path) = &source {
                    discard(path).await;
                }
                return Err(e);
            }
        };
        let config = self.config.current();
        let first_stage = match &source {
            RestoreSource::Remote(_) => Stage::Configuration,
            RestoreSource::Staged(_) => Stage::Validate,
        };
        self.begin(OperationKind::Restore, first_stage);

        match self.restore_stages(&config, source).await {
            Ok(outcome) => {
                self.finish();
                tracing::info!(
                    archive = %outcome.name,
                    files = outcome.files_restored,
                    "Restore completed"
                );
                Ok(outcome)
            }
            Err(failure) => Err(self.fail(OperationKind::Restore, &config, failure).await),
        }
    }

    /// Remote archives, newest first. Does not take the operation lock.
    pub async fn list_backups(&self) -> AppResult<Vec<BackupRecord>> {
        let config = self.config.current();
        let storage = self.storage(&config).await?;
        let mut records = storage.list(&config.remote_prefix()).await?;
        records.reverse();
        Ok(records)
    }

    async fn backup_stages(&self, config: &BackupConfig) -> Result<BackupOutcome, StageFailure> {
        // Configuration problems surface before the vault is touched
        self.enter(Stage::Configuration);
        let storage = self
            .storage(config)
            .await
            .map_err(|e| StageFailure::new(Stage::Configuration, e))?;
        let passphrase = config.encryption_password();

        self.enter(Stage::StopService);
        if let Err(e) = self.service.stop().await {
            return Err(self.recover_service(Stage::StopService, e).await);
        }

        self.enter(Stage::Build);
        let now = Utc::now().with_timezone(&self.tz);
        let name = BackupRecord::archive_name(&now, passphrase.is_some());
        let handle = match archive::build(&self.data_dir, &self.temp_dir, &name, passphrase).await
        {
            Ok(handle) => handle,
            Err(e) => return Err(self.recover_service(Stage::Build, e).await),
        };

        // The archive is consistent from here on; downtime ends before transfer
        self.enter(Stage::StartService);
        let start_error = self.service.start().await.err();
        if let Some(e) = &start_error {
            tracing::error!(error = %e, "Service did not start after archiving; transferring archive anyway");
        }

        let remote_path = config.remote_path(&name);
        let transfer = self
            .transfer(storage.as_ref(), config, &handle, &remote_path)
            .await;

        if let Some(e) = start_error {
            if let Err(failure) = &transfer {
                tracing::error!(
                    stage = %failure.stage,
                    error = %failure.error,
                    "Archive transfer also failed"
                );
            }
            return Err(StageFailure::new(Stage::StartService, e).critical());
        }

        let deleted = transfer?;
        Ok(BackupOutcome {
            name,
            remote_path,
            size_bytes: handle.size_bytes(),
            encrypted: handle.encrypted(),
            deleted,
        })
    }

    async fn transfer(
        &self,
        storage: &dyn RemoteStorage,
        config: &BackupConfig,
        handle: &ArchiveHandle,
        remote_path: &str,
    ) -> Result<Vec<String>, StageFailure> {
        self.enter(Stage::Upload);
        self.upload(storage, handle, remote_path)
            .await
            .map_err(|e| StageFailure::new(Stage::Upload, e))?;
        tracing::info!(remote_path, size_bytes = handle.size_bytes(), "Archive uploaded");

        self.enter(Stage::Retention);
        self.apply_retention(storage, config)
            .await
            .map_err(|e| StageFailure::new(Stage::Retention, e))
    }

    async fn upload(
        &self,
        storage: &dyn RemoteStorage,
        handle: &ArchiveHandle,
        remote_path: &str,
    ) -> AppResult<()> {
        let mut attempt: u32 = 0;
        loop {
            match storage.put(handle.path(), remote_path).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.upload_retries => {
                    let delay = self.retry_delay(attempt);
                    attempt += 1;
                    tracing::warn!(
                        error = %e,
                        attempt,
                        max_retries = self.upload_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Upload failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Capped exponential backoff: base, 2×base, 4×base, ...
    fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt);
        self.retry_base_delay
            .saturating_mul(factor)
            .min(Duration::from_secs(MAX_UPLOAD_RETRY_DELAY_SECS))
    }

    async fn apply_retention(
        &self,
        storage: &dyn RemoteStorage,
        config: &BackupConfig,
    ) -> AppResult<Vec<String>> {
        let Some(limit) = config.retention_limit() else {
            return Ok(Vec::new());
        };

        let records = storage.list(&config.remote_prefix()).await?;
        let doomed = select_for_deletion(&records, Some(limit));
        let mut deleted = Vec::with_capacity(doomed.len());
        for record in doomed {
            storage.delete(&record.path).await?;
            tracing::info!(archive = %record.name, "Deleted old backup");
            deleted.push(record.name);
        }
        Ok(deleted)
    }

    async fn restore_stages(
        &self,
        config: &BackupConfig,
        source: RestoreSource,
    ) -> Result<RestoreOutcome, StageFailure> {
        let passphrase = config.encryption_password();

        let (handle, name) = match source {
            RestoreSource::Remote(name) => {
                let handle = self.download(config, &name).await?;
                (handle, name)
            }
            RestoreSource::Staged(path) => {
                self.enter(Stage::Validate);
                let handle = ArchiveHandle::adopt(&path)
                    .map_err(|e| StageFailure::new(Stage::Validate, e))?;
                let name = handle.file_name().unwrap_or("uploaded archive").to_string();
                (handle, name)
            }
        };

        self.enter(Stage::Validate);
        let verified = archive::open(handle.path(), passphrase)
            .await
            .map_err(|e| StageFailure::new(Stage::Validate, e))?;
        tracing::info!(archive = %name, files = verified.len(), "Archive validated");

        self.enter(Stage::StopService);
        if let Err(e) = self.service.stop().await {
            return Err(self.recover_service(Stage::StopService, e).await);
        }

        self.enter(Stage::ClearData);
        let data_dir = self.data_dir.clone();
        let cleared =
            match run_blocking(move || archive::clear_directory(&data_dir)).await {
                Ok(count) => count,
                Err(e) => return Err(self.recover_service(Stage::ClearData, e).await),
            };
        tracing::warn!(dir = %self.data_dir.display(), entries = cleared, "Data directory cleared");

        self.enter(Stage::Extract);
        let data_dir = self.data_dir.clone();
        let unpacked = match run_blocking(move || archive::remove_sqlite_side_files(&data_dir)).await
        {
            Ok(_) => verified.unpack(&self.data_dir).await,
            Err(e) => Err(e),
        };
        let files_restored = match unpacked {
            Ok(count) => count,
            Err(e) => return Err(self.recover_service(Stage::Extract, e).await),
        };
        drop(handle);

        self.enter(Stage::StartService);
        self.service
            .start()
            .await
            .map_err(|e| StageFailure::new(Stage::StartService, e).critical())?;

        Ok(RestoreOutcome {
            name,
            files_restored,
            entries_cleared: cleared,
        })
    }

    async fn download(
        &self,
        config: &BackupConfig,
        name: &str,
    ) -> Result<ArchiveHandle, StageFailure> {
        self.enter(Stage::Configuration);
        if BackupRecord::parse_name(name).is_none() {
            return Err(StageFailure::new(
                Stage::Configuration,
                AppError::ConfigValidation(format!("'{}' is not a backup archive name", name)),
            ));
        }
        let storage = self
            .storage(config)
            .await
            .map_err(|e| StageFailure::new(Stage::Configuration, e))?;

        self.enter(Stage::Download);
        tokio::fs::create_dir_all(&self.temp_dir).await.map_err(|e| {
            StageFailure::new(
                Stage::Download,
                AppError::io(format!("creating {}", self.temp_dir.display()), e),
            )
        })?;
        let local = self.temp_dir.join(name);
        if let Err(e) = storage.get(&config.remote_path(name), &local).await {
            discard(&local).await;
            return Err(StageFailure::new(Stage::Download, e.into()));
        }
        ArchiveHandle::adopt(&local).map_err(|e| StageFailure::new(Stage::Download, e))
    }

    /// Best-effort start after `stage` failed with the vault stopped.
    async fn recover_service(&self, stage: Stage, error: AppError) -> StageFailure {
        tracing::warn!(stage = %stage, error = %error, "Stage failed, starting service again");
        match self.service.start().await {
            Ok(()) => StageFailure::new(stage, error),
            Err(start_error) => {
                tracing::error!(error = %start_error, "Service could not be started again");
                StageFailure::new(stage, error).critical()
            }
        }
    }

    async fn storage(&self, config: &BackupConfig) -> AppResult<Arc<dyn RemoteStorage>> {
        match &self.storage {
            StorageSource::Fixed(storage) => Ok(storage.clone()),
            StorageSource::FromConfig => {
                create_storage(config, self.tz).await.map_err(|e| match e {
                    StorageError::ConfigError(message) => AppError::ConfigValidation(format!(
                        "Remote storage is not configured: {}",
                        message
                    )),
                    other => other.into(),
                })
            }
        }
    }

    fn notifier(&self, config: &BackupConfig) -> Arc<Notifier> {
        match &self.notifier {
            NotifierSource::Fixed(notifier) => notifier.clone(),
            NotifierSource::FromConfig(timeout) => {
                Arc::new(Notifier::from_config(config, *timeout))
            }
        }
    }

    async fn fail(
        &self,
        kind: OperationKind,
        config: &BackupConfig,
        failure: StageFailure,
    ) -> AppError {
        let mut record = FailureRecord::new(kind, failure.stage, &failure.error);
        if failure.critical {
            record = record.critical();
        }

        tracing::error!(
            operation = %kind,
            stage = %record.stage,
            error_code = %record.error_code,
            critical = record.critical,
            error = %failure.error,
            "Operation failed"
        );

        self.update_status(|status| {
            status.state = OrchestratorState::Failed;
            status.last_failure = Some(record.clone());
        });

        self.notifier(config).notify_failure(&record).await;
        failure.error
    }

    /// Mark `kind` as running, already in the state of its first stage.
    fn begin(&self, kind: OperationKind, first_stage: Stage) {
        tracing::info!(operation = %kind, "Operation started");
        self.update_status(|status| {
            status.kind = kind;
            status.state = first_stage.state();
        });
    }

    fn enter(&self, stage: Stage) {
        let state = stage.state();
        tracing::info!(stage = %stage, state = %state, "Entering stage");
        self.update_status(|status| status.state = state);
    }

    fn finish(&self) {
        self.update_status(|status| {
            status.kind = OperationKind::None;
            status.state = OrchestratorState::Idle;
        });
    }

    fn update_status(&self, apply: impl FnOnce(&mut OperationStatus)) {
        let mut status = match self.status.lock() {
            Ok(status) => status,
            Err(poisoned) => poisoned.into_inner(),
        };
        apply(&mut status);
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }
}

#[cfg(feature = "scheduler")]
#[async_trait::async_trait]
impl crate::scheduler::ScheduledJob for Orchestrator {
    async fn run(&self) {
        match self.run_backup().await {
            Ok(outcome) => {
                tracing::info!(archive = %outcome.name, "Scheduled backup finished")
            }
            Err(AppError::ConcurrentOperation { active }) => {
                tracing::warn!(active = %active, "Scheduled backup skipped, another operation is running")
            }
            // Already logged and notified
            Err(e) => tracing::debug!(error = %e, "Scheduled backup failed"),
        }
    }
}

async fn run_blocking<T, F>(work: F) -> AppResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> AppResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work).await?
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove staged archive");
        }
    }
}
