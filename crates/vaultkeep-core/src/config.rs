//! Backup configuration
//!
//! `BackupConfig` is the operator-edited document persisted as JSON at
//! `<conf_dir>/backup_config.json`. Field names follow the document the
//! dashboard has always written, so existing files load unchanged.
//!
//! A single [`ConfigStore`] owns the live copy for the whole process. Readers
//! take snapshots and the scheduler subscribes to changes. Only
//! [`ConfigStore::save`] writes, and it validates first. Saves made by other
//! processes (`vaultkeep config set` next to a running `vaultkeep serve`)
//! are picked up by [`ConfigStore::reload_if_changed`].

use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::constants::DEFAULT_SCHEDULE_CRON;
use crate::error::{AppError, AppResult};
use crate::schedule::parse_schedule;
use crate::storage_types::StorageBackend;

const REDACTED: &str = "********";

fn default_webdav_path() -> String {
    "/".to_string()
}

fn default_schedule_cron() -> String {
    DEFAULT_SCHEDULE_CRON.to_string()
}

fn default_smtp_tls() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackupConfig {
    #[serde(default)]
    pub storage_backend: StorageBackend,

    // WebDAV
    #[serde(default)]
    pub webdav_url: Option<String>,
    #[serde(default)]
    pub webdav_user: Option<String>,
    #[serde(default)]
    pub webdav_password: Option<String>,
    /// Remote directory (prefix) archives are written under, for every backend
    #[serde(default = "default_webdav_path")]
    pub webdav_path: String,

    // S3-compatible storage
    #[serde(default)]
    pub s3_bucket: Option<String>,
    #[serde(default)]
    pub s3_region: Option<String>,
    #[serde(default)]
    pub s3_endpoint: Option<String>,

    // Local directory (NAS mount)
    #[serde(default)]
    pub local_path: Option<String>,

    #[serde(default)]
    pub encryption_password: Option<String>,
    /// Number of archives kept remotely. Absent means unlimited.
    #[serde(default, deserialize_with = "lenient_count")]
    pub max_backups: Option<i64>,
    #[serde(default = "default_schedule_cron")]
    pub schedule_cron: String,

    // Telegram alerts
    #[serde(default)]
    pub tg_bot_token: Option<String>,
    #[serde(default)]
    pub tg_chat_id: Option<String>,

    // Email alerts
    #[serde(default)]
    pub smtp_host: Option<String>,
    #[serde(default)]
    pub smtp_port: Option<u16>,
    #[serde(default)]
    pub smtp_user: Option<String>,
    #[serde(default)]
    pub smtp_password: Option<String>,
    #[serde(default)]
    pub smtp_from: Option<String>,
    #[serde(default = "default_smtp_tls")]
    pub smtp_tls: bool,
    #[serde(default)]
    pub alert_emails: Vec<String>,

    // Webhook alerts
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            storage_backend: StorageBackend::default(),
            webdav_url: None,
            webdav_user: None,
            webdav_password: None,
            webdav_path: default_webdav_path(),
            s3_bucket: None,
            s3_region: None,
            s3_endpoint: None,
            local_path: None,
            encryption_password: None,
            max_backups: None,
            schedule_cron: default_schedule_cron(),
            tg_bot_token: None,
            tg_chat_id: None,
            smtp_host: None,
            smtp_port: None,
            smtp_user: None,
            smtp_password: None,
            smtp_from: None,
            smtp_tls: default_smtp_tls(),
            alert_emails: Vec::new(),
            webhook_url: None,
            webhook_secret: None,
        }
    }
}

/// Accepts `10`, `"10"`, `""` and `null` (the dashboard form posts strings).
fn lenient_count<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(i64),
        Text(String),
    }

    match Option::<NumberOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrString::Number(n)) => Ok(Some(n)),
        Some(NumberOrString::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(NumberOrString::Text(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// Treat empty strings from the form the same as missing values.
fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl BackupConfig {
    /// Check the invariants a config must satisfy before it is accepted.
    pub fn validate(&self) -> AppResult<()> {
        if let Some(max) = self.max_backups {
            if max < 1 {
                return Err(AppError::ConfigValidation(format!(
                    "max_backups must be a positive integer, got {}",
                    max
                )));
            }
        }
        parse_schedule(&self.schedule_cron)?;

        if let Some(url) = non_empty(&self.webdav_url) {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(AppError::ConfigValidation(format!(
                    "webdav_url must be an http(s) URL, got '{}'",
                    url
                )));
            }
        }
        if let Some(url) = non_empty(&self.webhook_url) {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(AppError::ConfigValidation(format!(
                    "webhook_url must be an http(s) URL, got '{}'",
                    url
                )));
            }
        }
        Ok(())
    }

    /// Whether enough is configured to reach remote storage at all.
    pub fn remote_configured(&self) -> bool {
        match self.storage_backend {
            StorageBackend::WebDav => non_empty(&self.webdav_url).is_some(),
            StorageBackend::S3 => non_empty(&self.s3_bucket).is_some(),
            StorageBackend::Local => non_empty(&self.local_path).is_some(),
        }
    }

    pub fn encryption_password(&self) -> Option<&str> {
        non_empty(&self.encryption_password)
    }

    /// Retention limit, `None` when unlimited.
    pub fn retention_limit(&self) -> Option<usize> {
        self.max_backups.filter(|n| *n > 0).map(|n| n as usize)
    }

    /// Remote directory normalised to `a/b` form (empty for the root).
    pub fn remote_prefix(&self) -> String {
        self.webdav_path.trim_matches('/').to_string()
    }

    /// Remote path of an archive name under the configured prefix.
    pub fn remote_path(&self, archive_name: &str) -> String {
        let prefix = self.remote_prefix();
        if prefix.is_empty() {
            archive_name.to_string()
        } else {
            format!("{}/{}", prefix, archive_name)
        }
    }

    pub fn webdav_url(&self) -> Option<&str> {
        non_empty(&self.webdav_url)
    }
    pub fn webdav_user(&self) -> Option<&str> {
        non_empty(&self.webdav_user)
    }
    pub fn webdav_password(&self) -> Option<&str> {
        non_empty(&self.webdav_password)
    }
    pub fn s3_bucket(&self) -> Option<&str> {
        non_empty(&self.s3_bucket)
    }
    pub fn s3_region(&self) -> Option<&str> {
        non_empty(&self.s3_region)
    }
    pub fn s3_endpoint(&self) -> Option<&str> {
        non_empty(&self.s3_endpoint)
    }
    pub fn local_path(&self) -> Option<&str> {
        non_empty(&self.local_path)
    }
    pub fn tg_bot_token(&self) -> Option<&str> {
        non_empty(&self.tg_bot_token)
    }
    pub fn tg_chat_id(&self) -> Option<&str> {
        non_empty(&self.tg_chat_id)
    }
    pub fn smtp_host(&self) -> Option<&str> {
        non_empty(&self.smtp_host)
    }
    pub fn smtp_user(&self) -> Option<&str> {
        non_empty(&self.smtp_user)
    }
    pub fn smtp_password(&self) -> Option<&str> {
        non_empty(&self.smtp_password)
    }
    pub fn smtp_from(&self) -> Option<&str> {
        non_empty(&self.smtp_from)
    }
    pub fn webhook_url(&self) -> Option<&str> {
        non_empty(&self.webhook_url)
    }
    pub fn webhook_secret(&self) -> Option<&str> {
        non_empty(&self.webhook_secret)
    }

    /// Copy with every secret replaced, for display.
    pub fn redacted(&self) -> Self {
        fn hide(value: &Option<String>) -> Option<String> {
            non_empty(value).map(|_| REDACTED.to_string())
        }
        Self {
            webdav_password: hide(&self.webdav_password),
            encryption_password: hide(&self.encryption_password),
            tg_bot_token: hide(&self.tg_bot_token),
            smtp_password: hide(&self.smtp_password),
            webhook_secret: hide(&self.webhook_secret),
            ..self.clone()
        }
    }

    /// Drop values that would fail validation, keeping everything else.
    fn sanitized(mut self) -> Self {
        if matches!(self.max_backups, Some(n) if n < 1) {
            tracing::warn!(
                max_backups = ?self.max_backups,
                "Ignoring non-positive max_backups in persisted config (retention unlimited)"
            );
            self.max_backups = None;
        }
        if parse_schedule(&self.schedule_cron).is_err() {
            tracing::warn!(
                schedule_cron = %self.schedule_cron,
                fallback = DEFAULT_SCHEDULE_CRON,
                "Ignoring invalid schedule_cron in persisted config"
            );
            self.schedule_cron = default_schedule_cron();
        }
        self
    }

    /// Read the persisted document. A missing file yields defaults; an
    /// unreadable or malformed one yields defaults plus a warning.
    pub fn load_from(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No backup config yet, using defaults");
                return Self::default();
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to read backup config, using defaults"
                );
                return Self::default();
            }
        };

        match serde_json::from_str::<Self>(&contents) {
            Ok(config) => config.sanitized(),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Malformed backup config, using defaults"
                );
                Self::default()
            }
        }
    }
}

/// Identity of the file version behind the published config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: SystemTime,
    len: u64,
}

impl FileStamp {
    fn of(path: &Path) -> Option<Self> {
        let metadata = std::fs::metadata(path).ok()?;
        Some(Self {
            modified: metadata.modified().ok()?,
            len: metadata.len(),
        })
    }
}

/// Process-wide owner of the live [`BackupConfig`].
pub struct ConfigStore {
    path: PathBuf,
    tx: watch::Sender<BackupConfig>,
    stamp: Mutex<Option<FileStamp>>,
}

impl ConfigStore {
    /// Load the persisted config (never fails, see [`BackupConfig::load_from`]).
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let config = BackupConfig::load_from(&path);
        Self::with_config(path, config)
    }

    /// Create a store around an already-built config (e.g. for tests).
    pub fn with_config(path: impl Into<PathBuf>, config: BackupConfig) -> Self {
        let path = path.into();
        let (tx, _rx) = watch::channel(config);
        Self {
            stamp: Mutex::new(FileStamp::of(&path)),
            path,
            tx,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the current config.
    pub fn current(&self) -> BackupConfig {
        self.tx.borrow().clone()
    }

    /// Receiver notified whenever a new config is saved.
    pub fn subscribe(&self) -> watch::Receiver<BackupConfig> {
        self.tx.subscribe()
    }

    /// Validate, persist and publish a new config.
    ///
    /// Invalid configs are rejected here, never at the next scheduled run.
    pub async fn save(&self, config: BackupConfig) -> AppResult<()> {
        config.validate()?;

        let json = serde_json::to_string_pretty(&config)
            .map_err(|e| AppError::Internal(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::io(format!("creating {}", parent.display()), e))?;
        }

        // Write next to the target and rename so readers never see a torn file
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json.as_bytes())
            .await
            .map_err(|e| AppError::io(format!("writing {}", tmp_path.display()), e))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| AppError::io(format!("replacing {}", self.path.display()), e))?;

        self.set_stamp(FileStamp::of(&self.path));
        self.tx.send_replace(config);
        tracing::info!(path = %self.path.display(), "Backup configuration saved");
        Ok(())
    }

    /// Re-read the file if it changed since it was last loaded or saved, and
    /// publish the result when it differs from the live config.
    ///
    /// A file that has become unreadable or malformed leaves the live config
    /// in place. Returns whether a new config was published.
    pub fn reload_if_changed(&self) -> bool {
        let stamp = FileStamp::of(&self.path);
        {
            let mut seen = match self.stamp.lock() {
                Ok(seen) => seen,
                Err(poisoned) => poisoned.into_inner(),
            };
            if stamp.is_none() || *seen == stamp {
                return false;
            }
            *seen = stamp;
        }

        let parsed = std::fs::read_to_string(&self.path)
            .map_err(|e| e.to_string())
            .and_then(|raw| serde_json::from_str::<BackupConfig>(&raw).map_err(|e| e.to_string()));
        let config = match parsed {
            Ok(config) => config.sanitized(),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Changed backup config could not be read, keeping current one"
                );
                return false;
            }
        };

        let schedule = config.schedule_cron.clone();
        let published = self.tx.send_if_modified(|current| {
            if *current == config {
                false
            } else {
                *current = config;
                true
            }
        });
        if published {
            tracing::info!(
                path = %self.path.display(),
                schedule_cron = %schedule,
                "Backup configuration reloaded from disk"
            );
        }
        published
    }

    /// Poll the file every `every` for outside edits until the returned
    /// task is aborted.
    pub fn watch_file(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                self.reload_if_changed();
            }
        })
    }

    fn set_stamp(&self, stamp: Option<FileStamp>) {
        let mut seen = match self.stamp.lock() {
            Ok(seen) => seen,
            Err(poisoned) => poisoned.into_inner(),
        };
        *seen = stamp;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_legacy_document_loads() {
        let json = r#"{
            "webdav_url": "https://dav.example.com/remote.php/dav/files/me",
            "webdav_user": "me",
            "webdav_password": "pw",
            "webdav_path": "/vaultwarden/",
            "encryption_password": "",
            "max_backups": "5",
            "schedule_cron": "0 4 * * *",
            "tg_bot_token": "123:abc",
            "tg_chat_id": "42"
        }"#;
        let config: BackupConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.storage_backend, StorageBackend::WebDav);
        assert_eq!(config.retention_limit(), Some(5));
        assert_eq!(config.encryption_password(), None);
        assert_eq!(config.remote_prefix(), "vaultwarden");
        assert_eq!(
            config.remote_path("vw_backup_20240101_000000.zip"),
            "vaultwarden/vw_backup_20240101_000000.zip"
        );
        assert!(config.remote_configured());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let config = BackupConfig::default();
        assert_eq!(config.schedule_cron, "0 3 * * *");
        assert_eq!(config.retention_limit(), None);
        assert_eq!(config.remote_path("a.zip"), "a.zip");
        assert!(!config.remote_configured());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let config = BackupConfig {
            max_backups: Some(0),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AppError::ConfigValidation(_))));

        let config = BackupConfig {
            schedule_cron: "daily".into(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AppError::ConfigValidation(_))));

        let config = BackupConfig {
            webdav_url: Some("ftp://example.com".into()),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AppError::ConfigValidation(_))));
    }

    #[test]
    fn test_malformed_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("backup_config.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert_eq!(BackupConfig::load_from(&path), BackupConfig::default());
    }

    #[test]
    fn test_invalid_persisted_values_are_sanitized() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("backup_config.json");
        std::fs::write(
            &path,
            r#"{"webdav_url": "https://dav.example.com", "max_backups": -3, "schedule_cron": "bogus"}"#,
        )
        .unwrap();

        let config = BackupConfig::load_from(&path);
        assert_eq!(config.webdav_url(), Some("https://dav.example.com"));
        assert_eq!(config.max_backups, None);
        assert_eq!(config.schedule_cron, DEFAULT_SCHEDULE_CRON);
    }

    #[test]
    fn test_redacted_hides_secrets() {
        let config = BackupConfig {
            webdav_password: Some("hunter2".into()),
            encryption_password: Some("vault-pass".into()),
            tg_bot_token: Some("".into()),
            ..Default::default()
        };
        let shown = config.redacted();
        assert_eq!(shown.webdav_password.as_deref(), Some(REDACTED));
        assert_eq!(shown.encryption_password.as_deref(), Some(REDACTED));
        assert_eq!(shown.tg_bot_token, None);
    }

    #[tokio::test]
    async fn test_save_persists_and_publishes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conf").join("backup_config.json");
        let store = ConfigStore::load(&path);
        let mut rx = store.subscribe();

        let config = BackupConfig {
            webdav_url: Some("https://dav.example.com".into()),
            max_backups: Some(3),
            ..Default::default()
        };
        store.save(config.clone()).await.unwrap();

        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), config);
        assert_eq!(store.current(), config);
        assert_eq!(BackupConfig::load_from(&path), config);
    }

    #[tokio::test]
    async fn test_save_rejects_invalid_config_without_writing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("backup_config.json");
        let store = ConfigStore::load(&path);

        let result = store
            .save(BackupConfig {
                max_backups: Some(-1),
                ..Default::default()
            })
            .await;

        assert!(matches!(result, Err(AppError::ConfigValidation(_))));
        assert!(!path.exists());
        assert_eq!(store.current(), BackupConfig::default());
    }

    #[test]
    fn test_crontab_sunday_survives_loading() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("backup_config.json");
        std::fs::write(&path, r#"{"schedule_cron": "0 3 * * 0"}"#).unwrap();

        assert_eq!(BackupConfig::load_from(&path).schedule_cron, "0 3 * * 0");
    }

    #[tokio::test]
    async fn test_save_from_other_store_is_reloaded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conf").join("backup_config.json");
        let daemon = ConfigStore::load(&path);
        let cli = ConfigStore::load(&path);
        let mut rx = daemon.subscribe();
        assert!(!daemon.reload_if_changed());

        cli.save(BackupConfig {
            schedule_cron: "*/5 * * * *".into(),
            ..Default::default()
        })
        .await
        .unwrap();

        assert!(daemon.reload_if_changed());
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().schedule_cron, "*/5 * * * *");
        assert_eq!(daemon.current(), cli.current());
        // Same file version is not published twice
        assert!(!daemon.reload_if_changed());
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_malformed_edit_keeps_live_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("backup_config.json");
        let store = ConfigStore::load(&path);
        let config = BackupConfig {
            max_backups: Some(4),
            ..Default::default()
        };
        store.save(config.clone()).await.unwrap();

        std::fs::write(&path, "{ half written").unwrap();

        assert!(!store.reload_if_changed());
        assert_eq!(store.current(), config);
    }

    #[tokio::test]
    async fn test_file_watcher_publishes_outside_edits() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("backup_config.json");
        let daemon = Arc::new(ConfigStore::load(&path));
        let mut rx = daemon.subscribe();
        let watcher = daemon.clone().watch_file(Duration::from_millis(20));

        ConfigStore::load(&path)
            .save(BackupConfig {
                schedule_cron: "15 4 * * *".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rx.borrow().schedule_cron, "15 4 * * *");
        watcher.abort();
    }
}
