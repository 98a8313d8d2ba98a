//! Building blocks for the `vaultkeep` binary.

use anyhow::Context;
use chrono::Utc;
use chrono_tz::Tz;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use vaultkeep_core::{BackupConfig, BackupRecord, ConfigStore, RuntimeSettings};
use vaultkeep_infra::archive::is_archive;
use vaultkeep_services::{OperationLock, Orchestrator, ServiceController};

/// Process-scoped objects shared by every command.
pub struct App {
    pub settings: RuntimeSettings,
    pub tz: Tz,
    pub config: Arc<ConfigStore>,
    pub orchestrator: Arc<Orchestrator>,
}

impl App {
    pub fn from_settings(settings: RuntimeSettings) -> anyhow::Result<Self> {
        let tz = settings.tz()?;
        let config = Arc::new(ConfigStore::load(settings.config_path()));
        let service = Arc::new(ServiceController::from_settings(&settings));
        let orchestrator = Orchestrator::from_settings(
            &settings,
            config.clone(),
            Arc::new(OperationLock::with_lock_file(settings.lock_path())),
            service,
        )?;

        Ok(Self {
            settings,
            tz,
            config,
            orchestrator: Arc::new(orchestrator),
        })
    }
}

/// Copy an operator-supplied archive into the staging directory so the
/// restore can own (and delete) it. Non-archives are refused up front.
pub fn stage_upload(file: &Path, temp_dir: &Path) -> anyhow::Result<PathBuf> {
    if !is_archive(file).with_context(|| format!("Cannot read {}", file.display()))? {
        anyhow::bail!("{} is not a backup archive", file.display());
    }

    std::fs::create_dir_all(temp_dir)
        .with_context(|| format!("Failed to create {}", temp_dir.display()))?;
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    let staged = temp_dir.join(format!(
        "upload_{}_{}",
        Utc::now().format("%Y%m%d%H%M%S%3f"),
        file_name
    ));
    std::fs::copy(file, &staged)
        .with_context(|| format!("Failed to copy {} to {}", file.display(), staged.display()))?;
    Ok(staged)
}

/// Parse and validate a config document without persisting it.
pub fn read_config_file(path: &Path) -> anyhow::Result<BackupConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config: BackupConfig = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a valid config document", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// Truncate a string to max_len characters, appending "..." if truncated.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Backup listing as a fixed-width table, times shown in `tz`.
pub fn render_backups_table(records: &[BackupRecord], tz: Tz) -> String {
    let mut out = format!(
        "{:<40} {:>10} {:<20} {}\n",
        "NAME", "SIZE (MB)", "CREATED", "ENCRYPTED"
    );
    for record in records {
        out.push_str(&format!(
            "{:<40} {:>10.2} {:<20} {}\n",
            truncate_string(&record.name, 40),
            record.size_mb(),
            record
                .created_at
                .with_timezone(&tz)
                .format("%Y-%m-%d %H:%M:%S"),
            if record.encrypted { "yes" } else { "no" }
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn truncate_string_short() {
        assert_eq!(truncate_string("hello", 10), "hello");
        assert_eq!(truncate_string("", 5), "");
    }

    #[test]
    fn truncate_string_long() {
        assert_eq!(truncate_string("hello world", 8), "hello...");
        assert_eq!(truncate_string("abc", 2), "...");
    }

    #[test]
    fn stage_upload_copies_archive() {
        let dir = tempdir().unwrap();
        let upload = dir.path().join("vw_backup_20240101_030000.zip");
        std::fs::write(&upload, b"PK\x03\x04rest of zip").unwrap();

        let staged = stage_upload(&upload, &dir.path().join("work")).unwrap();

        assert!(staged.starts_with(dir.path().join("work")));
        assert_eq!(std::fs::read(&staged).unwrap(), b"PK\x03\x04rest of zip");
        // The operator's file is left alone
        assert!(upload.exists());
    }

    #[test]
    fn stage_upload_refuses_non_archive() {
        let dir = tempdir().unwrap();
        let upload = dir.path().join("notes.zip");
        std::fs::write(&upload, b"plain text").unwrap();

        assert!(stage_upload(&upload, &dir.path().join("work")).is_err());
        assert!(!dir.path().join("work").exists());
    }

    #[test]
    fn read_config_file_validates() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("good.json");
        std::fs::write(
            &good,
            r#"{"webdav_url": "https://dav.example.com", "max_backups": 7}"#,
        )
        .unwrap();
        assert_eq!(read_config_file(&good).unwrap().retention_limit(), Some(7));

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, r#"{"schedule_cron": "whenever"}"#).unwrap();
        assert!(read_config_file(&bad).is_err());
    }

    #[test]
    fn table_shows_local_time() {
        let record = BackupRecord {
            name: "vw_backup_20240131_030000.zip.enc".into(),
            path: "vw_backup_20240131_030000.zip.enc".into(),
            size_bytes: 3 * 1024 * 1024,
            created_at: Utc.with_ymd_and_hms(2024, 1, 30, 19, 0, 0).unwrap(),
            encrypted: true,
        };

        let table = render_backups_table(&[record], chrono_tz::Asia::Shanghai);
        let row = table.lines().nth(1).unwrap();
        assert!(row.contains("2024-01-31 03:00:00"));
        assert!(row.contains("3.00"));
        assert!(row.ends_with("yes"));
    }
}
