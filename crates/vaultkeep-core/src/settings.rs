//! Process-level runtime settings
//!
//! These are deployment knobs (paths, service name, timeouts) read once at
//! startup from `VAULTKEEP_*` environment variables, optionally via a `.env`
//! file. The mutable, operator-edited settings live in [`crate::BackupConfig`].

use chrono_tz::Tz;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{AUDIT_LOG_FILE_NAME, CONFIG_FILE_NAME, LOCK_FILE_NAME};

const ENV_PREFIX: &str = "VAULTKEEP_";

// Defaults match the container layout the vault runs in
const DATA_DIR: &str = "/data";
const CONF_DIR: &str = "/conf";
const TEMP_DIR: &str = "/tmp/backup_work";
const SERVICE_NAME: &str = "vaultwarden";
const SUPERVISORCTL: &str = "supervisorctl";
const TIMEZONE: &str = "Asia/Shanghai";
const STOP_TIMEOUT_SECS: u64 = 60;
const START_TIMEOUT_SECS: u64 = 60;
const POLL_INTERVAL_MS: u64 = 500;
const NOTIFY_TIMEOUT_SECS: u64 = 10;
const UPLOAD_RETRIES: u32 = 2;

fn default_data_dir() -> PathBuf {
    PathBuf::from(DATA_DIR)
}
fn default_conf_dir() -> PathBuf {
    PathBuf::from(CONF_DIR)
}
fn default_temp_dir() -> PathBuf {
    PathBuf::from(TEMP_DIR)
}
fn default_service_name() -> String {
    SERVICE_NAME.to_string()
}
fn default_supervisorctl() -> String {
    SUPERVISORCTL.to_string()
}
fn default_timezone() -> String {
    TIMEZONE.to_string()
}
fn default_stop_timeout_secs() -> u64 {
    STOP_TIMEOUT_SECS
}
fn default_start_timeout_secs() -> u64 {
    START_TIMEOUT_SECS
}
fn default_poll_interval_ms() -> u64 {
    POLL_INTERVAL_MS
}
fn default_notify_timeout_secs() -> u64 {
    NOTIFY_TIMEOUT_SECS
}
fn default_upload_retries() -> u32 {
    UPLOAD_RETRIES
}

#[derive(Clone, Debug, Deserialize)]
pub struct RuntimeSettings {
    /// Vault data directory that gets archived and restored
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Holds the persisted backup configuration and the audit log
    #[serde(default = "default_conf_dir")]
    pub conf_dir: PathBuf,
    /// Staging area for archives being built, uploaded or downloaded
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_supervisorctl")]
    pub supervisorctl: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
    #[serde(default = "default_start_timeout_secs")]
    pub start_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_notify_timeout_secs")]
    pub notify_timeout_secs: u64,
    /// Extra upload attempts after the first one fails
    #[serde(default = "default_upload_retries")]
    pub upload_retries: u32,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            conf_dir: default_conf_dir(),
            temp_dir: default_temp_dir(),
            service_name: default_service_name(),
            supervisorctl: default_supervisorctl(),
            timezone: default_timezone(),
            stop_timeout_secs: STOP_TIMEOUT_SECS,
            start_timeout_secs: START_TIMEOUT_SECS,
            poll_interval_ms: POLL_INTERVAL_MS,
            notify_timeout_secs: NOTIFY_TIMEOUT_SECS,
            upload_retries: UPLOAD_RETRIES,
        }
    }
}

impl RuntimeSettings {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    /// Build settings from an explicit variable list (used by tests; avoids env mutation).
    pub fn from_vars<I>(vars: I) -> Result<Self, anyhow::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let settings: Self = envy::prefixed(ENV_PREFIX)
            .from_iter(vars)
            .map_err(|e| anyhow::anyhow!("Invalid {}* environment: {}", ENV_PREFIX, e))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.tz()?;
        if self.stop_timeout_secs == 0 || self.start_timeout_secs == 0 {
            return Err(anyhow::anyhow!(
                "Service stop/start timeouts must be greater than zero"
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("Poll interval must be greater than zero"));
        }
        Ok(())
    }

    pub fn tz(&self) -> Result<Tz, anyhow::Error> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("Invalid timezone '{}': {}", self.timezone, e))
    }

    pub fn config_path(&self) -> PathBuf {
        self.conf_dir.join(CONFIG_FILE_NAME)
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.conf_dir.join(AUDIT_LOG_FILE_NAME)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.conf_dir.join(LOCK_FILE_NAME)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_when_nothing_is_set() {
        let settings = RuntimeSettings::from_vars(vars(&[("PATH", "/usr/bin")])).unwrap();
        assert_eq!(settings.data_dir, PathBuf::from("/data"));
        assert_eq!(settings.config_path(), PathBuf::from("/conf/backup_config.json"));
        assert_eq!(settings.audit_log_path(), PathBuf::from("/conf/manager.log"));
        assert_eq!(settings.lock_path(), PathBuf::from("/conf/operation.lock"));
        assert_eq!(settings.service_name, "vaultwarden");
        assert_eq!(settings.stop_timeout(), Duration::from_secs(60));
        assert_eq!(settings.tz().unwrap(), chrono_tz::Asia::Shanghai);
    }

    #[test]
    fn test_prefixed_overrides() {
        let settings = RuntimeSettings::from_vars(vars(&[
            ("VAULTKEEP_DATA_DIR", "/srv/vw"),
            ("VAULTKEEP_SERVICE_NAME", "vw"),
            ("VAULTKEEP_TIMEZONE", "Europe/Paris"),
            ("VAULTKEEP_POLL_INTERVAL_MS", "50"),
        ]))
        .unwrap();
        assert_eq!(settings.data_dir, PathBuf::from("/srv/vw"));
        assert_eq!(settings.service_name, "vw");
        assert_eq!(settings.poll_interval(), Duration::from_millis(50));
        assert_eq!(settings.tz().unwrap(), chrono_tz::Europe::Paris);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(RuntimeSettings::from_vars(vars(&[("VAULTKEEP_TIMEZONE", "Mars/Base")])).is_err());
        assert!(
            RuntimeSettings::from_vars(vars(&[("VAULTKEEP_STOP_TIMEOUT_SECS", "0")])).is_err()
        );
        assert!(
            RuntimeSettings::from_vars(vars(&[("VAULTKEEP_STOP_TIMEOUT_SECS", "soon")])).is_err()
        );
    }
}
