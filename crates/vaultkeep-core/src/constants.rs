//! Shared constants

/// Prefix of every archive name this tool writes to remote storage.
pub const BACKUP_NAME_PREFIX: &str = "vw_backup_";

/// Timestamp layout embedded in archive names (`vw_backup_20240131_030000.zip`).
pub const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Extension of a plain archive.
pub const PLAIN_ARCHIVE_EXTENSION: &str = ".zip";

/// Extension of a passphrase-encrypted archive.
pub const ENCRYPTED_ARCHIVE_EXTENSION: &str = ".zip.enc";

/// Schedule used when none is configured: every day at 03:00.
pub const DEFAULT_SCHEDULE_CRON: &str = "0 3 * * *";

pub const CONFIG_FILE_NAME: &str = "backup_config.json";
pub const AUDIT_LOG_FILE_NAME: &str = "manager.log";
/// Advisory lock shared by every process operating on the same vault.
pub const LOCK_FILE_NAME: &str = "operation.lock";

/// How often `vaultkeep serve` checks the config file for outside edits.
pub const CONFIG_RELOAD_INTERVAL_SECS: u64 = 5;

/// Lines shown by `vaultkeep logs` when no count is given.
pub const DEFAULT_LOG_TAIL_LINES: usize = 100;

/// First delay between upload attempts; doubled for each further attempt.
pub const UPLOAD_RETRY_BASE_DELAY_SECS: u64 = 2;
pub const MAX_UPLOAD_RETRY_DELAY_SECS: u64 = 60;
