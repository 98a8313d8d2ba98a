//! Remote archive records and the archive naming scheme.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::constants::{
    BACKUP_NAME_PREFIX, BACKUP_TIMESTAMP_FORMAT, ENCRYPTED_ARCHIVE_EXTENSION,
    PLAIN_ARCHIVE_EXTENSION,
};

/// One archive stored remotely.
///
/// Identity is the archive name. Records are rebuilt from every listing and
/// never cached between operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    /// File name, e.g. `vw_backup_20240131_030000.zip`
    pub name: String,
    /// Full remote path (prefix + name)
    pub path: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub encrypted: bool,
}

impl BackupRecord {
    /// Build the archive name for a backup taken at `at`.
    pub fn archive_name<T: TimeZone>(at: &DateTime<T>, encrypted: bool) -> String
    where
        T::Offset: std::fmt::Display,
    {
        let extension = if encrypted {
            ENCRYPTED_ARCHIVE_EXTENSION
        } else {
            PLAIN_ARCHIVE_EXTENSION
        };
        format!(
            "{}{}{}",
            BACKUP_NAME_PREFIX,
            at.format(BACKUP_TIMESTAMP_FORMAT),
            extension
        )
    }

    /// Split an archive name into its wall-clock timestamp and encryption flag.
    /// Returns `None` for names that were not produced by this tool.
    pub fn parse_name(name: &str) -> Option<(NaiveDateTime, bool)> {
        let rest = name.strip_prefix(BACKUP_NAME_PREFIX)?;
        let (stamp, encrypted) = if let Some(stamp) = rest.strip_suffix(ENCRYPTED_ARCHIVE_EXTENSION)
        {
            (stamp, true)
        } else {
            (rest.strip_suffix(PLAIN_ARCHIVE_EXTENSION)?, false)
        };
        let naive = NaiveDateTime::parse_from_str(stamp, BACKUP_TIMESTAMP_FORMAT).ok()?;
        Some((naive, encrypted))
    }

    /// Build a record from a storage listing entry.
    ///
    /// The creation time comes from the name (interpreted in `tz`, the zone the
    /// name was written in); `last_modified` is only used when the local time is
    /// not representable in that zone.
    pub fn from_listing(
        path: &str,
        size_bytes: u64,
        last_modified: DateTime<Utc>,
        tz: Tz,
    ) -> Option<Self> {
        let name = path.rsplit('/').next().unwrap_or(path);
        let (naive, encrypted) = Self::parse_name(name)?;
        let created_at = tz
            .from_local_datetime(&naive)
            .earliest()
            .map(|local| local.with_timezone(&Utc))
            .unwrap_or(last_modified);

        Some(Self {
            name: name.to_string(),
            path: path.to_string(),
            size_bytes,
            created_at,
            encrypted,
        })
    }

    /// Size in megabytes rounded to two decimals, as shown to operators.
    pub fn size_mb(&self) -> f64 {
        (self.size_bytes as f64 / 1024.0 / 1024.0 * 100.0).round() / 100.0
    }
}

/// Sort records oldest first (ties broken by name so ordering is deterministic).
pub fn sort_oldest_first(records: &mut [BackupRecord]) {
    records.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.name.cmp(&b.name))
    });
}
