//! Count-based retention policy.

use vaultkeep_core::BackupRecord;

/// Pick the records to delete so that at most `max_count` remain.
///
/// `records` must be ordered oldest first, as returned by
/// `RemoteStorage::list`. The result is the oldest `len - max_count` records;
/// it is empty when the listing is already within the limit or there is no
/// limit at all.
pub fn select_for_deletion(records: &[BackupRecord], max_count: Option<usize>) -> Vec<BackupRecord> {
    let Some(max_count) = max_count else {
        return Vec::new();
    };
    let excess = records.len().saturating_sub(max_count);
    records[..excess].to_vec()
}
