//! Paths that never belong in an archive

/// Exact file or directory names skipped while walking the data directory.
const EXCLUDED_NAMES: &[&str] = &["lost+found", ".DS_Store", "Thumbs.db"];

/// Editor and tool leftovers.
const EXCLUDED_SUFFIXES: &[&str] = &[".bak", ".tmp", ".swp"];

/// SQLite write-ahead log, shared memory and rollback journal.
const SQLITE_SIDE_FILE_SUFFIXES: &[&str] = &["-wal", "-shm", "-journal"];

pub fn is_sqlite_side_file(name: &str) -> bool {
    SQLITE_SIDE_FILE_SUFFIXES
        .iter()
        .any(|suffix| name.ends_with(suffix))
}

/// Whether a file or directory with this name is left out of archives.
pub fn is_excluded(name: &str) -> bool {
    EXCLUDED_NAMES.contains(&name)
        || EXCLUDED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
        || is_sqlite_side_file(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excluded_names() {
        for name in [
            "lost+found",
            ".DS_Store",
            "Thumbs.db",
            "config.json.bak",
            "upload.tmp",
            ".db.sqlite3.swp",
            "db.sqlite3-wal",
            "db.sqlite3-shm",
            "db.sqlite3-journal",
        ] {
            assert!(is_excluded(name), "{} should be excluded", name);
        }
    }

    #[test]
    fn test_vault_files_kept() {
        for name in [
            "db.sqlite3",
            "rsa_key.pem",
            "config.json",
            "attachments",
            "icon_cache",
            "backup_notes.txt",
        ] {
            assert!(!is_excluded(name), "{} should be kept", name);
        }
        assert!(!is_sqlite_side_file("db.sqlite3"));
    }
}
