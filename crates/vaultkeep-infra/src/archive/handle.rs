use std::path::{Path, PathBuf};

use vaultkeep_core::{ArchiveCipher, AppError, AppResult};

/// A working archive file in the staging directory.
///
/// The handle owns the file: dropping it deletes the file, whichever way the
/// operation holding it ends.
#[derive(Debug)]
pub struct ArchiveHandle {
    path: PathBuf,
    size_bytes: u64,
    encrypted: bool,
}

impl ArchiveHandle {
    /// Take ownership of a path that is about to be written.
    pub(crate) fn reserve(path: PathBuf, encrypted: bool) -> Self {
        Self {
            path,
            size_bytes: 0,
            encrypted,
        }
    }

    /// Take ownership of an archive already on disk (a download or an
    /// operator upload). The file is deleted when the handle drops, even if
    /// this returns an error.
    pub fn adopt(path: impl Into<PathBuf>) -> AppResult<Self> {
        let mut handle = Self::reserve(path.into(), false);
        let metadata = std::fs::metadata(&handle.path)
            .map_err(|e| AppError::io(format!("reading {}", handle.path.display()), e))?;
        handle.size_bytes = metadata.len();
        handle.encrypted = sniff(&handle.path)? == Some(Kind::Sealed);
        Ok(handle)
    }

    pub(crate) fn set_size(&mut self, size_bytes: u64) {
        self.size_bytes = size_bytes;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn encrypted(&self) -> bool {
        self.encrypted
    }
}

impl Drop for ArchiveHandle {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed working archive"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove working archive"
            ),
        }
    }
}

const ZIP_LOCAL_HEADER: &[u8; 4] = b"PK\x03\x04";
const ZIP_EMPTY_ARCHIVE: &[u8; 4] = b"PK\x05\x06";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
    Zip,
    Sealed,
}

pub(crate) fn classify(head: &[u8]) -> Option<Kind> {
    if ArchiveCipher::is_sealed(head) {
        Some(Kind::Sealed)
    } else if head.starts_with(ZIP_LOCAL_HEADER) || head.starts_with(ZIP_EMPTY_ARCHIVE) {
        Some(Kind::Zip)
    } else {
        None
    }
}

pub(crate) fn sniff(path: &Path) -> AppResult<Option<Kind>> {
    use std::io::Read;

    let mut file = std::fs::File::open(path)
        .map_err(|e| AppError::io(format!("opening {}", path.display()), e))?;
    let mut head = Vec::with_capacity(8);
    file.by_ref()
        .take(8)
        .read_to_end(&mut head)
        .map_err(|e| AppError::io(format!("reading {}", path.display()), e))?;
    Ok(classify(&head))
}

/// Whether `path` looks like an archive this tool can restore from
/// (a plain ZIP or an encrypted container).
pub fn is_archive(path: &Path) -> AppResult<bool> {
    Ok(sniff(path)?.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_drop_removes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vw_backup_20240101_000000.zip");
        std::fs::write(&path, b"PK\x03\x04rest").unwrap();

        let handle = ArchiveHandle::adopt(&path).unwrap();
        assert_eq!(handle.size_bytes(), 8);
        assert!(!handle.encrypted());
        assert_eq!(handle.file_name(), Some("vw_backup_20240101_000000.zip"));
        drop(handle);

        assert!(!path.exists());
    }

    #[test]
    fn test_drop_tolerates_missing_file() {
        let dir = tempdir().unwrap();
        let handle = ArchiveHandle::reserve(dir.path().join("never-written"), false);
        drop(handle);
    }

    #[test]
    fn test_is_archive_sniff() {
        let dir = tempdir().unwrap();

        let zip = dir.path().join("a.zip");
        std::fs::write(&zip, b"PK\x03\x04....").unwrap();
        assert!(is_archive(&zip).unwrap());

        let sealed = dir.path().join("a.zip.enc");
        std::fs::write(&sealed, b"VKENC001salt").unwrap();
        assert!(is_archive(&sealed).unwrap());
        assert!(ArchiveHandle::adopt(&sealed).unwrap().encrypted());

        let text = dir.path().join("notes.txt");
        std::fs::write(&text, b"hello").unwrap();
        assert!(!is_archive(&text).unwrap());
    }
}
