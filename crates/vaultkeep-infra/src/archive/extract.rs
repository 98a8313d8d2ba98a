use std::fs::File;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};

use vaultkeep_core::{AppError, AppResult, ArchiveCipher};
use zip::read::ZipFile;
use zip::result::{InvalidPassword, ZipError};
use zip::ZipArchive;

use super::filter::is_sqlite_side_file;
use super::handle::{classify, ArchiveHandle, Kind};

/// An archive whose container, passphrase, entry names and entry contents
/// have been checked. Nothing has been written anywhere yet.
pub struct VerifiedArchive {
    archive: ZipArchive<Cursor<Vec<u8>>>,
    /// (index in the ZIP, path relative to the target)
    entries: Vec<(usize, PathBuf)>,
    /// For WinZip-AES entries inside a plain ZIP
    passphrase: Option<String>,
}

impl std::fmt::Debug for VerifiedArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerifiedArchive")
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// Entry `index`, decrypting WinZip-AES entries with `passphrase`.
///
/// Archives written by the dashboard this tool replaces are plain ZIPs with
/// AES-256 encrypted entries rather than sealed containers.
fn read_entry<'a>(
    archive: &'a mut ZipArchive<Cursor<Vec<u8>>>,
    index: usize,
    passphrase: Option<&str>,
) -> AppResult<ZipFile<'a>> {
    let opened = match passphrase {
        Some(passphrase) => archive.by_index_decrypt(index, passphrase.as_bytes()),
        None => archive.by_index(index).map(Ok),
    };
    match opened {
        Ok(Ok(entry)) => Ok(entry),
        Ok(Err(InvalidPassword)) => Err(AppError::Encryption(format!(
            "Wrong encryption password for archive entry {}",
            index
        ))),
        Err(ZipError::UnsupportedArchive(detail)) if detail == ZipError::PASSWORD_REQUIRED => {
            Err(AppError::Encryption(
                "Archive entries are encrypted but no encryption password is configured"
                    .to_string(),
            ))
        }
        Err(e) => Err(AppError::Encryption(format!(
            "Corrupt archive entry {}: {}",
            index, e
        ))),
    }
}

/// Decrypt (when sealed), index and read through the archive at `path`.
pub fn open_blocking(path: &Path, passphrase: Option<&str>) -> AppResult<VerifiedArchive> {
    let bytes =
        std::fs::read(path).map_err(|e| AppError::io(format!("reading {}", path.display()), e))?;

    let zip_bytes = match classify(&bytes) {
        Some(Kind::Sealed) => {
            let passphrase = passphrase.ok_or_else(|| {
                AppError::Encryption(
                    "Archive is encrypted but no encryption password is configured".to_string(),
                )
            })?;
            ArchiveCipher::new(passphrase)?.open(&bytes)?
        }
        Some(Kind::Zip) => bytes,
        None => {
            return Err(AppError::Encryption(format!(
                "{} is not a backup archive",
                path.display()
            )))
        }
    };

    let mut archive = ZipArchive::new(Cursor::new(zip_bytes))
        .map_err(|e| AppError::Encryption(format!("Corrupt archive: {}", e)))?;

    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut entry = read_entry(&mut archive, index, passphrase)?;
        if entry.is_dir() {
            continue;
        }
        let relative = entry.enclosed_name().map(Path::to_path_buf).ok_or_else(|| {
            AppError::Encryption(format!(
                "Archive entry '{}' would escape the target directory",
                entry.name()
            ))
        })?;
        let file_name = relative
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if is_sqlite_side_file(&file_name) {
            tracing::debug!(entry = %entry.name(), "Skipping SQLite side-file in archive");
            continue;
        }
        // Checksums and AES authentication codes are only checked at the end of an entry
        io::copy(&mut entry, &mut io::sink()).map_err(|e| {
            AppError::Encryption(format!(
                "Archive entry '{}' failed verification: {}",
                entry.name(),
                e
            ))
        })?;
        entries.push((index, relative));
    }

    Ok(VerifiedArchive {
        archive,
        entries,
        passphrase: passphrase.map(str::to_string),
    })
}

impl VerifiedArchive {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Relative paths that `unpack` will write.
    pub fn entry_paths(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().map(|(_, p)| p.as_path())
    }

    /// Write every entry under `target_dir`, returning the number of files.
    pub fn unpack_blocking(mut self, target_dir: &Path) -> AppResult<usize> {
        std::fs::create_dir_all(target_dir)
            .map_err(|e| AppError::io(format!("creating {}", target_dir.display()), e))?;

        for (index, relative) in &self.entries {
            let destination = target_dir.join(relative);
            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| AppError::io(format!("creating {}", parent.display()), e))?;
            }

            let mut entry = read_entry(&mut self.archive, *index, self.passphrase.as_deref())?;
            let mut out = File::create(&destination)
                .map_err(|e| AppError::io(format!("creating {}", destination.display()), e))?;
            io::copy(&mut entry, &mut out)
                .map_err(|e| AppError::io(format!("writing {}", destination.display()), e))?;
        }

        tracing::info!(
            dir = %target_dir.display(),
            files = self.entries.len(),
            "Archive unpacked"
        );
        Ok(self.entries.len())
    }

    /// Unpack on the blocking pool. See [`VerifiedArchive::unpack_blocking`].
    pub async fn unpack(self, target_dir: &Path) -> AppResult<usize> {
        let target_dir = target_dir.to_path_buf();
        tokio::task::spawn_blocking(move || self.unpack_blocking(&target_dir)).await?
    }
}

/// Validate the archive at `path` on the blocking pool. See [`open_blocking`].
pub async fn open(path: &Path, passphrase: Option<&str>) -> AppResult<VerifiedArchive> {
    let path = path.to_path_buf();
    let passphrase = passphrase.map(str::to_string);
    tokio::task::spawn_blocking(move || open_blocking(&path, passphrase.as_deref())).await?
}

/// Validate then unpack `handle` into `target_dir`. A wrong passphrase fails
/// before anything is written.
pub async fn extract(
    handle: &ArchiveHandle,
    target_dir: &Path,
    passphrase: Option<&str>,
) -> AppResult<usize> {
    open(handle.path(), passphrase)
        .await?
        .unpack(target_dir)
        .await
}

/// Delete everything inside `dir`, keeping `dir` itself.
///
/// Any failure is reported as a filesystem error; the caller must not go on
/// to unpack over a half-cleared directory.
pub fn clear_directory(dir: &Path) -> AppResult<usize> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => {
            return Err(AppError::Filesystem(format!(
                "Failed to read {}: {}",
                dir.display(),
                e
            )))
        }
    };

    let mut removed = 0usize;
    for entry in entries {
        let entry = entry.map_err(|e| {
            AppError::Filesystem(format!("Failed to read {}: {}", dir.display(), e))
        })?;
        let path = entry.path();
        let is_dir = entry
            .file_type()
            .map(|t| t.is_dir())
            .map_err(|e| AppError::Filesystem(format!("Failed to stat {}: {}", path.display(), e)))?;
        let result = if is_dir {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        result.map_err(|e| {
            AppError::Filesystem(format!("Failed to delete {}: {}", path.display(), e))
        })?;
        removed += 1;
    }
    Ok(removed)
}

/// Remove SQLite `-wal`/`-shm`/`-journal` files directly under `dir`.
pub fn remove_sqlite_side_files(dir: &Path) -> AppResult<usize> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(AppError::io(format!("reading {}", dir.display()), e)),
    };

    let mut removed = 0usize;
    for entry in entries {
        let entry = entry.map_err(|e| AppError::io(format!("reading {}", dir.display()), e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_sqlite_side_file(&name) {
            std::fs::remove_file(entry.path())
                .map_err(|e| AppError::io(format!("removing {}", entry.path().display()), e))?;
            tracing::info!(file = %name, "Removed stale SQLite side-file");
            removed += 1;
        }
    }
    Ok(removed)
}
