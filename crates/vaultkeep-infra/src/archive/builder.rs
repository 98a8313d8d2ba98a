use std::fs::File;
use std::io::{self, Cursor, Seek, Write};
use std::path::{Path, PathBuf};

use vaultkeep_core::{AppError, AppResult, ArchiveCipher};
use walkdir::WalkDir;
use zip::result::ZipError;
use zip::write::{FileOptions, ZipWriter};
use zip::CompressionMethod;

use super::filter::is_excluded;
use super::handle::ArchiveHandle;

pub(crate) fn zip_error(context: &str, err: ZipError) -> AppError {
    match err {
        ZipError::Io(e) => AppError::io(context, e),
        other => AppError::Internal(format!("{}: {}", context, other)),
    }
}

/// Archive entry name for `path` relative to `root`, always `/`-separated.
fn entry_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Walk `source_dir` and stream every kept file into a ZIP written to `writer`.
fn write_zip<W: Write + Seek>(source_dir: &Path, writer: W) -> AppResult<(W, usize)> {
    let mut zip = ZipWriter::new(writer);
    let base_options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);
    let mut entries = 0usize;

    let walker = WalkDir::new(source_dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_excluded(&e.file_name().to_string_lossy()));

    for entry in walker {
        let entry = entry.map_err(|e| {
            AppError::Filesystem(format!(
                "Failed to read {}: {}",
                e.path().unwrap_or(source_dir).display(),
                e
            ))
        })?;

        if !entry.file_type().is_file() {
            if entry.file_type().is_symlink() {
                tracing::debug!(path = %entry.path().display(), "Skipping symlink");
            }
            continue;
        }
        let Some(name) = entry_name(source_dir, entry.path()) else {
            continue;
        };

        let mut source = File::open(entry.path()).map_err(|e| {
            AppError::Filesystem(format!("Failed to open {}: {}", entry.path().display(), e))
        })?;
        let size = source.metadata().map(|m| m.len()).unwrap_or(0);
        let options = base_options.large_file(size >= u32::MAX as u64);

        zip.start_file(name.as_str(), options)
            .map_err(|e| zip_error(&format!("adding {} to archive", name), e))?;
        io::copy(&mut source, &mut zip)
            .map_err(|e| AppError::io(format!("writing {} to archive", name), e))?;
        entries += 1;
    }

    let writer = zip
        .finish()
        .map_err(|e| zip_error("finalizing archive", e))?;
    Ok((writer, entries))
}

/// Build an archive of `source_dir` at `staging_dir/name`.
///
/// With a passphrase the ZIP is assembled in memory and written sealed; the
/// plaintext never touches the disk.
pub fn build_blocking(
    source_dir: &Path,
    staging_dir: &Path,
    name: &str,
    passphrase: Option<&str>,
) -> AppResult<ArchiveHandle> {
    let metadata = std::fs::metadata(source_dir).map_err(|e| {
        AppError::Filesystem(format!(
            "Source directory {} is not accessible: {}",
            source_dir.display(),
            e
        ))
    })?;
    if !metadata.is_dir() {
        return Err(AppError::Filesystem(format!(
            "Source {} is not a directory",
            source_dir.display()
        )));
    }
    let cipher = passphrase.map(ArchiveCipher::new).transpose()?;

    std::fs::create_dir_all(staging_dir)
        .map_err(|e| AppError::io(format!("creating {}", staging_dir.display()), e))?;

    let path: PathBuf = staging_dir.join(name);
    // From here on the partial file is removed on every error path
    let mut handle = ArchiveHandle::reserve(path.clone(), cipher.is_some());

    let entries = match cipher {
        None => {
            let file = File::create(&path)
                .map_err(|e| AppError::io(format!("creating {}", path.display()), e))?;
            let (file, entries) = write_zip(source_dir, file)?;
            file.sync_all()
                .map_err(|e| AppError::io(format!("syncing {}", path.display()), e))?;
            entries
        }
        Some(cipher) => {
            let (cursor, entries) = write_zip(source_dir, Cursor::new(Vec::new()))?;
            let sealed = cipher.seal(&cursor.into_inner())?;
            let mut file = File::create(&path)
                .map_err(|e| AppError::io(format!("creating {}", path.display()), e))?;
            file.write_all(&sealed)
                .and_then(|_| file.sync_all())
                .map_err(|e| AppError::io(format!("writing {}", path.display()), e))?;
            entries
        }
    };

    let size = std::fs::metadata(&path)
        .map_err(|e| AppError::io(format!("reading {}", path.display()), e))?
        .len();
    handle.set_size(size);

    tracing::info!(
        path = %path.display(),
        entries,
        size_bytes = size,
        encrypted = handle.encrypted(),
        "Archive built"
    );

    Ok(handle)
}

/// Build an archive on the blocking pool. See [`build_blocking`].
pub async fn build(
    source_dir: &Path,
    staging_dir: &Path,
    name: &str,
    passphrase: Option<&str>,
) -> AppResult<ArchiveHandle> {
    let source_dir = source_dir.to_path_buf();
    let staging_dir = staging_dir.to_path_buf();
    let name = name.to_string();
    let passphrase = passphrase.map(str::to_string);

    tokio::task::spawn_blocking(move || {
        build_blocking(&source_dir, &staging_dir, &name, passphrase.as_deref())
    })
    .await?
}
