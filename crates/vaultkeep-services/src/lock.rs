//! Exclusion between backup and restore.
//!
//! The in-memory slot covers tasks of one process. When a lock file is
//! configured, an advisory OS lock on it extends the exclusion to every
//! `vaultkeep` process sharing the same config directory, so a manual
//! `vaultkeep restore` cannot run while `vaultkeep serve` is backing up.

use std::fs::{File, OpenOptions, TryLockError};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use vaultkeep_core::{AppError, AppResult, OperationKind};

/// Single-slot lock tagged with the kind of operation holding it.
///
/// There is no queue: a second caller fails immediately with
/// [`AppError::ConcurrentOperation`].
#[derive(Debug, Default)]
pub struct OperationLock {
    active: Mutex<OperationKind>,
    lock_file: Option<PathBuf>,
}

impl OperationLock {
    /// Lock scoped to the current process.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock shared with every process that uses the same `path`.
    pub fn with_lock_file(path: impl Into<PathBuf>) -> Self {
        Self {
            active: Mutex::default(),
            lock_file: Some(path.into()),
        }
    }

    pub fn lock_file(&self) -> Option<&Path> {
        self.lock_file.as_deref()
    }

    pub fn try_acquire(&self, kind: OperationKind) -> AppResult<OperationGuard<'_>> {
        let mut active = self
            .active
            .lock()
            .map_err(|_| AppError::Internal("Operation lock poisoned".to_string()))?;
        if *active != OperationKind::None {
            return Err(AppError::ConcurrentOperation { active: *active });
        }

        let file = match &self.lock_file {
            Some(path) => Some(lock_exclusive(path, kind)?),
            None => None,
        };

        *active = kind;
        tracing::debug!(operation = %kind, "Operation lock acquired");
        Ok(OperationGuard {
            lock: self,
            kind,
            file,
        })
    }

    /// Kind of the operation running in this process, `None` when idle.
    pub fn current(&self) -> OperationKind {
        self.active
            .lock()
            .map(|active| *active)
            .unwrap_or(OperationKind::None)
    }
}

/// Take the advisory lock on `path` without blocking and record `kind` in it.
fn lock_exclusive(path: &Path, kind: OperationKind) -> AppResult<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| AppError::io(format!("creating {}", parent.display()), e))?;
    }
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| AppError::io(format!("opening {}", path.display()), e))?;

    match file.try_lock() {
        Ok(()) => {}
        Err(TryLockError::WouldBlock) => {
            let active = read_holder(path);
            tracing::debug!(lock_file = %path.display(), active = %active, "Operation lock held by another process");
            return Err(AppError::ConcurrentOperation { active });
        }
        Err(TryLockError::Error(e)) => {
            return Err(AppError::io(format!("locking {}", path.display()), e));
        }
    }

    file.set_len(0)
        .and_then(|()| file.write_all(kind.to_string().as_bytes()))
        .map_err(|e| AppError::io(format!("writing {}", path.display()), e))?;
    Ok(file)
}

/// Kind recorded by the process holding the lock file.
fn read_holder(path: &Path) -> OperationKind {
    match std::fs::read_to_string(path).as_deref().map(str::trim) {
        Ok("RESTORE") => OperationKind::Restore,
        // The holder may not have recorded its kind yet
        _ => OperationKind::Backup,
    }
}

/// Releases the lock when dropped.
#[derive(Debug)]
pub struct OperationGuard<'a> {
    lock: &'a OperationLock,
    kind: OperationKind,
    file: Option<File>,
}

impl OperationGuard<'_> {
    pub fn kind(&self) -> OperationKind {
        self.kind
    }
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = file.set_len(0).and_then(|()| file.unlock()) {
                tracing::warn!(error = %e, "Failed to release operation lock file");
            }
        }
        let mut active = match self.lock.active.lock() {
            Ok(active) => active,
            Err(poisoned) => poisoned.into_inner(),
        };
        *active = OperationKind::None;
        tracing::debug!(operation = %self.kind, "Operation lock released");
    }
}
