//! Error types module
//!
//! Every failure a backup or restore can hit is expressed as one `AppError`
//! variant. Stage-local code returns these; the orchestrator turns them into
//! failure records and notifications.

use std::io;

use crate::models::OperationKind;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for recoverable issues like a busy lock
    Warn,
    /// Error level - for unexpected failures
    Error,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Source directory missing or unreadable, or the data directory could not be cleared.
    #[error("Filesystem error: {0}")]
    Filesystem(String),

    /// Read/write failure while producing or unpacking an archive (including a full disk).
    #[error("IO error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("Service control error: {0}")]
    ServiceControl(String),

    #[error("Remote storage error: {0}")]
    RemoteStorage(String),

    /// Passphrase mismatch, missing passphrase or corrupt container.
    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Another operation is already running: {active}")]
    ConcurrentOperation { active: OperationKind },

    #[error("Invalid configuration: {0}")]
    ConfigValidation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result alias used across the workspace
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Wrap an IO error with a description of what was being done.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        AppError::Io {
            context: context.into(),
            source,
        }
    }

    /// Machine-readable error code (e.g., "REMOTE_STORAGE_ERROR")
    pub fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).0
    }

    /// Whether the same operation could succeed if simply retried later
    pub fn is_recoverable(&self) -> bool {
        app_error_static_metadata(self).1
    }

    pub fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).2
    }
}

/// Static metadata for each variant: (error_code, recoverable, log_level).
fn app_error_static_metadata(err: &AppError) -> (&'static str, bool, LogLevel) {
    match err {
        AppError::Filesystem(_) => ("FILESYSTEM_ERROR", false, LogLevel::Error),
        AppError::Io { .. } => ("IO_ERROR", true, LogLevel::Error),
        AppError::ServiceControl(_) => ("SERVICE_CONTROL_ERROR", true, LogLevel::Error),
        AppError::RemoteStorage(_) => ("REMOTE_STORAGE_ERROR", true, LogLevel::Error),
        AppError::Encryption(_) => ("ENCRYPTION_ERROR", false, LogLevel::Error),
        AppError::ConcurrentOperation { .. } => ("CONCURRENT_OPERATION", true, LogLevel::Warn),
        AppError::ConfigValidation(_) => ("CONFIG_VALIDATION_ERROR", false, LogLevel::Debug),
        AppError::Internal(_) => ("INTERNAL_ERROR", true, LogLevel::Error),
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::ConfigValidation(format!("JSON parsing error: {}", err))
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("Background task failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AppError::Filesystem("x".into()).error_code(),
            "FILESYSTEM_ERROR"
        );
        assert_eq!(
            AppError::ConcurrentOperation {
                active: OperationKind::Backup
            }
            .error_code(),
            "CONCURRENT_OPERATION"
        );
        assert_eq!(
            AppError::Encryption("bad".into()).log_level(),
            LogLevel::Error
        );
    }

    #[test]
    fn test_io_error_keeps_context() {
        let err = AppError::io(
            "writing archive",
            io::Error::new(io::ErrorKind::Other, "no space left on device"),
        );
        let message = err.to_string();
        assert!(message.contains("writing archive"));
        assert!(message.contains("no space left"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_concurrent_operation_message_names_active_kind() {
        let err = AppError::ConcurrentOperation {
            active: OperationKind::Restore,
        };
        assert_eq!(
            err.to_string(),
            "Another operation is already running: RESTORE"
        );
    }
}
