//! Vaultkeep Core Library
//!
//! This crate provides the domain models, error types, configuration and the
//! archive cipher shared by every vaultkeep component.

pub mod config;
pub mod constants;
pub mod encryption;
pub mod error;
pub mod models;
pub mod schedule;
pub mod settings;
pub mod storage_types;

// Re-export commonly used types
pub use config::{BackupConfig, ConfigStore};
pub use encryption::ArchiveCipher;
pub use error::{AppError, AppResult, LogLevel};
pub use models::{
    BackupRecord, FailureRecord, OperationKind, OperationStatus, OrchestratorState, Stage,
};
pub use settings::RuntimeSettings;
pub use storage_types::StorageBackend;
