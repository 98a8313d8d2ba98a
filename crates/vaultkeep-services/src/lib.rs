//! Vaultkeep Services Layer
//!
//! Coordination on top of the storage and infrastructure crates: the
//! backup/restore orchestrator, its operation lock, the retention policy and
//! the cron scheduler. The CLI depends on this crate as its single facade.

pub mod lock;
pub mod orchestrator;
pub mod retention;

#[cfg(feature = "scheduler")]
pub mod scheduler;

pub use lock::{OperationGuard, OperationLock};
pub use orchestrator::{BackupOutcome, Orchestrator, RestoreOutcome, RestoreSource};
pub use retention::select_for_deletion;
#[cfg(feature = "scheduler")]
pub use scheduler::{ScheduledJob, Scheduler, SchedulerHandle};

pub use vaultkeep_core::{
    AppError, AppResult, BackupConfig, BackupRecord, ConfigStore, FailureRecord, OperationKind,
    OperationStatus, OrchestratorState, RuntimeSettings,
};
pub use vaultkeep_infra::{Notifier, ServiceController};
pub use vaultkeep_storage::{create_storage, RemoteStorage};
