pub mod backup;
pub mod operation;

pub use backup::BackupRecord;
pub use operation::{FailureRecord, OperationKind, OperationStatus, OrchestratorState, Stage};
