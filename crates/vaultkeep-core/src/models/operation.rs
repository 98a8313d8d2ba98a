//! Operation kinds, orchestrator states and failure records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::error::AppError;

/// What currently holds the operation lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    #[default]
    None,
    Backup,
    Restore,
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            OperationKind::None => write!(f, "NONE"),
            OperationKind::Backup => write!(f, "BACKUP"),
            OperationKind::Restore => write!(f, "RESTORE"),
        }
    }
}

/// Orchestrator state machine.
///
/// `Idle → Stopping → Building/Extracting → Transferring → Starting → Idle`,
/// with `Failed` reachable from any non-idle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestratorState {
    #[default]
    Idle,
    Stopping,
    Building,
    Extracting,
    Transferring,
    Starting,
    Failed,
}

impl Display for OrchestratorState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let s = match self {
            OrchestratorState::Idle => "IDLE",
            OrchestratorState::Stopping => "STOPPING",
            OrchestratorState::Building => "BUILDING",
            OrchestratorState::Extracting => "EXTRACTING",
            OrchestratorState::Transferring => "TRANSFERRING",
            OrchestratorState::Starting => "STARTING",
            OrchestratorState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Step of a backup or restore that a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Configuration,
    Download,
    Validate,
    StopService,
    Build,
    StartService,
    Upload,
    Retention,
    ClearData,
    Extract,
}

impl Stage {
    /// State the orchestrator is in while this stage runs.
    pub fn state(self) -> OrchestratorState {
        match self {
            Stage::Configuration | Stage::StopService => OrchestratorState::Stopping,
            Stage::Build => OrchestratorState::Building,
            Stage::ClearData | Stage::Extract => OrchestratorState::Extracting,
            Stage::Download | Stage::Validate | Stage::Upload | Stage::Retention => {
                OrchestratorState::Transferring
            }
            Stage::StartService => OrchestratorState::Starting,
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let s = match self {
            Stage::Configuration => "configuration",
            Stage::Download => "download",
            Stage::Validate => "validate archive",
            Stage::StopService => "stop service",
            Stage::Build => "build archive",
            Stage::StartService => "start service",
            Stage::Upload => "upload",
            Stage::Retention => "retention",
            Stage::ClearData => "clear data directory",
            Stage::Extract => "extract archive",
        };
        f.write_str(s)
    }
}

/// Structured description of a failed operation, logged and sent to notifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: OperationKind,
    pub stage: Stage,
    pub cause: String,
    pub error_code: String,
    /// Set when the vault may have been left stopped.
    pub critical: bool,
    pub occurred_at: DateTime<Utc>,
}

impl FailureRecord {
    pub fn new(kind: OperationKind, stage: Stage, error: &AppError) -> Self {
        Self {
            kind,
            stage,
            cause: error.to_string(),
            error_code: error.error_code().to_string(),
            critical: false,
            occurred_at: Utc::now(),
        }
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    /// One-line summary used as a notification subject.
    pub fn title(&self) -> String {
        let what = match self.kind {
            OperationKind::Restore => "Vaultwarden restore failed",
            _ => "Vaultwarden backup failed",
        };
        if self.critical {
            format!("{} (service may be down)", what)
        } else {
            what.to_string()
        }
    }

    /// Multi-line plain text body used by notification channels.
    pub fn describe(&self) -> String {
        format!(
            "Operation: {}\nStage: {}\nError: {}\nCode: {}\nTime: {}",
            self.kind,
            self.stage,
            self.cause,
            self.error_code,
            self.occurred_at.format("%Y-%m-%d %H:%M:%S UTC")
        )
    }
}

/// Snapshot of the orchestrator, as reported to operators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationStatus {
    pub kind: OperationKind,
    pub state: OrchestratorState,
    pub last_failure: Option<FailureRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_state_mapping() {
        assert_eq!(Stage::StopService.state(), OrchestratorState::Stopping);
        assert_eq!(Stage::Build.state(), OrchestratorState::Building);
        assert_eq!(Stage::Extract.state(), OrchestratorState::Extracting);
        assert_eq!(Stage::Upload.state(), OrchestratorState::Transferring);
        assert_eq!(Stage::StartService.state(), OrchestratorState::Starting);
    }

    #[test]
    fn test_failure_record_from_error() {
        let err = AppError::ServiceControl("timed out waiting for RUNNING".into());
        let record = FailureRecord::new(OperationKind::Backup, Stage::StartService, &err).critical();

        assert!(record.critical);
        assert_eq!(record.error_code, "SERVICE_CONTROL_ERROR");
        assert_eq!(record.title(), "Vaultwarden backup failed (service may be down)");

        let body = record.describe();
        assert!(body.contains("Stage: start service"));
        assert!(body.contains("timed out waiting for RUNNING"));
    }

    #[test]
    fn test_operation_kind_serde() {
        let json = serde_json::to_string(&OperationKind::Restore).unwrap();
        assert_eq!(json, "\"RESTORE\"");
    }
}
