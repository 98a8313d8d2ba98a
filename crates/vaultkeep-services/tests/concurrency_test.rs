#[path = "helpers/mod.rs"]
mod helpers;

use helpers::setup;
use std::time::Duration;
use vaultkeep_core::{AppError, BackupConfig, OperationKind, OrchestratorState};
use vaultkeep_infra::test_helpers::MockSupervisor;
use vaultkeep_services::RestoreSource;

/// Supervisor slow enough that a backup is still running when the
/// competing calls arrive.
fn slow_supervisor() -> MockSupervisor {
    MockSupervisor::running().with_transition_polls(30)
}

#[tokio::test]
async fn test_concurrent_calls_are_rejected_without_affecting_first() {
    let h = setup(slow_supervisor(), BackupConfig::default());

    let orchestrator = h.orchestrator.clone();
    let first = tokio::spawn(async move { orchestrator.run_backup().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.orchestrator.lock().current(), OperationKind::Backup);
    let status = h.orchestrator.status();
    assert_eq!(status.kind, OperationKind::Backup);
    assert_ne!(status.state, OrchestratorState::Idle);

    let second = h.orchestrator.run_backup().await;
    assert!(matches!(
        second,
        Err(AppError::ConcurrentOperation {
            active: OperationKind::Backup
        })
    ));

    let restore = h
        .orchestrator
        .run_restore(RestoreSource::Remote(
            "vw_backup_20240101_030000.zip".to_string(),
        ))
        .await;
    assert!(matches!(restore, Err(AppError::ConcurrentOperation { .. })));

    let outcome = first.await.unwrap().unwrap();
    assert!(h.storage.has_file(&outcome.remote_path));
    assert_eq!(h.storage.paths().len(), 1);
    // Rejections are not operational failures
    assert!(h.channel.sent().is_empty());
    assert_eq!(h.orchestrator.lock().current(), OperationKind::None);
}

#[tokio::test]
async fn test_rejected_staged_restore_discards_upload() {
    let h = setup(slow_supervisor(), BackupConfig::default());
    std::fs::create_dir_all(&h.temp_dir).unwrap();
    let staged = h.temp_dir.join("upload.zip");
    std::fs::write(&staged, b"PK\x03\x04 pretend").unwrap();

    let orchestrator = h.orchestrator.clone();
    let first = tokio::spawn(async move { orchestrator.run_backup().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let result = h
        .orchestrator
        .run_restore(RestoreSource::Staged(staged.clone()))
        .await;

    assert!(matches!(result, Err(AppError::ConcurrentOperation { .. })));
    assert!(!staged.exists());
    first.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_lock_is_released_after_failure() {
    let h = setup(
        MockSupervisor::running().failing_stop(),
        BackupConfig::default(),
    );

    assert!(h.orchestrator.run_backup().await.is_err());
    assert_eq!(h.orchestrator.lock().current(), OperationKind::None);
    // A later call gets past the lock and fails on its own merits
    assert!(matches!(
        h.orchestrator.run_backup().await,
        Err(AppError::ServiceControl(_))
    ));
}

#[tokio::test]
async fn test_restore_from_other_process_is_rejected_during_backup() {
    let h = setup(slow_supervisor(), BackupConfig::default());
    let other = h.second_process();

    let orchestrator = h.orchestrator.clone();
    let first = tokio::spawn(async move { orchestrator.run_backup().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(other.lock().current(), OperationKind::None);

    let restore = other
        .run_restore(RestoreSource::Remote(
            "vw_backup_20240101_030000.zip".to_string(),
        ))
        .await;
    assert!(matches!(
        restore,
        Err(AppError::ConcurrentOperation {
            active: OperationKind::Backup
        })
    ));
    let backup = other.run_backup().await;
    assert!(matches!(backup, Err(AppError::ConcurrentOperation { .. })));

    first.await.unwrap().unwrap();
    assert_eq!(h.supervisor.calls(), vec!["stop", "start"]);
    assert!(h.channel.sent().is_empty());

    // The file lock is released with the first backup
    other.run_backup().await.unwrap();
}
