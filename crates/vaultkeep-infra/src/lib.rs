//! Vaultkeep Infrastructure Library
//!
//! This crate provides the components the orchestrator drives:
//! - Archive building and extraction
//! - Service control through the process supervisor
//! - Failure notifications (Telegram, email, webhook)
//! - Telemetry initialization and the audit log

#[cfg(feature = "archive")]
pub mod archive;

#[cfg(feature = "service")]
pub mod service;

#[cfg(feature = "notify")]
pub mod notify;

#[cfg(feature = "observability-basic")]
pub mod telemetry;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

// Re-export commonly used types
#[cfg(feature = "archive")]
pub use archive::{ArchiveHandle, VerifiedArchive};

#[cfg(feature = "service")]
pub use service::{ProcessSupervisor, ServiceController, ServiceState, Supervisorctl};

#[cfg(feature = "notify")]
pub use notify::{Notification, NotificationChannel, Notifier};

#[cfg(feature = "observability-basic")]
pub use telemetry::{init_telemetry, tail_log};
