//! Tracing initialization and the operator audit log

mod audit_log;
mod init_basic;

pub use audit_log::tail_log;
pub use init_basic::init_telemetry;
