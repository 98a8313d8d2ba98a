//! Service controller
//!
//! Stops and starts the vault process through the external process
//! supervisor and waits, within bounded timeouts, for the state change to be
//! confirmed.

mod controller;
mod supervisor;

pub use controller::ServiceController;
pub use supervisor::{parse_status_line, ProcessSupervisor, ServiceState, Supervisorctl};
