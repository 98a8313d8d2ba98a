use async_trait::async_trait;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use vaultkeep_core::{AppError, AppResult};

/// Coarse process state as reported by the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Running,
    Stopped,
    /// Starting, stopping or backing off between restarts
    Transitioning,
}

/// External process supervisor boundary
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Ask the supervisor to stop `name`. Returns once the request is accepted.
    async fn stop(&self, name: &str) -> AppResult<()>;

    /// Ask the supervisor to start `name`. Returns once the request is accepted.
    async fn start(&self, name: &str) -> AppResult<()>;

    async fn status(&self, name: &str) -> AppResult<ServiceState>;
}

/// Parse one `supervisorctl status` line, e.g.
/// `vaultwarden   RUNNING   pid 42, uptime 1:02:03`.
pub fn parse_status_line(line: &str) -> Option<ServiceState> {
    let state = line.split_whitespace().nth(1)?;
    match state {
        "RUNNING" => Some(ServiceState::Running),
        "STOPPED" | "EXITED" | "FATAL" => Some(ServiceState::Stopped),
        "STARTING" | "STOPPING" | "BACKOFF" => Some(ServiceState::Transitioning),
        _ => None,
    }
}

/// `supervisorctl` command-line client
#[derive(Debug, Clone)]
pub struct Supervisorctl {
    program: String,
    call_timeout: Duration,
}

impl Supervisorctl {
    /// # Arguments
    /// * `program` - supervisorctl binary (name on PATH or absolute path)
    /// * `call_timeout` - Upper bound for a single invocation
    pub fn new(program: impl Into<String>, call_timeout: Duration) -> Self {
        Self {
            program: program.into(),
            call_timeout,
        }
    }

    async fn run(&self, verb: &str, name: &str) -> AppResult<Output> {
        let mut command = Command::new(&self.program);
        command.arg(verb).arg(name).kill_on_drop(true);

        match tokio::time::timeout(self.call_timeout, command.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(AppError::ServiceControl(format!(
                "Failed to run {} {} {}: {}",
                self.program, verb, name, e
            ))),
            Err(_) => Err(AppError::ServiceControl(format!(
                "{} {} {} did not return within {:?}",
                self.program, verb, name, self.call_timeout
            ))),
        }
    }

    /// Run a state-changing verb; `benign` output (already in the wanted
    /// state) is treated as success.
    async fn request(&self, verb: &str, name: &str, benign: &str) -> AppResult<()> {
        let output = self.run(verb, name).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if output.status.success() || stdout.contains(benign) || stderr.contains(benign) {
            tracing::debug!(verb, service = name, output = %stdout.trim(), "supervisorctl request accepted");
            return Ok(());
        }

        Err(AppError::ServiceControl(format!(
            "supervisorctl {} {} failed ({}): {}",
            verb,
            name,
            output.status,
            format!("{} {}", stdout.trim(), stderr.trim()).trim()
        )))
    }
}

#[async_trait]
impl ProcessSupervisor for Supervisorctl {
    async fn stop(&self, name: &str) -> AppResult<()> {
        self.request("stop", name, "not running").await
    }

    async fn start(&self, name: &str) -> AppResult<()> {
        self.request("start", name, "already started").await
    }

    async fn status(&self, name: &str) -> AppResult<ServiceState> {
        // Non-zero exit codes are normal here (3 = not running)
        let output = self.run("status", name).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        stdout
            .lines()
            .find(|line| line.split_whitespace().next() == Some(name))
            .and_then(parse_status_line)
            .ok_or_else(|| {
                AppError::ServiceControl(format!(
                    "Unrecognised supervisorctl status output for {}: {}",
                    name,
                    stdout.trim()
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_line() {
        assert_eq!(
            parse_status_line("vaultwarden                      RUNNING   pid 42, uptime 1:02:03"),
            Some(ServiceState::Running)
        );
        assert_eq!(
            parse_status_line("vaultwarden STOPPED   Jan 01 03:00 AM"),
            Some(ServiceState::Stopped)
        );
        assert_eq!(
            parse_status_line("vaultwarden EXITED    Jan 01 03:00 AM (exit status 1)"),
            Some(ServiceState::Stopped)
        );
        assert_eq!(
            parse_status_line("vaultwarden FATAL     Exited too quickly"),
            Some(ServiceState::Stopped)
        );
        assert_eq!(
            parse_status_line("vaultwarden BACKOFF   Exited too quickly"),
            Some(ServiceState::Transitioning)
        );
        assert_eq!(parse_status_line("vaultwarden STARTING"), Some(ServiceState::Transitioning));
        assert_eq!(parse_status_line("vaultwarden: ERROR (no such process)"), None);
        assert_eq!(parse_status_line(""), None);
    }

    #[tokio::test]
    async fn test_missing_binary_is_service_control_error() {
        let ctl = Supervisorctl::new("/nonexistent/supervisorctl", Duration::from_secs(5));
        assert!(matches!(
            ctl.status("vaultwarden").await,
            Err(AppError::ServiceControl(_))
        ));
        assert!(matches!(
            ctl.stop("vaultwarden").await,
            Err(AppError::ServiceControl(_))
        ));
    }
}
