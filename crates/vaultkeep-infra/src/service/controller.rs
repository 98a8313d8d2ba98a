use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use vaultkeep_core::{AppError, AppResult, RuntimeSettings};

use super::supervisor::{ProcessSupervisor, ServiceState, Supervisorctl};

/// Stops and starts the vault process and waits until the supervisor
/// confirms the new state.
pub struct ServiceController {
    supervisor: Arc<dyn ProcessSupervisor>,
    name: String,
    stop_timeout: Duration,
    start_timeout: Duration,
    poll_interval: Duration,
}

impl ServiceController {
    pub fn new(
        supervisor: Arc<dyn ProcessSupervisor>,
        name: impl Into<String>,
        stop_timeout: Duration,
        start_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            supervisor,
            name: name.into(),
            stop_timeout,
            start_timeout,
            poll_interval,
        }
    }

    /// Controller driving `supervisorctl` with the configured timeouts.
    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        let call_timeout = settings.stop_timeout().max(settings.start_timeout());
        Self::new(
            Arc::new(Supervisorctl::new(settings.supervisorctl.clone(), call_timeout)),
            settings.service_name.clone(),
            settings.stop_timeout(),
            settings.start_timeout(),
            settings.poll_interval(),
        )
    }

    pub fn service_name(&self) -> &str {
        &self.name
    }

    pub async fn is_running(&self) -> AppResult<bool> {
        let state = self
            .bounded(self.stop_timeout, self.supervisor.status(&self.name), "status")
            .await?;
        Ok(state == ServiceState::Running)
    }

    /// Stop the service. Only returns `Ok` once the supervisor reports it stopped.
    pub async fn stop(&self) -> AppResult<()> {
        let deadline = Instant::now() + self.stop_timeout;
        tracing::info!(service = %self.name, "Stopping service");

        self.bounded(self.stop_timeout, self.supervisor.stop(&self.name), "stop")
            .await?;
        self.wait_for(ServiceState::Stopped, deadline, self.stop_timeout)
            .await?;

        tracing::info!(service = %self.name, "Service stopped");
        Ok(())
    }

    /// Start the service. Only returns `Ok` once the supervisor reports it running.
    pub async fn start(&self) -> AppResult<()> {
        let deadline = Instant::now() + self.start_timeout;
        tracing::info!(service = %self.name, "Starting service");

        self.bounded(self.start_timeout, self.supervisor.start(&self.name), "start")
            .await?;
        self.wait_for(ServiceState::Running, deadline, self.start_timeout)
            .await?;

        tracing::info!(service = %self.name, "Service running");
        Ok(())
    }

    async fn bounded<T, F>(&self, limit: Duration, call: F, verb: &str) -> AppResult<T>
    where
        F: std::future::Future<Output = AppResult<T>>,
    {
        tokio::time::timeout(limit, call).await.map_err(|_| {
            AppError::ServiceControl(format!(
                "Supervisor {} for {} did not answer within {:?}",
                verb, self.name, limit
            ))
        })?
    }

    async fn wait_for(
        &self,
        wanted: ServiceState,
        deadline: Instant,
        budget: Duration,
    ) -> AppResult<()> {
        let mut last_seen: Option<String> = None;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(AppError::ServiceControl(format!(
                    "{} did not reach {:?} within {:?} (last seen: {})",
                    self.name,
                    wanted,
                    budget,
                    last_seen.as_deref().unwrap_or("nothing")
                )));
            }

            match self
                .bounded(remaining, self.supervisor.status(&self.name), "status")
                .await
            {
                Ok(state) if state == wanted => return Ok(()),
                Ok(state) => last_seen = Some(format!("{:?}", state)),
                Err(e) => {
                    tracing::debug!(service = %self.name, error = %e, "Status poll failed");
                    last_seen = Some(e.to_string());
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(self.poll_interval.min(remaining)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MockSupervisor;

    fn controller(supervisor: Arc<MockSupervisor>) -> ServiceController {
        ServiceController::new(
            supervisor,
            "vaultwarden",
            Duration::from_millis(300),
            Duration::from_millis(300),
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn test_stop_and_start_confirm_state() {
        let supervisor = Arc::new(MockSupervisor::running().with_transition_polls(2));
        let ctl = controller(supervisor.clone());

        ctl.stop().await.unwrap();
        assert!(!ctl.is_running().await.unwrap());

        ctl.start().await.unwrap();
        assert!(ctl.is_running().await.unwrap());
        assert_eq!(supervisor.calls(), vec!["stop", "start"]);
    }

    #[tokio::test]
    async fn test_stop_times_out_when_process_never_stops() {
        let supervisor = Arc::new(MockSupervisor::running().stuck_on_stop());
        let ctl = controller(supervisor);

        let result = ctl.stop().await;
        assert!(matches!(result, Err(AppError::ServiceControl(ref m)) if m.contains("did not reach")));
    }

    #[tokio::test]
    async fn test_start_failure_is_reported() {
        let supervisor = Arc::new(MockSupervisor::stopped().failing_start());
        let ctl = controller(supervisor);

        assert!(matches!(ctl.start().await, Err(AppError::ServiceControl(_))));
    }

    #[tokio::test]
    async fn test_hung_supervisor_call_is_bounded() {
        let supervisor = Arc::new(MockSupervisor::running().hanging_calls());
        let ctl = controller(supervisor);

        let started = std::time::Instant::now();
        assert!(matches!(ctl.stop().await, Err(AppError::ServiceControl(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
