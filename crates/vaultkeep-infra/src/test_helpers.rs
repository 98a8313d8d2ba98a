//! Test helpers
//!
//! In-memory stand-ins for the process supervisor and notification channels,
//! so orchestration logic can be tested without supervisord or a network.

#[cfg(feature = "service")]
pub use supervisor::MockSupervisor;

#[cfg(feature = "notify")]
pub use channels::{FailingChannel, HangingChannel, RecordingChannel};

#[cfg(feature = "service")]
mod supervisor {
    use crate::service::{ProcessSupervisor, ServiceState};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use vaultkeep_core::{AppError, AppResult};

    struct Inner {
        state: ServiceState,
        target: Option<ServiceState>,
        pending_polls: u32,
        calls: Vec<String>,
    }

    /// Supervisor that flips state in memory
    pub struct MockSupervisor {
        inner: Mutex<Inner>,
        transition_polls: u32,
        stuck_on_stop: bool,
        fail_stop: bool,
        fail_start: bool,
        hang: bool,
    }

    impl MockSupervisor {
        fn with_state(state: ServiceState) -> Self {
            Self {
                inner: Mutex::new(Inner {
                    state,
                    target: None,
                    pending_polls: 0,
                    calls: Vec::new(),
                }),
                transition_polls: 0,
                stuck_on_stop: false,
                fail_stop: false,
                fail_start: false,
                hang: false,
            }
        }

        pub fn running() -> Self {
            Self::with_state(ServiceState::Running)
        }

        pub fn stopped() -> Self {
            Self::with_state(ServiceState::Stopped)
        }

        /// Report `Transitioning` for `polls` status calls after each request
        pub fn with_transition_polls(mut self, polls: u32) -> Self {
            self.transition_polls = polls;
            self
        }

        /// Accept stop requests but never actually stop
        pub fn stuck_on_stop(mut self) -> Self {
            self.stuck_on_stop = true;
            self
        }

        pub fn failing_stop(mut self) -> Self {
            self.fail_stop = true;
            self
        }

        pub fn failing_start(mut self) -> Self {
            self.fail_start = true;
            self
        }

        /// Every call blocks for an hour
        pub fn hanging_calls(mut self) -> Self {
            self.hang = true;
            self
        }

        /// Stop/start requests received, in order
        pub fn calls(&self) -> Vec<String> {
            self.inner.lock().unwrap().calls.clone()
        }

        pub fn is_running(&self) -> bool {
            self.inner.lock().unwrap().state == ServiceState::Running
        }

        async fn maybe_hang(&self) {
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }

        fn request(&self, verb: &str, wanted: ServiceState) {
            let mut inner = self.inner.lock().unwrap();
            inner.calls.push(verb.to_string());
            if self.transition_polls > 0 {
                inner.state = ServiceState::Transitioning;
                inner.target = Some(wanted);
                inner.pending_polls = self.transition_polls;
            } else {
                inner.state = wanted;
            }
        }
    }

    #[async_trait]
    impl ProcessSupervisor for MockSupervisor {
        async fn stop(&self, _name: &str) -> AppResult<()> {
            self.maybe_hang().await;
            if self.fail_stop {
                self.inner.lock().unwrap().calls.push("stop".to_string());
                return Err(AppError::ServiceControl("mock stop failure".to_string()));
            }
            if self.stuck_on_stop {
                self.inner.lock().unwrap().calls.push("stop".to_string());
                return Ok(());
            }
            self.request("stop", ServiceState::Stopped);
            Ok(())
        }

        async fn start(&self, _name: &str) -> AppResult<()> {
            self.maybe_hang().await;
            if self.fail_start {
                self.inner.lock().unwrap().calls.push("start".to_string());
                return Err(AppError::ServiceControl(
                    "mock start failure: ERROR (spawn error)".to_string(),
                ));
            }
            self.request("start", ServiceState::Running);
            Ok(())
        }

        async fn status(&self, _name: &str) -> AppResult<ServiceState> {
            self.maybe_hang().await;
            let mut inner = self.inner.lock().unwrap();
            if let Some(target) = inner.target {
                if inner.pending_polls == 0 {
                    inner.state = target;
                    inner.target = None;
                } else {
                    inner.pending_polls -= 1;
                }
            }
            Ok(inner.state)
        }
    }
}

#[cfg(feature = "notify")]
mod channels {
    use crate::notify::{Notification, NotificationChannel};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Keeps every notification it is handed
    #[derive(Default)]
    pub struct RecordingChannel {
        sent: Mutex<Vec<Notification>>,
    }

    impl RecordingChannel {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn sent(&self) -> Vec<Notification> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NotificationChannel for RecordingChannel {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn send(&self, notification: &Notification) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    pub struct FailingChannel;

    #[async_trait]
    impl NotificationChannel for FailingChannel {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn send(&self, _notification: &Notification) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("mock channel failure"))
        }
    }

    pub struct HangingChannel;

    #[async_trait]
    impl NotificationChannel for HangingChannel {
        fn name(&self) -> &'static str {
            "hanging"
        }

        async fn send(&self, _notification: &Notification) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }
}
