//! Failure notifications
//!
//! The [`Notifier`] fans one [`Notification`] out to every configured
//! channel concurrently. Each channel gets its own timeout, and delivery
//! problems are only logged: a notification can never turn into the error an
//! operation reports.

mod email;
mod telegram;
mod webhook;

pub use email::EmailChannel;
pub use telegram::TelegramChannel;
pub use webhook::{sign_payload, WebhookChannel};

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use vaultkeep_core::{BackupConfig, FailureRecord};

/// Message handed to every channel
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub critical: bool,
    pub failure: FailureRecord,
}

impl From<&FailureRecord> for Notification {
    fn from(record: &FailureRecord) -> Self {
        Self {
            title: record.title(),
            body: record.describe(),
            critical: record.critical,
            failure: record.clone(),
        }
    }
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Short channel name used in logs
    fn name(&self) -> &'static str;

    async fn send(&self, notification: &Notification) -> anyhow::Result<()>;
}

pub struct Notifier {
    channels: Vec<Arc<dyn NotificationChannel>>,
    timeout: Duration,
}

impl Notifier {
    pub fn new(channels: Vec<Arc<dyn NotificationChannel>>, timeout: Duration) -> Self {
        Self { channels, timeout }
    }

    /// Build the channels `config` has settings for. Unconfigured channels
    /// are simply absent.
    pub fn from_config(config: &BackupConfig, timeout: Duration) -> Self {
        let mut channels: Vec<Arc<dyn NotificationChannel>> = Vec::new();

        let wants_http = config.tg_bot_token().is_some() || config.webhook_url().is_some();
        let http_client = if wants_http {
            match Client::builder().timeout(timeout).build() {
                Ok(client) => Some(client),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to create HTTP client for notifications");
                    None
                }
            }
        } else {
            None
        };

        if let Some(client) = &http_client {
            if let Some(channel) = TelegramChannel::from_config(config, client.clone()) {
                channels.push(Arc::new(channel));
            }
            if let Some(channel) = WebhookChannel::from_config(config, client.clone()) {
                channels.push(Arc::new(channel));
            }
        }
        if let Some(channel) = EmailChannel::from_config(config) {
            channels.push(Arc::new(channel));
        }

        Self::new(channels, timeout)
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn channel_names(&self) -> Vec<&'static str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    pub async fn notify_failure(&self, record: &FailureRecord) {
        self.notify(&Notification::from(record)).await;
    }

    /// Deliver to all channels; returns how many accepted the message.
    pub async fn notify(&self, notification: &Notification) -> usize {
        if self.channels.is_empty() {
            tracing::debug!(title = %notification.title, "No notification channels configured");
            return 0;
        }

        let deliveries = self.channels.iter().map(|channel| async move {
            let outcome = tokio::time::timeout(self.timeout, channel.send(notification)).await;
            match outcome {
                Ok(Ok(())) => {
                    tracing::info!(channel = channel.name(), "Notification sent");
                    true
                }
                Ok(Err(e)) => {
                    tracing::warn!(channel = channel.name(), error = %e, "Notification failed");
                    false
                }
                Err(_) => {
                    tracing::warn!(
                        channel = channel.name(),
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Notification timed out"
                    );
                    false
                }
            }
        });

        join_all(deliveries)
            .await
            .into_iter()
            .filter(|delivered| *delivered)
            .count()
    }
}
