use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::json;
use sha2::Sha256;
use vaultkeep_core::{BackupConfig, OperationKind};

use super::{Notification, NotificationChannel};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Vaultkeep-Signature";

/// Sign a webhook body with HMAC-SHA256, hex encoded.
pub fn sign_payload(body: &str, secret: &str) -> Result<String> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).context("Invalid signing secret")?;
    mac.update(body.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// JSON POST to an operator-supplied URL
pub struct WebhookChannel {
    client: Client,
    url: String,
    secret: Option<String>,
}

impl WebhookChannel {
    pub fn new(client: Client, url: impl Into<String>, secret: Option<String>) -> Self {
        Self {
            client,
            url: url.into(),
            secret,
        }
    }

    pub fn from_config(config: &BackupConfig, client: Client) -> Option<Self> {
        let url = config.webhook_url()?;
        Some(Self::new(
            client,
            url,
            config.webhook_secret().map(str::to_string),
        ))
    }

    pub fn payload(notification: &Notification) -> Result<String> {
        let event = match notification.failure.kind {
            OperationKind::Restore => "restore.failed",
            _ => "backup.failed",
        };
        serde_json::to_string(&json!({
            "event": event,
            "title": notification.title,
            "critical": notification.critical,
            "failure": notification.failure,
        }))
        .context("Failed to serialize webhook payload")
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        let body = Self::payload(notification)?;

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("User-Agent", concat!("vaultkeep/", env!("CARGO_PKG_VERSION")));

        if let Some(secret) = &self.secret {
            let signature = sign_payload(&body, secret)?;
            request = request.header(SIGNATURE_HEADER, format!("v1={}", signature));
        }

        let response = request
            .body(body)
            .send()
            .await
            .context("Failed to send webhook request")?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("Failed to read response body"));
            Err(anyhow::anyhow!(
                "Webhook returned non-2xx status: {} - {}",
                status,
                body
            ))
        }
    }
}
