use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::Arc;
use vaultkeep_core::BackupConfig;

use super::{Notification, NotificationChannel};

const DEFAULT_SMTP_PORT: u16 = 587;

/// Plain-text alert mail over SMTP
pub struct EmailChannel {
    mailer: Arc<AsyncSmtpTransport<Tokio1Executor>>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl EmailChannel {
    /// Returns `None` if SMTP is not configured or no valid recipient is set.
    pub fn from_config(config: &BackupConfig) -> Option<Self> {
        let host = config.smtp_host()?;
        let from: Mailbox = match config.smtp_from()?.parse() {
            Ok(from) => from,
            Err(e) => {
                tracing::warn!(error = %e, "Invalid smtp_from, email alerts disabled");
                return None;
            }
        };
        let to: Vec<Mailbox> = config
            .alert_emails
            .iter()
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        if to.is_empty() {
            tracing::debug!("No valid alert_emails, email alerts disabled");
            return None;
        }
        let port = config.smtp_port.unwrap_or(DEFAULT_SMTP_PORT);

        let builder = if config.smtp_tls {
            match AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host) {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(host = %host, error = %e, "Invalid SMTP relay, email alerts disabled");
                    return None;
                }
            }
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
        };
        let builder = builder.port(port);
        let builder = if let (Some(u), Some(p)) = (config.smtp_user(), config.smtp_password()) {
            builder.credentials(Credentials::new(u.to_string(), p.to_string()))
        } else {
            builder
        };

        tracing::debug!(host = %host, port, tls = config.smtp_tls, "Email channel configured");

        Some(Self {
            mailer: Arc::new(builder.build()),
            from,
            to,
        })
    }

    fn message(&self, notification: &Notification) -> anyhow::Result<Message> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(notification.title.clone());
        for mb in &self.to {
            builder = builder.to(mb.clone());
        }
        builder
            .header(ContentType::TEXT_PLAIN)
            .body(notification.body.clone())
            .map_err(|e| anyhow::anyhow!("Failed to build alert email: {}", e))
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn send(&self, notification: &Notification) -> anyhow::Result<()> {
        let email = self.message(notification)?;
        self.mailer
            .send(email)
            .await
            .map_err(|e| anyhow::anyhow!("SMTP delivery failed: {}", e))?;
        Ok(())
    }
}
