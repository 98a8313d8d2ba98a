use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use vaultkeep_core::BackupConfig;

use super::{Notification, NotificationChannel};

const API_BASE: &str = "https://api.telegram.org";

/// Telegram Bot API `sendMessage`
pub struct TelegramChannel {
    client: Client,
    token: String,
    chat_id: String,
}

impl TelegramChannel {
    pub fn new(client: Client, token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            client,
            token: token.into(),
            chat_id: chat_id.into(),
        }
    }

    /// Returns `None` unless both the bot token and the chat id are set.
    pub fn from_config(config: &BackupConfig, client: Client) -> Option<Self> {
        let token = config.tg_bot_token()?;
        let chat_id = config.tg_chat_id()?;
        Some(Self::new(client, token, chat_id))
    }

    /// Markdown text of the message. The body goes in a pre block so error
    /// text with `_` or `*` cannot break the markup.
    pub fn render(notification: &Notification) -> String {
        let marker = if notification.critical { "🚨" } else { "❌" };
        format!(
            "{} *{}*\n\n```\n{}\n```",
            marker,
            notification.title,
            notification.body.replace("```", "'''")
        )
    }
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn send(&self, notification: &Notification) -> anyhow::Result<()> {
        let url = format!("{}/bot{}/sendMessage", API_BASE, self.token);
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "chat_id": self.chat_id,
                "text": Self::render(notification),
                "parse_mode": "Markdown",
            }))
            .send()
            .await
            // The token is part of the URL; keep it out of the error text
            .map_err(|e| anyhow::anyhow!("Telegram request failed: {}", e.without_url()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<unreadable body>"));
            return Err(anyhow::anyhow!(
                "Telegram sendMessage returned non-2xx status: {} - {}",
                status,
                body
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultkeep_core::{AppError, FailureRecord, OperationKind, Stage};

    #[test]
    fn test_render_wraps_body_in_pre_block() {
        let record = FailureRecord::new(
            OperationKind::Restore,
            Stage::Extract,
            &AppError::Encryption("wrong_passphrase *here*".into()),
        );
        let text = TelegramChannel::render(&Notification::from(&record));

        assert!(text.starts_with("❌ *Vaultwarden restore failed*"));
        assert!(text.contains("```\nOperation: RESTORE"));
        assert!(text.contains("wrong_passphrase *here*"));
        assert!(text.ends_with("\n```"));
    }

    #[test]
    fn test_critical_marker() {
        let record = FailureRecord::new(
            OperationKind::Backup,
            Stage::StartService,
            &AppError::ServiceControl("timeout".into()),
        )
        .critical();
        assert!(TelegramChannel::render(&Notification::from(&record)).starts_with("🚨"));
    }
}
