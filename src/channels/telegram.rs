//! Telegram chat notifications over the Bot API.
//!
//! Only the outbound half is used: plain-text status lines and the finished
//! deliverable as a document.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};

use crate::channels::ChatNotifier;
use crate::config::parse_interval_secs;
use crate::error::{ChannelError, ConfigError};

/// Maximum message length for Telegram's sendMessage API.
pub const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Telegram notification configuration.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
    pub chat_id: String,
    /// How often buffered notifications are flushed.
    pub buffer_interval: Duration,
    pub max_message_length: usize,
}

impl TelegramConfig {
    /// Build config from environment variables.
    /// Returns `Ok(None)` if `TELEGRAM_BOT_TOKEN` or `TELEGRAM_CHAT_ID` is unset (channel disabled).
    pub fn from_env(default_interval: Duration) -> Result<Option<Self>, ConfigError> {
        let (Ok(token), Ok(chat_id)) = (
            std::env::var("TELEGRAM_BOT_TOKEN"),
            std::env::var("TELEGRAM_CHAT_ID"),
        ) else {
            return Ok(None);
        };
        if token.trim().is_empty() || chat_id.trim().is_empty() {
            return Ok(None);
        }

        let buffer_interval = match std::env::var("TELEGRAM_BUFFER_INTERVAL_SECS") {
            Ok(raw) => parse_interval_secs("TELEGRAM_BUFFER_INTERVAL_SECS", &raw)?,
            Err(_) => default_interval,
        };

        Ok(Some(Self {
            bot_token: SecretString::from(token.trim().to_string()),
            chat_id: chat_id.trim().to_string(),
            buffer_interval,
            max_message_length: TELEGRAM_MAX_MESSAGE_LENGTH,
        }))
    }
}

/// Telegram Bot API notifier bound to one chat.
pub struct TelegramNotifier {
    bot_token: SecretString,
    chat_id: String,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "https://api.telegram.org/bot{}/{method}",
            self.bot_token.expose_secret()
        )
    }

    fn send_failed(reason: impl Into<String>) -> ChannelError {
        ChannelError::SendFailed {
            name: "telegram".into(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ChatNotifier for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    /// Send a single message. Callers keep `text` within the API limit.
    async fn send_text(&self, text: &str) -> Result<(), ChannelError> {
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
        });

        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::send_failed(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            return Err(Self::send_failed(format!(
                "sendMessage failed ({status}): {err}"
            )));
        }

        Ok(())
    }

    /// Send a document/file to the chat.
    async fn send_file(&self, path: &Path) -> Result<(), ChannelError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document.pdf")
            .to_string();

        let file_bytes = tokio::fs::read(path)
            .await
            .map_err(|e| Self::send_failed(format!("cannot read {}: {e}", path.display())))?;
        let part = Part::bytes(file_bytes).file_name(file_name.clone());

        let form = Form::new()
            .text("chat_id", self.chat_id.clone())
            .part("document", part);

        let resp = self
            .client
            .post(self.api_url("sendDocument"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| Self::send_failed(e.to_string()))?;

        if !resp.status().is_success() {
            let err = resp.text().await.unwrap_or_default();
            return Err(Self::send_failed(format!("sendDocument failed: {err}")));
        }

        tracing::info!(file = %file_name, "Telegram document sent");
        Ok(())
    }
}
