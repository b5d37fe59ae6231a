//! Telegram Bot API delivery sink — `sendMessage` with a bounded per-call
//! timeout, so a hung Bot API call cannot stall the consumer loop.

use async_trait::async_trait;
use mgreen_core::config::TelegramConfig;
use mgreen_core::error::{MGreenError, Result};
use mgreen_core::traits::DeliverySink;
use serde::Deserialize;
use std::time::Duration;

/// Telegram Bot API sink.
pub struct TelegramSink {
    config: TelegramConfig,
    client: reqwest::Client,
    send_timeout: Duration,
}

impl TelegramSink {
    pub fn new(config: TelegramConfig, send_timeout: Duration) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            send_timeout,
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "https://api.telegram.org/bot{}/{}",
            self.config.bot_token, method
        )
    }

    /// Send a text message to a chat id.
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });

        let response = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .timeout(self.send_timeout)
            .send()
            .await
            .map_err(|e| MGreenError::Channel(format!("sendMessage failed: {e}")))?;

        let result: TelegramApiResponse<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| MGreenError::Channel(format!("Invalid send response: {e}")))?;

        if !result.ok {
            return Err(MGreenError::Channel(format!(
                "Send failed: {}",
                result.description.unwrap_or_default()
            )));
        }
        Ok(())
    }

    /// Connectivity check — fetches bot info.
    pub async fn get_me(&self) -> Result<TelegramUser> {
        let response = self
            .client
            .get(self.api_url("getMe"))
            .timeout(self.send_timeout)
            .send()
            .await
            .map_err(|e| MGreenError::Channel(format!("getMe failed: {e}")))?;
        let body: TelegramApiResponse<TelegramUser> = response
            .json()
            .await
            .map_err(|e| MGreenError::Channel(format!("Invalid getMe response: {e}")))?;
        body.result
            .ok_or_else(|| MGreenError::Channel("No bot info".into()))
    }
}

#[async_trait]
impl DeliverySink for TelegramSink {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, recipient: &str, text: &str) -> Result<()> {
        self.send_message(recipient, text).await
    }
}

// --- Telegram API Types ---

#[derive(Debug, Deserialize)]
pub struct TelegramApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub is_bot: bool,
    pub first_name: String,
    pub username: Option<String>,
}
