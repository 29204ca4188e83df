//! Outbound notifications

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

const TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Delivers recommendation text somewhere a human will see it
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str) -> Result<()>;
}

/// Discards every message; used when no bot is configured
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn send(&self, message: &str) -> Result<()> {
        debug!(len = message.len(), "Notification skipped (no notifier configured)");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

/// Telegram Bot API `sendMessage` client
#[derive(Clone)]
pub struct TelegramNotifier {
    client: Client,
    bot_token: String,
    chat_id: String,
    base_url: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(15))
                .build()
                .unwrap_or_else(|_| Client::new()),
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
            base_url: TELEGRAM_API_URL.to_string(),
        }
    }

    /// Build from `TELEGRAM_BOT_TOKEN` / `TELEGRAM_CHAT_ID`; `None` if either is unset or empty
    pub fn from_env() -> Option<Self> {
        let token = std::env::var("TELEGRAM_BOT_TOKEN").ok().filter(|t| !t.is_empty())?;
        let chat_id = std::env::var("TELEGRAM_CHAT_ID").ok().filter(|c| !c.is_empty())?;
        Some(Self::new(token, chat_id))
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.base_url, self.bot_token)
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, message: &str) -> Result<()> {
        let payload = SendMessage {
            chat_id: &self.chat_id,
            text: message,
            parse_mode: "Markdown",
        };

        let response = self.client.post(self.endpoint()).json(&payload).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Telegram API error {}: {}", status, body);
        }

        info!(chat_id = %self.chat_id, "Telegram message sent");
        Ok(())
    }
}

/// Pick the Telegram notifier when configured, otherwise the null one
pub fn notifier_from_env() -> Arc<dyn Notifier> {
    match TelegramNotifier::from_env() {
        Some(telegram) => {
            info!("Telegram notifications enabled");
            Arc::new(telegram)
        }
        None => Arc::new(NullNotifier),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_null_notifier_accepts_everything() {
        assert!(NullNotifier.send("hello").await.is_ok());
    }

    #[test]
    fn test_endpoint_and_payload() {
        let notifier = TelegramNotifier::new("123:abc", "-10042");
        assert_eq!(
            notifier.endpoint(),
            "https://api.telegram.org/bot123:abc/sendMessage"
        );

        let payload = SendMessage {
            chat_id: "-10042",
            text: "*LONG*",
            parse_mode: "Markdown",
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["chat_id"], "-10042");
        assert_eq!(json["parse_mode"], "Markdown");
    }
}
