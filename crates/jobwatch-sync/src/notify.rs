//! Outbound notification sinks.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::TelegramConfig;

/// Telegram's hard cap on a single message, in characters.
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("notification rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers one HTML-formatted message. Long messages may be split by the sink.
    async fn send(&self, text: &str) -> Result<(), NotifyError>;
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

pub struct TelegramNotifier {
    client: reqwest::Client,
    endpoint: String,
    chat_id: String,
    chunk_pause: Duration,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("https://api.telegram.org/bot{}/sendMessage", config.token),
            chat_id: config.chat_id.clone(),
            chunk_pause: Duration::from_secs(1),
        })
    }

    async fn post(&self, text: &str) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&SendMessage {
                chat_id: &self.chat_id,
                text,
                parse_mode: "HTML",
                disable_web_page_preview: true,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        let chunks = split_message(text, TELEGRAM_MESSAGE_LIMIT);
        for (index, chunk) in chunks.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.chunk_pause).await;
            }
            self.post(chunk).await?;
            debug!(chunk = index + 1, of = chunks.len(), "telegram message sent");
        }
        Ok(())
    }
}

/// Writes messages to the log instead of a chat. Used when no chat is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        info!(target: "jobwatch::notify", message = %text, "notification");
        Ok(())
    }
}

/// Splits `text` into pieces of at most `limit` characters, cutting after a newline
/// where one is available. Concatenating the pieces yields `text` again.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let hard = match rest.char_indices().nth(limit) {
            Some((index, _)) => index,
            None => {
                chunks.push(rest.to_string());
                break;
            }
        };
        let cut = match rest[..hard].rfind('\n') {
            Some(newline) if newline > 0 => newline + 1,
            _ => hard,
        };
        chunks.push(rest[..cut].to_string());
        rest = &rest[cut..];
    }
    chunks
}
