//! Telegram channel — long-polling over the raw Bot API via reqwest.
//!
//! Inbound messages from allowed senders go onto the bus; outbound chat
//! messages are delivered as `sendMessage` (chunked to the 4096-char limit)
//! or `sendPhoto` multipart uploads when a message carries media. Transient
//! poll errors back off exponentially; 401/403 are unrecoverable and stop
//! the channel with a system notification.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use crate::bus::{InboundMessage, OutboundMessage, OutboundMessageType};
use crate::channels::{Channel, RetryPolicy, RetryState};
use crate::config::TelegramConfig;

const API_BASE: &str = "https://api.telegram.org/bot";
/// Telegram caps message text at 4096 chars; stay a little under.
const CHUNK_CHARS: usize = 4000;

#[derive(Debug, Deserialize)]
struct TgResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct TgUpdate {
    update_id: i64,
    message: Option<TgMessage>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    from: Option<TgUser>,
    chat: TgChat,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgUser {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: i64,
}

/// 401/403 mean bad credentials; retrying cannot help.
fn is_unrecoverable_status(status: u16) -> bool {
    matches!(status, 401 | 403)
}

/// Split text into Telegram-sized chunks on char boundaries.
fn chunk_text(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if current.chars().count() >= CHUNK_CHARS {
            chunks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[derive(Debug)]
enum TelegramPollError {
    Transient(String),
    Unrecoverable(String),
}

impl std::fmt::Display for TelegramPollError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient(msg) => write!(f, "transient: {msg}"),
            Self::Unrecoverable(msg) => write!(f, "unrecoverable: {msg}"),
        }
    }
}

/// Sending half of the channel, shared between the outbound dispatcher task
/// and direct `Channel::send_*` calls.
#[derive(Clone)]
struct TelegramSender {
    client: reqwest::Client,
    token: String,
}

impl TelegramSender {
    fn api_url(&self, method: &str) -> String {
        format!("{}{}/{}", API_BASE, self.token, method)
    }

    async fn send_text(&self, chat_id: &str, text: &str) -> Result<()> {
        for chunk in chunk_text(text) {
            let response = self
                .client
                .post(self.api_url("sendMessage"))
                .json(&serde_json::json!({
                    "chat_id": chat_id,
                    "text": chunk,
                }))
                .send()
                .await
                .context("sendMessage request failed")?;
            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("sendMessage failed: HTTP {status}: {body}");
            }
        }
        Ok(())
    }

    async fn send_photo(&self, chat_id: &str, path: &Path, caption: &str) -> Result<()> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading image {}", path.display()))?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("photo.png")
            .to_string();
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename)
            .mime_str("image/png")?;
        let mut form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .part("photo", part);
        if !caption.is_empty() {
            form = form.text("caption", caption.to_string());
        }
        let response = self
            .client
            .post(self.api_url("sendPhoto"))
            .multipart(form)
            .send()
            .await
            .context("sendPhoto request failed")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("sendPhoto failed: HTTP {status}: {body}");
        }
        Ok(())
    }

    /// Route one outbound bus message to the chat.
    async fn deliver(&self, msg: &OutboundMessage, show_tool_calls: bool) -> Result<()> {
        match &msg.message_type {
            OutboundMessageType::Chat { content, media } => {
                if media.is_empty() {
                    self.send_text(&msg.chat_id, content).await?;
                } else {
                    // First image carries the text as its caption.
                    for (i, m) in media.iter().enumerate() {
                        let caption = if i == 0 { content.as_str() } else { "" };
                        self.send_photo(&msg.chat_id, Path::new(m), caption).await?;
                    }
                }
            }
            OutboundMessageType::ToolProgress {
                tool_name,
                status,
                result_preview,
            } => {
                if show_tool_calls {
                    self.send_text(
                        &msg.chat_id,
                        &format!("[{}] {} — {}", tool_name, status, result_preview),
                    )
                    .await?;
                }
            }
        }
        Ok(())
    }
}

pub struct TelegramChannel {
    config: TelegramConfig,
    inbound_tx: mpsc::Sender<InboundMessage>,
    outbound_rx: Option<broadcast::Receiver<OutboundMessage>>,
    sender: TelegramSender,
    running: bool,
}

impl TelegramChannel {
    pub fn new(
        config: TelegramConfig,
        inbound_tx: mpsc::Sender<InboundMessage>,
        outbound_rx: broadcast::Receiver<OutboundMessage>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .expect("failed to build HTTP client");
        let sender = TelegramSender {
            client,
            token: config.token.clone(),
        };
        Self {
            config,
            inbound_tx,
            outbound_rx: Some(outbound_rx),
            sender,
            running: false,
        }
    }

    async fn poll_updates(&self, offset: i64) -> Result<Vec<TgUpdate>, TelegramPollError> {
        let response = self
            .sender
            .client
            .get(self.sender.api_url("getUpdates"))
            .query(&[("offset", offset), ("timeout", 30)])
            .send()
            .await
            .map_err(|e| TelegramPollError::Transient(format!("HTTP request failed: {e:#}")))?;

        let status = response.status();
        if is_unrecoverable_status(status.as_u16()) {
            let body = response.text().await.unwrap_or_default();
            return Err(TelegramPollError::Unrecoverable(format!(
                "HTTP {status}: {body}"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TelegramPollError::Transient(format!("HTTP {status}: {body}")));
        }

        let resp: TgResponse<Vec<TgUpdate>> = response
            .json()
            .await
            .map_err(|e| TelegramPollError::Transient(format!("JSON parse error: {e:#}")))?;
        if !resp.ok {
            let code = resp.error_code.unwrap_or(0);
            let desc = resp.description.unwrap_or_default();
            if is_unrecoverable_status(code) {
                return Err(TelegramPollError::Unrecoverable(format!(
                    "Telegram API error {code}: {desc}"
                )));
            }
            return Err(TelegramPollError::Transient(format!(
                "Telegram API error {code}: {desc}"
            )));
        }
        Ok(resp.result.unwrap_or_default())
    }

    /// Tell the agent the channel died so the owner can react.
    async fn notify_system_error(&self, error_msg: &str) {
        let notification = InboundMessage {
            channel: "system".into(),
            sender_id: "telegram".into(),
            chat_id: "system".into(),
            content: format!("[Telegram] Unrecoverable error: {error_msg}"),
            timestamp: chrono::Utc::now(),
            metadata: serde_json::json!({
                "error_kind": "unrecoverable",
                "source_channel": "telegram",
            }),
        };
        if let Err(e) = self.inbound_tx.send(notification).await {
            error!("Failed to send system notification for Telegram error: {e}");
        }
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&mut self) -> Result<()> {
        info!("Telegram channel starting (long-polling)");
        self.running = true;
        let mut offset: i64 = 0;

        let retry_policy = RetryPolicy::default();
        let mut retry_state = RetryState::new();

        // Outbound dispatcher. Scheduled runs reply on channel "scheduler"
        // with the owner chat as their chat id; deliver those here too.
        let mut outbound_rx = self.outbound_rx.take().expect("channel already started");
        let sender = self.sender.clone();
        let show_tool_calls = self.config.show_tool_calls;
        tokio::spawn(async move {
            while let Ok(msg) = outbound_rx.recv().await {
                if msg.channel != "telegram" && msg.channel != "scheduler" {
                    continue;
                }
                if msg.chat_id.is_empty() {
                    continue;
                }
                if let Err(e) = sender.deliver(&msg, show_tool_calls).await {
                    warn!(chat_id = %msg.chat_id, error = %e, "Outbound delivery failed");
                }
            }
        });

        while self.running {
            match self.poll_updates(offset).await {
                Ok(updates) => {
                    if retry_state.attempts > 0 {
                        retry_state.reset();
                    }
                    for u in updates {
                        offset = u.update_id + 1;
                        let Some(m) = u.message else { continue };
                        let sender_id = m.from.map(|u| u.id.to_string()).unwrap_or_default();
                        if !self.is_allowed(&sender_id, &self.config.allow_from) {
                            warn!(sender = %sender_id, "Access denied");
                            continue;
                        }
                        if let Some(text) = m.text {
                            let _ = self
                                .inbound_tx
                                .send(InboundMessage {
                                    channel: "telegram".into(),
                                    sender_id,
                                    chat_id: m.chat.id.to_string(),
                                    content: text,
                                    timestamp: chrono::Utc::now(),
                                    metadata: serde_json::Value::Null,
                                })
                                .await;
                        }
                    }
                }
                Err(TelegramPollError::Unrecoverable(msg)) => {
                    error!(error = %msg, "Telegram unrecoverable error, stopping channel");
                    self.notify_system_error(&msg).await;
                    self.running = false;
                    return Err(anyhow::anyhow!(
                        "Telegram channel stopped: unrecoverable error: {msg}"
                    ));
                }
                Err(TelegramPollError::Transient(msg)) => {
                    if retry_state.record_failure(&retry_policy, msg.clone()) {
                        let delay = retry_state.next_delay(&retry_policy);
                        warn!(
                            error = %msg,
                            attempt = retry_state.attempts,
                            delay_ms = delay.as_millis() as u64,
                            "Telegram poll error, retrying after backoff"
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        let cooldown = retry_policy.max_delay;
                        warn!(
                            cooldown_secs = cooldown.as_secs(),
                            "Telegram retries exhausted, cooling down before reconnect"
                        );
                        tokio::time::sleep(cooldown).await;
                        retry_state.reset();
                    }
                }
            }
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.running = false;
        Ok(())
    }

    async fn send_text(&self, chat_id: &str, text: &str) -> Result<()> {
        self.sender.send_text(chat_id, text).await
    }

    async fn send_image(&self, chat_id: &str, path: &Path, caption: &str) -> Result<()> {
        self.sender.send_photo(chat_id, path, caption).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(chunk_text("hello"), vec!["hello"]);
        assert!(chunk_text("").is_empty());
    }

    #[test]
    fn long_text_splits_on_char_boundaries() {
        // Multibyte chars near the boundary must not split mid-char.
        let text = "щ".repeat(CHUNK_CHARS + 10);
        let chunks = chunk_text(&text);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), CHUNK_CHARS);
        assert_eq!(chunks[1].chars().count(), 10);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn auth_failures_are_unrecoverable() {
        assert!(is_unrecoverable_status(401));
        assert!(is_unrecoverable_status(403));
        assert!(!is_unrecoverable_status(429));
        assert!(!is_unrecoverable_status(500));
    }
}
