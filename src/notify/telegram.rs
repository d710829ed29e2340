use async_trait::async_trait;
use chrono::FixedOffset;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{display_offset, render_entry, NotificationDispatcher};
use crate::config::TelegramConfig;
use crate::error::DispatchError;
use crate::ingest::FeedEntry;

/// Longest `retry_after` we are willing to sleep inside one attempt.
const MAX_RETRY_AFTER_SECS: u64 = 60;

/// Telegram Bot API dispatcher: one `sendMessage` per entry, in feed order.
#[derive(Clone)]
pub struct TelegramDispatcher {
    client: Client,
    endpoint: String,
    chat_id: String,
    offset: FixedOffset,
    send_delay: Duration,
    request_timeout: Duration,
    max_retries: u8,
    tick_summary: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ApiReply {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ReplyParameters>,
}

#[derive(Debug, Default, Deserialize)]
struct ReplyParameters {
    retry_after: Option<u64>,
}

impl TelegramDispatcher {
    pub fn new(cfg: &TelegramConfig) -> anyhow::Result<Self> {
        let token = cfg
            .bot_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("telegram bot token missing"))?;
        let chat_id = cfg
            .chat_id
            .clone()
            .ok_or_else(|| anyhow::anyhow!("telegram chat id missing"))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/bot{}/sendMessage",
                cfg.api_base.trim_end_matches('/'),
                token.trim()
            ),
            chat_id,
            offset: display_offset(cfg.utc_offset_hours),
            send_delay: Duration::from_millis(cfg.send_delay_ms),
            request_timeout: Duration::from_secs(cfg.timeout_secs),
            max_retries: cfg.max_retries.max(1),
            tick_summary: cfg.tick_summary,
        })
    }

    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = delay;
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    async fn send_text(&self, text: &str) -> Result<(), DispatchError> {
        let payload = json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let backoff = Duration::from_millis(500u64 << (attempt - 1).min(6));
            let res = self.client.post(&self.endpoint).json(&payload).send().await;

            match res {
                Ok(rsp) if rsp.status().is_success() => return Ok(()),
                Ok(rsp) => {
                    let status = rsp.status().as_u16();
                    let reply: ApiReply = rsp.json().await.unwrap_or_default();
                    let transient = status == 429 || status >= 500;
                    if transient && attempt < self.max_retries {
                        let wait = reply
                            .parameters
                            .and_then(|p| p.retry_after)
                            .map(|s| Duration::from_secs(s.min(MAX_RETRY_AFTER_SECS)))
                            .unwrap_or(backoff);
                        tracing::debug!(target: "notify", status, attempt, ?wait, "telegram retry");
                        tokio::time::sleep(wait).await;
                        continue;
                    }
                    return Err(DispatchError::Api {
                        status,
                        description: reply.description.unwrap_or_default(),
                    });
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    // the request URL embeds the bot token
                    return Err(DispatchError::Http(e.without_url()));
                }
            }
        }
    }
}

#[async_trait]
impl NotificationDispatcher for TelegramDispatcher {
    async fn dispatch(&self, entries: &[FeedEntry]) -> Result<(), DispatchError> {
        let total = entries.len();
        let mut failed = 0usize;
        for (i, entry) in entries.iter().enumerate() {
            if i > 0 && !self.send_delay.is_zero() {
                tokio::time::sleep(self.send_delay).await;
            }
            if let Err(e) = self.send_text(&render_entry(entry, self.offset)).await {
                failed += 1;
                tracing::warn!(target: "notify", id = %entry.id, "telegram send failed: {e}");
            }
        }
        if failed > 0 {
            return Err(DispatchError::Partial { failed, total });
        }
        Ok(())
    }

    /// Worst case per message: the pause before it, then every attempt
    /// timing out or waiting out the longest `retry_after`.
    fn delivery_budget(&self, entries: usize) -> Duration {
        let per_attempt = self.request_timeout + Duration::from_secs(MAX_RETRY_AFTER_SECS);
        let per_message = self.send_delay + per_attempt * u32::from(self.max_retries);
        per_message.saturating_mul(u32::try_from(entries).unwrap_or(u32::MAX))
    }

    async fn tick_finished(&self, new_items: usize) -> Result<(), DispatchError> {
        if !self.tick_summary {
            return Ok(());
        }
        self.send_text(&format!("<i>Check finished: {new_items} new item(s).</i>"))
            .await
    }

    fn name(&self) -> &'static str {
        "telegram"
    }
}
