//! Notification boundary: the scheduler hands each tick's new entries to a
//! [`NotificationDispatcher`]; formatting and delivery live behind it.

pub mod telegram;

use async_trait::async_trait;
use chrono::{FixedOffset, Offset, Utc};
use std::time::Duration;

use crate::error::DispatchError;
use crate::ingest::FeedEntry;

pub use telegram::TelegramDispatcher;

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// Deliver `entries` in order. Retries, if any, happen in here.
    async fn dispatch(&self, entries: &[FeedEntry]) -> Result<(), DispatchError>;

    /// Time on top of the base dispatch timeout that a batch of `entries`
    /// legitimately needs (pacing, rate-limit waits). Default none.
    fn delivery_budget(&self, _entries: usize) -> Duration {
        Duration::ZERO
    }

    /// Called after every completed tick; default no-op.
    async fn tick_finished(&self, _new_items: usize) -> Result<(), DispatchError> {
        Ok(())
    }

    fn name(&self) -> &'static str;
}

/// Fixed offset for rendering dates; out-of-range hours fall back to UTC.
pub fn display_offset(hours: i32) -> FixedOffset {
    FixedOffset::east_opt(hours * 3600).unwrap_or_else(|| Utc.fix())
}

/// Telegram-HTML message for one entry: title, publish date, source, link.
pub fn render_entry(entry: &FeedEntry, offset: FixedOffset) -> String {
    let date = entry
        .published_at
        .map(|ts| ts.with_timezone(&offset).format("%d/%m/%Y %H:%M").to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let mut msg = format!(
        "📰 <b>{}</b>\n\n📅 <b>Published:</b> {}\n",
        html_escape::encode_text(&entry.title),
        date
    );
    if !entry.source.is_empty() {
        msg.push_str(&format!(
            "🌐 <b>Source:</b> {}\n",
            html_escape::encode_text(&entry.source)
        ));
    }
    msg.push_str(&format!(
        "🔗 <a href=\"{}\">Read the article</a>",
        html_escape::encode_double_quoted_attribute(&entry.link)
    ));
    msg
}

/// Dry-run dispatcher: logs entries instead of sending them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn dispatch(&self, entries: &[FeedEntry]) -> Result<(), DispatchError> {
        for e in entries {
            tracing::info!(
                target: "notify",
                id = %e.id,
                title = %e.title,
                source = %e.source,
                link = %e.link,
                "new entry (log only)"
            );
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
