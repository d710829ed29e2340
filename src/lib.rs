// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod notify;
pub mod relevance;
pub mod scheduler;
pub mod seen;
pub mod status;

// ---- Re-exports for stable public API ----
pub use crate::error::{ConfigError, DispatchError, FetchError};
pub use crate::ingest::{FeedEntry, FeedSource};
pub use crate::notify::NotificationDispatcher;
pub use crate::relevance::{KeywordSet, KeywordStore};
pub use crate::scheduler::{CoreHandle, PollResult, PollingScheduler, TickOutcome};
pub use crate::seen::SeenItemStore;
pub use crate::status::{CoreStatus, SchedulerState};

use std::sync::Arc;
use tracing::info;

use crate::config::AppConfig;
use crate::ingest::GoogleNewsFetcher;
use crate::notify::{LogDispatcher, TelegramDispatcher};
use crate::scheduler::SchedulerSettings;

/// Wire fetcher, dispatcher, keyword store and seen registry from a
/// validated config. Fails only on startup problems.
pub fn build_scheduler(cfg: &AppConfig) -> anyhow::Result<PollingScheduler> {
    let keywords = cfg.initial_keywords()?;

    let fetcher = GoogleNewsFetcher::new(&cfg.feed)?;
    info!(
        target: "ingest",
        terms = %fetcher.query_for(&keywords).terms,
        follows_keywords = cfg.feed.query.as_deref().map_or(true, |q| q.trim().is_empty()),
        "feed query ready"
    );

    let dispatcher: Arc<dyn NotificationDispatcher> = if cfg.telegram.enabled() {
        Arc::new(TelegramDispatcher::new(&cfg.telegram)?)
    } else {
        tracing::warn!("no BOT_TOKEN configured; notifications are only logged");
        Arc::new(LogDispatcher)
    };

    let mut store = KeywordStore::new(keywords);
    if let Some(p) = &cfg.keywords.path {
        store = store.with_path(p);
    }

    let seen = match &cfg.seen.state_path {
        Some(p) => SeenItemStore::load(p, cfg.seen.retention(), cfg.seen.max_entries),
        None => SeenItemStore::new(cfg.seen.retention(), cfg.seen.max_entries),
    };

    Ok(PollingScheduler::new(
        Box::new(fetcher),
        dispatcher,
        store,
        seen,
        SchedulerSettings::from_config(cfg),
    ))
}
