//! Polling loop: fetch → keyword filter → dedup → dispatch, one tick at a time.
//!
//! Ticks never overlap. Every entry that passes both filters is marked seen
//! before dispatch, so a failed or interrupted delivery can lose a
//! notification but never repeat one.

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::MissedTickBehavior;

use crate::config::AppConfig;
use crate::error::DispatchError;
use crate::ingest::{FeedEntry, FeedSource};
use crate::notify::NotificationDispatcher;
use crate::relevance::{self, KeywordStore};
use crate::seen::SeenItemStore;
use crate::status::{CoreStatus, SchedulerState, StatusHandle};

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub interval: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub dispatch_timeout: Duration,
    pub seen_path: Option<PathBuf>,
    pub start_enabled: bool,
}

impl SchedulerSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            interval: cfg.poll.interval(),
            backoff_base: cfg.poll.backoff_base(),
            backoff_max: cfg.poll.backoff_max(),
            dispatch_timeout: cfg.poll.dispatch_timeout(),
            seen_path: cfg.seen.state_path.clone(),
            start_enabled: cfg.poll.start_enabled,
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Capped exponential delay: `base * 2^(n-1)` for the n-th consecutive failure.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            failures: 0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let factor = 1u32 << (self.failures - 1).min(16);
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

/// New, relevant entries of one tick in feed order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollResult {
    pub entries: Vec<FeedEntry>,
}

impl PollResult {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.id.as_str()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Completed {
        fetched: usize,
        matched: usize,
        new: usize,
        dispatch_ok: bool,
    },
    FetchFailed {
        retryable: bool,
    },
}

#[derive(Debug, Clone)]
pub struct TickReport {
    pub result: PollResult,
    pub outcome: TickOutcome,
}

/// Runtime switches shared with the command side.
#[derive(Debug)]
pub struct Control {
    check_now: Notify,
    monitoring: AtomicBool,
}

impl Control {
    fn new(enabled: bool) -> Self {
        Self {
            check_now: Notify::new(),
            monitoring: AtomicBool::new(enabled),
        }
    }
}

/// Thread-safe accessors for the command surface.
#[derive(Clone)]
pub struct CoreHandle {
    status: StatusHandle,
    keywords: KeywordStore,
    control: Arc<Control>,
}

impl CoreHandle {
    pub fn status(&self) -> CoreStatus {
        let mut s = self.status.snapshot();
        s.monitoring = self.monitoring();
        s.keyword_count = self.keywords.len();
        s
    }

    pub fn list_keywords(&self) -> Vec<String> {
        self.keywords.list()
    }

    pub fn set_keywords<S: AsRef<str>>(&self, items: &[S]) -> anyhow::Result<Vec<String>> {
        self.keywords.set(items)
    }

    pub fn add_keywords<S: AsRef<str>>(&self, items: &[S]) -> anyhow::Result<(usize, Vec<String>)> {
        self.keywords.add(items)
    }

    pub fn remove_keywords<S: AsRef<str>>(&self, items: &[S]) -> anyhow::Result<(usize, Vec<String>)> {
        self.keywords.remove(items)
    }

    /// Ask the loop for an immediate tick; coalesces with a pending request.
    pub fn request_check(&self) {
        self.control.check_now.notify_one();
    }

    pub fn monitoring(&self) -> bool {
        self.control.monitoring.load(Ordering::Relaxed)
    }

    pub fn set_monitoring(&self, enabled: bool) {
        self.control.monitoring.store(enabled, Ordering::Relaxed);
        tracing::info!(target: "scheduler", enabled, "monitoring switched");
    }
}

pub struct PollingScheduler {
    source: Box<dyn FeedSource>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    keywords: KeywordStore,
    seen: SeenItemStore,
    status: StatusHandle,
    control: Arc<Control>,
    backoff: Backoff,
    settings: SchedulerSettings,
}

impl PollingScheduler {
    pub fn new(
        source: Box<dyn FeedSource>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        keywords: KeywordStore,
        seen: SeenItemStore,
        settings: SchedulerSettings,
    ) -> Self {
        let status = StatusHandle::new();
        status.update(|s| s.seen_count = seen.len());
        Self {
            source,
            dispatcher,
            keywords,
            seen,
            status,
            control: Arc::new(Control::new(settings.start_enabled)),
            backoff: Backoff::new(settings.backoff_base, settings.backoff_max),
            settings,
        }
    }

    pub fn handle(&self) -> CoreHandle {
        CoreHandle {
            status: self.status.clone(),
            keywords: self.keywords.clone(),
            control: self.control.clone(),
        }
    }

    pub fn seen(&self) -> &SeenItemStore {
        &self.seen
    }

    pub async fn tick(&mut self) -> TickReport {
        self.tick_at(Utc::now()).await
    }

    /// One full cycle with `now` as the marking/eviction clock.
    pub async fn tick_at(&mut self, now: DateTime<Utc>) -> TickReport {
        let keywords = self.keywords.snapshot();
        self.status.update(|s| {
            s.ticks_total += 1;
            s.state = SchedulerState::Fetching;
        });
        counter!("feed_fetch_total").increment(1);
        gauge!("scheduler_last_tick_ts").set(now.timestamp() as f64);
        let evicted = self.evict(now);

        let fetched = match self.source.fetch(&keywords).await {
            Ok(v) => v,
            Err(e) => {
                let retryable = e.retryable();
                counter!("feed_fetch_errors_total").increment(1);
                tracing::warn!(
                    target: "scheduler",
                    source = self.source.name(),
                    retryable,
                    "fetch failed: {e}"
                );
                let msg = e.to_string();
                self.status.update(|s| {
                    s.state = SchedulerState::Idle;
                    s.error = true;
                    s.last_error = Some(msg);
                    s.last_error_at = Some(now);
                    s.consecutive_failures += 1;
                    s.last_dispatched = 0;
                });
                return TickReport {
                    result: PollResult::default(),
                    outcome: TickOutcome::FetchFailed { retryable },
                };
            }
        };
        self.backoff.reset();

        self.status.update(|s| s.state = SchedulerState::Filtering);
        let fetched_n = fetched.len();
        let mut matched = 0usize;
        let mut dedup = 0usize;
        let mut entries = Vec::new();
        for entry in fetched {
            if !relevance::matches(&entry, &keywords) {
                continue;
            }
            matched += 1;
            if !self.seen.is_new(&entry.id) {
                dedup += 1;
                continue;
            }
            self.seen.mark_seen(&entry.id, now);
            entries.push(entry);
        }
        self.persist_seen();

        counter!("feed_matched_total").increment(matched as u64);
        counter!("feed_dedup_total").increment(dedup as u64);
        gauge!("seen_registry_size").set(self.seen.len() as f64);
        tracing::info!(
            target: "scheduler",
            fetched = fetched_n,
            matched,
            dedup,
            new = entries.len(),
            evicted,
            keywords = keywords.len(),
            "tick filtered"
        );

        let seen_count = self.seen.len();
        let new_n = entries.len();
        self.status.update(|s| {
            s.state = SchedulerState::Dispatching;
            s.last_success_at = Some(now);
            s.error = false;
            s.consecutive_failures = 0;
            s.seen_count = seen_count;
            s.last_dispatched = new_n;
        });

        let dispatch_ok = match self.dispatch(&entries).await {
            Ok(()) => true,
            Err(e) => {
                counter!("notify_errors_total").increment(1);
                tracing::warn!(target: "scheduler", dispatcher = self.dispatcher.name(), "dispatch failed: {e}");
                let msg = e.to_string();
                self.status.update(|s| {
                    s.error = true;
                    s.last_error = Some(msg);
                    s.last_error_at = Some(now);
                });
                false
            }
        };
        self.status.update(|s| s.state = SchedulerState::Idle);

        TickReport {
            result: PollResult { entries },
            outcome: TickOutcome::Completed {
                fetched: fetched_n,
                matched,
                new: new_n,
                dispatch_ok,
            },
        }
    }

    /// Horizon eviction; runs on every tick, fetched or not.
    fn evict(&mut self, now: DateTime<Utc>) -> usize {
        let evicted = self.seen.evict_expired(now);
        if evicted > 0 {
            let seen_count = self.seen.len();
            self.status.update(|s| s.seen_count = seen_count);
            gauge!("seen_registry_size").set(seen_count as f64);
            self.persist_seen();
        }
        evicted
    }

    /// Base timeout plus whatever the dispatcher needs for this many entries.
    pub fn dispatch_limit(&self, entries: usize) -> Duration {
        self.settings
            .dispatch_timeout
            .saturating_add(self.dispatcher.delivery_budget(entries))
    }

    async fn dispatch(&self, entries: &[FeedEntry]) -> Result<(), DispatchError> {
        let limit = self.dispatch_limit(entries.len());
        if !entries.is_empty() {
            match tokio::time::timeout(limit, self.dispatcher.dispatch(entries)).await {
                Ok(Ok(())) => {
                    counter!("notify_dispatched_total").increment(entries.len() as u64);
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(DispatchError::Timeout(limit)),
            }
        }
        let summary_limit = self.settings.dispatch_timeout;
        match tokio::time::timeout(summary_limit, self.dispatcher.tick_finished(entries.len())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(target: "scheduler", "tick summary not sent: {e}"),
            Err(_) => tracing::debug!(target: "scheduler", "tick summary timed out"),
        }
        Ok(())
    }

    fn persist_seen(&self) {
        if let Some(path) = &self.settings.seen_path {
            if let Err(e) = self.seen.save(path) {
                tracing::warn!(target: "scheduler", "seen snapshot not saved: {e:#}");
            }
        }
    }

    fn set_state(&self, state: SchedulerState) {
        self.status.update(|s| s.state = state);
    }

    /// Run until `shutdown` changes (or its sender is dropped).
    ///
    /// The first tick fires immediately. Retryable fetch failures sleep for
    /// the backoff delay, then wait for the next regular tick.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let control = self.control.clone();
        self.status.update(|s| s.alive = true);
        tracing::info!(
            target: "scheduler",
            interval = ?self.settings.interval,
            source = self.source.name(),
            dispatcher = self.dispatcher.name(),
            "polling loop started"
        );

        loop {
            self.set_state(SchedulerState::Idle);
            let manual = tokio::select! {
                _ = ticker.tick() => false,
                _ = control.check_now.notified() => true,
                _ = shutdown.changed() => break,
            };
            if !manual && !control.monitoring.load(Ordering::Relaxed) {
                tracing::debug!(target: "scheduler", "monitoring off; tick skipped");
                self.evict(Utc::now());
                continue;
            }

            let report = tokio::select! {
                r = self.tick() => r,
                _ = shutdown.changed() => break,
            };

            if let TickOutcome::FetchFailed { retryable: true } = report.outcome {
                let delay = self.backoff.next_delay();
                self.set_state(SchedulerState::Backoff);
                tracing::warn!(
                    target: "scheduler",
                    ?delay,
                    failures = self.backoff.failures(),
                    "backing off"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => break,
                }
                ticker.reset();
            }
        }

        self.status.update(|s| {
            s.alive = false;
            s.state = SchedulerState::Stopped;
        });
        tracing::info!(target: "scheduler", "polling loop stopped");
    }
}
