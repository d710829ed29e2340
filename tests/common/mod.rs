// tests/common/mod.rs
// Scripted feed + recording dispatcher shared by the scheduler/API tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use faro_fino::error::{DispatchError, FetchError};
use faro_fino::ingest::{FeedEntry, FeedSource};
use faro_fino::notify::NotificationDispatcher;
use faro_fino::relevance::{KeywordSet, KeywordStore};
use faro_fino::scheduler::{PollingScheduler, SchedulerSettings};
use faro_fino::seen::SeenItemStore;

pub fn entry(id: &str, title: &str) -> FeedEntry {
    FeedEntry {
        id: id.to_string(),
        title: title.to_string(),
        source: String::new(),
        published_at: None,
        link: format!("https://news.example.com/{id}"),
    }
}

pub enum Step {
    Entries(Vec<FeedEntry>),
    Fail { retryable: bool },
}

/// Plays back one step per fetch; an exhausted script yields an empty feed.
#[derive(Clone, Default)]
pub struct ScriptedFeed {
    steps: Arc<Mutex<VecDeque<Step>>>,
    calls: Arc<Mutex<usize>>,
    keywords_seen: Arc<Mutex<Vec<Vec<String>>>>,
}

impl ScriptedFeed {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Arc::new(Mutex::new(steps.into())),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    /// Keyword snapshot handed to each fetch, in call order.
    pub fn keywords_seen(&self) -> Vec<Vec<String>> {
        self.keywords_seen.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl FeedSource for ScriptedFeed {
    async fn fetch(&self, keywords: &KeywordSet) -> Result<Vec<FeedEntry>, FetchError> {
        *self.calls.lock().unwrap() += 1;
        self.keywords_seen.lock().unwrap().push(keywords.to_vec());
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Entries(v)) => Ok(v),
            Some(Step::Fail { retryable: true }) => Err(FetchError::Status(503)),
            Some(Step::Fail { retryable: false }) => Err(FetchError::Status(404)),
            None => Ok(Vec::new()),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Records the ids of every dispatch call; can be told to fail, stall, or
/// pace itself per entry like a rate-limited chat API.
#[derive(Default)]
pub struct RecordingDispatcher {
    pub calls: Mutex<Vec<Vec<String>>>,
    pub fail: bool,
    pub stall: Option<Duration>,
    pub per_entry: Option<Duration>,
}

impl RecordingDispatcher {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn stalling(d: Duration) -> Self {
        Self {
            stall: Some(d),
            ..Default::default()
        }
    }

    pub fn paced(d: Duration) -> Self {
        Self {
            per_entry: Some(d),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn all_ids(&self) -> Vec<String> {
        self.calls().into_iter().flatten().collect()
    }
}

#[async_trait::async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn dispatch(&self, entries: &[FeedEntry]) -> Result<(), DispatchError> {
        self.calls
            .lock()
            .unwrap()
            .push(entries.iter().map(|e| e.id.clone()).collect());
        if let Some(d) = self.stall {
            tokio::time::sleep(d).await;
        }
        if let Some(d) = self.per_entry {
            for _ in entries {
                tokio::time::sleep(d).await;
            }
        }
        if self.fail {
            return Err(DispatchError::Api {
                status: 400,
                description: "Bad Request: chat not found".into(),
            });
        }
        Ok(())
    }

    fn delivery_budget(&self, entries: usize) -> Duration {
        self.per_entry
            .map_or(Duration::ZERO, |d| d * u32::try_from(entries).unwrap_or(u32::MAX))
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

pub fn settings() -> SchedulerSettings {
    SchedulerSettings {
        interval: Duration::from_secs(300),
        backoff_base: Duration::from_secs(30),
        backoff_max: Duration::from_secs(900),
        dispatch_timeout: Duration::from_secs(60),
        seen_path: None,
        start_enabled: true,
    }
}

pub fn scheduler(
    feed: ScriptedFeed,
    dispatcher: Arc<RecordingDispatcher>,
    keywords: &[&str],
    settings: SchedulerSettings,
) -> PollingScheduler {
    PollingScheduler::new(
        Box::new(feed),
        dispatcher,
        KeywordStore::new(KeywordSet::from_iter(keywords.iter())),
        SeenItemStore::new(chrono::Duration::hours(96), 10_000),
        settings,
    )
}
