//! Read-side view of the polling core for the command surface.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    #[default]
    Idle,
    Fetching,
    Filtering,
    Dispatching,
    Backoff,
    Stopped,
}

/// Consistent snapshot of the core. `error` reflects the most recent tick;
/// `last_error` keeps the last failure message until replaced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CoreStatus {
    pub alive: bool,
    pub monitoring: bool,
    pub state: SchedulerState,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub error: bool,
    pub consecutive_failures: u32,
    pub ticks_total: u64,
    pub seen_count: usize,
    pub last_dispatched: usize,
    pub keyword_count: usize,
}

/// Shared status cell. Writers mutate under the write lock, readers clone
/// under the read lock, so nobody observes a half-updated struct.
#[derive(Debug, Clone, Default)]
pub struct StatusHandle {
    inner: Arc<RwLock<CoreStatus>>,
}

impl StatusHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CoreStatus {
        match self.inner.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update<F: FnOnce(&mut CoreStatus)>(&self, f: F) {
        let mut guard = match self.inner.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard);
    }
}
