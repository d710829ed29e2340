//! # Seen registry
//! Dedup state: `id -> first time notified`, bounded by a retention horizon.
//! The entry cap only warns; it never shortens the horizon.
//!
//! Owned by the scheduler (single writer). Eviction runs once per tick, so
//! memory tracks `feed volume × horizon / interval` rather than uptime.

use anyhow::Context;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct SeenItemStore {
    seen: HashMap<String, DateTime<Utc>>,
    retention: ChronoDuration,
    max_entries: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    saved_at: DateTime<Utc>,
    seen: HashMap<String, DateTime<Utc>>,
}

impl SeenItemStore {
    pub fn new(retention: ChronoDuration, max_entries: usize) -> Self {
        Self {
            seen: HashMap::new(),
            retention,
            max_entries: max_entries.max(1),
        }
    }

    pub fn is_new(&self, id: &str) -> bool {
        !self.seen.contains_key(id)
    }

    /// Record `id` as notified at `at`. Re-marking keeps the first timestamp,
    /// so a seen id can never expire earlier than its horizon.
    pub fn mark_seen(&mut self, id: &str, at: DateTime<Utc>) {
        self.seen.entry(id.to_string()).or_insert(at);
    }

    /// Drop ids older than the horizon. Returns how many were evicted.
    ///
    /// `max_entries` is a soft limit: live ids are never dropped to honor it,
    /// since a dropped id inside the horizon would be notified again.
    pub fn evict_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.seen.len();
        let cutoff = now - self.retention;
        self.seen.retain(|_, at| *at >= cutoff);

        if self.seen.len() > self.max_entries {
            counter!("seen_over_capacity_total").increment(1);
            tracing::warn!(
                target: "seen",
                size = self.seen.len(),
                soft_cap = self.max_entries,
                "seen registry above its soft cap; ids kept until their horizon passes"
            );
        }
        before - self.seen.len()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn retention(&self) -> ChronoDuration {
        self.retention
    }

    /// Load a snapshot written by [`save`](Self::save). A missing or corrupt
    /// file yields an empty store; expired ids are dropped on load.
    pub fn load(path: &Path, retention: ChronoDuration, max_entries: usize) -> Self {
        let mut store = Self::new(retention, max_entries);
        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<Snapshot>(&raw) {
                Ok(snap) => {
                    store.seen = snap.seen;
                    store.evict_expired(Utc::now());
                    tracing::info!(
                        target: "seen",
                        path = %path.display(),
                        count = store.len(),
                        "seen registry restored"
                    );
                }
                Err(e) => {
                    tracing::warn!(target: "seen", path = %path.display(), "ignoring corrupt seen snapshot: {e}");
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(target: "seen", path = %path.display(), "cannot read seen snapshot: {e}");
            }
        }
        store
    }

    /// Write the registry as JSON (temp file + rename, so readers never see a partial file).
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        let snap = Snapshot {
            saved_at: Utc::now(),
            seen: self.seen.clone(),
        };
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(&snap)?)
            .with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }
}
