// src/ingest/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::relevance::KeywordSet;

/// One news item as parsed from the feed. Immutable once built; only `id`
/// outlives the tick (in the seen registry).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedEntry {
    pub id: String,
    pub title: String,
    pub source: String, // publisher, "" when absent
    pub published_at: Option<DateTime<Utc>>,
    pub link: String,
}

/// How the dedup key of an entry is derived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdStrategy {
    /// `<guid>` when present, otherwise the canonical link.
    #[default]
    Link,
    /// Hash of normalized title + source; survives republishing under a new URL.
    Content,
}

impl IdStrategy {
    pub fn derive(self, guid: Option<&str>, link: &str, title: &str, source: &str) -> String {
        match self {
            IdStrategy::Link => match guid.map(str::trim).filter(|g| !g.is_empty()) {
                Some(g) => g.to_string(),
                None => canonical_link(link),
            },
            IdStrategy::Content => content_hash(title, source),
        }
    }
}

/// Trim and drop the `#fragment`; fragments never change the article.
pub fn canonical_link(link: &str) -> String {
    let t = link.trim();
    match t.split_once('#') {
        Some((base, _)) => base.to_string(),
        None => t.to_string(),
    }
}

pub fn content_hash(title: &str, source: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(title.trim().to_lowercase().as_bytes());
    hasher.update([0x1f]);
    hasher.update(source.trim().to_lowercase().as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(7 + 32);
    out.push_str("sha256:");
    for b in digest.iter().take(16) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Anything that yields the current feed snapshot. `keywords` is the tick's
/// snapshot; sources with a fixed query may ignore it. The look-back window
/// is fixed at construction.
#[async_trait::async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, keywords: &KeywordSet) -> Result<Vec<FeedEntry>, FetchError>;
    fn name(&self) -> &'static str;
}
