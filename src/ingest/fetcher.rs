// src/ingest/fetcher.rs
//! Google News RSS search fetcher.
//!
//! One GET per call. The query is the configured `feed.query`, or else
//! `"k1" OR "k2" ...` over the tick's keyword snapshot. The response is parsed
//! into [`FeedEntry`] records, dropping entries outside the look-back window
//! and entries without a usable link.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::{counter, histogram};
use once_cell::sync::OnceCell;
use quick_xml::de::from_str;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use regex::{Captures, Regex};
use serde::Deserialize;
use std::borrow::Cow;
use std::time::Duration;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

use crate::config::FeedConfig;
use crate::error::FetchError;
use crate::ingest::types::{FeedEntry, FeedSource, IdStrategy};
use crate::ingest::{is_usable_link, normalize_text};
use crate::relevance::KeywordSet;

const USER_AGENT: &str = concat!("faro-fino/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<Text>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    source: Option<Text>,
}

// Elements carrying attributes (`<guid isPermaLink>`, `<source url>`); only the text matters.
#[derive(Debug, Deserialize)]
struct Text {
    #[serde(rename = "$text")]
    value: Option<String>,
}

/// Search terms plus locale parameters of the Google News endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedQuery {
    pub terms: String,
    pub language: String,
    pub region: String,
    pub ceid: String,
}

impl FeedQuery {
    pub fn new(terms: impl Into<String>, cfg: &FeedConfig) -> Self {
        Self {
            terms: terms.into(),
            language: cfg.language.clone(),
            region: cfg.region.clone(),
            ceid: cfg.ceid.clone(),
        }
    }

    /// `"k1" OR "k2" OR ...` over the given keywords.
    pub fn from_keywords(keywords: &KeywordSet, cfg: &FeedConfig) -> Self {
        let terms = keywords
            .iter()
            .map(|k| format!("\"{k}\""))
            .collect::<Vec<_>>()
            .join(" OR ");
        Self::new(terms, cfg)
    }

    pub fn url(&self, base_url: &str) -> String {
        format!(
            "{}?q={}&hl={}&gl={}&ceid={}",
            base_url,
            urlencoding::encode(&self.terms),
            urlencoding::encode(&self.language),
            urlencoding::encode(&self.region),
            urlencoding::encode(&self.ceid),
        )
    }
}

pub struct GoogleNewsFetcher {
    client: reqwest::Client,
    cfg: FeedConfig,
    /// Explicit `feed.query`; when absent the query follows the live keywords.
    fixed: Option<FeedQuery>,
    lookback: ChronoDuration,
}

impl GoogleNewsFetcher {
    pub fn new(cfg: &FeedConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .user_agent(USER_AGENT)
            .build()?;
        let fixed = cfg
            .query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(|q| FeedQuery::new(q, cfg));
        Ok(Self {
            client,
            cfg: cfg.clone(),
            fixed,
            lookback: ChronoDuration::hours(cfg.lookback_hours as i64),
        })
    }

    pub fn query_for(&self, keywords: &KeywordSet) -> FeedQuery {
        match &self.fixed {
            Some(q) => q.clone(),
            None => FeedQuery::from_keywords(keywords, &self.cfg),
        }
    }

    pub fn url_for(&self, keywords: &KeywordSet) -> String {
        self.query_for(keywords).url(&self.cfg.base_url)
    }
}

#[async_trait]
impl FeedSource for GoogleNewsFetcher {
    async fn fetch(&self, keywords: &KeywordSet) -> Result<Vec<FeedEntry>, FetchError> {
        let query = self.query_for(keywords);
        if query.terms.is_empty() {
            tracing::debug!(target: "ingest", "no search terms; fetch skipped");
            return Ok(Vec::new());
        }
        let t0 = std::time::Instant::now();
        let resp = self.client.get(query.url(&self.cfg.base_url)).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = resp.text().await?;
        let entries = parse_feed(&body, Utc::now(), self.lookback, self.cfg.id_strategy)?;

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("feed_fetch_ms").record(ms);
        counter!("feed_entries_total").increment(entries.len() as u64);
        Ok(entries)
    }

    fn name(&self) -> &'static str {
        "google-news"
    }
}

/// Parse an RSS document into entries, keeping feed order.
///
/// Each `<item>` is decoded on its own: a malformed item is skipped without
/// failing the others. The document only fails as a whole when it has no
/// `<channel>`. Entries are dropped when the title is empty, the link is not
/// an absolute http(s) URL, or `pubDate` is older than `now - lookback`. A
/// missing or unparseable `pubDate` keeps the entry.
pub fn parse_feed(
    xml: &str,
    now: DateTime<Utc>,
    lookback: ChronoDuration,
    ids: IdStrategy,
) -> Result<Vec<FeedEntry>, FetchError> {
    if xml.trim().is_empty() {
        return Err(FetchError::EmptyBody);
    }
    let xml_clean = html_entities_to_xml(xml);
    let items = split_items(&xml_clean)?;

    let cutoff = now - lookback;
    let mut out = Vec::with_capacity(items.len());
    for raw in items {
        let it: Item = match from_str(raw) {
            Ok(it) => it,
            Err(e) => {
                counter!("feed_items_malformed_total").increment(1);
                tracing::debug!(target: "ingest", "skipping malformed item: {e}");
                continue;
            }
        };
        let title = normalize_text(it.title.as_deref().unwrap_or_default());
        if title.is_empty() {
            tracing::debug!(target: "ingest", "skipping item without title");
            continue;
        }
        let link = it.link.as_deref().unwrap_or_default().trim().to_string();
        if !is_usable_link(&link) {
            tracing::debug!(target: "ingest", %title, "skipping item without usable link");
            continue;
        }
        let published_at = it.pub_date.as_deref().and_then(parse_rfc2822);
        if matches!(published_at, Some(ts) if ts < cutoff) {
            continue;
        }
        let source = it
            .source
            .and_then(|s| s.value)
            .map(|s| normalize_text(&s))
            .unwrap_or_default();
        let guid = it.guid.and_then(|g| g.value);

        out.push(FeedEntry {
            id: ids.derive(guid.as_deref(), &link, &title, &source),
            title,
            source,
            published_at,
            link,
        });
    }
    Ok(out)
}

/// Raw `<item>…</item>` slices in document order.
///
/// A structural error after the channel opened ends the scan and keeps the
/// items read so far; without a channel the document is rejected.
fn split_items(xml: &str) -> Result<Vec<&str>, FetchError> {
    let mut reader = Reader::from_str(xml);
    let mut saw_channel = false;
    let mut open: Option<usize> = None;
    let mut items = Vec::new();

    loop {
        let before = reader.buffer_position() as usize;
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"channel" => saw_channel = true,
                b"item" if open.is_none() => open = Some(before),
                _ => {}
            },
            Ok(Event::End(e)) if e.name().as_ref() == b"item" => {
                if let Some(start) = open.take() {
                    let end = reader.buffer_position() as usize;
                    items.push(&xml[start..end]);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) if saw_channel => {
                tracing::warn!(
                    target: "ingest",
                    kept = items.len(),
                    "feed truncated by malformed markup: {e}"
                );
                break;
            }
            Err(e) => return Err(FetchError::Parse(e.to_string())),
        }
    }
    if !saw_channel {
        return Err(FetchError::Parse("no <channel> element".into()));
    }
    Ok(items)
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    OffsetDateTime::parse(ts, &Rfc2822)
        .ok()
        .and_then(|dt| DateTime::from_timestamp(dt.unix_timestamp(), 0))
        // some publishers emit zone names `time` rejects
        .or_else(|| {
            DateTime::parse_from_rfc2822(ts)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
}

// quick-xml only knows the five XML entities; feeds routinely carry HTML ones
// (`&eacute;`, `&nbsp;`, ...). Rewrite those as numeric references.
fn html_entities_to_xml(s: &str) -> Cow<'_, str> {
    static RE_ENTITY: OnceCell<Regex> = OnceCell::new();
    let re = RE_ENTITY.get_or_init(|| Regex::new(r"&([A-Za-z][A-Za-z0-9]*);").unwrap());
    re.replace_all(s, |caps: &Captures<'_>| {
        let name = &caps[1];
        if matches!(name, "amp" | "lt" | "gt" | "quot" | "apos") {
            return caps[0].to_string();
        }
        let decoded = html_escape::decode_html_entities(&caps[0]);
        if decoded == &caps[0] {
            // unknown name: leave it, the item carrying it is skipped
            return caps[0].to_string();
        }
        decoded.chars().map(|c| format!("&#{};", c as u32)).collect()
    })
}
