// src/ingest/mod.rs
pub mod fetcher;
pub mod types;

pub use fetcher::{parse_feed, FeedQuery, GoogleNewsFetcher};
pub use types::{FeedEntry, FeedSource, IdStrategy};

/// Normalize feed text: decode entities, strip tags, unify quotes, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // 5) Length cap: 500 chars (chat messages stay readable)
    if out.chars().count() > 500 {
        out = out.chars().take(500).collect();
    }

    out
}

/// A link is usable when it is an absolute http(s) URL with a host.
pub fn is_usable_link(link: &str) -> bool {
    let t = link.trim();
    let rest = t
        .strip_prefix("https://")
        .or_else(|| t.strip_prefix("http://"));
    match rest {
        Some(r) => {
            let host = r.split(['/', '?', '#']).next().unwrap_or_default();
            !host.is_empty() && !t.contains(char::is_whitespace)
        }
        None => false,
    }
}
