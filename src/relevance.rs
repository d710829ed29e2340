// src/relevance.rs
//! Keyword relevance gate and the shared keyword store.
//!
//! Matching is a case-insensitive substring test over `"{title} {source}"`.
//! The store is owned by the command side; the scheduler only takes a
//! by-value snapshot at the start of each tick.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::ingest::FeedEntry;

/// Ordered set of lowercase, trimmed, non-empty keywords.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct KeywordSet(BTreeSet<String>);

impl KeywordSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn clean(raw: &str) -> Option<String> {
        let t = raw.trim().to_lowercase();
        (!t.is_empty()).then_some(t)
    }

    /// Returns true if the keyword was not present.
    pub fn insert(&mut self, raw: &str) -> bool {
        match Self::clean(raw) {
            Some(k) => self.0.insert(k),
            None => false,
        }
    }

    pub fn remove(&mut self, raw: &str) -> bool {
        match Self::clean(raw) {
            Some(k) => self.0.remove(&k),
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

impl<S: AsRef<str>> FromIterator<S> for KeywordSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = KeywordSet::new();
        for it in iter {
            set.insert(it.as_ref());
        }
        set
    }
}

impl From<Vec<String>> for KeywordSet {
    fn from(v: Vec<String>) -> Self {
        v.into_iter().collect()
    }
}

impl From<KeywordSet> for Vec<String> {
    fn from(k: KeywordSet) -> Self {
        k.0.into_iter().collect()
    }
}

/// True if any keyword occurs in the entry's title or source.
///
/// Empty title or empty keyword set never match (fail-closed).
pub fn matches(entry: &FeedEntry, keywords: &KeywordSet) -> bool {
    if entry.title.trim().is_empty() || keywords.is_empty() {
        return false;
    }
    let haystack = format!("{} {}", entry.title, entry.source).to_lowercase();
    keywords.iter().any(|k| haystack.contains(k))
}

/// Split a comma-separated edit (`"a, b ,c"`) into items.
pub fn split_keyword_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Shared handle over the live keyword set, optionally backed by a JSON file
/// that receives every edit.
#[derive(Clone)]
pub struct KeywordStore {
    inner: Arc<RwLock<KeywordSet>>,
    path: Option<PathBuf>,
}

impl KeywordStore {
    pub fn new(initial: KeywordSet) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// By-value copy; callers never hold the lock across a tick.
    pub fn snapshot(&self) -> KeywordSet {
        match self.inner.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn list(&self) -> Vec<String> {
        self.snapshot().to_vec()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn set<S: AsRef<str>>(&self, items: &[S]) -> anyhow::Result<Vec<String>> {
        let fresh: KeywordSet = items.iter().map(|s| s.as_ref()).collect();
        let (_, list) = self.mutate(|set| {
            *set = fresh;
            set.len()
        })?;
        Ok(list)
    }

    /// Adds items; returns how many were new plus the resulting list.
    pub fn add<S: AsRef<str>>(&self, items: &[S]) -> anyhow::Result<(usize, Vec<String>)> {
        self.mutate(|set| items.iter().filter(|k| set.insert(k.as_ref())).count())
    }

    /// Removes items; returns how many were present plus the resulting list.
    pub fn remove<S: AsRef<str>>(&self, items: &[S]) -> anyhow::Result<(usize, Vec<String>)> {
        self.mutate(|set| items.iter().filter(|k| set.remove(k.as_ref())).count())
    }

    /// Apply `f` to a copy, persist the copy, then publish it. The write lock
    /// is held across the save so concurrent edits serialize on the file too;
    /// a failed save leaves the live set untouched.
    fn mutate<F>(&self, f: F) -> anyhow::Result<(usize, Vec<String>)>
    where
        F: FnOnce(&mut KeywordSet) -> usize,
    {
        let mut guard = match self.inner.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next = guard.clone();
        let changed = f(&mut next);
        if let Some(path) = &self.path {
            save_keywords(path, &next)?;
        }
        let list = next.to_vec();
        tracing::info!(target: "relevance", count = next.len(), changed, "keyword set updated");
        *guard = next;
        Ok((changed, list))
    }
}

/// Persist as a pretty JSON array (temp file + rename).
pub fn save_keywords(path: &Path, set: &KeywordSet) -> anyhow::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let body = serde_json::to_vec_pretty(set)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, body).with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(title: &str, source: &str) -> FeedEntry {
        FeedEntry {
            id: title.to_string(),
            title: title.to_string(),
            source: source.to_string(),
            published_at: None,
            link: "https://example.com/a".into(),
        }
    }

    #[test]
    fn keyword_set_normalizes_and_orders() {
        let k = KeywordSet::from_iter(["  Selic ", "economia", "", "SELIC"]);
        assert_eq!(k.to_vec(), vec!["economia".to_string(), "selic".to_string()]);
    }

    #[test]
    fn matches_title_or_source_case_insensitive() {
        let k = KeywordSet::from_iter(["economy"]);
        assert!(matches(&entry("ECONOMY grows", ""), &k));
        let k = KeywordSet::from_iter(["folha"]);
        assert!(matches(&entry("Juros sobem", "Folha de S.Paulo"), &k));
        assert!(!matches(&entry("Juros sobem", "Globo"), &k));
    }

    #[test]
    fn empty_title_or_keywords_never_match() {
        let k = KeywordSet::from_iter(["globo"]);
        assert!(!matches(&entry("", "Globo"), &k));
        assert!(!matches(&entry("   ", "Globo"), &k));
        assert!(!matches(&entry("Economy grows", "Globo"), &KeywordSet::new()));
    }

    #[test]
    fn verdict_ignores_keyword_order() {
        let titles = ["Selic sobe", "Petrobras recua", "Chuva em SP", "IPCA e selic"];
        let a = KeywordSet::from_iter(["selic", "petrobras", "ipca"]);
        let b = KeywordSet::from_iter(["ipca", "petrobras", "selic"]);
        for t in titles {
            let e = entry(t, "");
            assert_eq!(matches(&e, &a), matches(&e, &b), "{t}");
        }
    }

    #[test]
    fn failed_save_leaves_live_set_alone() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let store = KeywordStore::new(KeywordSet::from_iter(["economia"]))
            .with_path(blocker.join("keywords.json"));

        assert!(store.add(&["selic"]).is_err());
        assert!(store.remove(&["economia"]).is_err());
        assert!(store.set(&["ipca"]).is_err());
        assert_eq!(store.list(), vec!["economia".to_string()]);
    }

    #[test]
    fn split_keyword_list_trims_and_skips_blanks() {
        assert_eq!(
            split_keyword_list(" petrobras, ,vale ,  "),
            vec!["petrobras".to_string(), "vale".to_string()]
        );
    }

    #[test]
    fn store_add_remove_report_changes() {
        let store = KeywordStore::new(KeywordSet::from_iter(["a"]));
        let (added, list) = store.add(&["A", "b", "c"]).unwrap();
        assert_eq!(added, 2);
        assert_eq!(list, vec!["a", "b", "c"]);
        let (removed, list) = store.remove(&["b", "zzz"]).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(list, vec!["a", "c"]);
        let list = store.set(&["x"]).unwrap();
        assert_eq!(list, vec!["x"]);
    }

    #[test]
    fn snapshot_is_detached_from_later_edits() {
        let store = KeywordStore::new(KeywordSet::from_iter(["a"]));
        let snap = store.snapshot();
        store.add(&["b"]).unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn store_persists_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("keywords.json");
        let store = KeywordStore::new(KeywordSet::new()).with_path(&path);
        store.add(&["Petrobras"]).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        let back: Vec<String> = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, vec!["petrobras".to_string()]);
    }
}
