// src/config/keywords.rs
use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::relevance::KeywordSet;

/// Load a keyword file. Supports a JSON array or TOML `keywords = [...]`.
pub fn load_keywords_from(path: &Path) -> Result<KeywordSet, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_keywords(&content, ext.as_str()).ok_or_else(|| ConfigError::Parse {
        path: path.to_path_buf(),
        message: "expected a JSON array or TOML `keywords = [...]`".into(),
    })
}

fn parse_keywords(s: &str, hint_ext: &str) -> Option<KeywordSet> {
    // Try TOML first if hinted or content looks like toml.
    let try_toml = hint_ext == "toml" || s.contains("keywords");
    if try_toml {
        if let Some(v) = parse_toml(s) {
            return Some(v);
        }
    }
    if let Some(v) = parse_json(s) {
        return Some(v);
    }
    if !try_toml {
        return parse_toml(s);
    }
    None
}

fn parse_toml(s: &str) -> Option<KeywordSet> {
    #[derive(serde::Deserialize)]
    struct TomlKw {
        keywords: Vec<String>,
    }
    let v: TomlKw = toml::from_str(s).ok()?;
    Some(v.keywords.into())
}

fn parse_json(s: &str) -> Option<KeywordSet> {
    let v: Vec<String> = serde_json::from_str(s).ok()?;
    Some(v.into())
}
