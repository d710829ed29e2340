// src/config/mod.rs
//! Runtime configuration: TOML file + environment overrides.
//!
//! Resolution order for the file: `$FARO_CONFIG_PATH`, then
//! `config/faro.toml`, then built-in defaults.

pub mod keywords;

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::ingest::IdStrategy;
use crate::relevance::KeywordSet;

pub const ENV_CONFIG_PATH: &str = "FARO_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/faro.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub feed: FeedConfig,
    pub poll: PollConfig,
    pub seen: SeenConfig,
    pub keywords: KeywordsConfig,
    pub telegram: TelegramConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub base_url: String,
    /// Explicit search terms; built from the startup keywords when absent.
    pub query: Option<String>,
    pub language: String,
    pub region: String,
    pub ceid: String,
    pub lookback_hours: u64,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub id_strategy: IdStrategy,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: "https://news.google.com/rss/search".into(),
            query: None,
            language: "pt-BR".into(),
            region: "BR".into(),
            ceid: "BR:pt-419".into(),
            lookback_hours: 72,
            timeout_secs: 20,
            connect_timeout_secs: 10,
            id_strategy: IdStrategy::Link,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_secs: u64,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
    pub dispatch_timeout_secs: u64,
    /// Monitoring state at startup; toggled at runtime through the command surface.
    pub start_enabled: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            backoff_base_secs: 30,
            backoff_max_secs: 900,
            dispatch_timeout_secs: 120,
            start_enabled: true,
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeenConfig {
    pub retention_hours: u64,
    pub max_entries: usize,
    pub state_path: Option<PathBuf>,
}

impl Default for SeenConfig {
    fn default() -> Self {
        Self {
            retention_hours: 96,
            max_entries: 20_000,
            state_path: Some(PathBuf::from("state/seen.json")),
        }
    }
}

impl SeenConfig {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.retention_hours as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordsConfig {
    pub initial: Vec<String>,
    /// Keyword file; when it exists it wins over `initial` and receives runtime edits.
    pub path: Option<PathBuf>,
}

impl Default for KeywordsConfig {
    fn default() -> Self {
        Self {
            initial: Vec::new(),
            path: Some(PathBuf::from("state/keywords.json")),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    #[serde(skip_serializing)]
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
    pub api_base: String,
    pub send_delay_ms: u64,
    pub max_retries: u8,
    pub timeout_secs: u64,
    /// Offset used to render publish dates (São Paulo by default).
    pub utc_offset_hours: i32,
    /// Send a short "check finished" message after every tick.
    pub tick_summary: bool,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            api_base: "https://api.telegram.org".into(),
            send_delay_ms: 1_000,
            max_retries: 3,
            timeout_secs: 15,
            utc_offset_hours: -3,
            tick_summary: false,
        }
    }
}

// Keep the token out of logs.
impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &self.bot_token.as_ref().map(|_| "***"))
            .field("chat_id", &self.chat_id)
            .field("api_base", &self.api_base)
            .field("send_delay_ms", &self.send_delay_ms)
            .field("max_retries", &self.max_retries)
            .field("timeout_secs", &self.timeout_secs)
            .field("utc_offset_hours", &self.utc_offset_hours)
            .field("tick_summary", &self.tick_summary)
            .finish()
    }
}

impl TelegramConfig {
    pub fn enabled(&self) -> bool {
        self.bot_token.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "127.0.0.1:8080".into(),
        }
    }
}

impl AppConfig {
    /// Resolve, parse, apply env overrides and validate.
    pub fn load() -> Result<Self, ConfigError> {
        let mut cfg = match std::env::var(ENV_CONFIG_PATH) {
            Ok(p) => {
                let pb = PathBuf::from(p);
                if !pb.exists() {
                    return Err(ConfigError::invalid(
                        "FARO_CONFIG_PATH",
                        format!("{} does not exist", pb.display()),
                    ));
                }
                Self::from_path(&pb)?
            }
            Err(_) => {
                let default = PathBuf::from(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::from_path(&default)?
                } else {
                    tracing::info!("no config file found; using built-in defaults");
                    Self::default()
                }
            }
        };
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// `BOT_TOKEN`, `TELEGRAM_CHAT_ID`, `POLL_INTERVAL_SECS`, `FARO_BIND`.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(t) = std::env::var("BOT_TOKEN") {
            if !t.trim().is_empty() {
                self.telegram.bot_token = Some(t.trim().to_string());
            }
        }
        if let Ok(c) = std::env::var("TELEGRAM_CHAT_ID") {
            if !c.trim().is_empty() {
                self.telegram.chat_id = Some(c.trim().to_string());
            }
        }
        if let Ok(v) = std::env::var("POLL_INTERVAL_SECS") {
            self.poll.interval_secs = v
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid("POLL_INTERVAL_SECS", format!("`{v}` is not a number")))?;
        }
        if let Ok(b) = std::env::var("FARO_BIND") {
            self.api.bind = b.trim().to_string();
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll.interval_secs == 0 {
            return Err(ConfigError::invalid("poll.interval_secs", "must be > 0"));
        }
        if self.poll.backoff_base_secs == 0 || self.poll.backoff_max_secs < self.poll.backoff_base_secs {
            return Err(ConfigError::invalid(
                "poll.backoff_max_secs",
                "backoff base must be > 0 and not above the max",
            ));
        }
        if self.poll.dispatch_timeout_secs == 0 {
            return Err(ConfigError::invalid("poll.dispatch_timeout_secs", "must be > 0"));
        }
        if self.feed.timeout_secs == 0 || self.feed.connect_timeout_secs == 0 {
            return Err(ConfigError::invalid("feed.timeout_secs", "timeouts must be > 0"));
        }
        if self.feed.lookback_hours == 0 {
            return Err(ConfigError::invalid("feed.lookback_hours", "must be > 0"));
        }
        // An id evicted while its item is still inside the fetch window would be re-notified.
        if self.seen.retention_hours < self.feed.lookback_hours {
            return Err(ConfigError::invalid(
                "seen.retention_hours",
                format!(
                    "{}h is shorter than the feed look-back window ({}h)",
                    self.seen.retention_hours, self.feed.lookback_hours
                ),
            ));
        }
        if self.seen.max_entries == 0 {
            return Err(ConfigError::invalid("seen.max_entries", "must be > 0"));
        }
        if self.telegram.enabled() && self.telegram.chat_id.is_none() {
            return Err(ConfigError::invalid(
                "telegram.chat_id",
                "required when a bot token is configured",
            ));
        }
        if !(-12..=14).contains(&self.telegram.utc_offset_hours) {
            return Err(ConfigError::invalid("telegram.utc_offset_hours", "must be within -12..=14"));
        }
        if self.api.enabled {
            self.api
                .bind
                .parse::<SocketAddr>()
                .map_err(|e| ConfigError::invalid("api.bind", e.to_string()))?;
        }
        Ok(())
    }

    /// Startup keyword set: the keyword file if present, else `initial`.
    /// Empty is a startup error; at runtime an empty set just matches nothing.
    pub fn initial_keywords(&self) -> Result<KeywordSet, ConfigError> {
        let set = match &self.keywords.path {
            Some(p) if p.exists() => keywords::load_keywords_from(p)?,
            _ => self.keywords.initial.iter().collect(),
        };
        if set.is_empty() {
            return Err(ConfigError::EmptyKeywords);
        }
        Ok(set)
    }
}
