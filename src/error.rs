//! Error taxonomy for the polling core.
//!
//! `FetchError` and `DispatchError` are contained inside a tick; only
//! `ConfigError` is fatal, and only at startup.

use std::path::PathBuf;
use thiserror::Error;

/// Failure while fetching or parsing the upstream feed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("feed request timed out")]
    Timeout,

    #[error("feed request failed: {source}")]
    Network {
        retryable: bool,
        #[source]
        source: reqwest::Error,
    },

    #[error("feed endpoint returned HTTP {0}")]
    Status(u16),

    #[error("feed returned an empty body")]
    EmptyBody,

    #[error("feed document could not be parsed: {0}")]
    Parse(String),
}

impl FetchError {
    /// Retryable failures send the scheduler into backoff; the rest only skip the tick.
    pub fn retryable(&self) -> bool {
        match self {
            FetchError::Timeout | FetchError::EmptyBody => true,
            FetchError::Network { retryable, .. } => *retryable,
            FetchError::Status(code) => *code == 429 || (500..600).contains(code),
            FetchError::Parse(_) => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return FetchError::Timeout;
        }
        if let Some(status) = e.status() {
            return FetchError::Status(status.as_u16());
        }
        // Builder errors mean a malformed endpoint; everything else on the wire is transient.
        let retryable = !e.is_builder() && (e.is_connect() || e.is_request() || e.is_body());
        FetchError::Network {
            retryable,
            source: e,
        }
    }
}

/// Failure while delivering notifications to the chat interface.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("chat API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("chat API rejected the message (HTTP {status}): {description}")]
    Api { status: u16, description: String },

    #[error("dispatch timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("{failed} of {total} notifications were not delivered")]
    Partial { failed: usize, total: usize },
}

/// Invalid or unreadable configuration; fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("keyword set is empty; add at least one keyword")]
    EmptyKeywords,

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
