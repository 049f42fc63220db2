use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RedditError>;

#[derive(Debug, Error)]
pub enum RedditError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Rate limited by Reddit (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Reddit rejected the request: {}", .0.join("; "))]
    Rejected(Vec<String>),
}

impl From<reqwest::Error> for RedditError {
    fn from(err: reqwest::Error) -> Self {
        RedditError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for RedditError {
    fn from(err: serde_json::Error) -> Self {
        RedditError::Parse(err.to_string())
    }
}
