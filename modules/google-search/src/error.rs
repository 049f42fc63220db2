use thiserror::Error;

pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Search API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Search quota exceeded")]
    QuotaExceeded,

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

impl From<reqwest::Error> for SearchError {
    fn from(err: reqwest::Error) -> Self {
        SearchError::Network(err.to_string())
    }
}
