//! Google Custom Search JSON API (`customsearch/v1`).

pub mod error;

pub use error::{Result, SearchError};

use std::time::Duration;

use leadpilot_common::retry::{send_with_retry, RetryConfig, RetryOutcome};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{info, warn};

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/customsearch/v1";

/// Google returns at most 10 results per request.
pub const MAX_RESULTS_PER_QUERY: u8 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub q: String,
    /// Results per page, 1..=10.
    pub num: u8,
    /// Restrict to pages indexed in the last N days (`dateRestrict=dN`).
    pub date_restrict_days: Option<u32>,
}

impl SearchQuery {
    pub fn new(q: impl Into<String>) -> Self {
        Self {
            q: q.into(),
            num: MAX_RESULTS_PER_QUERY,
            date_restrict_days: None,
        }
    }

    pub fn num(mut self, num: u8) -> Self {
        self.num = num;
        self
    }

    pub fn within_days(mut self, days: u32) -> Self {
        self.date_restrict_days = Some(days);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub link: String,
    pub title: String,
    pub snippet: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    #[serde(default)]
    link: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
}

/// `site:reddit.com "<keyword>"`, with embedded quotes removed so the phrase
/// stays a single exact-match term.
pub fn reddit_query(keyword: &str) -> String {
    let phrase: String = keyword.chars().filter(|c| *c != '"').collect();
    format!("site:reddit.com \"{}\"", phrase.trim())
}

#[derive(Clone)]
pub struct GoogleSearch {
    api_key: String,
    cx: String,
    base_url: String,
    http: reqwest::Client,
    retry: RetryConfig,
}

impl GoogleSearch {
    pub fn new(api_key: impl Into<String>, cx: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            api_key: api_key.into(),
            cx: cx.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            http,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        if query.q.trim().is_empty() {
            return Err(SearchError::InvalidQuery("empty query".into()));
        }
        if !(1..=MAX_RESULTS_PER_QUERY).contains(&query.num) {
            return Err(SearchError::InvalidQuery(format!(
                "num must be 1..={MAX_RESULTS_PER_QUERY}, got {}",
                query.num
            )));
        }

        let num = query.num.to_string();
        let mut params: Vec<(&str, String)> = vec![
            ("key", self.api_key.clone()),
            ("cx", self.cx.clone()),
            ("q", query.q.clone()),
            ("num", num),
        ];
        if let Some(days) = query.date_restrict_days {
            params.push(("dateRestrict", format!("d{}", days.max(1))));
        }

        let outcome = send_with_retry(
            || self.http.get(&self.base_url).query(&params),
            &self.retry,
        )
        .await;

        let response = match outcome {
            RetryOutcome::Success(r) => r,
            RetryOutcome::HttpError(r) => {
                let status = r.status();
                if status == StatusCode::TOO_MANY_REQUESTS {
                    warn!(query = %query.q, "Google search quota exceeded");
                    return Err(SearchError::QuotaExceeded);
                }
                let message = r.text().await.unwrap_or_default();
                return Err(SearchError::Api {
                    status: status.as_u16(),
                    message,
                });
            }
            RetryOutcome::Transport { attempts, source } => {
                return Err(SearchError::Network(format!(
                    "{source} (after {attempts} attempts)"
                )));
            }
        };

        let data: SearchResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Parse(e.to_string()))?;

        let hits: Vec<SearchHit> = data
            .items
            .into_iter()
            .filter(|i| !i.link.is_empty())
            .map(|i| SearchHit {
                link: i.link,
                title: i.title,
                snippet: i.snippet,
            })
            .collect();

        info!(query = %query.q, count = hits.len(), "Google search complete");
        Ok(hits)
    }
}
