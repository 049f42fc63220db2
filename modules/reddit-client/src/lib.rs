pub mod error;
pub mod links;
pub mod rate_limit;
pub mod types;

pub use error::{RedditError, Result};
pub use links::{parse_post_url, PostRef};
pub use rate_limit::RateLimiter;
pub use types::{
    rules_as_text, CommentReceipt, RedditIdentity, RedditPost, SubredditRule, TimeWindow,
    TokenGrant,
};

use std::sync::Arc;
use std::time::Duration;

use leadpilot_common::retry::{parse_retry_after, send_with_retry, RetryConfig, RetryOutcome};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use types::{CommentResponse, Listing, RulesResponse};

const OAUTH_BASE_URL: &str = "https://oauth.reddit.com";
const WWW_BASE_URL: &str = "https://www.reddit.com";

/// `/api/info` accepts at most 100 ids per call.
const INFO_BATCH: usize = 100;

/// Refresh the app token this long before Reddit says it expires.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RedditCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
    pub redirect_uri: String,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Reddit API client. Cheap to clone; clones share the rate limiter and the
/// cached application token.
#[derive(Clone)]
pub struct RedditClient {
    http: reqwest::Client,
    creds: RedditCredentials,
    oauth_base: String,
    www_base: String,
    limiter: Arc<RateLimiter>,
    app_token: Arc<Mutex<Option<CachedToken>>>,
    retry: RetryConfig,
}

impl RedditClient {
    pub fn new(creds: RedditCredentials) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(creds.user_agent.clone())
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            creds,
            oauth_base: OAUTH_BASE_URL.to_string(),
            www_base: WWW_BASE_URL.to_string(),
            limiter: Arc::new(RateLimiter::per_minute(60)),
            app_token: Arc::new(Mutex::new(None)),
            retry: RetryConfig::default(),
        })
    }

    pub fn with_base_urls(mut self, oauth_base: &str, www_base: &str) -> Self {
        self.oauth_base = oauth_base.trim_end_matches('/').to_string();
        self.www_base = www_base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    // =========================================================================
    // OAuth
    // =========================================================================

    /// URL to send a user to for authorization (permanent duration, so we
    /// receive a refresh token).
    pub fn authorize_url(&self, state: &str, scopes: &[&str]) -> String {
        let mut url = match url::Url::parse(&format!("{}/api/v1/authorize", self.www_base)) {
            Ok(u) => u,
            Err(_) => return format!("{}/api/v1/authorize", self.www_base),
        };
        url.query_pairs_mut()
            .append_pair("client_id", &self.creds.client_id)
            .append_pair("response_type", "code")
            .append_pair("state", state)
            .append_pair("redirect_uri", &self.creds.redirect_uri)
            .append_pair("duration", "permanent")
            .append_pair("scope", &scopes.join(" "));
        url.to_string()
    }

    /// Exchange an authorization code for user tokens.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenGrant> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.creds.redirect_uri.as_str()),
        ])
        .await
    }

    /// Trade a stored refresh token for a fresh user access token.
    pub async fn refresh_user_token(&self, refresh_token: &str) -> Result<TokenGrant> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    /// Application-only token, cached until shortly before expiry.
    pub async fn app_token(&self) -> Result<String> {
        let mut cached = self.app_token.lock().await;
        if let Some(ref token) = *cached {
            if token.expires_at > Instant::now() {
                return Ok(token.access_token.clone());
            }
        }

        let grant = self
            .token_request(&[("grant_type", "client_credentials")])
            .await?;
        let lifetime =
            Duration::from_secs(grant.expires_in.max(60)).saturating_sub(TOKEN_EXPIRY_MARGIN);
        *cached = Some(CachedToken {
            access_token: grant.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        info!(expires_in = grant.expires_in, "reddit: obtained app token");
        Ok(grant.access_token)
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenGrant> {
        let url = format!("{}/api/v1/access_token", self.www_base);
        self.limiter.acquire().await;
        let outcome = send_with_retry(
            || {
                self.http
                    .post(&url)
                    .basic_auth(&self.creds.client_id, Some(&self.creds.client_secret))
                    .form(form)
            },
            &self.retry,
        )
        .await;

        let response = match self.finish(outcome).await {
            Ok(r) => r,
            Err(RedditError::Api { status, message }) if status == 400 || status == 401 => {
                return Err(RedditError::Auth(message));
            }
            Err(e) => return Err(e),
        };

        // Reddit reports bad grants as 200 with an "error" field.
        let value: serde_json::Value = response.json().await?;
        if let Some(err) = value.get("error") {
            return Err(RedditError::Auth(err.to_string()));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Identity of the user owning `access_token`.
    pub async fn me(&self, access_token: &str) -> Result<RedditIdentity> {
        let url = format!("{}/api/v1/me", self.oauth_base);
        self.get_json(|| self.http.get(&url).bearer_auth(access_token)).await
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Search all of Reddit for submissions matching `query`, newest first.
    pub async fn search(&self, query: &str, window: TimeWindow, limit: u32) -> Result<Vec<RedditPost>> {
        let token = self.app_token().await?;
        let url = format!("{}/search", self.oauth_base);
        let limit = limit.clamp(1, 100).to_string();
        debug!(query, window = window.as_str(), "reddit: search");

        let listing: Listing = self
            .get_json(|| {
                self.http.get(&url).bearer_auth(&token).query(&[
                    ("q", query),
                    ("sort", "new"),
                    ("t", window.as_str()),
                    ("type", "link"),
                    ("limit", limit.as_str()),
                    ("raw_json", "1"),
                ])
            })
            .await?;
        Ok(listing.into_posts())
    }

    /// Hydrate posts by fullname (`t3_*`). Unknown ids are silently absent
    /// from the result.
    pub async fn posts_by_fullname(&self, fullnames: &[String]) -> Result<Vec<RedditPost>> {
        if fullnames.is_empty() {
            return Ok(Vec::new());
        }
        let token = self.app_token().await?;
        let url = format!("{}/api/info", self.oauth_base);

        let mut posts = Vec::with_capacity(fullnames.len());
        for chunk in fullnames.chunks(INFO_BATCH) {
            let ids = chunk.join(",");
            let listing: Listing = self
                .get_json(|| {
                    self.http
                        .get(&url)
                        .bearer_auth(&token)
                        .query(&[("id", ids.as_str()), ("raw_json", "1")])
                })
                .await?;
            posts.extend(listing.into_posts());
        }
        Ok(posts)
    }

    /// Posted rules of a subreddit. An empty list means the sub has none.
    pub async fn subreddit_rules(&self, subreddit: &str) -> Result<Vec<SubredditRule>> {
        let token = self.app_token().await?;
        let sub = subreddit.trim().trim_start_matches("r/");
        let url = format!("{}/r/{}/about/rules", self.oauth_base, sub);
        let resp: RulesResponse = self
            .get_json(|| self.http.get(&url).bearer_auth(&token).query(&[("raw_json", "1")]))
            .await?;
        Ok(resp.rules)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Reply to a post or comment as the user owning `access_token`.
    /// Never retried: a timeout may still have posted the comment.
    pub async fn submit_comment(
        &self,
        access_token: &str,
        thing_id: &str,
        text: &str,
    ) -> Result<CommentReceipt> {
        let url = format!("{}/api/comment", self.oauth_base);
        self.limiter.acquire().await;
        let outcome = send_with_retry(
            || {
                self.http.post(&url).bearer_auth(access_token).form(&[
                    ("api_type", "json"),
                    ("thing_id", thing_id),
                    ("text", text),
                ])
            },
            &RetryConfig::none(),
        )
        .await;
        let response = self.finish(outcome).await?;
        let body: CommentResponse = response.json().await?;
        comment_receipt(body)
    }

    // =========================================================================
    // Plumbing
    // =========================================================================

    async fn get_json<T, F>(&self, build: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        self.limiter.acquire().await;
        let outcome = send_with_retry(build, &self.retry).await;
        let response = self.finish(outcome).await?;
        Ok(response.json().await?)
    }

    /// Feed rate-limit headers back to the limiter and map failures.
    async fn finish(&self, outcome: RetryOutcome) -> Result<Response> {
        match outcome {
            RetryOutcome::Success(r) => {
                self.limiter.observe(r.headers()).await;
                Ok(r)
            }
            RetryOutcome::HttpError(r) => {
                self.limiter.observe(r.headers()).await;
                let status = r.status();
                if status == StatusCode::TOO_MANY_REQUESTS {
                    let retry_after = parse_retry_after(r.headers());
                    if let Some(d) = retry_after {
                        self.limiter.block_for(d).await;
                    }
                    warn!(?retry_after, "reddit: 429 after retries");
                    return Err(RedditError::RateLimited { retry_after });
                }
                let message = r.text().await.unwrap_or_default();
                if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                    return Err(RedditError::Auth(message));
                }
                Err(RedditError::Api {
                    status: status.as_u16(),
                    message,
                })
            }
            RetryOutcome::Transport { attempts, source } => Err(RedditError::Network(format!(
                "{source} (after {attempts} attempts)"
            ))),
        }
    }
}

fn comment_receipt(body: CommentResponse) -> Result<CommentReceipt> {
    let errors: Vec<(String, String)> = body
        .json
        .errors
        .iter()
        .map(|e| {
            let code = e.first().and_then(|v| v.as_str()).unwrap_or("UNKNOWN").to_string();
            let msg = e.get(1).and_then(|v| v.as_str()).unwrap_or("").to_string();
            (code, msg)
        })
        .collect();

    if errors.iter().any(|(code, _)| code == "RATELIMIT") {
        return Err(RedditError::RateLimited { retry_after: None });
    }
    if !errors.is_empty() {
        return Err(RedditError::Rejected(
            errors
                .into_iter()
                .map(|(code, msg)| format!("{code}: {msg}"))
                .collect(),
        ));
    }

    let fullname = body
        .json
        .data
        .and_then(|d| d.things.into_iter().next())
        .and_then(|t| t.data.get("name").and_then(|n| n.as_str()).map(String::from));
    Ok(CommentReceipt { fullname })
}
