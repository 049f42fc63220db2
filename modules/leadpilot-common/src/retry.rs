//! HTTP retry policy with exponential backoff.
//!
//! Shared by the OpenAI, Reddit and Google clients.
//!
//! - Max retries: 2 (3 total attempts)
//! - Initial delay: 500ms, doubling, capped at 8 seconds
//! - Down-jitter up to 25% (multiplier in [0.75, 1.0])
//! - Retryable: HTTP 408, 409, 429, 5xx and connection/timeout errors
//! - `Retry-After` / `Retry-After-Ms` win over the computed backoff

use std::time::Duration;

use reqwest::{header::HeaderMap, RequestBuilder, Response, StatusCode};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries (not counting the initial request).
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// 0.25 = up to 25% reduction.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter_factor: 0.25,
        }
    }
}

impl RetryConfig {
    /// No retries at all. Used for non-idempotent calls such as posting a comment.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// Parse `Retry-After-Ms` (float millis) or `Retry-After` (integer seconds).
///
/// Only values with `0 < duration < 60s` are honoured.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let in_range = |d: Duration| d > Duration::ZERO && d < Duration::from_secs(60);

    let ms = headers
        .get("retry-after-ms")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|ms| ms.is_finite() && *ms > 0.0)
        .map(|ms| Duration::from_secs_f64(ms / 1000.0))
        .filter(|d| in_range(*d));
    if ms.is_some() {
        return ms;
    }

    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .filter(|d| in_range(*d))
}

pub fn should_retry(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 409 | 429 | 500..=599)
}

/// Backoff before retry number `backoff_step + 1`.
pub fn calculate_retry_delay(
    backoff_step: u32,
    config: &RetryConfig,
    headers: Option<&HeaderMap>,
) -> Duration {
    if let Some(delay) = headers.and_then(parse_retry_after) {
        return delay;
    }

    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(backoff_step as i32);
    let capped = base.min(config.max_delay.as_secs_f64());
    let jitter = 1.0 - rand::random::<f64>() * config.jitter_factor;
    Duration::from_secs_f64(capped * jitter)
}

fn is_retryable_error(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout()
}

/// Outcome of a retried request. A non-2xx response is handed back so the
/// caller can read its body and map it to a typed error.
#[derive(Debug)]
pub enum RetryOutcome {
    Success(Response),
    HttpError(Response),
    Transport { attempts: u32, source: reqwest::Error },
}

/// Send a request, retrying per `config`. `build_request` is called once per attempt.
pub async fn send_with_retry<F>(build_request: F, config: &RetryConfig) -> RetryOutcome
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt: u32 = 0;
    loop {
        let last_attempt = attempt >= config.max_retries;

        match build_request().send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return RetryOutcome::Success(response);
                }
                if last_attempt || !should_retry(status) {
                    return RetryOutcome::HttpError(response);
                }
                let delay = calculate_retry_delay(attempt, config, Some(response.headers()));
                tracing::debug!(
                    status = %status,
                    retry = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying request after error status"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if last_attempt || !is_retryable_error(&e) {
                    return RetryOutcome::Transport {
                        attempts: attempt + 1,
                        source: e,
                    };
                }
                let delay = calculate_retry_delay(attempt, config, None);
                tracing::debug!(
                    error = %e,
                    retry = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying request after connection error"
                );
                tokio::time::sleep(delay).await;
            }
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast() -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..RetryConfig::default()
        }
    }

    #[test]
    fn retry_after_seconds() {
        let mut h = HeaderMap::new();
        h.insert("retry-after", HeaderValue::from_static("3"));
        assert_eq!(parse_retry_after(&h), Some(Duration::from_secs(3)));
    }

    #[test]
    fn retry_after_ms_takes_precedence() {
        let mut h = HeaderMap::new();
        h.insert("retry-after", HeaderValue::from_static("3"));
        h.insert("retry-after-ms", HeaderValue::from_static("250"));
        assert_eq!(parse_retry_after(&h), Some(Duration::from_millis(250)));
    }

    #[test]
    fn retry_after_out_of_range_ignored() {
        let mut h = HeaderMap::new();
        h.insert("retry-after", HeaderValue::from_static("120"));
        assert_eq!(parse_retry_after(&h), None);
        h.insert("retry-after", HeaderValue::from_static("0"));
        assert_eq!(parse_retry_after(&h), None);
    }

    #[test]
    fn retryable_statuses() {
        assert!(should_retry(StatusCode::TOO_MANY_REQUESTS));
        assert!(should_retry(StatusCode::BAD_GATEWAY));
        assert!(should_retry(StatusCode::REQUEST_TIMEOUT));
        assert!(!should_retry(StatusCode::BAD_REQUEST));
        assert!(!should_retry(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn backoff_is_capped_and_jittered() {
        let config = RetryConfig::default();
        for step in 0..10 {
            let d = calculate_retry_delay(step, &config, None);
            assert!(d <= config.max_delay);
            assert!(d.as_secs_f64() >= 0.75 * (0.5 * 2f64.powi(step as i32)).min(8.0) - 1e-9);
        }
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/flaky", server.uri());
        let outcome = send_with_retry(|| client.get(&url), &fast()).await;
        assert!(matches!(outcome, RetryOutcome::Success(_)));
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/down", server.uri());
        match send_with_retry(|| client.get(&url), &fast()).await {
            RetryOutcome::HttpError(resp) => assert_eq!(resp.status(), 500),
            other => panic!("expected HttpError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bad"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/bad", server.uri());
        let outcome = send_with_retry(|| client.get(&url), &fast()).await;
        assert!(matches!(outcome, RetryOutcome::HttpError(_)));
    }
}
