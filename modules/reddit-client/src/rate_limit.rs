// Sliding-window request limiter shared by every call a RedditClient makes.
//
// Two inputs gate a request: our own budget (max_requests per window) and
// Reddit's view of it (x-ratelimit-* headers). Whichever is stricter wins.

use std::collections::VecDeque;
use std::time::Duration;

use reqwest::header::HeaderMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    state: Mutex<LimiterState>,
}

#[derive(Default)]
struct LimiterState {
    /// Admission times inside the current window, oldest first.
    issued: VecDeque<Instant>,
    /// Set when Reddit says the budget is spent.
    blocked_until: Option<Instant>,
}

impl LimiterState {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.issued.front() {
            if now.duration_since(oldest) >= window {
                self.issued.pop_front();
            } else {
                break;
            }
        }
    }

    /// Admit now, or return how long to wait before asking again.
    fn admit(&mut self, now: Instant, max: usize, window: Duration) -> Result<(), Duration> {
        if let Some(until) = self.blocked_until {
            if until > now {
                return Err(until - now);
            }
            self.blocked_until = None;
        }

        self.prune(now, window);
        if self.issued.len() < max {
            self.issued.push_back(now);
            return Ok(());
        }

        // Full: wait until the oldest admission leaves the window.
        let oldest = self.issued.front().copied().unwrap_or(now);
        Err((oldest + window).saturating_duration_since(now).max(Duration::from_millis(1)))
    }
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            state: Mutex::new(LimiterState::default()),
        }
    }

    pub fn per_minute(max_requests: usize) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }

    /// Wait for a request slot.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                match state.admit(Instant::now(), self.max_requests, self.window) {
                    Ok(()) => return,
                    Err(wait) => wait,
                }
            };
            debug!(wait_ms = wait.as_millis() as u64, "reddit rate limiter: waiting for slot");
            tokio::time::sleep(wait).await;
        }
    }

    /// Take a slot if one is free right now.
    pub async fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().await;
        state
            .admit(Instant::now(), self.max_requests, self.window)
            .is_ok()
    }

    /// Hold every acquirer for `duration`.
    pub async fn block_for(&self, duration: Duration) {
        let mut state = self.state.lock().await;
        let until = Instant::now() + duration;
        state.blocked_until = Some(match state.blocked_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
    }

    /// Feed Reddit's `x-ratelimit-remaining` / `x-ratelimit-reset` headers.
    /// When the remaining budget is below one request, block until reset.
    pub async fn observe(&self, headers: &HeaderMap) {
        let Some((remaining, reset)) = parse_ratelimit_headers(headers) else {
            return;
        };
        if remaining < 1.0 {
            warn!(reset_secs = reset.as_secs(), "reddit rate limit exhausted; pausing requests");
            self.block_for(reset).await;
        }
    }

    /// Requests admitted in the current window.
    pub async fn in_flight_window(&self) -> usize {
        let mut state = self.state.lock().await;
        state.prune(Instant::now(), self.window);
        state.issued.len()
    }
}

pub(crate) fn parse_ratelimit_headers(headers: &HeaderMap) -> Option<(f64, Duration)> {
    let read = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite() && *v >= 0.0)
    };
    let remaining = read("x-ratelimit-remaining")?;
    let reset = read("x-ratelimit-reset").unwrap_or(60.0).min(600.0);
    Some((remaining, Duration::from_secs_f64(reset)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn admits_up_to_budget_then_waits() {
        let limiter = RateLimiter::new(3, Duration::from_secs(10));
        assert!(limiter.try_acquire().await);
        assert!(limiter.try_acquire().await);
        assert!(limiter.try_acquire().await);
        assert!(!limiter.try_acquire().await);

        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn window_slides() {
        let limiter = RateLimiter::new(2, Duration::from_secs(10));
        limiter.acquire().await;
        tokio::time::advance(Duration::from_secs(6)).await;
        limiter.acquire().await;
        assert!(!limiter.try_acquire().await);

        // First admission leaves the window at t=10, second at t=16.
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(limiter.try_acquire().await);
        assert!(!limiter.try_acquire().await);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_acquirers_never_over_admit() {
        let limiter = Arc::new(RateLimiter::new(5, Duration::from_secs(60)));
        let mut handles = Vec::new();
        for _ in 0..5 {
            let l = limiter.clone();
            handles.push(tokio::spawn(async move { l.acquire().await }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(limiter.in_flight_window().await, 5);
        assert!(!limiter.try_acquire().await);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_headers_block_until_reset() {
        let limiter = RateLimiter::new(100, Duration::from_secs(60));
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0.0"));
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("30"));
        limiter.observe(&headers).await;

        assert!(!limiter.try_acquire().await);
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_headers_do_not_block() {
        let limiter = RateLimiter::new(100, Duration::from_secs(60));
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("57.0"));
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("30"));
        limiter.observe(&headers).await;
        assert!(limiter.try_acquire().await);
    }

    #[test]
    fn header_parsing() {
        let mut headers = HeaderMap::new();
        assert!(parse_ratelimit_headers(&headers).is_none());
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("3"));
        let (remaining, reset) = parse_ratelimit_headers(&headers).unwrap();
        assert_eq!(remaining, 3.0);
        assert_eq!(reset, Duration::from_secs(60));
    }
}
