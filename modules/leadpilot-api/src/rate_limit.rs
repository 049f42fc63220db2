// Per-user sliding-window limiter for LLM-backed endpoints.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use uuid::Uuid;

const WINDOW: Duration = Duration::from_secs(3600);

/// Check the window for one key. Returns true if the request is allowed.
/// Prunes expired entries and records the new request if allowed.
pub fn check_rate_limit(entries: &mut Vec<Instant>, now: Instant, max_per_hour: usize) -> bool {
    // Near process start the window may reach before the clock's epoch.
    if let Some(cutoff) = now.checked_sub(WINDOW) {
        entries.retain(|t| *t > cutoff);
    }
    if entries.len() >= max_per_hour {
        return false;
    }
    entries.push(now);
    true
}

pub struct UserRateLimiter {
    max_per_hour: usize,
    entries: Mutex<HashMap<Uuid, Vec<Instant>>>,
}

impl UserRateLimiter {
    pub fn new(max_per_hour: usize) -> Self {
        Self {
            max_per_hour,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_per_hour(&self) -> usize {
        self.max_per_hour
    }

    pub async fn allow(&self, user_id: Uuid) -> bool {
        self.allow_at(user_id, Instant::now()).await
    }

    async fn allow_at(&self, user_id: Uuid, now: Instant) -> bool {
        let mut entries = self.entries.lock().await;
        // Keep the map from growing without bound.
        if entries.len() > 1000 {
            entries.retain(|_, v| v.iter().any(|t| now.duration_since(*t) < WINDOW));
        }
        check_rate_limit(entries.entry(user_id).or_default(), now, self.max_per_hour)
    }
}
