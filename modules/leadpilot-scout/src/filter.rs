// Candidate dedup and eligibility. Pure functions, no I/O.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use leadpilot_common::{Candidate, Product};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    TooOld,
    Locked,
    Archived,
    Removed,
    Nsfw,
    OutsideAllowList,
}

/// Merge both search paths into one list keyed by post id. The Reddit search
/// copy wins over the web copy. Returns the survivors and how many were
/// dropped as duplicates.
pub fn dedup_candidates(reddit: Vec<Candidate>, web: Vec<Candidate>) -> (Vec<Candidate>, usize) {
    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(reddit.len() + web.len());
    let mut duplicates = 0;

    for candidate in reddit.into_iter().chain(web) {
        if seen.insert(candidate.reddit_id.clone()) {
            merged.push(candidate);
        } else {
            duplicates += 1;
        }
    }

    (merged, duplicates)
}

pub fn rejection(product: &Product, candidate: &Candidate, cutoff: DateTime<Utc>) -> Option<Rejection> {
    if candidate.posted_at < cutoff {
        return Some(Rejection::TooOld);
    }
    if candidate.locked {
        return Some(Rejection::Locked);
    }
    if candidate.archived {
        return Some(Rejection::Archived);
    }
    if candidate.removed || matches!(candidate.body.trim(), "[deleted]" | "[removed]") {
        return Some(Rejection::Removed);
    }
    if candidate.nsfw {
        return Some(Rejection::Nsfw);
    }
    if !product.allows_subreddit(&candidate.subreddit) {
        return Some(Rejection::OutsideAllowList);
    }
    None
}

/// Drop ineligible posts, sort newest first, cap at `max_candidates`.
/// Returns the survivors and how many were dropped (rejected or over the cap).
pub fn filter_candidates(
    product: &Product,
    candidates: Vec<Candidate>,
    now: DateTime<Utc>,
    max_age_days: u32,
    max_candidates: usize,
) -> (Vec<Candidate>, usize) {
    let cutoff = now - Duration::days(i64::from(max_age_days));
    let total = candidates.len();

    let mut kept: Vec<Candidate> = candidates
        .into_iter()
        .filter(|c| rejection(product, c, cutoff).is_none())
        .collect();

    kept.sort_by(|a, b| b.posted_at.cmp(&a.posted_at));
    kept.truncate(max_candidates);

    let dropped = total - kept.len();
    (kept, dropped)
}
