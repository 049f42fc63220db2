use chrono::{DateTime, TimeZone, Utc};
use leadpilot_common::{Candidate, LeadSource};
use serde::{Deserialize, Serialize};

// --- Listings ---

/// Reddit "Listing" envelope. Children are kept as raw JSON so that mixed
/// listings (posts, comments, more) do not fail to parse as a whole.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Listing {
    pub data: ListingData,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ListingData {
    #[serde(default)]
    pub children: Vec<Thing>,
    #[allow(dead_code)]
    pub after: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Thing {
    pub kind: String,
    pub data: serde_json::Value,
}

impl Listing {
    /// Posts (`t3`) in listing order. Children that fail to parse are skipped.
    pub fn into_posts(self) -> Vec<RedditPost> {
        self.data
            .children
            .into_iter()
            .filter(|t| t.kind == "t3")
            .filter_map(|t| match serde_json::from_value::<RedditPost>(t.data) {
                Ok(post) => Some(post),
                Err(e) => {
                    tracing::debug!(error = %e, "skipping unparseable reddit post");
                    None
                }
            })
            .collect()
    }
}

// --- Posts ---

/// A submission (`t3`) as returned by `/search` and `/api/info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditPost {
    pub id: String,
    /// Fullname, e.g. `t3_1abcde`.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub subreddit: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub created_utc: f64,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub num_comments: i64,
    #[serde(default)]
    pub over_18: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub removed_by_category: Option<String>,
}

impl RedditPost {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        if !self.created_utc.is_finite() || self.created_utc <= 0.0 {
            return None;
        }
        Utc.timestamp_opt(self.created_utc as i64, 0).single()
    }

    /// Removed by mods/admins, deleted by the author, or body scrubbed.
    pub fn is_removed(&self) -> bool {
        self.removed_by_category.is_some()
            || self.author == "[deleted]"
            || matches!(self.selftext.trim(), "[removed]" | "[deleted]")
    }

    /// Convert to the pipeline's source-agnostic candidate. Posts without a
    /// usable timestamp are dropped.
    pub fn into_candidate(self, source: LeadSource, keyword: &str) -> Option<Candidate> {
        let posted_at = self.created_at()?;
        let removed = self.is_removed();
        Some(Candidate {
            reddit_id: self.id,
            subreddit: self.subreddit,
            title: self.title,
            body: self.selftext,
            author: self.author,
            permalink: self.permalink,
            url: self.url,
            posted_at,
            upvotes: self.score,
            num_comments: self.num_comments,
            nsfw: self.over_18,
            locked: self.locked,
            archived: self.archived,
            removed,
            source,
            matched_keyword: keyword.to_string(),
        })
    }
}

// --- Subreddit rules ---

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RulesResponse {
    #[serde(default)]
    pub rules: Vec<SubredditRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubredditRule {
    #[serde(default)]
    pub short_name: String,
    #[serde(default)]
    pub description: String,
    /// "link", "comment" or "all".
    #[serde(default)]
    pub kind: String,
}

/// Render rules as numbered plain text for an LLM prompt.
pub fn rules_as_text(rules: &[SubredditRule]) -> String {
    rules
        .iter()
        .enumerate()
        .map(|(i, r)| {
            if r.description.trim().is_empty() {
                format!("{}. {}", i + 1, r.short_name.trim())
            } else {
                format!("{}. {}: {}", i + 1, r.short_name.trim(), r.description.trim())
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// --- OAuth ---

#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default)]
    pub scope: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditIdentity {
    pub id: String,
    pub name: String,
}

// --- Comments ---

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CommentResponse {
    pub json: CommentJson,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CommentJson {
    /// Each error is `[code, message, field]`.
    #[serde(default)]
    pub errors: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    pub data: Option<CommentData>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CommentData {
    #[serde(default)]
    pub things: Vec<Thing>,
}

/// Result of posting a comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentReceipt {
    /// Fullname of the new comment (`t1_*`), when Reddit returned one.
    pub fullname: Option<String>,
}

/// Search time window (`t=` parameter).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeWindow {
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl TimeWindow {
    pub fn as_str(self) -> &'static str {
        match self {
            TimeWindow::Hour => "hour",
            TimeWindow::Day => "day",
            TimeWindow::Week => "week",
            TimeWindow::Month => "month",
            TimeWindow::Year => "year",
        }
    }

    /// Search window for posts up to `days` old. Never narrower than a week.
    pub fn covering_days(days: u32) -> Self {
        match days {
            0..=7 => TimeWindow::Week,
            8..=31 => TimeWindow::Month,
            _ => TimeWindow::Year,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post_json() -> serde_json::Value {
        serde_json::json!({
            "id": "1abcde",
            "name": "t3_1abcde",
            "subreddit": "SaaS",
            "title": "What do you use for invoicing?",
            "selftext": "Looking for something simple",
            "author": "founder42",
            "permalink": "/r/SaaS/comments/1abcde/what_do_you_use_for_invoicing/",
            "url": "https://www.reddit.com/r/SaaS/comments/1abcde/what_do_you_use_for_invoicing/",
            "created_utc": 1_700_000_000.0,
            "score": 12,
            "num_comments": 4,
            "over_18": false,
            "locked": false,
            "archived": false,
            "removed_by_category": null,
            "some_unknown_field": {"ignored": true}
        })
    }

    #[test]
    fn listing_keeps_only_posts() {
        let listing: Listing = serde_json::from_value(serde_json::json!({
            "kind": "Listing",
            "data": {
                "after": null,
                "children": [
                    { "kind": "t3", "data": post_json() },
                    { "kind": "t1", "data": { "id": "c1", "body": "a comment" } },
                    { "kind": "t3", "data": { "title": "missing id" } }
                ]
            }
        }))
        .unwrap();
        let posts = listing.into_posts();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, "1abcde");
    }

    #[test]
    fn converts_to_candidate() {
        let post: RedditPost = serde_json::from_value(post_json()).unwrap();
        let c = post.into_candidate(LeadSource::RedditSearch, "invoicing").unwrap();
        assert_eq!(c.reddit_id, "1abcde");
        assert_eq!(c.fullname(), "t3_1abcde");
        assert_eq!(c.posted_at.timestamp(), 1_700_000_000);
        assert_eq!(c.matched_keyword, "invoicing");
        assert!(!c.removed);
    }

    #[test]
    fn removed_posts_are_flagged() {
        let mut post: RedditPost = serde_json::from_value(post_json()).unwrap();
        post.selftext = "[removed]".to_string();
        assert!(post.is_removed());

        let mut post: RedditPost = serde_json::from_value(post_json()).unwrap();
        post.removed_by_category = Some("moderator".to_string());
        assert!(post.is_removed());
    }

    #[test]
    fn missing_timestamp_drops_candidate() {
        let mut post: RedditPost = serde_json::from_value(post_json()).unwrap();
        post.created_utc = 0.0;
        assert!(post.into_candidate(LeadSource::WebSearch, "x").is_none());
    }

    #[test]
    fn rules_render_numbered() {
        let rules = vec![
            SubredditRule {
                short_name: "No self-promotion".into(),
                description: "Do not advertise your product.".into(),
                kind: "all".into(),
            },
            SubredditRule {
                short_name: "Be civil".into(),
                description: "".into(),
                kind: "all".into(),
            },
        ];
        assert_eq!(
            rules_as_text(&rules),
            "1. No self-promotion: Do not advertise your product.\n2. Be civil"
        );
    }

    #[test]
    fn window_covers_days() {
        assert_eq!(TimeWindow::covering_days(1), TimeWindow::Week);
        assert_eq!(TimeWindow::covering_days(7), TimeWindow::Week);
        assert_eq!(TimeWindow::covering_days(14), TimeWindow::Month);
        assert_eq!(TimeWindow::covering_days(90), TimeWindow::Year);
    }
}
