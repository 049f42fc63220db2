use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LeadPilotError;
use crate::keywords::normalize_keyword;

// --- Billing ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Free,
    Starter,
    Pro,
}

/// What a plan lets a user do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanLimits {
    pub max_products: usize,
    pub manual_runs_per_day: usize,
    pub autopilot: bool,
    pub daily_autopilot_comments: usize,
}

impl Plan {
    pub fn limits(self) -> PlanLimits {
        match self {
            Plan::Free => PlanLimits {
                max_products: 1,
                manual_runs_per_day: 3,
                autopilot: false,
                daily_autopilot_comments: 0,
            },
            Plan::Starter => PlanLimits {
                max_products: 3,
                manual_runs_per_day: 20,
                autopilot: true,
                daily_autopilot_comments: 5,
            },
            Plan::Pro => PlanLimits {
                max_products: 10,
                manual_runs_per_day: 100,
                autopilot: true,
                daily_autopilot_comments: 20,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Starter => "starter",
            Plan::Pro => "pro",
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = LeadPilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Plan::Free),
            "starter" => Ok(Plan::Starter),
            "pro" => Ok(Plan::Pro),
            other => Err(LeadPilotError::Validation(format!("unknown plan: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    None,
    Trialing,
    Active,
    PastDue,
    Canceled,
    Incomplete,
}

impl SubscriptionStatus {
    /// Map a Stripe subscription status string. Unknown values are treated
    /// as not paying.
    pub fn from_stripe(status: &str) -> Self {
        match status {
            "trialing" => Self::Trialing,
            "active" => Self::Active,
            "past_due" | "unpaid" => Self::PastDue,
            "canceled" | "incomplete_expired" => Self::Canceled,
            "incomplete" => Self::Incomplete,
            _ => Self::None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Trialing => "trialing",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Incomplete => "incomplete",
        }
    }

    pub fn is_paying(self) -> bool {
        matches!(self, Self::Active | Self::Trialing)
    }
}

impl FromStr for SubscriptionStatus {
    type Err = LeadPilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "trialing" => Ok(Self::Trialing),
            "active" => Ok(Self::Active),
            "past_due" => Ok(Self::PastDue),
            "canceled" => Ok(Self::Canceled),
            "incomplete" => Ok(Self::Incomplete),
            other => Err(LeadPilotError::Validation(format!(
                "unknown subscription status: {other}"
            ))),
        }
    }
}

// --- Users ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub reddit_username: String,
    pub email: Option<String>,
    #[serde(skip_serializing)]
    pub reddit_refresh_token: Option<String>,
    pub plan: Plan,
    pub subscription_status: SubscriptionStatus,
    pub stripe_customer_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// The plan whose limits actually apply. A paid plan without a paying
    /// subscription falls back to Free.
    pub fn effective_plan(&self) -> Plan {
        if self.plan != Plan::Free && self.subscription_status.is_paying() {
            self.plan
        } else {
            Plan::Free
        }
    }

    pub fn limits(&self) -> PlanLimits {
        self.effective_plan().limits()
    }
}

// --- Products ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: String,
    pub url: Option<String>,
    pub keywords: Vec<String>,
    /// Optional allow-list. Empty means every subreddit is eligible.
    pub subreddits: Vec<String>,
    pub autopilot: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn allows_subreddit(&self, subreddit: &str) -> bool {
        if self.subreddits.is_empty() {
            return true;
        }
        let wanted = normalize_subreddit(subreddit);
        self.subreddits.iter().any(|s| normalize_subreddit(s) == wanted)
    }
}

/// Product fields accepted from the API on create/update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub subreddits: Vec<String>,
    #[serde(default)]
    pub autopilot: bool,
}

pub const MAX_SEED_KEYWORDS: usize = 20;
pub const MAX_DESCRIPTION_LEN: usize = 2000;

impl NewProduct {
    /// Validate and normalise, returning the cleaned copy.
    pub fn validated(self) -> Result<Self, LeadPilotError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(LeadPilotError::Validation("name is required".to_string()));
        }
        if name.chars().count() > 120 {
            return Err(LeadPilotError::Validation("name is too long (max 120)".to_string()));
        }
        let description = self.description.trim().to_string();
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(LeadPilotError::Validation(format!(
                "description is too long (max {MAX_DESCRIPTION_LEN})"
            )));
        }

        let mut keywords: Vec<String> = Vec::new();
        for kw in self.keywords.iter().map(|k| normalize_keyword(k)) {
            if !kw.is_empty() && !keywords.contains(&kw) {
                keywords.push(kw);
            }
        }
        if keywords.is_empty() {
            return Err(LeadPilotError::Validation(
                "at least one keyword is required".to_string(),
            ));
        }
        if keywords.len() > MAX_SEED_KEYWORDS {
            return Err(LeadPilotError::Validation(format!(
                "too many keywords (max {MAX_SEED_KEYWORDS})"
            )));
        }

        let mut subreddits: Vec<String> = Vec::new();
        for sub in self.subreddits.iter().map(|s| normalize_subreddit(s)) {
            if !sub.is_empty() && !subreddits.contains(&sub) {
                subreddits.push(sub);
            }
        }

        let url = self
            .url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());
        if let Some(ref u) = url {
            if !(u.starts_with("https://") || u.starts_with("http://")) {
                return Err(LeadPilotError::Validation(
                    "url must start with http:// or https://".to_string(),
                ));
            }
        }

        Ok(Self {
            name,
            description,
            url,
            keywords,
            subreddits,
            autopilot: self.autopilot,
        })
    }
}

/// Lowercase, drop a leading `/r/` or `r/`.
pub fn normalize_subreddit(raw: &str) -> String {
    let s = raw.trim().trim_start_matches('/');
    let s = s
        .strip_prefix("r/")
        .or_else(|| s.strip_prefix("R/"))
        .unwrap_or(s);
    s.trim_end_matches('/').to_lowercase()
}

// --- Leads ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Replied,
    Dismissed,
}

impl LeadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Replied => "replied",
            LeadStatus::Dismissed => "dismissed",
        }
    }
}

impl FromStr for LeadStatus {
    type Err = LeadPilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(LeadStatus::New),
            "replied" => Ok(LeadStatus::Replied),
            "dismissed" => Ok(LeadStatus::Dismissed),
            other => Err(LeadPilotError::Validation(format!("unknown lead status: {other}"))),
        }
    }
}

/// Which search path found a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadSource {
    WebSearch,
    RedditSearch,
}

impl LeadSource {
    pub fn as_str(self) -> &'static str {
        match self {
            LeadSource::WebSearch => "web_search",
            LeadSource::RedditSearch => "reddit_search",
        }
    }
}

impl FromStr for LeadSource {
    type Err = LeadPilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "web_search" => Ok(LeadSource::WebSearch),
            "reddit_search" => Ok(LeadSource::RedditSearch),
            other => Err(LeadPilotError::Validation(format!("unknown lead source: {other}"))),
        }
    }
}

/// A Reddit post found by search, before classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    /// Base36 post id, without the `t3_` prefix.
    pub reddit_id: String,
    pub subreddit: String,
    pub title: String,
    pub body: String,
    pub author: String,
    pub permalink: String,
    pub url: String,
    pub posted_at: DateTime<Utc>,
    pub upvotes: i64,
    pub num_comments: i64,
    pub nsfw: bool,
    pub locked: bool,
    pub archived: bool,
    pub removed: bool,
    pub source: LeadSource,
    pub matched_keyword: String,
}

impl Candidate {
    pub fn fullname(&self) -> String {
        format!("t3_{}", self.reddit_id)
    }

    pub fn thread_url(&self) -> String {
        if self.permalink.starts_with("http") {
            self.permalink.clone()
        } else {
            format!("https://www.reddit.com{}", self.permalink)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    pub product_id: Uuid,
    pub reddit_id: String,
    pub subreddit: String,
    pub title: String,
    pub body: String,
    pub author: String,
    pub permalink: String,
    pub posted_at: DateTime<Utc>,
    /// Classifier relevance, 0..=100.
    pub score: i16,
    pub reason: String,
    pub matched_keyword: String,
    pub source: LeadSource,
    pub status: LeadStatus,
    pub draft: Option<String>,
    pub discovered_at: DateTime<Utc>,
}

impl Lead {
    pub fn fullname(&self) -> String {
        format!("t3_{}", self.reddit_id)
    }

    pub fn from_candidate(
        product_id: Uuid,
        candidate: &Candidate,
        score: u8,
        reason: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id,
            reddit_id: candidate.reddit_id.clone(),
            subreddit: candidate.subreddit.clone(),
            title: candidate.title.clone(),
            body: candidate.body.clone(),
            author: candidate.author.clone(),
            permalink: candidate.permalink.clone(),
            posted_at: candidate.posted_at,
            score: score.min(100) as i16,
            reason,
            matched_keyword: candidate.matched_keyword.clone(),
            source: candidate.source,
            status: LeadStatus::New,
            draft: None,
            discovered_at: now,
        }
    }
}

// --- Subreddit rule cache ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubredditVerdict {
    pub subreddit: String,
    pub allows_promotion: bool,
    pub reason: String,
    pub checked_at: DateTime<Utc>,
}

// --- Comments ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostedComment {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub product_id: Uuid,
    pub user_id: Uuid,
    /// Reddit fullname of the new comment (`t1_*`), when Reddit returned one.
    pub reddit_comment_id: Option<String>,
    pub body: String,
    pub trigger: RunTrigger,
    pub posted_at: DateTime<Utc>,
}

// --- Runs ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    Cron,
    Manual,
    Autopilot,
}

impl RunTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            RunTrigger::Cron => "cron",
            RunTrigger::Manual => "manual",
            RunTrigger::Autopilot => "autopilot",
        }
    }
}

impl FromStr for RunTrigger {
    type Err = LeadPilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cron" => Ok(RunTrigger::Cron),
            "manual" => Ok(RunTrigger::Manual),
            "autopilot" => Ok(RunTrigger::Autopilot),
            other => Err(LeadPilotError::Validation(format!("unknown run trigger: {other}"))),
        }
    }
}

/// Counters for one pipeline run (or an aggregate of several).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub keywords: usize,
    pub web_hits: usize,
    pub reddit_hits: usize,
    pub candidates: usize,
    pub duplicates: usize,
    pub filtered: usize,
    pub classified: usize,
    pub leads: usize,
    pub comments_posted: usize,
    pub errors: usize,
}

impl RunStats {
    pub fn absorb(&mut self, other: &RunStats) {
        self.keywords += other.keywords;
        self.web_hits += other.web_hits;
        self.reddit_hits += other.reddit_hits;
        self.candidates += other.candidates;
        self.duplicates += other.duplicates;
        self.filtered += other.filtered;
        self.classified += other.classified;
        self.leads += other.leads;
        self.comments_posted += other.comments_posted;
        self.errors += other.errors;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(plan: Plan, status: SubscriptionStatus) -> User {
        User {
            id: Uuid::new_v4(),
            reddit_username: "founder".to_string(),
            email: None,
            reddit_refresh_token: None,
            plan,
            subscription_status: status,
            stripe_customer_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn paid_plan_requires_paying_subscription() {
        assert_eq!(user(Plan::Pro, SubscriptionStatus::Active).effective_plan(), Plan::Pro);
        assert_eq!(user(Plan::Pro, SubscriptionStatus::Trialing).effective_plan(), Plan::Pro);
        assert_eq!(user(Plan::Pro, SubscriptionStatus::PastDue).effective_plan(), Plan::Free);
        assert_eq!(user(Plan::Starter, SubscriptionStatus::Canceled).effective_plan(), Plan::Free);
    }

    #[test]
    fn free_plan_has_no_autopilot() {
        let limits = Plan::Free.limits();
        assert!(!limits.autopilot);
        assert_eq!(limits.daily_autopilot_comments, 0);
        assert!(Plan::Pro.limits().max_products > Plan::Starter.limits().max_products);
    }

    #[test]
    fn stripe_status_mapping() {
        assert_eq!(SubscriptionStatus::from_stripe("active"), SubscriptionStatus::Active);
        assert_eq!(SubscriptionStatus::from_stripe("unpaid"), SubscriptionStatus::PastDue);
        assert_eq!(
            SubscriptionStatus::from_stripe("incomplete_expired"),
            SubscriptionStatus::Canceled
        );
        assert_eq!(SubscriptionStatus::from_stripe("paused"), SubscriptionStatus::None);
    }

    #[test]
    fn enum_strings_roundtrip() {
        for p in [Plan::Free, Plan::Starter, Plan::Pro] {
            assert_eq!(p.as_str().parse::<Plan>().unwrap(), p);
        }
        for s in [LeadStatus::New, LeadStatus::Replied, LeadStatus::Dismissed] {
            assert_eq!(s.as_str().parse::<LeadStatus>().unwrap(), s);
        }
        assert!("archived".parse::<LeadStatus>().is_err());
    }

    #[test]
    fn normalize_subreddit_strips_prefix() {
        assert_eq!(normalize_subreddit("/r/SaaS/"), "saas");
        assert_eq!(normalize_subreddit("r/startups"), "startups");
        assert_eq!(normalize_subreddit("Entrepreneur"), "entrepreneur");
    }

    #[test]
    fn product_validation_normalizes() {
        let p = NewProduct {
            name: "  Invoicer ".to_string(),
            description: "Invoices for freelancers".to_string(),
            url: Some(" https://invoicer.app ".to_string()),
            keywords: vec!["Invoice App".into(), "invoice app".into(), " ".into()],
            subreddits: vec!["r/Freelance".into(), "freelance".into()],
            autopilot: false,
        }
        .validated()
        .unwrap();
        assert_eq!(p.name, "Invoicer");
        assert_eq!(p.keywords, vec!["invoice app".to_string()]);
        assert_eq!(p.subreddits, vec!["freelance".to_string()]);
        assert_eq!(p.url.as_deref(), Some("https://invoicer.app"));
    }

    #[test]
    fn product_validation_rejects_missing_keywords() {
        let err = NewProduct {
            name: "X".to_string(),
            description: String::new(),
            url: None,
            keywords: vec![],
            subreddits: vec![],
            autopilot: false,
        }
        .validated()
        .unwrap_err();
        assert!(matches!(err, LeadPilotError::Validation(_)));
    }

    #[test]
    fn product_validation_rejects_bad_url() {
        let err = NewProduct {
            name: "X".to_string(),
            description: String::new(),
            url: Some("javascript:alert(1)".to_string()),
            keywords: vec!["x".into()],
            subreddits: vec![],
            autopilot: false,
        }
        .validated()
        .unwrap_err();
        assert!(matches!(err, LeadPilotError::Validation(_)));
    }

    #[test]
    fn allow_list_matching() {
        let now = Utc::now();
        let product = Product {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "X".into(),
            description: String::new(),
            url: None,
            keywords: vec!["x".into()],
            subreddits: vec!["saas".into()],
            autopilot: false,
            created_at: now,
            updated_at: now,
        };
        assert!(product.allows_subreddit("SaaS"));
        assert!(!product.allows_subreddit("startups"));
    }

    #[test]
    fn stats_absorb_adds() {
        let mut a = RunStats { leads: 2, errors: 1, ..Default::default() };
        a.absorb(&RunStats { leads: 3, comments_posted: 1, ..Default::default() });
        assert_eq!(a.leads, 5);
        assert_eq!(a.errors, 1);
        assert_eq!(a.comments_posted, 1);
    }
}
