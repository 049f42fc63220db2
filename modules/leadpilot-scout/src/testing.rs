// Test mocks for the pipeline.
//
// One mock per trait boundary:
// - MockSearcher (WebSearcher): keyword -> search hits
// - MockReddit (RedditApi): query -> posts, fullname -> post, rules, comments
// - MockAnalyst (LeadAnalyst): reddit_id -> classification, canned replies
// - MockStore (LeadStore): in-memory tables
//
// Plus builders for posts, products and users.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use google_search::SearchHit;
use leadpilot_common::config::PipelineConfig;
use leadpilot_common::{
    Candidate, Lead, LeadStatus, Plan, PostedComment, Product, RunStats, RunTrigger,
    SubredditVerdict, SubscriptionStatus, User,
};
use reddit_client::{
    CommentReceipt, RedditError, RedditPost, SubredditRule, TimeWindow, TokenGrant,
};

use crate::analyst::{Classification, RuleReview};
use crate::scout::Scout;
use crate::traits::{LeadAnalyst, LeadStore, RedditApi, RedditResult, WebSearcher};

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn reddit_post(id: &str, subreddit: &str, hours_old: i64) -> RedditPost {
    RedditPost {
        id: id.to_string(),
        name: format!("t3_{id}"),
        subreddit: subreddit.to_string(),
        title: format!("Looking for help ({id})"),
        selftext: "Any recommendations?".to_string(),
        author: "someone".to_string(),
        permalink: format!("/r/{subreddit}/comments/{id}/slug/"),
        url: format!("https://www.reddit.com/r/{subreddit}/comments/{id}/slug/"),
        created_utc: (Utc::now() - Duration::hours(hours_old)).timestamp() as f64,
        score: 1,
        num_comments: 0,
        over_18: false,
        locked: false,
        archived: false,
        removed_by_category: None,
    }
}

pub fn web_hit(id: &str, subreddit: &str) -> SearchHit {
    SearchHit {
        link: format!("https://www.reddit.com/r/{subreddit}/comments/{id}/slug/"),
        title: format!("{id} : r/{subreddit}"),
        snippet: String::new(),
    }
}

pub fn test_user(plan: Plan) -> User {
    User {
        id: Uuid::new_v4(),
        reddit_username: "founder".to_string(),
        email: None,
        reddit_refresh_token: Some("refresh-token".to_string()),
        plan,
        subscription_status: if plan == Plan::Free {
            SubscriptionStatus::None
        } else {
            SubscriptionStatus::Active
        },
        stripe_customer_id: None,
        created_at: Utc::now(),
    }
}

pub fn test_product(user: &User, keywords: &[&str]) -> Product {
    let now = Utc::now();
    Product {
        id: Uuid::new_v4(),
        user_id: user.id,
        name: "Invoicer".to_string(),
        description: "Simple invoicing for freelancers".to_string(),
        url: Some("https://invoicer.app".to_string()),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        subreddits: Vec::new(),
        autopilot: true,
        created_at: now,
        updated_at: now,
    }
}

pub fn test_lead(product: &Product, id: &str, subreddit: &str, score: u8, hours_old: i64) -> Lead {
    let candidate = reddit_post(id, subreddit, hours_old)
        .into_candidate(leadpilot_common::LeadSource::RedditSearch, "test");
    let candidate = match candidate {
        Some(c) => c,
        None => panic!("test post {id} has no timestamp"),
    };
    Lead::from_candidate(product.id, &candidate, score, "test".to_string(), Utc::now())
}

/// Pipeline config with no waits between posts.
pub fn fast_config() -> PipelineConfig {
    PipelineConfig {
        post_interval: std::time::Duration::ZERO,
        ..PipelineConfig::default()
    }
}

pub fn test_scout(
    searcher: Arc<MockSearcher>,
    reddit: Arc<MockReddit>,
    analyst: Arc<MockAnalyst>,
    store: Arc<MockStore>,
) -> Scout {
    Scout::new(searcher, reddit, analyst, store, fast_config())
}

// ---------------------------------------------------------------------------
// MockSearcher
// ---------------------------------------------------------------------------

/// Unregistered keywords return no hits. `.failing()` keywords error.
#[derive(Default)]
pub struct MockSearcher {
    hits: HashMap<String, Vec<SearchHit>>,
    failing: HashSet<String>,
    calls: Mutex<Vec<(String, u32)>>,
}

impl MockSearcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_keyword(mut self, keyword: &str, hits: Vec<SearchHit>) -> Self {
        self.hits.insert(keyword.to_string(), hits);
        self
    }

    pub fn failing(mut self, keyword: &str) -> Self {
        self.failing.insert(keyword.to_string());
        self
    }

    pub fn calls(&self) -> Vec<(String, u32)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebSearcher for MockSearcher {
    async fn reddit_threads(&self, keyword: &str, days: u32) -> Result<Vec<SearchHit>> {
        self.calls.lock().unwrap().push((keyword.to_string(), days));
        if self.failing.contains(keyword) {
            bail!("MockSearcher: search failed for {keyword}");
        }
        Ok(self.hits.get(keyword).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// MockReddit
// ---------------------------------------------------------------------------

pub enum RulesReply {
    Rules(Vec<SubredditRule>),
    Fail,
}

/// Stateful Reddit double. Comment replies are consumed in order; once the
/// queue is empty every comment succeeds.
#[derive(Default)]
pub struct MockReddit {
    searches: HashMap<String, Vec<RedditPost>>,
    posts: HashMap<String, RedditPost>,
    rules: HashMap<String, RulesReply>,
    comment_replies: Mutex<VecDeque<RedditResult<CommentReceipt>>>,
    rotated_refresh_token: Option<String>,
    searched: Mutex<Vec<(String, TimeWindow)>>,
    hydrated: Mutex<Vec<String>>,
    rules_fetched: Mutex<Vec<String>>,
    submitted: Mutex<Vec<(String, String, String)>>,
}

impl MockReddit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_search(mut self, query: &str, posts: Vec<RedditPost>) -> Self {
        self.searches.insert(query.to_string(), posts);
        self
    }

    /// Make a post resolvable through `posts_by_fullname`.
    pub fn with_post(mut self, post: RedditPost) -> Self {
        self.posts.insert(format!("t3_{}", post.id), post);
        self
    }

    pub fn on_rules(mut self, subreddit: &str, rules: Vec<SubredditRule>) -> Self {
        self.rules.insert(subreddit.to_lowercase(), RulesReply::Rules(rules));
        self
    }

    pub fn failing_rules(mut self, subreddit: &str) -> Self {
        self.rules.insert(subreddit.to_lowercase(), RulesReply::Fail);
        self
    }

    pub fn comment_reply(self, reply: RedditResult<CommentReceipt>) -> Self {
        self.comment_replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn rotating_refresh_token(mut self, token: &str) -> Self {
        self.rotated_refresh_token = Some(token.to_string());
        self
    }

    pub fn searched(&self) -> Vec<(String, TimeWindow)> {
        self.searched.lock().unwrap().clone()
    }

    pub fn hydrated(&self) -> Vec<String> {
        self.hydrated.lock().unwrap().clone()
    }

    pub fn rules_fetched(&self) -> Vec<String> {
        self.rules_fetched.lock().unwrap().clone()
    }

    /// (access_token, thing_id, text) per submitted comment.
    pub fn submitted(&self) -> Vec<(String, String, String)> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl RedditApi for MockReddit {
    async fn search(&self, query: &str, window: TimeWindow, _limit: u32) -> RedditResult<Vec<RedditPost>> {
        self.searched.lock().unwrap().push((query.to_string(), window));
        Ok(self.searches.get(query).cloned().unwrap_or_default())
    }

    async fn posts_by_fullname(&self, fullnames: &[String]) -> RedditResult<Vec<RedditPost>> {
        self.hydrated.lock().unwrap().extend(fullnames.iter().cloned());
        Ok(fullnames
            .iter()
            .filter_map(|f| self.posts.get(f).cloned())
            .collect())
    }

    async fn subreddit_rules(&self, subreddit: &str) -> RedditResult<Vec<SubredditRule>> {
        self.rules_fetched.lock().unwrap().push(subreddit.to_string());
        match self.rules.get(&subreddit.to_lowercase()) {
            Some(RulesReply::Rules(rules)) => Ok(rules.clone()),
            Some(RulesReply::Fail) => Err(RedditError::Api {
                status: 403,
                message: "private subreddit".to_string(),
            }),
            None => Ok(Vec::new()),
        }
    }

    async fn refresh_user_token(&self, refresh_token: &str) -> RedditResult<TokenGrant> {
        if refresh_token.is_empty() {
            return Err(RedditError::Auth("empty refresh token".to_string()));
        }
        Ok(TokenGrant {
            access_token: format!("access-for-{refresh_token}"),
            refresh_token: self.rotated_refresh_token.clone(),
            expires_in: 3600,
            scope: "identity submit read".to_string(),
        })
    }

    async fn submit_comment(
        &self,
        access_token: &str,
        thing_id: &str,
        text: &str,
    ) -> RedditResult<CommentReceipt> {
        let reply = self.comment_replies.lock().unwrap().pop_front();
        let reply = reply.unwrap_or_else(|| {
            Ok(CommentReceipt {
                fullname: Some(format!("t1_re_{}", thing_id.trim_start_matches("t3_"))),
            })
        });
        if reply.is_ok() {
            self.submitted.lock().unwrap().push((
                access_token.to_string(),
                thing_id.to_string(),
                text.to_string(),
            ));
        }
        reply
    }
}

// ---------------------------------------------------------------------------
// MockAnalyst
// ---------------------------------------------------------------------------

/// Unregistered posts classify as irrelevant. Unregistered subreddits'
/// rules are reviewed as allowing promotion.
#[derive(Default)]
pub struct MockAnalyst {
    expansion: Option<Vec<String>>,
    classifications: HashMap<String, Classification>,
    failing_classifications: HashSet<String>,
    rule_reviews: HashMap<String, RuleReview>,
    comment_text: Option<String>,
    reviews_requested: Mutex<Vec<String>>,
    classified: Mutex<Vec<String>>,
}

impl MockAnalyst {
    pub fn new() -> Self {
        Self::default()
    }

    /// Without this, expansion fails (exercising the seed fallback).
    pub fn expanding_to(mut self, keywords: &[&str]) -> Self {
        self.expansion = Some(keywords.iter().map(|k| k.to_string()).collect());
        self
    }

    pub fn scoring(mut self, reddit_id: &str, relevant: bool, score: u8) -> Self {
        self.classifications.insert(
            reddit_id.to_string(),
            Classification {
                relevant,
                score,
                reason: format!("mock score {score}"),
            },
        );
        self
    }

    pub fn failing_classification(mut self, reddit_id: &str) -> Self {
        self.failing_classifications.insert(reddit_id.to_string());
        self
    }

    pub fn reviewing(mut self, subreddit: &str, allows_promotion: bool) -> Self {
        self.rule_reviews.insert(
            subreddit.to_lowercase(),
            RuleReview {
                allows_promotion,
                reason: format!("mock review for {subreddit}"),
            },
        );
        self
    }

    pub fn commenting(mut self, text: &str) -> Self {
        self.comment_text = Some(text.to_string());
        self
    }

    pub fn reviews_requested(&self) -> Vec<String> {
        self.reviews_requested.lock().unwrap().clone()
    }

    pub fn classified(&self) -> Vec<String> {
        self.classified.lock().unwrap().clone()
    }
}

#[async_trait]
impl LeadAnalyst for MockAnalyst {
    async fn expand_keywords(&self, _product: &Product) -> Result<Vec<String>> {
        match self.expansion {
            Some(ref list) => Ok(list.clone()),
            None => bail!("MockAnalyst: expansion unavailable"),
        }
    }

    async fn classify(&self, _product: &Product, candidate: &Candidate) -> Result<Classification> {
        self.classified.lock().unwrap().push(candidate.reddit_id.clone());
        if self.failing_classifications.contains(&candidate.reddit_id) {
            bail!("MockAnalyst: classification failed for {}", candidate.reddit_id);
        }
        Ok(self
            .classifications
            .get(&candidate.reddit_id)
            .cloned()
            .unwrap_or(Classification {
                relevant: false,
                score: 0,
                reason: "unregistered".to_string(),
            }))
    }

    async fn review_rules(&self, subreddit: &str, _rules_text: &str) -> Result<RuleReview> {
        self.reviews_requested.lock().unwrap().push(subreddit.to_string());
        Ok(self
            .rule_reviews
            .get(&subreddit.to_lowercase())
            .cloned()
            .unwrap_or(RuleReview {
                allows_promotion: true,
                reason: "mock default".to_string(),
            }))
    }

    async fn write_comment(&self, product: &Product, lead: &Lead) -> Result<String> {
        Ok(self
            .comment_text
            .clone()
            .unwrap_or_else(|| format!("Reply to {} mentioning {}", lead.reddit_id, product.name)))
    }
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: Uuid,
    pub product_id: Uuid,
    pub user_id: Uuid,
    pub trigger: RunTrigger,
    pub stats: Option<RunStats>,
    pub error: Option<String>,
}

/// In-memory tables with the same uniqueness rules as Postgres.
#[derive(Default)]
pub struct MockStore {
    users: Mutex<HashMap<Uuid, User>>,
    products: Mutex<Vec<Product>>,
    leads: Mutex<Vec<Lead>>,
    verdicts: Mutex<HashMap<String, SubredditVerdict>>,
    comments: Mutex<Vec<PostedComment>>,
    runs: Mutex<Vec<RunRecord>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(self, user: User) -> Self {
        self.users.lock().unwrap().insert(user.id, user);
        self
    }

    pub fn with_product(self, product: Product) -> Self {
        self.products.lock().unwrap().push(product);
        self
    }

    pub fn with_lead(self, lead: Lead) -> Self {
        self.leads.lock().unwrap().push(lead);
        self
    }

    pub fn with_verdict(self, verdict: SubredditVerdict) -> Self {
        self.verdicts
            .lock()
            .unwrap()
            .insert(verdict.subreddit.to_lowercase(), verdict);
        self
    }

    /// Pretend a comment was already posted at `at`.
    pub fn with_comment_at(self, product: &Product, at: DateTime<Utc>) -> Self {
        self.comments.lock().unwrap().push(PostedComment {
            id: Uuid::new_v4(),
            lead_id: Uuid::new_v4(),
            product_id: product.id,
            user_id: product.user_id,
            reddit_comment_id: None,
            body: "earlier".to_string(),
            trigger: RunTrigger::Autopilot,
            posted_at: at,
        });
        self
    }

    pub fn leads(&self) -> Vec<Lead> {
        self.leads.lock().unwrap().clone()
    }

    pub fn lead(&self, id: Uuid) -> Option<Lead> {
        self.leads.lock().unwrap().iter().find(|l| l.id == id).cloned()
    }

    pub fn comments(&self) -> Vec<PostedComment> {
        self.comments.lock().unwrap().clone()
    }

    pub fn runs(&self) -> Vec<RunRecord> {
        self.runs.lock().unwrap().clone()
    }

    pub fn verdict(&self, subreddit: &str) -> Option<SubredditVerdict> {
        self.verdicts.lock().unwrap().get(&subreddit.to_lowercase()).cloned()
    }

    pub fn user_snapshot(&self, id: Uuid) -> Option<User> {
        self.users.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl LeadStore for MockStore {
    async fn user(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.users.lock().unwrap().get(&id).cloned())
    }

    async fn set_refresh_token(&self, user_id: Uuid, refresh_token: &str) -> Result<()> {
        if let Some(user) = self.users.lock().unwrap().get_mut(&user_id) {
            user.reddit_refresh_token = Some(refresh_token.to_string());
        }
        Ok(())
    }

    async fn all_products(&self) -> Result<Vec<Product>> {
        Ok(self.products.lock().unwrap().clone())
    }

    async fn autopilot_products(&self) -> Result<Vec<Product>> {
        Ok(self
            .products
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.autopilot)
            .cloned()
            .collect())
    }

    async fn known_reddit_ids(&self, product_id: Uuid, reddit_ids: &[String]) -> Result<HashSet<String>> {
        let wanted: HashSet<&String> = reddit_ids.iter().collect();
        Ok(self
            .leads
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.product_id == product_id && wanted.contains(&l.reddit_id))
            .map(|l| l.reddit_id.clone())
            .collect())
    }

    async fn insert_leads(&self, leads: &[Lead]) -> Result<u64> {
        let mut stored = self.leads.lock().unwrap();
        let mut inserted = 0;
        for lead in leads {
            let exists = stored
                .iter()
                .any(|l| l.product_id == lead.product_id && l.reddit_id == lead.reddit_id);
            if !exists {
                stored.push(lead.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn autopilot_queue(&self, product_id: Uuid, min_score: i16, limit: i64) -> Result<Vec<Lead>> {
        let mut queue: Vec<Lead> = self
            .leads
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.product_id == product_id && l.status == LeadStatus::New && l.score >= min_score)
            .cloned()
            .collect();
        queue.sort_by(|a, b| b.posted_at.cmp(&a.posted_at));
        queue.truncate(limit.max(0) as usize);
        Ok(queue)
    }

    async fn set_lead_status(&self, lead_id: Uuid, status: LeadStatus) -> Result<()> {
        if let Some(lead) = self.leads.lock().unwrap().iter_mut().find(|l| l.id == lead_id) {
            lead.status = status;
        }
        Ok(())
    }

    async fn set_lead_draft(&self, lead_id: Uuid, draft: &str) -> Result<()> {
        if let Some(lead) = self.leads.lock().unwrap().iter_mut().find(|l| l.id == lead_id) {
            lead.draft = Some(draft.to_string());
        }
        Ok(())
    }

    async fn cached_verdict(&self, subreddit: &str, max_age: Duration) -> Result<Option<SubredditVerdict>> {
        let cutoff = Utc::now() - max_age;
        Ok(self
            .verdicts
            .lock()
            .unwrap()
            .get(&subreddit.to_lowercase())
            .filter(|v| v.checked_at > cutoff)
            .cloned())
    }

    async fn save_verdict(&self, verdict: &SubredditVerdict) -> Result<()> {
        self.verdicts
            .lock()
            .unwrap()
            .insert(verdict.subreddit.to_lowercase(), verdict.clone());
        Ok(())
    }

    async fn record_comment(&self, comment: &PostedComment) -> Result<()> {
        self.comments.lock().unwrap().push(comment.clone());
        Ok(())
    }

    async fn comments_posted_since(&self, product_id: Uuid, since: DateTime<Utc>) -> Result<i64> {
        Ok(self
            .comments
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.product_id == product_id && c.posted_at >= since)
            .count() as i64)
    }

    async fn start_run(&self, product_id: Uuid, user_id: Uuid, trigger: RunTrigger) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.runs.lock().unwrap().push(RunRecord {
            id,
            product_id,
            user_id,
            trigger,
            stats: None,
            error: None,
        });
        Ok(id)
    }

    async fn finish_run(&self, run_id: Uuid, stats: &RunStats, error: Option<&str>) -> Result<()> {
        if let Some(run) = self.runs.lock().unwrap().iter_mut().find(|r| r.id == run_id) {
            run.stats = Some(stats.clone());
            run.error = error.map(str::to_string);
        }
        Ok(())
    }
}
