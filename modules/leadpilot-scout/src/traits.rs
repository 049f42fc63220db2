// Trait seams between the pipeline and the outside world.
//
// WebSearcher: Google Custom Search restricted to reddit.com.
// RedditApi: the subset of the Reddit client the pipeline calls. Errors stay
//   typed so the auto-pilot can tell a rate limit from a rejected comment.
// LeadAnalyst: every LLM judgement (expansion, relevance, rules, comments).
// LeadStore: persistence.
//
// Mocks for all four live in `testing`.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use google_search::{reddit_query, GoogleSearch, SearchHit, SearchQuery};
use leadpilot_common::{
    Candidate, Lead, LeadStatus, PostedComment, Product, RunStats, RunTrigger, SubredditVerdict,
    User,
};
use leadpilot_store::Store;
use reddit_client::{
    CommentReceipt, RedditClient, RedditPost, SubredditRule, TimeWindow, TokenGrant,
};

use crate::analyst::{Classification, RuleReview};

pub type RedditResult<T> = reddit_client::Result<T>;

// ---------------------------------------------------------------------------
// WebSearcher
// ---------------------------------------------------------------------------

#[async_trait]
pub trait WebSearcher: Send + Sync {
    /// Reddit threads about `keyword` indexed within the last `days`.
    async fn reddit_threads(&self, keyword: &str, days: u32) -> Result<Vec<SearchHit>>;
}

#[async_trait]
impl WebSearcher for GoogleSearch {
    async fn reddit_threads(&self, keyword: &str, days: u32) -> Result<Vec<SearchHit>> {
        let query = SearchQuery::new(reddit_query(keyword)).within_days(days);
        Ok(self.search(&query).await?)
    }
}

// ---------------------------------------------------------------------------
// RedditApi
// ---------------------------------------------------------------------------

#[async_trait]
pub trait RedditApi: Send + Sync {
    async fn search(&self, query: &str, window: TimeWindow, limit: u32) -> RedditResult<Vec<RedditPost>>;

    async fn posts_by_fullname(&self, fullnames: &[String]) -> RedditResult<Vec<RedditPost>>;

    async fn subreddit_rules(&self, subreddit: &str) -> RedditResult<Vec<SubredditRule>>;

    async fn refresh_user_token(&self, refresh_token: &str) -> RedditResult<TokenGrant>;

    async fn submit_comment(
        &self,
        access_token: &str,
        thing_id: &str,
        text: &str,
    ) -> RedditResult<CommentReceipt>;
}

#[async_trait]
impl RedditApi for RedditClient {
    async fn search(&self, query: &str, window: TimeWindow, limit: u32) -> RedditResult<Vec<RedditPost>> {
        RedditClient::search(self, query, window, limit).await
    }

    async fn posts_by_fullname(&self, fullnames: &[String]) -> RedditResult<Vec<RedditPost>> {
        RedditClient::posts_by_fullname(self, fullnames).await
    }

    async fn subreddit_rules(&self, subreddit: &str) -> RedditResult<Vec<SubredditRule>> {
        RedditClient::subreddit_rules(self, subreddit).await
    }

    async fn refresh_user_token(&self, refresh_token: &str) -> RedditResult<TokenGrant> {
        RedditClient::refresh_user_token(self, refresh_token).await
    }

    async fn submit_comment(
        &self,
        access_token: &str,
        thing_id: &str,
        text: &str,
    ) -> RedditResult<CommentReceipt> {
        RedditClient::submit_comment(self, access_token, thing_id, text).await
    }
}

// ---------------------------------------------------------------------------
// LeadAnalyst
// ---------------------------------------------------------------------------

#[async_trait]
pub trait LeadAnalyst: Send + Sync {
    /// Extra search phrases for a product. Unnormalised; the caller merges.
    async fn expand_keywords(&self, product: &Product) -> Result<Vec<String>>;

    async fn classify(&self, product: &Product, candidate: &Candidate) -> Result<Classification>;

    /// Whether a subreddit's rules tolerate a product mention.
    async fn review_rules(&self, subreddit: &str, rules_text: &str) -> Result<RuleReview>;

    /// A reply to the lead's thread that mentions the product.
    async fn write_comment(&self, product: &Product, lead: &Lead) -> Result<String>;
}

// ---------------------------------------------------------------------------
// LeadStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn user(&self, id: Uuid) -> Result<Option<User>>;

    /// Reddit may rotate the refresh token when it is used.
    async fn set_refresh_token(&self, user_id: Uuid, refresh_token: &str) -> Result<()>;

    async fn all_products(&self) -> Result<Vec<Product>>;

    async fn autopilot_products(&self) -> Result<Vec<Product>>;

    async fn known_reddit_ids(&self, product_id: Uuid, reddit_ids: &[String]) -> Result<HashSet<String>>;

    /// Returns how many were new.
    async fn insert_leads(&self, leads: &[Lead]) -> Result<u64>;

    async fn autopilot_queue(&self, product_id: Uuid, min_score: i16, limit: i64) -> Result<Vec<Lead>>;

    async fn set_lead_status(&self, lead_id: Uuid, status: LeadStatus) -> Result<()>;

    async fn set_lead_draft(&self, lead_id: Uuid, draft: &str) -> Result<()>;

    async fn cached_verdict(&self, subreddit: &str, max_age: Duration) -> Result<Option<SubredditVerdict>>;

    async fn save_verdict(&self, verdict: &SubredditVerdict) -> Result<()>;

    async fn record_comment(&self, comment: &PostedComment) -> Result<()>;

    async fn comments_posted_since(&self, product_id: Uuid, since: DateTime<Utc>) -> Result<i64>;

    async fn start_run(&self, product_id: Uuid, user_id: Uuid, trigger: RunTrigger) -> Result<Uuid>;

    async fn finish_run(&self, run_id: Uuid, stats: &RunStats, error: Option<&str>) -> Result<()>;
}

#[async_trait]
impl LeadStore for Store {
    async fn user(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.user_by_id(id).await?)
    }

    async fn set_refresh_token(&self, user_id: Uuid, refresh_token: &str) -> Result<()> {
        Ok(Store::set_refresh_token(self, user_id, Some(refresh_token)).await?)
    }

    async fn all_products(&self) -> Result<Vec<Product>> {
        Ok(Store::all_products(self).await?)
    }

    async fn autopilot_products(&self) -> Result<Vec<Product>> {
        Ok(Store::autopilot_products(self).await?)
    }

    async fn known_reddit_ids(&self, product_id: Uuid, reddit_ids: &[String]) -> Result<HashSet<String>> {
        Ok(Store::known_reddit_ids(self, product_id, reddit_ids).await?)
    }

    async fn insert_leads(&self, leads: &[Lead]) -> Result<u64> {
        Ok(Store::insert_leads(self, leads).await?)
    }

    async fn autopilot_queue(&self, product_id: Uuid, min_score: i16, limit: i64) -> Result<Vec<Lead>> {
        Ok(Store::autopilot_queue(self, product_id, min_score, limit).await?)
    }

    async fn set_lead_status(&self, lead_id: Uuid, status: LeadStatus) -> Result<()> {
        Store::set_lead_status(self, lead_id, status).await?;
        Ok(())
    }

    async fn set_lead_draft(&self, lead_id: Uuid, draft: &str) -> Result<()> {
        Store::set_lead_draft(self, lead_id, draft).await?;
        Ok(())
    }

    async fn cached_verdict(&self, subreddit: &str, max_age: Duration) -> Result<Option<SubredditVerdict>> {
        Ok(Store::cached_verdict(self, subreddit, max_age).await?)
    }

    async fn save_verdict(&self, verdict: &SubredditVerdict) -> Result<()> {
        Ok(Store::save_verdict(self, verdict).await?)
    }

    async fn record_comment(&self, comment: &PostedComment) -> Result<()> {
        Ok(Store::record_comment(self, comment).await?)
    }

    async fn comments_posted_since(&self, product_id: Uuid, since: DateTime<Utc>) -> Result<i64> {
        Ok(Store::comments_posted_since(self, product_id, since).await?)
    }

    async fn start_run(&self, product_id: Uuid, user_id: Uuid, trigger: RunTrigger) -> Result<Uuid> {
        Ok(Store::start_run(self, product_id, user_id, trigger).await?)
    }

    async fn finish_run(&self, run_id: Uuid, stats: &RunStats, error: Option<&str>) -> Result<()> {
        Ok(Store::finish_run(self, run_id, stats, error).await?)
    }
}
