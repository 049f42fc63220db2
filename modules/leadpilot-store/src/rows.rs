// Row types as they come out of Postgres. Enum columns are TEXT and get
// parsed on the way out so that a bad value surfaces as StoreError::Corrupt.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use leadpilot_common::{
    Lead, LeadSource, LeadStatus, Plan, PostedComment, Product, RunTrigger, SubredditVerdict,
    SubscriptionStatus, User,
};
use uuid::Uuid;

use crate::error::{Result, StoreError};

fn parse<T: FromStr>(table: &'static str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| StoreError::Corrupt {
        table,
        message: e.to_string(),
    })
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct UserRow {
    pub id: Uuid,
    pub reddit_username: String,
    pub email: Option<String>,
    pub reddit_refresh_token: Option<String>,
    pub plan: String,
    pub subscription_status: String,
    pub stripe_customer_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UserRow {
    pub fn into_user(self) -> Result<User> {
        Ok(User {
            id: self.id,
            reddit_username: self.reddit_username,
            email: self.email,
            reddit_refresh_token: self.reddit_refresh_token,
            plan: parse::<Plan>("users", &self.plan)?,
            subscription_status: parse::<SubscriptionStatus>("users", &self.subscription_status)?,
            stripe_customer_id: self.stripe_customer_id,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct ProductRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: String,
    pub url: Option<String>,
    pub keywords: Vec<String>,
    pub subreddits: Vec<String>,
    pub autopilot: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ProductRow> for Product {
    fn from(r: ProductRow) -> Self {
        Product {
            id: r.id,
            user_id: r.user_id,
            name: r.name,
            description: r.description,
            url: r.url,
            keywords: r.keywords,
            subreddits: r.subreddits,
            autopilot: r.autopilot,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct LeadRow {
    pub id: Uuid,
    pub product_id: Uuid,
    pub reddit_id: String,
    pub subreddit: String,
    pub title: String,
    pub body: String,
    pub author: String,
    pub permalink: String,
    pub posted_at: DateTime<Utc>,
    pub score: i16,
    pub reason: String,
    pub matched_keyword: String,
    pub source: String,
    pub status: String,
    pub draft: Option<String>,
    pub discovered_at: DateTime<Utc>,
}

impl LeadRow {
    pub fn into_lead(self) -> Result<Lead> {
        Ok(Lead {
            id: self.id,
            product_id: self.product_id,
            reddit_id: self.reddit_id,
            subreddit: self.subreddit,
            title: self.title,
            body: self.body,
            author: self.author,
            permalink: self.permalink,
            posted_at: self.posted_at,
            score: self.score,
            reason: self.reason,
            matched_keyword: self.matched_keyword,
            source: parse::<LeadSource>("leads", &self.source)?,
            status: parse::<LeadStatus>("leads", &self.status)?,
            draft: self.draft,
            discovered_at: self.discovered_at,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct VerdictRow {
    pub subreddit: String,
    pub allows_promotion: bool,
    pub reason: String,
    pub checked_at: DateTime<Utc>,
}

impl From<VerdictRow> for SubredditVerdict {
    fn from(r: VerdictRow) -> Self {
        SubredditVerdict {
            subreddit: r.subreddit,
            allows_promotion: r.allows_promotion,
            reason: r.reason,
            checked_at: r.checked_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct CommentRow {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub product_id: Uuid,
    pub user_id: Uuid,
    pub reddit_comment_id: Option<String>,
    pub body: String,
    pub trigger: String,
    pub posted_at: DateTime<Utc>,
}

impl CommentRow {
    pub fn into_comment(self) -> Result<PostedComment> {
        Ok(PostedComment {
            id: self.id,
            lead_id: self.lead_id,
            product_id: self.product_id,
            user_id: self.user_id,
            reddit_comment_id: self.reddit_comment_id,
            body: self.body,
            trigger: parse::<RunTrigger>("comments", &self.trigger)?,
            posted_at: self.posted_at,
        })
    }
}
