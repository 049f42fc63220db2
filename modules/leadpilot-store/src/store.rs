use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use leadpilot_common::{
    Lead, LeadStatus, NewProduct, Plan, PostedComment, Product, RunStats, RunTrigger,
    SubredditVerdict, SubscriptionStatus, User,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::rows::{CommentRow, LeadRow, ProductRow, UserRow, VerdictRow};

const USER_COLUMNS: &str = "id, reddit_username, email, reddit_refresh_token, plan, \
     subscription_status, stripe_customer_id, created_at";

const PRODUCT_COLUMNS: &str =
    "id, user_id, name, description, url, keywords, subreddits, autopilot, created_at, updated_at";

const LEAD_COLUMNS: &str = "id, product_id, reddit_id, subreddit, title, body, author, \
     permalink, posted_at, score, reason, matched_keyword, source, status, draft, discovered_at";

/// Postgres-backed store. Cloning shares the pool.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Create the user on first login, otherwise return the existing row.
    /// A supplied refresh token replaces the stored one.
    pub async fn upsert_user(
        &self,
        reddit_username: &str,
        refresh_token: Option<&str>,
    ) -> Result<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (id, reddit_username, reddit_refresh_token)
            VALUES ($1, $2, $3)
            ON CONFLICT (reddit_username) DO UPDATE
                SET reddit_refresh_token = COALESCE(EXCLUDED.reddit_refresh_token, users.reddit_refresh_token),
                    updated_at = now()
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(reddit_username)
        .bind(refresh_token)
        .fetch_one(&self.pool)
        .await?;

        row.into_user()
    }

    pub async fn user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(UserRow::into_user).transpose()
    }

    pub async fn set_refresh_token(&self, user_id: Uuid, refresh_token: Option<&str>) -> Result<()> {
        sqlx::query(
            "UPDATE users SET reddit_refresh_token = $2, updated_at = now() WHERE id = $1",
        )
        .bind(user_id)
        .bind(refresh_token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Attach a Stripe customer to a user after checkout.
    pub async fn link_stripe_customer(&self, user_id: Uuid, customer_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE users SET stripe_customer_id = $2, updated_at = now() WHERE id = $1",
        )
        .bind(user_id)
        .bind(customer_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Apply a subscription change to whoever owns `customer_id`. `plan` of
    /// `None` leaves the plan untouched. Returns false when no user has that
    /// customer id (yet).
    pub async fn update_subscription(
        &self,
        customer_id: &str,
        plan: Option<Plan>,
        status: SubscriptionStatus,
        subscription_id: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET plan = COALESCE($2, plan),
                subscription_status = $3,
                stripe_subscription_id = COALESCE($4, stripe_subscription_id),
                updated_at = now()
            WHERE stripe_customer_id = $1
            "#,
        )
        .bind(customer_id)
        .bind(plan.map(Plan::as_str))
        .bind(status.as_str())
        .bind(subscription_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!(customer_id, "Subscription update for unknown Stripe customer");
        }
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Products
    // =========================================================================

    pub async fn products_for_user(&self, user_id: Uuid) -> Result<Vec<Product>> {
        let rows = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE user_id = $1 ORDER BY created_at"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Product::from).collect())
    }

    pub async fn count_products(&self, user_id: Uuid) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM products WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// A product, only if `user_id` owns it.
    pub async fn product_for_user(&self, user_id: Uuid, product_id: Uuid) -> Result<Option<Product>> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 AND user_id = $2"
        ))
        .bind(product_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Product::from))
    }

    pub async fn product_by_id(&self, product_id: Uuid) -> Result<Option<Product>> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
        ))
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Product::from))
    }

    /// Every product, oldest first. Used by scheduled discovery.
    pub async fn all_products(&self) -> Result<Vec<Product>> {
        let rows = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Product::from).collect())
    }

    /// Products with auto-pilot switched on. Plan checks happen in the caller.
    pub async fn autopilot_products(&self) -> Result<Vec<Product>> {
        let rows = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE autopilot ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Product::from).collect())
    }

    pub async fn create_product(&self, user_id: Uuid, input: &NewProduct) -> Result<Product> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            r#"
            INSERT INTO products (id, user_id, name, description, url, keywords, subreddits, autopilot)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(&input.url)
        .bind(&input.keywords)
        .bind(&input.subreddits)
        .bind(input.autopilot)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    /// Replace a product's editable fields. `None` when the user does not own it.
    pub async fn update_product(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        input: &NewProduct,
    ) -> Result<Option<Product>> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            r#"
            UPDATE products
            SET name = $3, description = $4, url = $5, keywords = $6,
                subreddits = $7, autopilot = $8, updated_at = now()
            WHERE id = $1 AND user_id = $2
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(product_id)
        .bind(user_id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(&input.url)
        .bind(&input.keywords)
        .bind(&input.subreddits)
        .bind(input.autopilot)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Product::from))
    }

    pub async fn delete_product(&self, user_id: Uuid, product_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1 AND user_id = $2")
            .bind(product_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Leads
    // =========================================================================

    /// Insert leads, skipping any `(product_id, reddit_id)` already stored.
    /// Returns how many rows were actually inserted.
    pub async fn insert_leads(&self, leads: &[Lead]) -> Result<u64> {
        if leads.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        for lead in leads {
            let result = sqlx::query(
                r#"
                INSERT INTO leads
                    (id, product_id, reddit_id, subreddit, title, body, author, permalink,
                     posted_at, score, reason, matched_keyword, source, status, draft, discovered_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
                ON CONFLICT (product_id, reddit_id) DO NOTHING
                "#,
            )
            .bind(lead.id)
            .bind(lead.product_id)
            .bind(&lead.reddit_id)
            .bind(&lead.subreddit)
            .bind(&lead.title)
            .bind(&lead.body)
            .bind(&lead.author)
            .bind(&lead.permalink)
            .bind(lead.posted_at)
            .bind(lead.score)
            .bind(&lead.reason)
            .bind(&lead.matched_keyword)
            .bind(lead.source.as_str())
            .bind(lead.status.as_str())
            .bind(&lead.draft)
            .bind(lead.discovered_at)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;

        Ok(inserted)
    }

    /// Which of `reddit_ids` are already stored for the product.
    pub async fn known_reddit_ids(
        &self,
        product_id: Uuid,
        reddit_ids: &[String],
    ) -> Result<HashSet<String>> {
        if reddit_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT reddit_id FROM leads WHERE product_id = $1 AND reddit_id = ANY($2)",
        )
        .bind(product_id)
        .bind(reddit_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().collect())
    }

    /// Leads for a product, newest post first.
    pub async fn leads_for_product(
        &self,
        product_id: Uuid,
        status: Option<LeadStatus>,
        limit: i64,
    ) -> Result<Vec<Lead>> {
        let rows = sqlx::query_as::<_, LeadRow>(&format!(
            r#"
            SELECT {LEAD_COLUMNS} FROM leads
            WHERE product_id = $1 AND ($2::TEXT IS NULL OR status = $2)
            ORDER BY posted_at DESC
            LIMIT $3
            "#
        ))
        .bind(product_id)
        .bind(status.map(LeadStatus::as_str))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LeadRow::into_lead).collect()
    }

    /// `New` leads at or above `min_score`, newest post first.
    pub async fn autopilot_queue(
        &self,
        product_id: Uuid,
        min_score: i16,
        limit: i64,
    ) -> Result<Vec<Lead>> {
        let rows = sqlx::query_as::<_, LeadRow>(&format!(
            r#"
            SELECT {LEAD_COLUMNS} FROM leads
            WHERE product_id = $1 AND status = 'new' AND score >= $2
            ORDER BY posted_at DESC
            LIMIT $3
            "#
        ))
        .bind(product_id)
        .bind(min_score)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LeadRow::into_lead).collect()
    }

    /// A lead, only if it belongs to a product `user_id` owns.
    pub async fn lead_for_user(&self, user_id: Uuid, lead_id: Uuid) -> Result<Option<Lead>> {
        let row = sqlx::query_as::<_, LeadRow>(
            r#"
            SELECT l.id, l.product_id, l.reddit_id, l.subreddit, l.title, l.body, l.author,
                   l.permalink, l.posted_at, l.score, l.reason, l.matched_keyword, l.source,
                   l.status, l.draft, l.discovered_at
            FROM leads l
            JOIN products p ON p.id = l.product_id
            WHERE l.id = $1 AND p.user_id = $2
            "#,
        )
        .bind(lead_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(LeadRow::into_lead).transpose()
    }

    pub async fn set_lead_status(&self, lead_id: Uuid, status: LeadStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE leads SET status = $2 WHERE id = $1")
            .bind(lead_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_lead_draft(&self, lead_id: Uuid, draft: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE leads SET draft = $2 WHERE id = $1")
            .bind(lead_id)
            .bind(draft)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Subreddit rule cache
    // =========================================================================

    /// Cached verdict for a subreddit, if checked within `max_age`.
    pub async fn cached_verdict(
        &self,
        subreddit: &str,
        max_age: Duration,
    ) -> Result<Option<SubredditVerdict>> {
        let cutoff = Utc::now() - max_age;
        let row = sqlx::query_as::<_, VerdictRow>(
            r#"
            SELECT subreddit, allows_promotion, reason, checked_at
            FROM subreddit_rules
            WHERE subreddit = $1 AND checked_at > $2
            "#,
        )
        .bind(subreddit.to_lowercase())
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(SubredditVerdict::from))
    }

    pub async fn save_verdict(&self, verdict: &SubredditVerdict) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO subreddit_rules (subreddit, allows_promotion, reason, checked_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (subreddit)
            DO UPDATE SET allows_promotion = EXCLUDED.allows_promotion,
                          reason = EXCLUDED.reason,
                          checked_at = EXCLUDED.checked_at
            "#,
        )
        .bind(verdict.subreddit.to_lowercase())
        .bind(verdict.allows_promotion)
        .bind(&verdict.reason)
        .bind(verdict.checked_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // =========================================================================
    // Comments
    // =========================================================================

    pub async fn record_comment(&self, comment: &PostedComment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO comments
                (id, lead_id, product_id, user_id, reddit_comment_id, body, trigger, posted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(comment.id)
        .bind(comment.lead_id)
        .bind(comment.product_id)
        .bind(comment.user_id)
        .bind(&comment.reddit_comment_id)
        .bind(&comment.body)
        .bind(comment.trigger.as_str())
        .bind(comment.posted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Comments posted for a product since `since`, any trigger.
    pub async fn comments_posted_since(&self, product_id: Uuid, since: DateTime<Utc>) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM comments WHERE product_id = $1 AND posted_at >= $2",
        )
        .bind(product_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn comments_for_lead(&self, lead_id: Uuid) -> Result<Vec<PostedComment>> {
        let rows = sqlx::query_as::<_, CommentRow>(
            r#"
            SELECT id, lead_id, product_id, user_id, reddit_comment_id, body, trigger, posted_at
            FROM comments WHERE lead_id = $1 ORDER BY posted_at
            "#,
        )
        .bind(lead_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CommentRow::into_comment).collect()
    }

    // =========================================================================
    // Runs
    // =========================================================================

    pub async fn start_run(&self, product_id: Uuid, user_id: Uuid, trigger: RunTrigger) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO runs (id, product_id, user_id, trigger) VALUES ($1, $2, $3, $4)")
            .bind(id)
            .bind(product_id)
            .bind(user_id)
            .bind(trigger.as_str())
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn finish_run(&self, run_id: Uuid, stats: &RunStats, error: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE runs SET finished_at = now(), stats = $2, error = $3 WHERE id = $1")
            .bind(run_id)
            .bind(serde_json::to_value(stats)?)
            .bind(error)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Runs a user started with `trigger` since `since`.
    pub async fn runs_since(&self, user_id: Uuid, trigger: RunTrigger, since: DateTime<Utc>) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM runs WHERE user_id = $1 AND trigger = $2 AND started_at >= $3",
        )
        .bind(user_id)
        .bind(trigger.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    // =========================================================================
    // Billing
    // =========================================================================

    /// Remember a processed Stripe event. Returns false when the id was
    /// already recorded.
    pub async fn record_stripe_event(&self, event_id: &str, event_type: &str) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO stripe_events (id, event_type) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING",
        )
        .bind(event_id)
        .bind(event_type)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Release a recorded event so Stripe's retry is applied again.
    pub async fn forget_stripe_event(&self, event_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM stripe_events WHERE id = $1")
            .bind(event_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
