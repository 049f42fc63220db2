// Auto-pilot: post AI-written replies on high-scoring leads.
//
// Per product: plan must allow it, a Reddit account must be linked, and the
// daily comment budget (plan limit minus comments in the last 24h) must be
// positive. Each lead's subreddit is checked against the rule cache before a
// comment is written. A Reddit rate limit ends the product's batch.

use chrono::{Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use leadpilot_common::{
    Lead, LeadStatus, PostedComment, Product, RunStats, RunTrigger, SubredditVerdict, User,
};
use reddit_client::{rules_as_text, RedditError};

use crate::scout::Scout;

/// Leads pulled per product per run. Some will be skipped on subreddit rules,
/// so this is larger than any plan's daily budget.
const QUEUE_LIMIT: i64 = 50;

#[derive(Debug, thiserror::Error)]
pub enum ReplyError {
    #[error("no Reddit account linked")]
    NotLinked,

    #[error(transparent)]
    Reddit(#[from] RedditError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// How one product's batch ended.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub posted: usize,
    pub skipped: usize,
    pub errors: usize,
    pub rate_limited: bool,
}

impl Scout {
    /// Auto-pilot sweep over every product with the switch on.
    pub async fn run_autopilot(&self) -> anyhow::Result<RunStats> {
        let products = self.store.autopilot_products().await?;
        info!(products = products.len(), "Auto-pilot sweep starting");

        let mut total = RunStats::default();
        for product in &products {
            match self.autopilot_product(product).await {
                Ok(outcome) => {
                    total.comments_posted += outcome.posted;
                    total.errors += outcome.errors;
                }
                Err(e) => {
                    warn!(product_id = %product.id, error = %e, "Auto-pilot failed for product");
                    total.errors += 1;
                }
            }
        }

        info!(posted = total.comments_posted, errors = total.errors, "Auto-pilot sweep complete");
        Ok(total)
    }

    /// One product's auto-pilot batch, recorded as an `autopilot` run.
    pub async fn autopilot_product(&self, product: &Product) -> anyhow::Result<BatchOutcome> {
        let Some(user) = self.store.user(product.user_id).await? else {
            warn!(product_id = %product.id, "Product owner missing, skipping auto-pilot");
            return Ok(BatchOutcome::default());
        };

        let limits = user.limits();
        if !limits.autopilot {
            info!(product_id = %product.id, plan = %user.effective_plan(), "Plan has no auto-pilot, skipping");
            return Ok(BatchOutcome::default());
        }
        if user.reddit_refresh_token.is_none() {
            warn!(product_id = %product.id, "No Reddit account linked, skipping auto-pilot");
            return Ok(BatchOutcome::default());
        }

        let since = Utc::now() - Duration::hours(24);
        let already = self.store.comments_posted_since(product.id, since).await?;
        let budget = (limits.daily_autopilot_comments as i64 - already).max(0) as usize;
        if budget == 0 {
            info!(product_id = %product.id, already, "Daily comment budget spent");
            return Ok(BatchOutcome::default());
        }

        let queue = self
            .store
            .autopilot_queue(product.id, i16::from(self.config.autopilot_min_score), QUEUE_LIMIT)
            .await?;
        if queue.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let run_id = self.store.start_run(product.id, user.id, RunTrigger::Autopilot).await?;
        let outcome = self.post_batch(product, &user, &queue, budget).await;

        let stats = RunStats {
            comments_posted: outcome.posted,
            errors: outcome.errors,
            ..Default::default()
        };
        let note = outcome.rate_limited.then_some("rate limited by Reddit");
        if let Err(e) = self.store.finish_run(run_id, &stats, note).await {
            warn!(%run_id, error = %e, "Failed to record auto-pilot run");
        }

        info!(
            product_id = %product.id,
            posted = outcome.posted,
            skipped = outcome.skipped,
            budget,
            rate_limited = outcome.rate_limited,
            "Auto-pilot batch complete"
        );
        Ok(outcome)
    }

    async fn post_batch(&self, product: &Product, user: &User, queue: &[Lead], budget: usize) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let mut access_token: Option<String> = None;

        for lead in queue {
            if outcome.posted >= budget {
                break;
            }

            match self.subreddit_verdict(&lead.subreddit).await {
                Some(v) if v.allows_promotion => {}
                Some(v) => {
                    info!(
                        subreddit = %lead.subreddit,
                        reason = %v.reason,
                        "Subreddit disallows promotion, skipping lead"
                    );
                    outcome.skipped += 1;
                    continue;
                }
                None => {
                    outcome.skipped += 1;
                    continue;
                }
            }

            let comment = match self.analyst.write_comment(product, lead).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(lead_id = %lead.id, error = %e, "Comment generation failed");
                    outcome.errors += 1;
                    continue;
                }
            };

            let token = match access_token {
                Some(ref t) => t.clone(),
                None => match self.access_token(user).await {
                    Ok(t) => {
                        access_token = Some(t.clone());
                        t
                    }
                    Err(ReplyError::Reddit(RedditError::RateLimited { .. })) => {
                        outcome.rate_limited = true;
                        break;
                    }
                    Err(e) => {
                        warn!(user_id = %user.id, error = %e, "Could not obtain Reddit access token");
                        outcome.errors += 1;
                        break;
                    }
                },
            };

            if outcome.posted > 0 && !self.config.post_interval.is_zero() {
                tokio::time::sleep(self.config.post_interval).await;
            }

            match self.post_reply(user, lead, &token, &comment, RunTrigger::Autopilot).await {
                Ok(_) => outcome.posted += 1,
                Err(ReplyError::Reddit(RedditError::RateLimited { retry_after })) => {
                    warn!(product_id = %product.id, ?retry_after, "Reddit rate limit hit, ending batch");
                    outcome.rate_limited = true;
                    break;
                }
                Err(ReplyError::Reddit(RedditError::Auth(msg))) => {
                    warn!(user_id = %user.id, error = %msg, "Reddit rejected credentials, ending batch");
                    outcome.errors += 1;
                    break;
                }
                Err(e) => {
                    warn!(lead_id = %lead.id, error = %e, "Posting comment failed");
                    outcome.errors += 1;
                }
            }
        }

        outcome
    }

    /// Cached rule verdict for a subreddit, refreshed when missing or older
    /// than the cache TTL. `None` when the rules could not be checked; such
    /// failures are not cached.
    pub async fn subreddit_verdict(&self, subreddit: &str) -> Option<SubredditVerdict> {
        let ttl = Duration::days(self.config.rule_cache_ttl_days);
        match self.store.cached_verdict(subreddit, ttl).await {
            Ok(Some(v)) => return Some(v),
            Ok(None) => {}
            Err(e) => warn!(subreddit, error = %e, "Rule cache lookup failed"),
        }

        let rules = match self.reddit.subreddit_rules(subreddit).await {
            Ok(rules) => rules,
            Err(e) => {
                warn!(subreddit, error = %e, "Fetching subreddit rules failed, skipping");
                return None;
            }
        };

        let (allows_promotion, reason) = if rules.is_empty() {
            (true, "no posted rules".to_string())
        } else {
            match self.analyst.review_rules(subreddit, &rules_as_text(&rules)).await {
                Ok(review) => (review.allows_promotion, review.reason),
                Err(e) => {
                    warn!(subreddit, error = %e, "Rule review failed, skipping");
                    return None;
                }
            }
        };

        let verdict = SubredditVerdict {
            subreddit: subreddit.to_lowercase(),
            allows_promotion,
            reason,
            checked_at: Utc::now(),
        };
        if let Err(e) = self.store.save_verdict(&verdict).await {
            warn!(subreddit, error = %e, "Saving rule verdict failed");
        }
        Some(verdict)
    }

    /// Fresh user access token from the stored refresh token. Persists a
    /// rotated refresh token when Reddit issues one.
    pub async fn access_token(&self, user: &User) -> Result<String, ReplyError> {
        let refresh = user.reddit_refresh_token.as_deref().ok_or(ReplyError::NotLinked)?;
        let grant = self.reddit.refresh_user_token(refresh).await?;
        if let Some(rotated) = grant.refresh_token.as_deref() {
            if rotated != refresh {
                self.store.set_refresh_token(user.id, rotated).await?;
            }
        }
        Ok(grant.access_token)
    }

    /// Post `text` as a reply to the lead's thread, record it, and mark the
    /// lead replied.
    pub async fn post_reply(
        &self,
        user: &User,
        lead: &Lead,
        access_token: &str,
        text: &str,
        trigger: RunTrigger,
    ) -> Result<PostedComment, ReplyError> {
        let receipt = self
            .reddit
            .submit_comment(access_token, &lead.fullname(), text)
            .await?;

        let comment = PostedComment {
            id: Uuid::new_v4(),
            lead_id: lead.id,
            product_id: lead.product_id,
            user_id: user.id,
            reddit_comment_id: receipt.fullname,
            body: text.to_string(),
            trigger,
            posted_at: Utc::now(),
        };
        self.store.record_comment(&comment).await?;
        self.store.set_lead_status(lead.id, LeadStatus::Replied).await?;

        info!(lead_id = %lead.id, trigger = trigger.as_str(), "Comment posted");
        Ok(comment)
    }

    /// Manual path: refresh the token and post.
    pub async fn reply(&self, user: &User, lead: &Lead, text: &str) -> Result<PostedComment, ReplyError> {
        let token = self.access_token(user).await?;
        self.post_reply(user, lead, &token, text, RunTrigger::Manual).await
    }
}
