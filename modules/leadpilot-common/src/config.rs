use std::env;
use std::time::Duration;

use tracing::info;

use crate::error::LeadPilotError;

type Result<T> = std::result::Result<T, LeadPilotError>;

/// Pipeline tuning knobs. Defaults match production behaviour.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Posts older than this are never considered.
    pub max_age_days: u32,
    /// Minimum classifier score for a post to become a lead.
    pub min_score: u8,
    /// Minimum lead score before auto-pilot will comment.
    pub autopilot_min_score: u8,
    /// Pause between two auto-pilot comments from the same account.
    pub post_interval: Duration,
    /// Candidates classified per run, newest first.
    pub max_candidates: usize,
    /// Cap on merged seed + expanded keywords.
    pub max_keywords: usize,
    /// Subreddit rule cache TTL.
    pub rule_cache_ttl_days: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_age_days: 7,
            min_score: 60,
            autopilot_min_score: 80,
            post_interval: Duration::from_secs(30),
            max_candidates: 40,
            max_keywords: 15,
            rule_cache_ttl_days: 30,
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,

    // OpenAI
    pub openai_api_key: String,
    pub openai_model: String,

    // Google Custom Search
    pub google_api_key: String,
    pub google_cse_id: String,

    // Reddit OAuth app
    pub reddit_client_id: String,
    pub reddit_client_secret: String,
    pub reddit_user_agent: String,
    pub reddit_redirect_uri: String,
    pub reddit_requests_per_minute: u32,

    // Stripe
    pub stripe_webhook_secret: String,
    pub stripe_price_starter: String,
    pub stripe_price_pro: String,

    // Web server
    pub app_url: String,
    pub api_host: String,
    pub api_port: u16,
    pub session_secret: String,
    pub cron_secret: String,

    pub pipeline: PipelineConfig,
}

impl Config {
    /// Full configuration: everything both binaries need.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: required_env("DATABASE_URL")?,
            openai_api_key: required_env("OPENAI_API_KEY")?,
            openai_model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            google_api_key: required_env("GOOGLE_API_KEY")?,
            google_cse_id: required_env("GOOGLE_CSE_ID")?,
            reddit_client_id: required_env("REDDIT_CLIENT_ID")?,
            reddit_client_secret: required_env("REDDIT_CLIENT_SECRET")?,
            reddit_user_agent: env::var("REDDIT_USER_AGENT")
                .unwrap_or_else(|_| "leadpilot/0.1 (by /u/leadpilot)".to_string()),
            reddit_redirect_uri: env::var("REDDIT_REDIRECT_URI").unwrap_or_default(),
            reddit_requests_per_minute: parsed_env("REDDIT_REQUESTS_PER_MINUTE", 60)?,
            stripe_webhook_secret: env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default(),
            stripe_price_starter: env::var("STRIPE_PRICE_STARTER").unwrap_or_default(),
            stripe_price_pro: env::var("STRIPE_PRICE_PRO").unwrap_or_default(),
            app_url: env::var("APP_URL").unwrap_or_else(|_| "http://localhost:3000".to_string()),
            api_host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            api_port: parsed_env("API_PORT", 3000)?,
            session_secret: env::var("SESSION_SECRET").unwrap_or_default(),
            cron_secret: env::var("CRON_SECRET").unwrap_or_default(),
            pipeline: pipeline_from_env()?,
        })
    }

    /// API server configuration. Session, cron and webhook secrets are required.
    pub fn api_from_env() -> Result<Self> {
        let config = Self::from_env()?;
        for (key, value) in [
            ("SESSION_SECRET", &config.session_secret),
            ("CRON_SECRET", &config.cron_secret),
            ("STRIPE_WEBHOOK_SECRET", &config.stripe_webhook_secret),
            ("REDDIT_REDIRECT_URI", &config.reddit_redirect_uri),
        ] {
            if value.is_empty() {
                return Err(LeadPilotError::Config(format!(
                    "{key} environment variable is required"
                )));
            }
        }
        if config.session_secret.len() < 32 {
            return Err(LeadPilotError::Config(
                "SESSION_SECRET must be at least 32 characters".to_string(),
            ));
        }
        Ok(config)
    }

    /// Scout binary configuration. No web secrets needed.
    pub fn scout_from_env() -> Result<Self> {
        Self::from_env()
    }

    /// Log which settings are present without printing secret values.
    pub fn log_redacted(&self) {
        info!(
            openai_model = %self.openai_model,
            openai_key = redact(&self.openai_api_key),
            google_key = redact(&self.google_api_key),
            reddit_client = redact(&self.reddit_client_id),
            reddit_user_agent = %self.reddit_user_agent,
            stripe_webhook = redact(&self.stripe_webhook_secret),
            session_secret = redact(&self.session_secret),
            cron_secret = redact(&self.cron_secret),
            max_age_days = self.pipeline.max_age_days,
            min_score = self.pipeline.min_score,
            autopilot_min_score = self.pipeline.autopilot_min_score,
            "Config loaded"
        );
    }
}

fn pipeline_from_env() -> Result<PipelineConfig> {
    let defaults = PipelineConfig::default();
    Ok(PipelineConfig {
        max_age_days: parsed_env("LEAD_MAX_AGE_DAYS", defaults.max_age_days)?,
        min_score: parsed_env("LEAD_MIN_SCORE", defaults.min_score)?,
        autopilot_min_score: parsed_env("AUTOPILOT_MIN_SCORE", defaults.autopilot_min_score)?,
        post_interval: Duration::from_secs(parsed_env(
            "AUTOPILOT_POST_INTERVAL_SECS",
            defaults.post_interval.as_secs(),
        )?),
        max_candidates: parsed_env("MAX_CANDIDATES_PER_RUN", defaults.max_candidates)?,
        ..defaults
    })
}

fn required_env(key: &str) -> Result<String> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(LeadPilotError::Config(format!(
            "{key} environment variable is required"
        ))),
    }
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| LeadPilotError::Config(format!("{key} must be a valid number, got {raw:?}"))),
        Err(_) => Ok(default),
    }
}

fn redact(value: &str) -> &'static str {
    if value.is_empty() {
        "<unset>"
    } else {
        "<set>"
    }
}
