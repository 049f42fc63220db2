// Production wiring: real clients behind the pipeline's trait seams.

use std::sync::Arc;

use ai_client::OpenAi;
use google_search::GoogleSearch;
use leadpilot_common::Config;
use leadpilot_store::Store;
use reddit_client::{RateLimiter, RedditClient, RedditCredentials};

use crate::analyst::OpenAiAnalyst;
use crate::scout::Scout;

pub fn reddit_credentials(config: &Config) -> RedditCredentials {
    RedditCredentials {
        client_id: config.reddit_client_id.clone(),
        client_secret: config.reddit_client_secret.clone(),
        user_agent: config.reddit_user_agent.clone(),
        redirect_uri: config.reddit_redirect_uri.clone(),
    }
}

/// Reddit client sharing one request budget across every caller in the
/// process.
pub fn reddit_client(config: &Config) -> reddit_client::Result<RedditClient> {
    let limiter = Arc::new(RateLimiter::per_minute(config.reddit_requests_per_minute as usize));
    Ok(RedditClient::new(reddit_credentials(config))?.with_rate_limiter(limiter))
}

pub fn build_scout(config: &Config, store: Store, reddit: RedditClient) -> Scout {
    let searcher = GoogleSearch::new(&config.google_api_key, &config.google_cse_id);
    let analyst = OpenAiAnalyst::new(OpenAi::new(&config.openai_api_key, &config.openai_model));
    Scout::new(
        Arc::new(searcher),
        Arc::new(reddit),
        Arc::new(analyst),
        Arc::new(store),
        config.pipeline.clone(),
    )
}
