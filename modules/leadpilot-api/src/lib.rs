use std::sync::Arc;

use axum::{
    http::{header, HeaderValue},
    routing::{get, post},
    Router,
};
use tower_http::set_header::SetResponseHeaderLayer;

use leadpilot_common::Config;
use leadpilot_scout::Scout;
use leadpilot_store::Store;
use reddit_client::RedditClient;

pub mod auth;
pub mod error;
pub mod rate_limit;
pub mod rest;
pub mod stripe;

use rate_limit::UserRateLimiter;
use stripe::PriceIds;

/// LLM drafts a single user may request per hour.
pub const DRAFTS_PER_HOUR: usize = 10;

pub struct AppState {
    pub config: Config,
    pub store: Store,
    pub reddit: RedditClient,
    pub scout: Scout,
    pub draft_limiter: UserRateLimiter,
}

impl AppState {
    pub fn new(config: Config, store: Store, reddit: RedditClient, scout: Scout) -> Self {
        Self {
            config,
            store,
            reddit,
            scout,
            draft_limiter: UserRateLimiter::new(DRAFTS_PER_HOUR),
        }
    }

    pub fn prices(&self) -> PriceIds {
        PriceIds {
            starter: self.config.stripe_price_starter.clone(),
            pro: self.config.stripe_price_pro.clone(),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/", get(|| async { "ok" }))
        // Reddit sign-in
        .route("/auth/reddit/login", get(rest::oauth::login))
        .route("/auth/reddit/callback", get(rest::oauth::callback))
        .route("/auth/logout", post(rest::oauth::logout))
        .route("/api/me", get(rest::oauth::me))
        // Products
        .route(
            "/api/products",
            get(rest::products::list_products).post(rest::products::create_product),
        )
        .route(
            "/api/products/{id}",
            get(rest::products::get_product)
                .put(rest::products::update_product)
                .delete(rest::products::delete_product),
        )
        .route("/api/products/{id}/discover", post(rest::products::discover))
        // Leads
        .route("/api/products/{id}/leads", get(rest::leads::list_leads))
        .route("/api/leads/{id}/dismiss", post(rest::leads::dismiss))
        .route("/api/leads/{id}/draft", post(rest::leads::draft))
        .route("/api/leads/{id}/comment", post(rest::leads::comment))
        // Scheduler
        .route(
            "/api/cron/discover",
            get(rest::cron::discover).post(rest::cron::discover),
        )
        .route(
            "/api/cron/autopilot",
            get(rest::cron::autopilot).post(rest::cron::autopilot),
        )
        // Billing
        .route("/api/stripe/webhook", post(rest::billing::stripe_webhook))
        .with_state(state)
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        // Method + path + status + latency only (no query params, no cookies)
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        )
}
