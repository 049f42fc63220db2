use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use leadpilot_api::{router, AppState};
use leadpilot_common::Config;
use leadpilot_scout::live::{build_scout, reddit_client};
use leadpilot_store::Store;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("leadpilot=info".parse()?))
        .init();

    let config = Config::api_from_env()?;
    config.log_redacted();

    let store = Store::connect(&config.database_url).await?;
    store.migrate().await?;

    let reddit = reddit_client(&config)?;
    let scout = build_scout(&config, store.clone(), reddit.clone());

    let addr = format!("{}:{}", config.api_host, config.api_port);
    let state = Arc::new(AppState::new(config, store, reddit, scout));
    let app = router(state);

    info!("LeadPilot API starting on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
