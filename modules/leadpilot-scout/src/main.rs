use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use leadpilot_common::{Config, RunTrigger};
use leadpilot_scout::live::{build_scout, reddit_client};
use leadpilot_store::Store;

#[derive(Parser)]
#[command(name = "scout", about = "LeadPilot lead discovery and auto-pilot")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run discovery once, for one product or all of them
    Discover {
        #[arg(long)]
        product: Option<Uuid>,
    },
    /// Run one auto-pilot sweep
    Autopilot,
    /// Discovery then auto-pilot, forever
    Loop {
        #[arg(long, env = "SCOUT_INTERVAL_SECS", default_value_t = 3600)]
        interval_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("leadpilot=info".parse()?))
        .init();

    let cli = Cli::parse();
    info!("LeadPilot scout starting...");

    let config = Config::scout_from_env()?;
    config.log_redacted();

    let store = Store::connect(&config.database_url).await?;
    store.migrate().await?;

    let reddit = reddit_client(&config)?;
    let scout = build_scout(&config, store.clone(), reddit);

    match cli.command {
        Command::Discover { product: Some(id) } => {
            let product = store
                .product_by_id(id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("product {id} not found"))?;
            let stats = scout.discover(&product, RunTrigger::Cron).await?;
            info!(?stats, "Discovery finished");
        }
        Command::Discover { product: None } => {
            let stats = scout.discover_all(RunTrigger::Cron).await?;
            info!(?stats, "Discovery finished");
        }
        Command::Autopilot => {
            let stats = scout.run_autopilot().await?;
            info!(?stats, "Auto-pilot finished");
        }
        Command::Loop { interval_secs } => {
            let interval = Duration::from_secs(interval_secs.max(60));
            loop {
                if let Err(e) = scout.discover_all(RunTrigger::Cron).await {
                    warn!(error = %e, "Discovery sweep failed");
                }
                if let Err(e) = scout.run_autopilot().await {
                    warn!(error = %e, "Auto-pilot sweep failed");
                }
                info!(secs = interval.as_secs(), "Sleeping until next sweep");
                tokio::time::sleep(interval).await;
            }
        }
    }

    Ok(())
}
