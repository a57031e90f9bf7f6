use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod database;
mod dedupe;
mod engine;
mod error;
mod models;
mod normalize;
mod scheduler;
mod scoring;
mod scrape;
mod sources;

use cli::CliApp;
use config::{load_config, Config};
use database::create_db_pool;
use error::Result;
use scheduler::HarvestScheduler;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let config = match load_config("config.yml").await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.yml: {}. Using defaults.", e);
            Config::default()
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("lead_harvester={}", config.logging.level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Initializing database...");
    let db_pool = create_db_pool(&config.database.path).await?;

    let app = CliApp::new(config, db_pool.clone()).await?;

    // Background campaigns run alongside the interactive menu.
    let scheduler = HarvestScheduler::new(app.engine.clone(), db_pool);
    let stop_scheduler = scheduler.stop_handle();
    let scheduler_task = scheduler.start();

    tokio::select! {
        result = app.run() => {
            result?;
        }
        _ = signal::ctrl_c() => {
            warn!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    stop_scheduler.cancel();
    scheduler_task.abort();

    Ok(())
}
