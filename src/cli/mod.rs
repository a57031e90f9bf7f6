mod manage_sources;
mod menu;
mod run;
mod run_scrape;
mod schedule_source;
mod show_stats;

use std::sync::Arc;

use crate::config::Config;
use crate::database::DbPool;
use crate::engine::HarvestEngine;
use crate::error::{HarvestError, Result};

pub use menu::MenuAction;

pub struct CliApp {
    pub config: Config,
    pub db_pool: DbPool,
    pub engine: Arc<HarvestEngine>,
}

impl CliApp {
    pub async fn new(config: Config, db_pool: DbPool) -> Result<Self> {
        let engine = Arc::new(HarvestEngine::new(db_pool.clone(), config.clone())?);
        Ok(Self {
            config,
            db_pool,
            engine,
        })
    }
}

fn prompt_error(e: dialoguer::Error) -> HarvestError {
    match e {
        dialoguer::Error::IO(io) => HarvestError::Io(io),
    }
}
