use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub scraping: ScrapingConfig,
    pub dedupe: DedupeConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScrapingConfig {
    /// Hard ceiling per run when the caller does not pass one.
    pub max_leads_per_source: usize,
    /// Leads buffered before a batched insert is committed.
    pub batch_size: usize,
    pub request_timeout_seconds: u64,
    pub max_retries: u32,
    /// Page ceiling for sources that never signal a terminal page
    /// (infinite-scroll simulation).
    pub max_pages: u32,
}

/// Tunable fuzzy-matching policy. The defaults are a reasonable starting
/// point, not observed site behavior; operators are expected to adjust them
/// per deployment.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct DedupeConfig {
    pub name_weight: f64,
    pub phone_weight: f64,
    pub address_weight: f64,
    /// At or above this composite similarity a candidate is treated as the
    /// same business.
    pub high_threshold: f64,
    /// Between this and `high_threshold` the candidate is still merged,
    /// with lower confidence.
    pub merge_threshold: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    /// Emit a progress line every N records during a run.
    pub progress_interval: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                path: "data/harvest.db".to_string(),
            },
            scraping: ScrapingConfig {
                max_leads_per_source: 500,
                batch_size: 50,
                request_timeout_seconds: 30,
                max_retries: 3,
                max_pages: 10,
            },
            dedupe: DedupeConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                progress_interval: 25,
            },
        }
    }
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self {
            name_weight: 0.5,
            phone_weight: 0.3,
            address_weight: 0.2,
            high_threshold: 0.92,
            merge_threshold: 0.78,
        }
    }
}

pub async fn load_config(path: &str) -> Result<Config> {
    let content = tokio::fs::read_to_string(path).await?;
    let config: Config = serde_yaml::from_str(&content)?;
    Ok(config)
}
