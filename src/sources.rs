use std::collections::HashMap;

use scraper::Selector;
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::database::{self, DbPool};
use crate::error::{HarvestError, Result};
use crate::scrape::paginate;

/// Selector keys every source must define, whatever its pagination strategy.
const REQUIRED_SELECTORS: &[&str] = &["listing_container", "business_name"];

/// A configured scrape target loaded from the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub source_type: String,
    pub base_url: String,
    pub pagination_type: String,
    pub selectors: HashMap<String, String>,
    pub rate_limit_delay: f64,
    pub enabled: bool,
}

impl Source {
    pub fn selector(&self, field: &str) -> Option<&str> {
        self.selectors.get(field).map(|s| s.as_str())
    }
}

/// Declarative source definition. Registering one of these is the only step
/// needed to add a scrape target, provided its `source_type` maps to a known
/// scraper variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub source_type: String,
    pub base_url: String,
    pub pagination_type: String,
    pub selectors: HashMap<String, String>,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_delay: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_rate_limit() -> f64 {
    3.0
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourcesFile {
    pub sources: Vec<SourceConfig>,
}

pub fn validate_source_config(config: &SourceConfig) -> Result<()> {
    if config.name.trim().is_empty() {
        return Err(HarvestError::config("source name must not be empty"));
    }

    Url::parse(&config.base_url)
        .map_err(|e| HarvestError::config(format!("invalid base_url '{}': {}", config.base_url, e)))?;

    if !paginate::is_known_variant(&config.source_type) {
        return Err(HarvestError::config(format!(
            "unknown source_type '{}' (known: {})",
            config.source_type,
            paginate::known_variants().join(", ")
        )));
    }

    for key in REQUIRED_SELECTORS {
        match config.selectors.get(*key) {
            Some(rule) if !rule.trim().is_empty() => {}
            _ => {
                return Err(HarvestError::config(format!(
                    "source '{}' is missing mandatory selector '{}'",
                    config.name, key
                )))
            }
        }
    }

    if config.source_type == paginate::TOKEN && !config.selectors.contains_key("next_page") {
        return Err(HarvestError::config(format!(
            "token-paginated source '{}' needs a 'next_page' selector",
            config.name
        )));
    }

    for (field, rule) in &config.selectors {
        if Selector::parse(rule).is_err() {
            return Err(HarvestError::config(format!(
                "selector for '{}' does not parse: '{}'",
                field, rule
            )));
        }
    }

    if config.rate_limit_delay < 0.0 {
        return Err(HarvestError::config("rate_limit_delay must be >= 0"));
    }

    Ok(())
}

/// Database-backed registry of scrape targets.
pub struct SourceRegistry {
    pool: DbPool,
}

impl SourceRegistry {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, source_id: i64) -> Result<Source> {
        database::get_source(&self.pool, source_id)
            .await?
            .ok_or_else(|| HarvestError::config(format!("source {} not found", source_id)))
    }

    pub async fn list_enabled(&self) -> Result<Vec<Source>> {
        database::load_sources(&self.pool, true).await
    }

    pub async fn list_all(&self) -> Result<Vec<Source>> {
        database::load_sources(&self.pool, false).await
    }

    /// Validate and persist a new source definition.
    pub async fn register(&self, config: SourceConfig) -> Result<Source> {
        validate_source_config(&config)?;

        let id = database::insert_source(
            &self.pool,
            &config.name,
            &config.source_type,
            &config.base_url,
            &config.pagination_type,
            &config.selectors,
            config.rate_limit_delay,
            config.enabled,
        )
        .await?;

        info!("✓ Registered source '{}' (id {})", config.name, id);

        Ok(Source {
            id,
            name: config.name,
            source_type: config.source_type,
            base_url: config.base_url,
            pagination_type: config.pagination_type,
            selectors: config.selectors,
            rate_limit_delay: config.rate_limit_delay,
            enabled: config.enabled,
        })
    }

    /// Seed sources from a YAML file, skipping names that already exist.
    /// Returns the number of newly registered sources.
    pub async fn seed_from_file(&self, path: &str) -> Result<usize> {
        let content = tokio::fs::read_to_string(path).await?;
        let file: SourcesFile = serde_yaml::from_str(&content)?;

        let mut registered = 0;
        for config in file.sources {
            if database::source_name_exists(&self.pool, &config.name).await? {
                info!("Source '{}' already registered, skipping", config.name);
                continue;
            }
            self.register(config).await?;
            registered += 1;
        }
        Ok(registered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> SourceConfig {
        let mut selectors = HashMap::new();
        selectors.insert("listing_container".to_string(), ".result".to_string());
        selectors.insert("business_name".to_string(), ".business-name".to_string());
        selectors.insert("phone".to_string(), ".phones".to_string());
        SourceConfig {
            name: "Yellow Pages US".to_string(),
            source_type: "direct".to_string(),
            base_url: "https://www.yellowpages.com/search".to_string(),
            pagination_type: "direct".to_string(),
            selectors,
            rate_limit_delay: 4.0,
            enabled: true,
        }
    }

    #[test]
    fn accepts_valid_config() {
        assert!(validate_source_config(&base_config()).is_ok());
    }

    #[test]
    fn rejects_missing_listing_container() {
        let mut config = base_config();
        config.selectors.remove("listing_container");
        let err = validate_source_config(&config).unwrap_err();
        assert!(err.to_string().contains("listing_container"));
    }

    #[test]
    fn rejects_unknown_source_type() {
        let mut config = base_config();
        config.source_type = "graphql_api".to_string();
        assert!(validate_source_config(&config).is_err());
    }

    #[test]
    fn rejects_malformed_selector() {
        let mut config = base_config();
        config
            .selectors
            .insert("phone".to_string(), ":::garbage".to_string());
        assert!(validate_source_config(&config).is_err());
    }

    #[test]
    fn token_sources_need_next_page_selector() {
        let mut config = base_config();
        config.source_type = "token".to_string();
        config.pagination_type = "token".to_string();
        assert!(validate_source_config(&config).is_err());

        config
            .selectors
            .insert("next_page".to_string(), "a.next".to_string());
        assert!(validate_source_config(&config).is_ok());
    }
}
