use thiserror::Error;

pub type Result<T> = std::result::Result<T, HarvestError>;

#[derive(Debug, Error)]
pub enum HarvestError {
    /// Bad source definition, unknown scraper variant, malformed config file.
    /// Always fatal for the operation that raised it.
    #[error("configuration error: {0}")]
    Config(String),

    /// A page could not be retrieved after retries.
    #[error("fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// A selector rule could not be compiled against the fetched document.
    #[error("parse error: {0}")]
    Parse(String),

    #[error("database error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] mobc::Error<rusqlite::Error>),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl HarvestError {
    pub fn config(msg: impl Into<String>) -> Self {
        HarvestError::Config(msg.into())
    }

    /// Page-level failures are absorbed into the run's error count; the run
    /// keeps its partial results and completes. Everything else fails the run.
    pub fn is_page_level(&self) -> bool {
        matches!(
            self,
            HarvestError::Fetch { .. } | HarvestError::Parse(_) | HarvestError::Http(_)
        )
    }
}
