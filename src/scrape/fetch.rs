use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::error::{HarvestError, Result};

/// Browser user-agent pool rotated across requests.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
];

/// Fetching capability consumed by the scraper abstraction. The production
/// implementation owns rate limiting, retries and header rotation; tests
/// substitute a canned fetcher.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch one page body. `rate_limit_delay` is the per-source pause in
    /// seconds honored after a successful request.
    async fn fetch(&self, url: &str, rate_limit_delay: f64) -> Result<String>;
}

pub struct HttpFetcher {
    client: Client,
    max_retries: u32,
}

impl HttpFetcher {
    pub fn new(timeout_seconds: u64, max_retries: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            max_retries,
        })
    }

    fn pick_user_agent() -> &'static str {
        USER_AGENTS[fastrand::usize(..USER_AGENTS.len())]
    }

    /// Jittered pause so request intervals do not form a fixed cadence.
    async fn rate_limit_sleep(base_delay: f64) {
        if base_delay <= 0.0 {
            return;
        }
        let jitter = fastrand::f64() * 2.0 - 0.5;
        let delay = (base_delay + jitter).max(base_delay * 0.5);
        tokio::time::sleep(Duration::from_secs_f64(delay)).await;
    }

    async fn fetch_once(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .header("User-Agent", Self::pick_user_agent())
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header("Accept-Language", "en-US,en;q=0.5")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::Fetch {
                url: url.to_string(),
                reason: format!("HTTP {}", status),
            });
        }

        let body = response.text().await?;
        debug!("Fetched {} bytes from {}", body.len(), url);
        Ok(body)
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, rate_limit_delay: f64) -> Result<String> {
        let mut attempt = 0u32;
        loop {
            match self.fetch_once(url).await {
                Ok(body) => {
                    Self::rate_limit_sleep(rate_limit_delay).await;
                    return Ok(body);
                }
                Err(e) if attempt < self.max_retries && is_retryable(&e) => {
                    attempt += 1;
                    let backoff = Duration::from_secs(1u64 << attempt.min(5));
                    warn!(
                        "Fetch attempt {}/{} failed for {}: {} (backing off {:?})",
                        attempt, self.max_retries, url, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e @ HarvestError::Fetch { .. }) => return Err(e),
                Err(e) => {
                    return Err(HarvestError::Fetch {
                        url: url.to_string(),
                        reason: e.to_string(),
                    })
                }
            }
        }
    }
}

fn is_retryable(err: &HarvestError) -> bool {
    match err {
        // Network-level failures and timeouts.
        HarvestError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
        // Rate limiting and transient server errors.
        HarvestError::Fetch { reason, .. } => {
            reason.contains("HTTP 429")
                || reason.contains("HTTP 500")
                || reason.contains("HTTP 502")
                || reason.contains("HTTP 503")
                || reason.contains("HTTP 504")
        }
        _ => false,
    }
}
