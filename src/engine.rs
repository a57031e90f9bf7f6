use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::Config;
use crate::database::{self, DbPool};
use crate::dedupe::{self, DedupeDecision};
use crate::error::{HarvestError, Result};
use crate::models::{Lead, PlatformStats, RunResult, RunStatus, SourceStats};
use crate::normalize;
use crate::scoring;
use crate::scrape::{HttpFetcher, PageFetcher, ScrapeSession};
use crate::sources::{Source, SourceRegistry};

/// Cooperative stop flag checked between pages, for interactive callers.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
struct RunCounters {
    scraped: u64,
    saved: u64,
    duplicate: u64,
    skipped: u64,
    error_count: u64,
    errors: Vec<String>,
    /// Set when persistence failed on consecutive batches.
    persistence_gave_up: bool,
}

/// Drives a scraping run end to end: scrape, normalize, dedupe, score,
/// persist in batches, collect statistics. Sources are processed one at a
/// time; the persistence store has a single writer during a run.
pub struct HarvestEngine {
    pool: DbPool,
    registry: SourceRegistry,
    fetcher: Arc<dyn PageFetcher>,
    config: Config,
}

impl HarvestEngine {
    pub fn new(pool: DbPool, config: Config) -> Result<Self> {
        let fetcher = HttpFetcher::new(
            config.scraping.request_timeout_seconds,
            config.scraping.max_retries,
        )?;
        Ok(Self::with_fetcher(pool, config, Arc::new(fetcher)))
    }

    /// Inject a fetcher; used by tests and by callers that proxy requests.
    pub fn with_fetcher(pool: DbPool, config: Config, fetcher: Arc<dyn PageFetcher>) -> Self {
        let registry = SourceRegistry::new(pool.clone());
        Self {
            pool,
            registry,
            fetcher,
            config,
        }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub async fn run_scraper(&self, source_id: i64, max_leads: Option<usize>) -> Result<RunResult> {
        self.run_scraper_with_cancel(source_id, max_leads, &CancelToken::new())
            .await
    }

    pub async fn run_scraper_with_cancel(
        &self,
        source_id: i64,
        max_leads: Option<usize>,
        cancel: &CancelToken,
    ) -> Result<RunResult> {
        let source = self.registry.get(source_id).await?;
        if !source.enabled {
            return Err(HarvestError::config(format!(
                "source '{}' is disabled",
                source.name
            )));
        }

        let max_leads = max_leads.unwrap_or(self.config.scraping.max_leads_per_source);
        let run_id = database::start_run(&self.pool, source.id).await?;
        info!("🚀 Starting run {} for source '{}'", run_id, source.name);

        let mut counters = RunCounters::default();
        let status = match self
            .execute_run(&source, max_leads, cancel, &mut counters)
            .await
        {
            Ok(()) => {
                if counters.persistence_gave_up {
                    RunStatus::Failed
                } else {
                    RunStatus::Completed
                }
            }
            Err(e) => {
                // Setup or unrecoverable store failure. Counters accrued so
                // far stay on the run record; batches already committed are
                // real rows.
                error!("Run {} failed: {}", run_id, e);
                counters.error_count += 1;
                counters.errors.push(e.to_string());
                RunStatus::Failed
            }
        };

        let error_message = counters.errors.last().map(|s| s.as_str());
        database::finish_run(
            &self.pool,
            run_id,
            status,
            counters.scraped,
            counters.saved,
            counters.duplicate,
            counters.skipped,
            counters.error_count,
            error_message,
        )
        .await?;

        info!(
            "✓ Run {} {}: {} scraped, {} saved, {} duplicates, {} skipped, {} errors",
            run_id,
            status.as_str(),
            counters.scraped,
            counters.saved,
            counters.duplicate,
            counters.skipped,
            counters.error_count
        );

        Ok(RunResult {
            run_id,
            source_id: source.id,
            source_name: source.name,
            status,
            leads_scraped: counters.scraped,
            leads_saved: counters.saved,
            leads_duplicate: counters.duplicate,
            leads_skipped: counters.skipped,
            error_count: counters.error_count,
            errors: counters.errors,
        })
    }

    async fn execute_run(
        &self,
        source: &Source,
        max_leads: usize,
        cancel: &CancelToken,
        counters: &mut RunCounters,
    ) -> Result<()> {
        let mut session =
            ScrapeSession::new(self.fetcher.as_ref(), source, self.config.scraping.max_pages)?;

        let batch_size = self.config.scraping.batch_size.max(1);
        let progress_every = self.config.logging.progress_interval.max(1);

        let mut batch: Vec<Lead> = Vec::with_capacity(batch_size);
        let mut consecutive_persist_failures = 0u32;

        'pages: loop {
            if cancel.is_cancelled() {
                info!("Run cancelled between pages for '{}'", source.name);
                break;
            }
            if counters.scraped as usize >= max_leads {
                break;
            }

            let records = match session.next_page().await {
                Ok(Some(records)) => records,
                Ok(None) => break,
                Err(e) if e.is_page_level() => {
                    // Partial results stand; the failed page ends the
                    // sequence and is recorded on the run.
                    warn!("Page fetch ended run early for '{}': {}", source.name, e);
                    counters.error_count += 1;
                    counters.errors.push(e.to_string());
                    break;
                }
                Err(e) => return Err(e),
            };

            for raw in records {
                if counters.scraped as usize >= max_leads {
                    break 'pages;
                }
                counters.scraped += 1;

                if counters.scraped as usize % progress_every == 0 {
                    info!(
                        "Progress '{}': {} scraped, {} saved, {} duplicates",
                        source.name, counters.scraped, counters.saved, counters.duplicate
                    );
                }

                let Some(lead) = normalize::normalize(&raw, source) else {
                    counters.skipped += 1;
                    continue;
                };

                self.ingest_lead(lead, &mut batch, counters).await?;

                if batch.len() >= batch_size {
                    self.flush_batch(&mut batch, counters, &mut consecutive_persist_failures)
                        .await;
                    if counters.persistence_gave_up {
                        break 'pages;
                    }
                }
            }
        }

        if !batch.is_empty() && !counters.persistence_gave_up {
            self.flush_batch(&mut batch, counters, &mut consecutive_persist_failures)
                .await;
        }

        Ok(())
    }

    /// Dedupe one normalized lead against the store and the pending batch,
    /// then apply the decision.
    async fn ingest_lead(
        &self,
        mut lead: Lead,
        batch: &mut Vec<Lead>,
        counters: &mut RunCounters,
    ) -> Result<()> {
        let policy = &self.config.dedupe;
        let candidates = database::find_dedupe_candidates(&self.pool, &lead).await?;

        match dedupe::decide(&lead, &candidates, policy) {
            DedupeDecision::Duplicate { .. } => {
                counters.duplicate += 1;
                return Ok(());
            }
            DedupeDecision::Merge { index, .. } => {
                let mut target = candidates[index].clone();
                if dedupe::merge_into(&mut target, &lead) {
                    target.score = scoring::score_lead(&target);
                    database::update_lead(&self.pool, &target).await?;
                }
                counters.duplicate += 1;
                return Ok(());
            }
            DedupeDecision::New => {}
        }

        // Still unseen in the store; the same business may already sit in
        // the uncommitted batch.
        match dedupe::decide(&lead, batch, policy) {
            DedupeDecision::Duplicate { .. } => {
                counters.duplicate += 1;
            }
            DedupeDecision::Merge { index, .. } => {
                let candidate = lead;
                if dedupe::merge_into(&mut batch[index], &candidate) {
                    batch[index].score = scoring::score_lead(&batch[index]);
                }
                counters.duplicate += 1;
            }
            DedupeDecision::New => {
                lead.score = scoring::score_lead(&lead);
                batch.push(lead);
            }
        }
        Ok(())
    }

    /// Commit the pending batch. A write failure is recorded on the run; two
    /// consecutive failures abandon persistence for the rest of the run.
    async fn flush_batch(
        &self,
        batch: &mut Vec<Lead>,
        counters: &mut RunCounters,
        consecutive_failures: &mut u32,
    ) {
        if batch.is_empty() {
            return;
        }

        match database::insert_leads(&self.pool, batch).await {
            Ok(written) => {
                counters.saved += written as u64;
                *consecutive_failures = 0;
                batch.clear();
            }
            Err(e) => {
                error!("Batch persist failed ({} leads): {}", batch.len(), e);
                counters.error_count += 1;
                counters.errors.push(format!("persist failed: {}", e));
                *consecutive_failures += 1;
                batch.clear();
                if *consecutive_failures >= 2 {
                    counters.persistence_gave_up = true;
                }
            }
        }
    }

    /// Run every enabled source sequentially. Sequential on purpose: shared
    /// rate limits and a single-writer store discipline.
    pub async fn run_all_sources(
        &self,
        max_leads_per_source: Option<usize>,
    ) -> Result<Vec<RunResult>> {
        let sources = self.registry.list_enabled().await?;
        info!("Running {} enabled sources", sources.len());

        let mut results = Vec::with_capacity(sources.len());
        for source in sources {
            let result = self.run_scraper(source.id, max_leads_per_source).await?;
            results.push(result);
        }
        Ok(results)
    }

    pub async fn get_stats(&self) -> Result<PlatformStats> {
        let sources = self.registry.list_all().await?;

        let mut stats = PlatformStats {
            total_sources: sources.len() as i64,
            enabled_sources: sources.iter().filter(|s| s.enabled).count() as i64,
            total_leads: database::count_leads(&self.pool, None).await?,
            sources: Vec::with_capacity(sources.len()),
        };

        for source in sources {
            let leads = database::count_leads(&self.pool, Some(source.id)).await?;
            let runs = database::get_run_counters(&self.pool, source.id).await?;
            stats.sources.push(SourceStats {
                id: source.id,
                name: source.name,
                enabled: source.enabled,
                leads,
                total_runs: runs.total_runs,
                completed_runs: runs.completed_runs,
                failed_runs: runs.failed_runs,
            });
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::create_db_pool;
    use crate::sources::SourceConfig;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Fetcher serving canned bodies keyed by exact URL.
    struct StubFetcher {
        pages: HashMap<String, String>,
    }

    #[async_trait]
    impl PageFetcher for StubFetcher {
        async fn fetch(&self, url: &str, _rate_limit_delay: f64) -> Result<String> {
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| HarvestError::Fetch {
                    url: url.to_string(),
                    reason: "HTTP 500".to_string(),
                })
        }
    }

    fn listing(name: &str, phone: &str, email: &str) -> String {
        format!(
            r#"<div class="result">
                <h2 class="business-name">{}</h2>
                <span class="phones">{}</span>
                <span class="email">{}</span>
            </div>"#,
            name, phone, email
        )
    }

    fn test_source_config() -> SourceConfig {
        let mut selectors = HashMap::new();
        selectors.insert("listing_container".to_string(), ".result".to_string());
        selectors.insert("business_name".to_string(), ".business-name".to_string());
        selectors.insert("phone".to_string(), ".phones".to_string());
        selectors.insert("email".to_string(), ".email".to_string());
        SourceConfig {
            name: "Test Directory".to_string(),
            source_type: "direct".to_string(),
            base_url: "https://directory.example.com/search".to_string(),
            pagination_type: "direct".to_string(),
            selectors,
            rate_limit_delay: 0.0,
            enabled: true,
        }
    }

    async fn engine_with_config(
        pages: HashMap<String, String>,
        config: Config,
    ) -> (HarvestEngine, i64) {
        let db_path = std::env::temp_dir()
            .join(format!("harvest-test-{}.db", uuid::Uuid::new_v4()))
            .to_string_lossy()
            .to_string();
        let pool = create_db_pool(&db_path).await.unwrap();
        let engine = HarvestEngine::with_fetcher(pool, config, Arc::new(StubFetcher { pages }));
        let source = engine
            .registry()
            .register(test_source_config())
            .await
            .unwrap();
        (engine, source.id)
    }

    async fn engine_with_pages(pages: HashMap<String, String>) -> (HarvestEngine, i64) {
        engine_with_config(pages, Config::default()).await
    }

    #[tokio::test]
    async fn two_page_run_saves_valid_leads_and_skips_nameless() {
        let page1 = format!(
            "{}{}{}",
            listing("Acme Plumbing", "(555) 123-4567", "info@acme.com"),
            listing("  ", "555 999 0000", ""),
            listing("Zeta Bakery", "(555) 222-3333", "")
        );
        let mut pages = HashMap::new();
        pages.insert("https://directory.example.com/search".to_string(), page1);
        pages.insert(
            "https://directory.example.com/search?page=2".to_string(),
            "<html><body>no results</body></html>".to_string(),
        );

        let (engine, source_id) = engine_with_pages(pages).await;
        let result = engine.run_scraper(source_id, None).await.unwrap();

        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.leads_scraped, 3);
        assert_eq!(result.leads_saved, 2);
        assert_eq!(result.leads_skipped, 1);
        assert_eq!(result.error_count, 0);
    }

    #[tokio::test]
    async fn rerunning_unchanged_source_saves_nothing_new() {
        let page1 = format!(
            "{}{}",
            listing("Acme Plumbing", "(555) 123-4567", "info@acme.com"),
            listing("Zeta Bakery", "(555) 222-3333", "hello@zeta.com")
        );
        let mut pages = HashMap::new();
        pages.insert("https://directory.example.com/search".to_string(), page1);
        pages.insert(
            "https://directory.example.com/search?page=2".to_string(),
            "<html></html>".to_string(),
        );

        let (engine, source_id) = engine_with_pages(pages).await;

        let first = engine.run_scraper(source_id, None).await.unwrap();
        assert_eq!(first.leads_saved, 2);

        let second = engine.run_scraper(source_id, None).await.unwrap();
        assert_eq!(second.leads_saved, 0);
        assert_eq!(second.leads_duplicate, 2);

        let stats = engine.get_stats().await.unwrap();
        assert_eq!(stats.total_leads, 2);
    }

    #[tokio::test]
    async fn merge_fills_email_and_recomputes_score_without_new_row() {
        let mut pages = HashMap::new();
        pages.insert(
            "https://directory.example.com/search".to_string(),
            listing("Acme Inc", "(555) 123-4567", ""),
        );
        pages.insert(
            "https://directory.example.com/search?page=2".to_string(),
            "<html></html>".to_string(),
        );

        let (engine, source_id) = engine_with_pages(pages).await;
        engine.run_scraper(source_id, None).await.unwrap();

        let before = database::get_lead(&engine.pool, 1).await.unwrap().unwrap();
        assert!(before.email.is_none());

        // Same phone, slightly different name, email now present.
        let mut pages = HashMap::new();
        pages.insert(
            "https://directory.example.com/search".to_string(),
            listing("Acme Incorporated", "555-123-4567", "a@acme.com"),
        );
        pages.insert(
            "https://directory.example.com/search?page=2".to_string(),
            "<html></html>".to_string(),
        );
        let engine2 = HarvestEngine::with_fetcher(
            engine.pool.clone(),
            Config::default(),
            Arc::new(StubFetcher { pages }),
        );

        let result = engine2.run_scraper(source_id, None).await.unwrap();
        assert_eq!(result.leads_saved, 0);
        assert_eq!(result.leads_duplicate, 1);

        let after = database::get_lead(&engine2.pool, 1).await.unwrap().unwrap();
        assert_eq!(after.email.as_deref(), Some("a@acme.com"));
        assert_eq!(after.business_name, "Acme Inc");
        assert!(after.score > before.score);
        assert_eq!(database::count_leads(&engine2.pool, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn max_leads_truncates_consumption_deterministically() {
        let names = [
            "Acme Plumbing",
            "Zeta Bakery",
            "Nord Auto Repair",
            "Lakeside Dental",
            "Pioneer Roofing",
            "Cedar Grove Florist",
            "Summit HVAC",
            "Blue Door Cafe",
            "Ravenwood Books",
            "Delta Electric",
            "Harbor Light Marina",
            "Maple Street Diner",
            "Quartz Fitness",
            "Willow Creek Vet",
            "Ironclad Locksmith",
            "Gold Leaf Gallery",
            "Stonebridge Realty",
            "Velvet Hair Studio",
            "Falcon Couriers",
            "Juniper Yoga",
        ];
        let mut body = String::new();
        for (i, name) in names.iter().enumerate() {
            body.push_str(&listing(
                name,
                &format!(
                    "({:03}) {:03}-{:04}",
                    201 + i * 7,
                    300 + i * 13,
                    (1000 + i * 517) % 10000
                ),
                "",
            ));
        }
        let mut pages = HashMap::new();
        pages.insert("https://directory.example.com/search".to_string(), body);

        let (engine, source_id) = engine_with_pages(pages).await;
        let result = engine.run_scraper(source_id, Some(5)).await.unwrap();

        assert_eq!(result.leads_scraped, 5);
        assert_eq!(result.leads_saved, 5);
        assert_eq!(result.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn failed_page_fetch_keeps_partial_results_and_completes() {
        let page1 = format!(
            "{}{}",
            listing("Acme Plumbing", "(555) 123-4567", ""),
            listing("Zeta Bakery", "(555) 222-3333", "")
        );
        // page 2 is deliberately absent from the stub, so its fetch fails.
        let mut pages = HashMap::new();
        pages.insert("https://directory.example.com/search".to_string(), page1);

        let (engine, source_id) = engine_with_pages(pages).await;
        let result = engine.run_scraper(source_id, None).await.unwrap();

        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.leads_saved, 2);
        assert_eq!(result.error_count, 1);
    }

    #[tokio::test]
    async fn duplicates_within_one_batch_are_collapsed() {
        let body = format!(
            "{}{}",
            listing("Acme Plumbing", "(555) 123-4567", ""),
            listing("Acme Plumbing", "(555) 123-4567", "info@acme.com")
        );
        let mut pages = HashMap::new();
        pages.insert("https://directory.example.com/search".to_string(), body);
        pages.insert(
            "https://directory.example.com/search?page=2".to_string(),
            "<html></html>".to_string(),
        );

        let (engine, source_id) = engine_with_pages(pages).await;
        let result = engine.run_scraper(source_id, None).await.unwrap();

        assert_eq!(result.leads_saved, 1);
        assert_eq!(result.leads_duplicate, 1);

        // The merged batch entry carried the email into the saved row.
        let saved = database::get_lead(&engine.pool, 1).await.unwrap().unwrap();
        assert_eq!(saved.email.as_deref(), Some("info@acme.com"));
    }

    #[tokio::test]
    async fn unknown_source_id_is_a_config_error() {
        let (engine, _) = engine_with_pages(HashMap::new()).await;
        let err = engine.run_scraper(999, None).await.unwrap_err();
        assert!(matches!(err, HarvestError::Config(_)));
    }

    #[tokio::test]
    async fn same_digits_different_phone_formatting_dedupes_across_runs() {
        // A 12-digit international number is kept best-effort, so both runs
        // store their raw formatting; only the digit key links them.
        let mut pages = HashMap::new();
        pages.insert(
            "https://directory.example.com/search".to_string(),
            listing("Carlton House Hotel", "+44 20 7946 0958", ""),
        );
        pages.insert(
            "https://directory.example.com/search?page=2".to_string(),
            "<html></html>".to_string(),
        );

        let (engine, source_id) = engine_with_pages(pages).await;
        let first = engine.run_scraper(source_id, None).await.unwrap();
        assert_eq!(first.leads_saved, 1);

        // Different name prefix, so the name+city blocking key cannot help.
        let mut pages = HashMap::new();
        pages.insert(
            "https://directory.example.com/search".to_string(),
            listing("The Carlton House Hotel", "44-20-7946-0958", ""),
        );
        pages.insert(
            "https://directory.example.com/search?page=2".to_string(),
            "<html></html>".to_string(),
        );
        let engine2 = HarvestEngine::with_fetcher(
            engine.pool.clone(),
            Config::default(),
            Arc::new(StubFetcher { pages }),
        );

        let second = engine2.run_scraper(source_id, None).await.unwrap();
        assert_eq!(second.leads_saved, 0);
        assert_eq!(second.leads_duplicate, 1);
        assert_eq!(database::count_leads(&engine2.pool, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn two_consecutive_persist_failures_fail_the_run() {
        let body = format!(
            "{}{}{}",
            listing("Acme Plumbing", "(555) 123-4567", ""),
            listing("Zeta Bakery", "(555) 222-3333", ""),
            listing("Nord Auto Repair", "(555) 444-5555", "")
        );
        let mut pages = HashMap::new();
        pages.insert("https://directory.example.com/search".to_string(), body);

        let mut config = Config::default();
        config.scraping.batch_size = 1;
        let (engine, source_id) = engine_with_config(pages, config).await;

        // Reads keep working; only lead writes are rejected.
        let conn = engine.pool.get().await.unwrap();
        conn.execute(
            "CREATE TRIGGER reject_lead_inserts BEFORE INSERT ON leads
             BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END",
            [],
        )
        .unwrap();
        drop(conn);

        let result = engine.run_scraper(source_id, None).await.unwrap();
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.leads_saved, 0);
        assert_eq!(result.error_count, 2);
        assert!(result.errors.iter().all(|e| e.contains("persist failed")));
    }

    #[tokio::test]
    async fn cancelled_token_stops_the_run_before_fetching() {
        // The stub has no pages, so any fetch attempt would raise an error.
        let (engine, source_id) = engine_with_pages(HashMap::new()).await;

        let cancel = CancelToken::new();
        cancel.cancel();
        let result = engine
            .run_scraper_with_cancel(source_id, None, &cancel)
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.leads_scraped, 0);
        assert_eq!(result.error_count, 0);
    }

    #[tokio::test]
    async fn mid_run_store_failure_keeps_accrued_counters() {
        let mut pages = HashMap::new();
        pages.insert(
            "https://directory.example.com/search".to_string(),
            listing("Acme Inc", "(555) 123-4567", ""),
        );
        pages.insert(
            "https://directory.example.com/search?page=2".to_string(),
            "<html></html>".to_string(),
        );

        let (engine, source_id) = engine_with_pages(pages).await;
        engine.run_scraper(source_id, None).await.unwrap();

        // Merging into the stored row now hits a failing store.
        let conn = engine.pool.get().await.unwrap();
        conn.execute(
            "CREATE TRIGGER reject_lead_updates BEFORE UPDATE ON leads
             BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END",
            [],
        )
        .unwrap();
        drop(conn);

        let mut pages = HashMap::new();
        pages.insert(
            "https://directory.example.com/search".to_string(),
            listing("Acme Inc", "(555) 123-4567", "info@acme.com"),
        );
        let engine2 = HarvestEngine::with_fetcher(
            engine.pool.clone(),
            Config::default(),
            Arc::new(StubFetcher { pages }),
        );

        let result = engine2.run_scraper(source_id, None).await.unwrap();
        assert_eq!(result.status, RunStatus::Failed);
        // The record was consumed before the store gave out.
        assert_eq!(result.leads_scraped, 1);
        assert_eq!(result.error_count, 1);
    }
}
