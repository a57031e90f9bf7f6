use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::error::{HarvestError, Result};
use crate::models::RawRecord;
use crate::sources::Source;

use super::fetch::PageFetcher;
use super::paginate::{self, PageContext, Paginate};

/// Selector keys that drive the session itself rather than extract a field.
const META_SELECTORS: &[&str] = &["listing_container", "next_page"];

/// Lazy page-at-a-time scrape of one source. The orchestrator pulls pages
/// until it has enough records, the site signals no more pages, or a fetch
/// fails terminally.
pub struct ScrapeSession<'a> {
    fetcher: &'a dyn PageFetcher,
    source: &'a Source,
    paginator: Box<dyn Paginate>,
    next_url: Option<String>,
    page_index: u32,
    total_matched: usize,
    max_pages: u32,
}

impl<'a> ScrapeSession<'a> {
    pub fn new(fetcher: &'a dyn PageFetcher, source: &'a Source, max_pages: u32) -> Result<Self> {
        let paginator = paginate::paginator_for(&source.source_type).ok_or_else(|| {
            HarvestError::config(format!(
                "no scraper variant registered for source_type '{}'",
                source.source_type
            ))
        })?;
        let first = paginator.initial_url(source);

        Ok(Self {
            fetcher,
            source,
            paginator,
            next_url: Some(first),
            page_index: 0,
            total_matched: 0,
            max_pages,
        })
    }

    /// Fetch and parse the next page. Returns Ok(None) once the sequence is
    /// exhausted; a fetch failure after retries surfaces as an error and
    /// terminates the sequence (the caller records it, partial results stand).
    pub async fn next_page(&mut self) -> Result<Option<Vec<RawRecord>>> {
        let url = match self.next_url.take() {
            Some(url) => url,
            None => return Ok(None),
        };

        self.page_index += 1;
        debug!(
            "Fetching page {} of '{}': {}",
            self.page_index, self.source.name, url
        );

        let body = self.fetcher.fetch(&url, self.source.rate_limit_delay).await?;

        let (records, matched, next) = self.parse_page(&body, &url)?;
        if matched == 0 {
            // Empty container match is the terminal signal.
            debug!("Page {} matched no listings, ending scrape", self.page_index);
            return Ok(None);
        }

        self.total_matched += matched;
        self.next_url = next;
        Ok(Some(records))
    }

    pub fn pages_fetched(&self) -> u32 {
        self.page_index
    }

    fn parse_page(
        &self,
        body: &str,
        url: &str,
    ) -> Result<(Vec<RawRecord>, usize, Option<String>)> {
        // scraper::Html is not Send; all parsing stays inside this sync scope.
        let document = Html::parse_document(body);

        let container_rule = self
            .source
            .selector("listing_container")
            .ok_or_else(|| HarvestError::config("source has no listing_container selector"))?;
        let container = Selector::parse(container_rule)
            .map_err(|_| HarvestError::Parse(container_rule.to_string()))?;

        let mut records = Vec::new();
        let mut matched = 0usize;
        for element in document.select(&container) {
            matched += 1;
            records.push(extract_record(element, self.source));
        }

        let next = if matched == 0 {
            None
        } else {
            let ctx = PageContext {
                index: self.page_index,
                url: url.to_string(),
                listings_matched: matched,
                total_matched: self.total_matched + matched,
                max_pages: self.max_pages,
            };
            self.paginator.next_url(self.source, &ctx, &document)
        };

        Ok((records, matched, next))
    }
}

/// Extract every configured field from one listing element. Fields whose
/// selector matches nothing are simply absent from the record; identity
/// checks happen downstream in the normalizer.
fn extract_record(element: ElementRef<'_>, source: &Source) -> RawRecord {
    let mut record = RawRecord::default();

    for (field, rule) in &source.selectors {
        if META_SELECTORS.contains(&field.as_str()) {
            continue;
        }

        let value = if field == "website" {
            extract_attr(element, rule, "href").or_else(|| extract_text(element, rule))
        } else {
            extract_text(element, rule)
        };

        if let Some(value) = value {
            record.insert(field, value);
        }
    }

    record
}

fn extract_text(element: ElementRef<'_>, rule: &str) -> Option<String> {
    let selector = Selector::parse(rule).ok()?;
    let found = element.select(&selector).next()?;
    let text = found.text().collect::<String>();
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn extract_attr(element: ElementRef<'_>, rule: &str, attr: &str) -> Option<String> {
    let selector = Selector::parse(rule).ok()?;
    let found = element.select(&selector).next()?;
    found.value().attr(attr).map(|s| s.trim().to_string())
}
