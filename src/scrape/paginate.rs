use scraper::{Html, Selector};
use url::Url;

use crate::sources::Source;

pub const DIRECT: &str = "direct";
pub const TOKEN: &str = "token";
pub const INFINITE_SCROLL: &str = "infinite_scroll";

/// Per-page context handed to a paginator after the page has been parsed.
pub struct PageContext {
    /// 1-based index of the page just consumed.
    pub index: u32,
    /// URL the page was fetched from.
    pub url: String,
    /// Listing elements matched on this page.
    pub listings_matched: usize,
    /// Listing elements matched across the whole session so far.
    pub total_matched: usize,
    /// Hard page ceiling for strategies without a terminal signal.
    pub max_pages: u32,
}

/// The policy axis that differs between scraper variants: how the reference
/// to the next page is computed.
pub trait Paginate: Send + Sync {
    fn initial_url(&self, source: &Source) -> String;

    /// Next page URL, or None when the site signaled the end of results.
    fn next_url(&self, source: &Source, ctx: &PageContext, document: &Html) -> Option<String>;
}

/// Resolve a scraper variant by source type. Registry lookup rather than
/// inheritance: adding a directory site is data, not code, as long as one of
/// these strategies fits.
pub fn paginator_for(source_type: &str) -> Option<Box<dyn Paginate>> {
    match source_type {
        DIRECT => Some(Box::new(DirectPaginator)),
        TOKEN => Some(Box::new(TokenPaginator)),
        INFINITE_SCROLL => Some(Box::new(ScrollPaginator)),
        _ => None,
    }
}

pub fn is_known_variant(source_type: &str) -> bool {
    matches!(source_type, DIRECT | TOKEN | INFINITE_SCROLL)
}

pub fn known_variants() -> Vec<&'static str> {
    vec![DIRECT, TOKEN, INFINITE_SCROLL]
}

fn with_query_param(base_url: &str, key: &str, value: &str) -> Option<String> {
    let mut url = Url::parse(base_url).ok()?;
    url.query_pairs_mut().append_pair(key, value);
    Some(url.to_string())
}

/// Numbered pages via a `page` query parameter.
struct DirectPaginator;

impl Paginate for DirectPaginator {
    fn initial_url(&self, source: &Source) -> String {
        source.base_url.clone()
    }

    fn next_url(&self, source: &Source, ctx: &PageContext, _document: &Html) -> Option<String> {
        if ctx.listings_matched == 0 || ctx.index >= ctx.max_pages {
            return None;
        }
        with_query_param(&source.base_url, "page", &(ctx.index + 1).to_string())
    }
}

/// Follows an extracted "next" link; the absent token is the terminal signal.
struct TokenPaginator;

impl Paginate for TokenPaginator {
    fn initial_url(&self, source: &Source) -> String {
        source.base_url.clone()
    }

    fn next_url(&self, source: &Source, ctx: &PageContext, document: &Html) -> Option<String> {
        if ctx.listings_matched == 0 {
            return None;
        }

        let rule = source.selector("next_page")?;
        let selector = Selector::parse(rule).ok()?;
        let href = document
            .select(&selector)
            .next()
            .and_then(|el| el.value().attr("href"))?;

        // Next links are frequently relative.
        let base = Url::parse(&ctx.url).ok()?;
        let resolved = base.join(href).ok()?;
        Some(resolved.to_string())
    }
}

/// Simulates infinite scroll with an offset parameter and a fixed page
/// ceiling, since scroll feeds never report a last page.
struct ScrollPaginator;

impl Paginate for ScrollPaginator {
    fn initial_url(&self, source: &Source) -> String {
        source.base_url.clone()
    }

    fn next_url(&self, source: &Source, ctx: &PageContext, _document: &Html) -> Option<String> {
        if ctx.listings_matched == 0 || ctx.index >= ctx.max_pages {
            return None;
        }
        with_query_param(&source.base_url, "start", &ctx.total_matched.to_string())
    }
}
