//! Per-category pagination state machine
//!
//! ```text
//! Start -> FetchingPage -> HasMore -> FetchingPage -> ... -> Exhausted
//!                      \-> Failed
//! ```
//!
//! Categories of one site run sequentially and share one `CrawlState`, so a
//! listing URL is fetched at most once per run. Page N+1 is only requested
//! after page N's extraction decided there is more.

use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::domain::{
    CategoryOutcome, CategorySpec, CategoryStatus, CrawlState, ErrorCounters, ExhaustReason, PageState,
    RawRecord, SiteProfile,
};
use crate::infrastructure::parsing::{ListingPage, ParseContext, ParsingError, ProductListParser};
use crate::infrastructure::{FetchError, PageFetcher, SiteLimiter};

/// Everything one site's crawl produced
#[derive(Debug, Default)]
pub struct SiteCrawl {
    pub records: Vec<RawRecord>,
    pub outcomes: Vec<CategoryOutcome>,
    pub errors: ErrorCounters,
    pub pages_visited: usize,
}

impl SiteCrawl {
    /// At least one category was abandoned after a fetch failure
    pub fn any_failed(&self) -> bool {
        self.outcomes.iter().any(CategoryOutcome::is_failed)
    }

    pub fn was_cancelled(&self) -> bool {
        self.outcomes
            .iter()
            .any(|o| o.status == CategoryStatus::Cancelled)
    }

    /// Every category reached a terminal state without failing
    pub fn is_complete(&self) -> bool {
        !self.outcomes.is_empty() && !self.any_failed() && !self.was_cancelled()
    }
}

pub struct SiteCrawler<'a> {
    profile: &'a SiteProfile,
    parser: ProductListParser,
    fetcher: &'a dyn PageFetcher,
    limiter: &'a SiteLimiter,
    max_pages: u32,
}

impl<'a> SiteCrawler<'a> {
    /// `max_pages` is the global cap; a profile may lower it
    pub fn new(
        profile: &'a SiteProfile,
        fetcher: &'a dyn PageFetcher,
        limiter: &'a SiteLimiter,
        max_pages: u32,
    ) -> Result<Self, ParsingError> {
        let max_pages = profile
            .pagination
            .max_pages
            .map_or(max_pages, |cap| cap.min(max_pages));
        Ok(Self {
            profile,
            parser: ProductListParser::new(profile)?,
            fetcher,
            limiter,
            max_pages,
        })
    }

    pub const fn max_pages(&self) -> u32 {
        self.max_pages
    }

    pub async fn crawl_site(&self, cancel: &CancellationToken) -> SiteCrawl {
        let started = Instant::now();
        let mut state = CrawlState::new();
        let mut crawl = SiteCrawl::default();

        info!(
            site = %self.profile.id,
            categories = self.profile.categories.len(),
            max_pages = self.max_pages,
            "Site crawl started"
        );

        for category in &self.profile.categories {
            if cancel.is_cancelled() {
                crawl.outcomes.push(CategoryOutcome {
                    category_id: category.id.clone(),
                    pages_fetched: 0,
                    records_extracted: 0,
                    status: CategoryStatus::Cancelled,
                });
                continue;
            }

            let (outcome, records) = self.crawl_category(category, &mut state, cancel).await;
            crawl.records.extend(records);
            crawl.outcomes.push(outcome);
        }

        crawl.errors = state.errors.clone();
        crawl.pages_visited = state.visited_count();

        info!(
            site = %self.profile.id,
            records = crawl.records.len(),
            pages = crawl.pages_visited,
            failed = crawl.outcomes.iter().filter(|o| o.is_failed()).count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Site crawl finished"
        );
        crawl
    }

    /// Walk one category until it is exhausted, fails or is cancelled
    pub async fn crawl_category(
        &self,
        category: &CategorySpec,
        state: &mut CrawlState,
        cancel: &CancellationToken,
    ) -> (CategoryOutcome, Vec<RawRecord>) {
        let site = self.profile.id.as_str();
        let pagination = &self.profile.pagination;

        let mut records: Vec<RawRecord> = Vec::new();
        let mut pages_fetched = 0_u32;
        let mut page = pagination.first_page;
        let mut previous_fingerprint: Option<blake3::Hash> = None;
        let mut machine = PageState::Start;

        let status = loop {
            if cancel.is_cancelled() {
                break CategoryStatus::Cancelled;
            }
            if pages_fetched >= self.max_pages {
                break exhausted(ExhaustReason::PageCap);
            }

            let url = match category.page_url(&self.profile.base_url, pagination, page) {
                Ok(url) => url,
                Err(e) => break CategoryStatus::Failed { reason: format!("invalid page url: {e}") },
            };
            if !state.mark_visited(&url) {
                debug!(site, category = %category.id, url = %url, "Page already visited in this run");
                break exhausted(ExhaustReason::AlreadyVisited);
            }
            state.cursor = page;
            machine = advance(machine, PageState::FetchingPage, site, &category.id);

            let raw = match self.fetcher.fetch(&url, self.profile, self.limiter, cancel).await {
                Ok(raw) => raw,
                Err(FetchError::Cancelled) => break CategoryStatus::Cancelled,
                Err(e) => {
                    state.errors.fetch_failures += 1;
                    warn!(site, category = %category.id, page, url = %url, error = %e, "Category abandoned");
                    break CategoryStatus::Failed { reason: e.to_string() };
                }
            };
            pages_fetched += 1;
            if raw.charset_fallback {
                state.errors.charset_fallbacks += 1;
            }

            let context = ParseContext::new(&url, &category.id, page).with_charset_fallback(raw.charset_fallback);
            let listing = self.parser.parse(&raw.body, &context);
            debug!(
                site,
                category = %category.id,
                page,
                records = listing.records.len(),
                next = listing.has_next_signal,
                total = ?listing.total_count,
                "Page extracted"
            );

            if listing.records.is_empty() {
                state.errors.extraction_misses += 1;
                break exhausted(ExhaustReason::NoRecords);
            }

            let fingerprint = fingerprint(&listing.records);
            if previous_fingerprint == Some(fingerprint) {
                debug!(site, category = %category.id, page, "Page repeats the previous one");
                break exhausted(ExhaustReason::RepeatedPage);
            }
            previous_fingerprint = Some(fingerprint);

            let more = self.has_more(&listing, records.len());
            records.extend(listing.records);
            if !more {
                break exhausted(ExhaustReason::NoNextPage);
            }

            machine = advance(machine, PageState::HasMore, site, &category.id);
            page += 1;
        };

        let terminal = match status {
            CategoryStatus::Failed { .. } => PageState::Failed,
            _ => PageState::Exhausted,
        };
        advance(machine, terminal, site, &category.id);

        info!(
            site,
            category = %category.id,
            pages = pages_fetched,
            records = records.len(),
            status = ?status,
            "Category finished"
        );

        let outcome = CategoryOutcome {
            category_id: category.id.clone(),
            pages_fetched,
            records_extracted: records.len(),
            status,
        };
        (outcome, records)
    }

    /// Next-page signal: an explicit marker, a full page, or an advertised
    /// total not yet reached.
    fn has_more(&self, listing: &ListingPage, records_before: usize) -> bool {
        let full_page = self
            .profile
            .pagination
            .page_size
            .is_some_and(|size| size > 0 && listing.records.len() >= size);
        let below_total = listing
            .total_count
            .is_some_and(|total| ((records_before + listing.records.len()) as u64) < total);

        listing.has_next_signal || full_page || below_total
    }
}

const fn exhausted(reason: ExhaustReason) -> CategoryStatus {
    CategoryStatus::Exhausted { reason }
}

fn advance(from: PageState, to: PageState, site: &str, category: &str) -> PageState {
    debug_assert!(from.can_advance_to(to), "illegal page state transition {from:?} -> {to:?}");
    trace!(site, category, from = ?from, to = ?to, "Page state transition");
    to
}

/// Content hash of a page's records, ignoring their position
fn fingerprint(records: &[RawRecord]) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    for record in records {
        for field in [&record.name, &record.price_text, &record.link, &record.source_id] {
            hasher.update(field.as_deref().unwrap_or_default().as_bytes());
            hasher.update(&[0x1f]);
        }
        hasher.update(&[0x1e]);
    }
    hasher.finalize()
}
