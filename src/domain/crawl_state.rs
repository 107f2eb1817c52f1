//! Ephemeral per-run crawl state and per-category outcomes

use serde::Serialize;
use std::collections::HashSet;

/// Pagination state machine for one (site, category) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PageState {
    Start,
    FetchingPage,
    HasMore,
    Exhausted,
    Failed,
}

impl PageState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Exhausted | Self::Failed)
    }

    /// Legal moves. A category may also end before its next fetch
    /// (cancellation, page cap, visited URL, bad URL), so `Start` and
    /// `HasMore` can go straight to a terminal state.
    pub const fn can_advance_to(self, next: Self) -> bool {
        match self {
            Self::Start | Self::HasMore => matches!(next, Self::FetchingPage | Self::Exhausted | Self::Failed),
            Self::FetchingPage => matches!(next, Self::HasMore | Self::Exhausted | Self::Failed),
            Self::Exhausted | Self::Failed => false,
        }
    }
}

/// Why a category stopped producing pages
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustReason {
    NoRecords,
    NoNextPage,
    PageCap,
    RepeatedPage,
    AlreadyVisited,
}

/// Mutable state threaded through one site's crawl. Shared by every
/// category of the site so a URL is never fetched twice within a run.
#[derive(Debug, Default)]
pub struct CrawlState {
    visited: HashSet<String>,
    pub cursor: u32,
    pub errors: ErrorCounters,
}

impl CrawlState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the URL; returns `false` when it was already visited
    pub fn mark_visited(&mut self, url: &str) -> bool {
        self.visited.insert(url.to_string())
    }

    pub fn is_visited(&self, url: &str) -> bool {
        self.visited.contains(url)
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorCounters {
    pub fetch_failures: u32,
    pub charset_fallbacks: u32,
    pub extraction_misses: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CategoryStatus {
    Exhausted { reason: ExhaustReason },
    Failed { reason: String },
    Cancelled,
}

/// Result of crawling one category
#[derive(Debug, Clone, Serialize)]
pub struct CategoryOutcome {
    pub category_id: String,
    pub pages_fetched: u32,
    pub records_extracted: usize,
    pub status: CategoryStatus,
}

impl CategoryOutcome {
    pub const fn is_failed(&self) -> bool {
        matches!(self.status, CategoryStatus::Failed { .. })
    }
}
