//! Domain module - Core data types of the ingestion pipeline
//!
//! Pure data: site profiles, raw and normalized product records, crawl
//! state and merge outcomes. Nothing here performs I/O.

pub mod catalog_entry;
pub mod crawl_state;
pub mod merge_result;
pub mod site_profile;

// Re-export commonly used items for convenience
pub use catalog_entry::{
    CatalogEntry, QualityFlag, RawRecord, RecordOrigin, Rejection, DEFAULT_CURRENCY,
    UNCATEGORIZED,
};
pub use crawl_state::{
    CategoryOutcome, CategoryStatus, CrawlState, ErrorCounters, ExhaustReason, PageState,
};
pub use merge_result::{BackupRef, MergeResult};
pub use site_profile::{
    CategoryMapping, CategorySpec, KeywordRule, PaginationSpec, RenderMode, RenderSpec,
    SelectorRule, SelectorSet, SiteProfile, TotalCountSpec,
};
