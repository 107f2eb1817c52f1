//! Scraped and normalized product records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Category bucket used when neither the site nor the keyword table decides
pub const UNCATEGORIZED: &str = "uncategorized";

/// Every mall in the catalog prices in won
pub const DEFAULT_CURRENCY: &str = "KRW";

/// Pre-normalization fields exactly as they came off one listing page.
/// Every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RawRecord {
    pub name: Option<String>,
    pub price_text: Option<String>,
    pub original_price_text: Option<String>,
    pub image_url: Option<String>,
    pub link: Option<String>,
    pub category_hint: Option<String>,
    /// Matched by one of the profile's id patterns
    pub source_id: Option<String>,
    pub sold_out: bool,
    pub origin: RecordOrigin,
}

/// Where in the crawl a raw record was found
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecordOrigin {
    pub category_id: String,
    pub page: u32,
    pub index: usize,
    pub page_url: String,
    pub charset_fallback: bool,
}

/// Normalized, persisted product record.
///
/// Serialized in camelCase because the storefront reads the same file.
/// Fields this crate does not know about are kept in `extra` and written
/// back untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub id: String,
    pub title: String,
    pub price: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_price: Option<u64>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub source_url: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_in_stock")]
    pub in_stock: bool,
    pub mall_id: String,
    #[serde(default)]
    pub mall_name: String,
    #[serde(default)]
    pub region: String,
    #[serde(default = "Utc::now")]
    pub first_seen_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub last_updated_at: DateTime<Utc>,
    #[serde(default)]
    pub quality_flags: Vec<QualityFlag>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_category() -> String {
    UNCATEGORIZED.to_string()
}

const fn default_in_stock() -> bool {
    true
}

impl CatalogEntry {
    /// Key of the secondary duplicate guard: normalized title within a mall
    pub fn dedupe_key(&self) -> (String, String) {
        (normalized_title_key(&self.title), self.mall_id.clone())
    }

    pub fn has_flag(&self, flag: QualityFlag) -> bool {
        self.quality_flags.contains(&flag)
    }

    pub fn set_flag(&mut self, flag: QualityFlag) {
        if !self.has_flag(flag) {
            self.quality_flags.push(flag);
        }
    }

    pub fn clear_flag(&mut self, flag: QualityFlag) {
        self.quality_flags.retain(|f| *f != flag);
    }

    /// Persistence invariant: non-empty title and a positive price
    pub fn is_persistable(&self) -> bool {
        !self.title.trim().is_empty() && self.price > 0
    }
}

/// Lowercased title with all whitespace removed
pub fn normalized_title_key(title: &str) -> String {
    title
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    /// Id derived from crawl position; not stable across crawls
    LowConfidenceId,
    /// Page bytes did not decode with the declared charset
    CharsetFallback,
    MissingImage,
    MissingLink,
    /// Not seen in the latest complete crawl of its mall
    Stale,
}

/// Why a raw record did not become a catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Rejection {
    MissingTitle,
    InvalidPrice,
    DuplicateWithinBatch,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::MissingTitle => "MissingTitle",
            Self::InvalidPrice => "InvalidPrice",
            Self::DuplicateWithinBatch => "DuplicateWithinBatch",
        };
        f.write_str(s)
    }
}
