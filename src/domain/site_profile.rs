//! Declarative per-site crawl configuration
//!
//! A `SiteProfile` carries everything site-specific: where the categories
//! live, how pages are addressed, which selectors find each field and how
//! politely the site must be crawled. Adding a mall means adding a profile
//! file, never pipeline code.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Default minimum delay between two requests to the same site
pub const DEFAULT_REQUEST_DELAY_MS: u64 = 1_000;

/// Headless rendering is slower and more conspicuous, so it is paced harder
pub const HEADLESS_DELAY_MULTIPLIER: u32 = 2;

/// One source mall
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteProfile {
    /// Stable identifier, also used as `mallId` on catalog entries
    pub id: String,

    /// Human readable mall name (e.g. "우리몰")
    pub display_name: String,

    /// Region the mall belongs to (e.g. "대구광역시")
    pub region: String,

    /// Site root, used to resolve relative category URLs
    pub base_url: String,

    /// Declared text encoding of the site's pages; UTF-8 when absent
    #[serde(default)]
    pub encoding: Option<String>,

    pub categories: Vec<CategorySpec>,

    pub selectors: SelectorSet,

    /// Regexes whose first capture group is the source product id
    #[serde(default)]
    pub id_patterns: Vec<String>,

    #[serde(default)]
    pub pagination: PaginationSpec,

    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default)]
    pub render: RenderSpec,

    /// Tags attached to every entry of this mall
    #[serde(default)]
    pub tags: Vec<String>,

    /// Site category name -> canonical catalog category
    #[serde(default)]
    pub category_map: Vec<CategoryMapping>,

    /// Site-specific keyword rules, evaluated before the built-in table
    #[serde(default)]
    pub keyword_rules: Vec<KeywordRule>,
}

fn default_request_delay_ms() -> u64 {
    DEFAULT_REQUEST_DELAY_MS
}

impl SiteProfile {
    /// Minimum spacing between two requests to this site
    pub fn request_delay(&self) -> Duration {
        let base = Duration::from_millis(self.request_delay_ms);
        if self.is_headless() {
            base * HEADLESS_DELAY_MULTIPLIER
        } else {
            base
        }
    }

    pub fn is_headless(&self) -> bool {
        self.render.mode == RenderMode::Headless
    }

    /// Canonical category for a site-supplied category name, if mapped
    pub fn map_category(&self, site_category: &str) -> Option<&str> {
        let needle = site_category.trim();
        self.category_map
            .iter()
            .find(|m| m.from == needle)
            .map(|m| m.to.as_str())
    }

    pub fn category(&self, category_id: &str) -> Option<&CategorySpec> {
        self.categories.iter().find(|c| c.id == category_id)
    }
}

/// One category listing of a mall
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorySpec {
    pub id: String,
    pub name: String,

    /// Absolute or site-relative listing URL. May contain `{page}`.
    pub url: String,

    /// Category to assign without keyword inference
    #[serde(default)]
    pub explicit_category: Option<String>,
}

impl CategorySpec {
    /// Build the listing URL for a given page number
    pub fn page_url(
        &self,
        base_url: &str,
        pagination: &PaginationSpec,
        page: u32,
    ) -> Result<String, url::ParseError> {
        let base = Url::parse(base_url)?;

        if self.url.contains("{page}") {
            let templated = self.url.replace("{page}", &page.to_string());
            return Ok(base.join(&templated)?.to_string());
        }

        let mut url = base.join(&self.url)?;
        if page == pagination.first_page {
            return Ok(url.to_string());
        }

        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != pagination.page_param.as_str())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .append_pair(&pagination.page_param, &page.to_string());
        Ok(url.to_string())
    }
}

/// Page traversal parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationSpec {
    #[serde(default = "default_page_param")]
    pub page_param: String,

    #[serde(default = "default_first_page")]
    pub first_page: u32,

    /// Listing size of a full page; a full page implies there may be more
    #[serde(default)]
    pub page_size: Option<usize>,

    /// CSS selectors whose presence signals a next page
    #[serde(default)]
    pub next_selectors: Vec<String>,

    #[serde(default)]
    pub total_count: Option<TotalCountSpec>,

    /// Per-profile override of the global page cap
    #[serde(default)]
    pub max_pages: Option<u32>,
}

fn default_page_param() -> String {
    "page".to_string()
}

const fn default_first_page() -> u32 {
    1
}

impl Default for PaginationSpec {
    fn default() -> Self {
        Self {
            page_param: default_page_param(),
            first_page: default_first_page(),
            page_size: None,
            next_selectors: Vec::new(),
            total_count: None,
            max_pages: None,
        }
    }
}

/// Where the "N products in total" text lives, e.g. `총 37개의 상품`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TotalCountSpec {
    pub selector: String,
    /// First capture group must be the number
    pub pattern: String,
}

/// Ordered selector chains, one per extracted field
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectorSet {
    /// Product container candidates; the first one matching anything wins
    pub container: Vec<String>,
    pub name: Vec<SelectorRule>,
    pub price: Vec<SelectorRule>,
    #[serde(default)]
    pub original_price: Vec<SelectorRule>,
    #[serde(default)]
    pub image: Vec<SelectorRule>,
    #[serde(default)]
    pub link: Vec<SelectorRule>,
    #[serde(default)]
    pub category_hint: Vec<SelectorRule>,
    /// Any match marks the product as sold out
    #[serde(default)]
    pub sold_out: Vec<SelectorRule>,
}

/// One extraction strategy in a fallback chain.
///
/// An empty `css` addresses the container element itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SelectorRule {
    /// Trimmed text content of the first match
    Text { css: String },
    /// Attribute value of the first match
    Attr { css: String, attr: String },
    /// First capture group of `pattern` applied to the text (or `attr`)
    Pattern {
        css: String,
        #[serde(default)]
        attr: Option<String>,
        pattern: String,
    },
}

impl SelectorRule {
    pub fn css(&self) -> &str {
        match self {
            Self::Text { css } | Self::Attr { css, .. } | Self::Pattern { css, .. } => css,
        }
    }

    pub fn text(css: &str) -> Self {
        Self::Text { css: css.to_string() }
    }

    pub fn attr(css: &str, attr: &str) -> Self {
        Self::Attr {
            css: css.to_string(),
            attr: attr.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    #[default]
    Direct,
    Headless,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenderSpec {
    #[serde(default)]
    pub mode: RenderMode,

    /// Selector the headless renderer waits for before capturing the DOM
    #[serde(default)]
    pub ready_selector: Option<String>,

    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryMapping {
    pub from: String,
    pub to: String,
}

/// Keyword -> (category, tags) rule. Matching is a case-insensitive
/// substring test against the cleaned title.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordRule {
    pub keywords: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl KeywordRule {
    pub fn matches(&self, lowered_title: &str) -> bool {
        self.keywords
            .iter()
            .any(|k| lowered_title.contains(&k.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(url: &str) -> CategorySpec {
        CategorySpec {
            id: "001".to_string(),
            name: "식품".to_string(),
            url: url.to_string(),
            explicit_category: None,
        }
    }

    #[test]
    fn test_first_page_keeps_category_url() {
        let c = category("/product/product.html?category=001");
        let url = c
            .page_url("https://wemall.kr", &PaginationSpec::default(), 1)
            .unwrap();
        assert_eq!(url, "https://wemall.kr/product/product.html?category=001");
    }

    #[test]
    fn test_later_pages_set_page_param() {
        let c = category("/product/product.html?category=001&page=1");
        let url = c
            .page_url("https://wemall.kr", &PaginationSpec::default(), 3)
            .unwrap();
        assert_eq!(url, "https://wemall.kr/product/product.html?category=001&page=3");
    }

    #[test]
    fn test_page_placeholder() {
        let c = category("https://shop.example.com/list/{page}");
        let url = c
            .page_url("https://shop.example.com", &PaginationSpec::default(), 2)
            .unwrap();
        assert_eq!(url, "https://shop.example.com/list/2");
    }

    #[test]
    fn test_selector_rule_deserializes_tagged() {
        let rule: SelectorRule =
            serde_json::from_str(r#"{"kind":"attr","css":"img","attr":"src"}"#).unwrap();
        assert_eq!(rule, SelectorRule::attr("img", "src"));
    }

    #[test]
    fn test_keyword_rule_is_case_insensitive() {
        let rule = KeywordRule {
            keywords: vec!["HACCP".to_string()],
            category: None,
            tags: vec!["HACCP".to_string()],
        };
        assert!(rule.matches("haccp 인증 김치"));
    }
}
