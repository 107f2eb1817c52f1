//! Listing page extraction
//!
//! Turns one listing page into raw records using the profile's selector
//! chains. Container candidates are tried in order; the first one that
//! matches at least one element decides the product boundaries for the
//! whole page. Fields that no rule finds are left empty, never guessed.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use super::context::ParseContext;
use super::error::{ParsingError, ParsingResult};
use super::selector_chain::{FieldChain, capture, compile_pattern, compile_selector, element_text};
use crate::domain::{RawRecord, SiteProfile};

/// Everything one listing page yielded
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    pub records: Vec<RawRecord>,
    /// Container selector that produced the records
    pub container_selector: Option<String>,
    /// A next-page marker was present
    pub has_next_signal: bool,
    /// Total product count advertised by the page
    pub total_count: Option<u64>,
}

/// Compiled extraction rules of one site profile
#[derive(Debug)]
pub struct ProductListParser {
    containers: Vec<(String, Selector)>,
    name: FieldChain,
    price: FieldChain,
    original_price: FieldChain,
    image: FieldChain,
    link: FieldChain,
    category_hint: FieldChain,
    sold_out: FieldChain,
    id_patterns: Vec<Regex>,
    next_selectors: Vec<Selector>,
    total_count: Option<(Selector, Regex)>,
}

impl ProductListParser {
    pub fn new(profile: &SiteProfile) -> ParsingResult<Self> {
        let selectors = &profile.selectors;
        if selectors.container.is_empty() {
            return Err(ParsingError::NoContainerSelector);
        }

        let containers = selectors
            .container
            .iter()
            .map(|css| compile_selector(css).map(|s| (css.clone(), s)))
            .collect::<ParsingResult<Vec<_>>>()?;

        let id_patterns = profile
            .id_patterns
            .iter()
            .map(|p| compile_pattern(p))
            .collect::<ParsingResult<Vec<_>>>()?;

        let next_selectors = profile
            .pagination
            .next_selectors
            .iter()
            .map(|css| compile_selector(css))
            .collect::<ParsingResult<Vec<_>>>()?;

        let total_count = profile
            .pagination
            .total_count
            .as_ref()
            .map(|spec| Ok::<_, ParsingError>((compile_selector(&spec.selector)?, compile_pattern(&spec.pattern)?)))
            .transpose()?;

        Ok(Self {
            containers,
            name: FieldChain::compile(&selectors.name)?,
            price: FieldChain::compile(&selectors.price)?,
            original_price: FieldChain::compile(&selectors.original_price)?,
            image: FieldChain::compile(&selectors.image)?,
            link: FieldChain::compile(&selectors.link)?,
            category_hint: FieldChain::compile(&selectors.category_hint)?,
            sold_out: FieldChain::compile(&selectors.sold_out)?,
            id_patterns,
            next_selectors,
            total_count,
        })
    }

    /// Extract every product on the page. Pure: same input, same output.
    pub fn parse(&self, html: &str, context: &ParseContext) -> ListingPage {
        let document = Html::parse_document(html);

        let mut page = ListingPage {
            has_next_signal: self
                .next_selectors
                .iter()
                .any(|s| document.select(s).next().is_some()),
            total_count: self.extract_total_count(&document),
            ..ListingPage::default()
        };

        for (css, selector) in &self.containers {
            let elements: Vec<ElementRef<'_>> = document.select(selector).collect();
            if elements.is_empty() {
                continue;
            }

            debug!(
                page_url = %context.page_url,
                container = %css,
                count = elements.len(),
                "Product containers matched"
            );
            page.records = elements
                .into_iter()
                .enumerate()
                .map(|(index, element)| self.extract_record(element, index, context))
                .collect();
            page.container_selector = Some(css.clone());
            break;
        }

        page
    }

    fn extract_record(&self, element: ElementRef<'_>, index: usize, context: &ParseContext) -> RawRecord {
        let link = self
            .link
            .first_match(element)
            .and_then(|href| resolve_url(&href, &context.page_url));
        let image_url = self
            .image
            .first_match(element)
            .and_then(|src| resolve_url(&src, &context.page_url));

        let source_id = self.extract_source_id(link.as_deref(), element);

        RawRecord {
            name: self.name.first_match(element),
            price_text: self.price.first_match(element),
            original_price_text: self.original_price.first_match(element),
            image_url,
            link,
            category_hint: self.category_hint.first_match(element),
            source_id,
            sold_out: !self.sold_out.is_empty() && self.sold_out.any_present(element),
            origin: context.origin(index),
        }
    }

    /// Id patterns are tried against the product link first, then against
    /// the container markup (for `onclick="goDetail(123)"` style links).
    fn extract_source_id(&self, link: Option<&str>, element: ElementRef<'_>) -> Option<String> {
        if self.id_patterns.is_empty() {
            return None;
        }
        if let Some(link) = link {
            if let Some(id) = self.id_patterns.iter().find_map(|re| capture(re, link)) {
                return Some(id);
            }
        }
        let markup = element.html();
        self.id_patterns.iter().find_map(|re| capture(re, &markup))
    }

    fn extract_total_count(&self, document: &Html) -> Option<u64> {
        let (selector, regex) = self.total_count.as_ref()?;
        document.select(selector).find_map(|el| {
            let digits: String = capture(regex, &element_text(el))?
                .chars()
                .filter(char::is_ascii_digit)
                .collect();
            digits.parse().ok()
        })
    }
}

/// Resolve a link or image reference against the page URL.
///
/// Handles absolute, root-relative, relative and protocol-relative
/// (`//cdn...`) references. Script links, fragments and inline data
/// yield `None`.
pub fn resolve_url(raw: &str, page_url: &str) -> Option<String> {
    let raw = raw.trim();
    let lowered = raw.to_ascii_lowercase();
    if raw.is_empty()
        || raw.starts_with('#')
        || lowered.starts_with("javascript:")
        || lowered.starts_with("data:")
        || lowered.starts_with("mailto:")
    {
        return None;
    }

    if raw.starts_with("//") {
        return Url::parse(&format!("https:{raw}")).ok().map(String::from);
    }

    let resolved = match Url::parse(raw) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(page_url).ok()?.join(raw).ok()?,
        Err(_) => return None,
    };

    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}
