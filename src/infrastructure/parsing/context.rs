//! Where a listing page sits in the crawl

use crate::domain::RecordOrigin;

#[derive(Debug, Clone)]
pub struct ParseContext {
    pub page_url: String,
    pub category_id: String,
    pub page: u32,
    pub charset_fallback: bool,
}

impl ParseContext {
    pub fn new(page_url: &str, category_id: &str, page: u32) -> Self {
        Self {
            page_url: page_url.to_string(),
            category_id: category_id.to_string(),
            page,
            charset_fallback: false,
        }
    }

    #[must_use]
    pub const fn with_charset_fallback(mut self, fallback: bool) -> Self {
        self.charset_fallback = fallback;
        self
    }

    pub fn origin(&self, index: usize) -> RecordOrigin {
        RecordOrigin {
            category_id: self.category_id.clone(),
            page: self.page,
            index,
            page_url: self.page_url.clone(),
            charset_fallback: self.charset_fallback,
        }
    }
}
