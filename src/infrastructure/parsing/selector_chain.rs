//! Compiled selector fallback chains
//!
//! A field is described by an ordered list of rules; the first rule that
//! yields a non-empty value wins. Rules are compiled once per profile.

use regex::Regex;
use scraper::{ElementRef, Selector};

use super::error::{ParsingError, ParsingResult};
use crate::domain::SelectorRule;

pub fn compile_selector(css: &str) -> ParsingResult<Selector> {
    Selector::parse(css).map_err(|e| ParsingError::invalid_selector(css, e))
}

pub fn compile_pattern(pattern: &str) -> ParsingResult<Regex> {
    Regex::new(pattern).map_err(|e| ParsingError::invalid_pattern(pattern, e))
}

/// Whitespace-collapsed text content of an element
pub fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// First capture group, or the whole match when the pattern has none
pub fn capture(regex: &Regex, haystack: &str) -> Option<String> {
    let caps = regex.captures(haystack)?;
    caps.get(1)
        .or_else(|| caps.get(0))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

#[derive(Debug)]
enum Extraction {
    Text,
    Attr(String),
    Pattern { attr: Option<String>, regex: Regex },
}

#[derive(Debug)]
pub struct CompiledRule {
    /// `None` addresses the container itself
    selector: Option<Selector>,
    extraction: Extraction,
}

impl CompiledRule {
    pub fn compile(rule: &SelectorRule) -> ParsingResult<Self> {
        let css = rule.css().trim();
        let selector = if css.is_empty() {
            None
        } else {
            Some(compile_selector(css)?)
        };

        let extraction = match rule {
            SelectorRule::Text { .. } => Extraction::Text,
            SelectorRule::Attr { attr, .. } => Extraction::Attr(attr.clone()),
            SelectorRule::Pattern { attr, pattern, .. } => Extraction::Pattern {
                attr: attr.clone(),
                regex: compile_pattern(pattern)?,
            },
        };

        Ok(Self { selector, extraction })
    }

    fn targets<'a>(&'a self, element: ElementRef<'a>) -> Box<dyn Iterator<Item = ElementRef<'a>> + 'a> {
        match &self.selector {
            Some(selector) => Box::new(element.select(selector)),
            None => Box::new(std::iter::once(element)),
        }
    }

    fn extract_from(&self, target: ElementRef<'_>) -> Option<String> {
        match &self.extraction {
            Extraction::Text => Some(element_text(target)).filter(|s| !s.is_empty()),
            Extraction::Attr(attr) => target
                .value()
                .attr(attr)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            Extraction::Pattern { attr, regex } => {
                let haystack = match attr {
                    Some(attr) => target.value().attr(attr)?.to_string(),
                    None => element_text(target),
                };
                capture(regex, &haystack)
            }
        }
    }

    /// First non-empty value among the elements this rule addresses
    pub fn evaluate(&self, element: ElementRef<'_>) -> Option<String> {
        self.targets(element).find_map(|t| self.extract_from(t))
    }

    /// Presence test: a selector hit for text/attribute rules, a pattern
    /// hit for pattern rules
    pub fn is_present(&self, element: ElementRef<'_>) -> bool {
        match &self.extraction {
            Extraction::Text => self.targets(element).next().is_some(),
            Extraction::Attr(attr) => self.targets(element).any(|t| t.value().attr(attr).is_some()),
            Extraction::Pattern { .. } => self.evaluate(element).is_some(),
        }
    }
}

/// Ordered fallback chain for one field
#[derive(Debug, Default)]
pub struct FieldChain {
    rules: Vec<CompiledRule>,
}

impl FieldChain {
    pub fn compile(rules: &[SelectorRule]) -> ParsingResult<Self> {
        let rules = rules.iter().map(CompiledRule::compile).collect::<ParsingResult<_>>()?;
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn first_match(&self, element: ElementRef<'_>) -> Option<String> {
        self.rules.iter().find_map(|rule| rule.evaluate(element))
    }

    pub fn any_present(&self, element: ElementRef<'_>) -> bool {
        self.rules.iter().any(|rule| rule.is_present(element))
    }
}
