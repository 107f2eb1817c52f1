//! Post-merge quality verification
//!
//! Scores one mall's persisted entries for completeness and flags
//! anomalies. The weighted score backs the go / no-go signal an operator
//! checks before promoting a crawl's output.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{info, warn};
use url::Url;

use crate::domain::{CatalogEntry, UNCATEGORIZED};
use crate::infrastructure::QualityConfig;
use crate::infrastructure::config::ScoreWeights;

/// Categories smaller than this get no outlier detection
const MIN_ENTRIES_FOR_OUTLIERS: usize = 4;
const IQR_FENCE: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Verdict {
    Go,
    Review,
    NoGo,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Go => "GO",
            Self::Review => "REVIEW",
            Self::NoGo => "NO-GO",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Critical,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AnomalyKind {
    DuplicateId,
    PriceOutlier,
    ShortTitle,
    InvalidPrice,
    InvalidImage,
    UnresolvableUrl,
}

impl AnomalyKind {
    pub const fn severity(self) -> Severity {
        match self {
            Self::DuplicateId | Self::InvalidPrice => Severity::Critical,
            _ => Severity::Warning,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub entry_id: String,
    pub detail: String,
}

impl Anomaly {
    fn new(kind: AnomalyKind, entry_id: &str, detail: String) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            entry_id: entry_id.to_string(),
            detail,
        }
    }
}

/// Share of entries (0-100) passing each field check
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldCompleteness {
    pub title: f64,
    pub price: f64,
    pub image: f64,
    pub url: f64,
    pub category: f64,
}

impl FieldCompleteness {
    fn weighted_score(&self, weights: &ScoreWeights) -> f64 {
        let total = weights.total();
        if total <= 0.0 {
            return 0.0;
        }
        (self.title * weights.title
            + self.price * weights.price
            + self.image * weights.image
            + self.url * weights.url
            + self.category * weights.category)
            / total
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceStats {
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub median: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityReport {
    pub mall_id: String,
    pub total_entries: usize,
    pub stale_entries: usize,
    pub completeness: FieldCompleteness,
    pub score: f64,
    pub verdict: Verdict,
    pub price_stats: Option<PriceStats>,
    pub category_distribution: BTreeMap<String, usize>,
    pub anomalies: Vec<Anomaly>,
}

impl QualityReport {
    pub fn anomaly_count(&self, kind: AnomalyKind) -> usize {
        self.anomalies.iter().filter(|a| a.kind == kind).count()
    }

    pub fn critical_count(&self) -> usize {
        self.anomalies
            .iter()
            .filter(|a| a.severity == Severity::Critical)
            .count()
    }
}

pub struct QualityVerifier {
    config: QualityConfig,
    max_price: u64,
}

impl QualityVerifier {
    pub fn new(config: QualityConfig, max_price: u64) -> Self {
        Self { config, max_price }
    }

    /// Verify the persisted entries of one mall
    pub fn verify(&self, mall_id: &str, entries: &[CatalogEntry]) -> QualityReport {
        let mut anomalies = Vec::new();
        let mut counts = [0_usize; 5];
        let mut id_counts: HashMap<&str, usize> = HashMap::new();
        let mut category_distribution: BTreeMap<String, usize> = BTreeMap::new();

        for entry in entries {
            *id_counts.entry(entry.id.as_str()).or_default() += 1;
            *category_distribution.entry(entry.category.clone()).or_default() += 1;

            let checks = [
                self.check_title(entry, &mut anomalies),
                self.check_price(entry, &mut anomalies),
                check_image(entry, &mut anomalies),
                check_source_url(entry, &mut anomalies),
                has_category(entry),
            ];
            for (count, passed) in counts.iter_mut().zip(checks) {
                *count += usize::from(passed);
            }
        }

        let mut duplicates: Vec<_> = id_counts.into_iter().filter(|(_, n)| *n > 1).collect();
        duplicates.sort_unstable();
        for (id, n) in duplicates {
            anomalies.push(Anomaly::new(AnomalyKind::DuplicateId, id, format!("id appears {n} times")));
        }
        anomalies.extend(price_outliers(entries));

        let percent = |n: usize| {
            if entries.is_empty() {
                0.0
            } else {
                n as f64 * 100.0 / entries.len() as f64
            }
        };
        let completeness = FieldCompleteness {
            title: percent(counts[0]),
            price: percent(counts[1]),
            image: percent(counts[2]),
            url: percent(counts[3]),
            category: percent(counts[4]),
        };
        let score = completeness.weighted_score(&self.config.weights);
        let verdict = self.verdict(score, entries.is_empty());

        let report = QualityReport {
            mall_id: mall_id.to_string(),
            total_entries: entries.len(),
            stale_entries: entries
                .iter()
                .filter(|e| e.has_flag(crate::domain::QualityFlag::Stale))
                .count(),
            completeness,
            score,
            verdict,
            price_stats: price_stats(entries),
            category_distribution,
            anomalies,
        };

        if report.critical_count() > 0 {
            warn!(mall = mall_id, critical = report.critical_count(), "Critical quality anomalies");
        }
        info!(
            mall = mall_id,
            entries = report.total_entries,
            score = report.score,
            verdict = %report.verdict,
            "Quality verified"
        );
        report
    }

    fn verdict(&self, score: f64, empty: bool) -> Verdict {
        if empty {
            Verdict::NoGo
        } else if score >= self.config.go_threshold {
            Verdict::Go
        } else if score >= self.config.review_threshold {
            Verdict::Review
        } else {
            Verdict::NoGo
        }
    }

    fn check_title(&self, entry: &CatalogEntry, anomalies: &mut Vec<Anomaly>) -> bool {
        let title = entry.title.trim();
        if title.is_empty() {
            return false;
        }
        let length = title.chars().count();
        if length < self.config.min_title_length {
            anomalies.push(Anomaly::new(
                AnomalyKind::ShortTitle,
                &entry.id,
                format!("title '{title}' has {length} characters"),
            ));
        }
        true
    }

    fn check_price(&self, entry: &CatalogEntry, anomalies: &mut Vec<Anomaly>) -> bool {
        let plausible = entry.price > 0 && entry.price <= self.max_price;
        if !plausible {
            anomalies.push(Anomaly::new(
                AnomalyKind::InvalidPrice,
                &entry.id,
                format!("price {} outside 1..={}", entry.price, self.max_price),
            ));
        }
        plausible
    }
}

fn check_image(entry: &CatalogEntry, anomalies: &mut Vec<Anomaly>) -> bool {
    if entry.image_url.trim().is_empty() {
        return false;
    }
    let valid = is_external_url(&entry.image_url);
    if !valid {
        anomalies.push(Anomaly::new(
            AnomalyKind::InvalidImage,
            &entry.id,
            format!("image url '{}' is not absolute http(s)", entry.image_url),
        ));
    }
    valid
}

fn check_source_url(entry: &CatalogEntry, anomalies: &mut Vec<Anomaly>) -> bool {
    let valid = is_external_url(&entry.source_url);
    if !valid {
        anomalies.push(Anomaly::new(
            AnomalyKind::UnresolvableUrl,
            &entry.id,
            format!("source url '{}' cannot be opened", entry.source_url),
        ));
    }
    valid
}

fn has_category(entry: &CatalogEntry) -> bool {
    let category = entry.category.trim();
    !category.is_empty() && category != UNCATEGORIZED
}

fn is_external_url(raw: &str) -> bool {
    Url::parse(raw.trim())
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some_and(|h| !h.is_empty()))
        .unwrap_or(false)
}

fn price_stats(entries: &[CatalogEntry]) -> Option<PriceStats> {
    let mut prices: Vec<u64> = entries.iter().map(|e| e.price).filter(|&p| p > 0).collect();
    if prices.is_empty() {
        return None;
    }
    prices.sort_unstable();
    // Hand-edited catalogs can hold prices near u64::MAX
    let sum: u128 = prices.iter().map(|&p| u128::from(p)).sum();
    let as_f64: Vec<f64> = prices.iter().map(|&p| p as f64).collect();
    Some(PriceStats {
        min: prices[0],
        max: prices[prices.len() - 1],
        mean: sum as f64 / prices.len() as f64,
        median: quantile(&as_f64, 0.5),
    })
}

/// Tukey fences per category
fn price_outliers(entries: &[CatalogEntry]) -> Vec<Anomaly> {
    let mut by_category: BTreeMap<&str, Vec<&CatalogEntry>> = BTreeMap::new();
    for entry in entries.iter().filter(|e| e.price > 0) {
        by_category.entry(entry.category.as_str()).or_default().push(entry);
    }

    let mut anomalies = Vec::new();
    for (category, members) in by_category {
        if members.len() < MIN_ENTRIES_FOR_OUTLIERS {
            continue;
        }
        let mut prices: Vec<f64> = members.iter().map(|e| e.price as f64).collect();
        prices.sort_by(f64::total_cmp);

        let q1 = quantile(&prices, 0.25);
        let q3 = quantile(&prices, 0.75);
        let iqr = q3 - q1;
        let (low, high) = (q1 - IQR_FENCE * iqr, q3 + IQR_FENCE * iqr);

        for entry in members {
            let price = entry.price as f64;
            if price < low || price > high {
                anomalies.push(Anomaly::new(
                    AnomalyKind::PriceOutlier,
                    &entry.id,
                    format!("price {} outside [{low:.0}, {high:.0}] for '{category}'", entry.price),
                ));
            }
        }
    }
    anomalies
}

/// Linear interpolation over sorted, non-empty input
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let weight = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}
