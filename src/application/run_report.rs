//! Operator-facing run summary
//!
//! One `RunReport` per invocation: printed as a plain-text summary and
//! written as JSON into the report directory so failed categories can be
//! re-run selectively.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::verifier::QualityReport;
use crate::domain::{CategoryOutcome, CategoryStatus, ErrorCounters, MergeResult, Rejection};
use crate::infrastructure::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteStatus {
    /// Every category finished without failing
    Completed,
    /// Some categories failed or were cancelled; the rest were merged
    Partial,
    /// Nothing could be crawled
    Failed,
    /// Cancelled before the site's worker started
    NotReached,
}

#[derive(Debug, Clone, Serialize)]
pub struct SiteReport {
    pub site_id: String,
    pub display_name: String,
    pub status: SiteStatus,
    pub pages_visited: usize,
    pub records_extracted: usize,
    pub entries_normalized: usize,
    pub rejections: BTreeMap<Rejection, usize>,
    pub categories: Vec<CategoryOutcome>,
    pub errors: ErrorCounters,
    pub merge: Option<MergeResult>,
    pub failure: Option<String>,
    pub elapsed_ms: u64,
}

impl SiteReport {
    pub fn not_reached(site_id: &str, display_name: &str) -> Self {
        Self::empty(site_id, display_name, SiteStatus::NotReached, None)
    }

    pub fn failed(site_id: &str, display_name: &str, reason: impl Into<String>) -> Self {
        Self::empty(site_id, display_name, SiteStatus::Failed, Some(reason.into()))
    }

    fn empty(site_id: &str, display_name: &str, status: SiteStatus, failure: Option<String>) -> Self {
        Self {
            site_id: site_id.to_string(),
            display_name: display_name.to_string(),
            status,
            pages_visited: 0,
            records_extracted: 0,
            entries_normalized: 0,
            rejections: BTreeMap::new(),
            categories: Vec::new(),
            errors: ErrorCounters::default(),
            merge: None,
            failure,
            elapsed_ms: 0,
        }
    }

    pub fn rejected(&self) -> usize {
        self.rejections.values().sum()
    }

    pub fn failed_categories(&self) -> impl Iterator<Item = (&str, &str)> {
        self.categories.iter().filter_map(|c| match &c.status {
            CategoryStatus::Failed { reason } => Some((c.category_id.as_str(), reason.as_str())),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub cancelled: bool,
    pub sites: Vec<SiteReport>,
}

impl RunReport {
    pub fn any_site_failed(&self) -> bool {
        self.sites.iter().any(|s| s.status == SiteStatus::Failed)
    }

    pub fn not_reached(&self) -> Vec<&str> {
        self.sites
            .iter()
            .filter(|s| s.status == SiteStatus::NotReached)
            .map(|s| s.site_id.as_str())
            .collect()
    }

    /// 0 on success, 1 when any site failed outright. Category failures
    /// inside an otherwise crawled site do not fail the run.
    pub fn exit_code(&self) -> i32 {
        i32::from(self.any_site_failed())
    }

    pub fn render_summary(&self) -> String {
        let mut out = String::new();
        let mode = if self.dry_run { " (dry run)" } else { "" };
        let elapsed = (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0;
        let _ = writeln!(out, "Run {}{} finished in {:.1}s", self.run_id, mode, elapsed);

        for site in &self.sites {
            let _ = writeln!(
                out,
                "  [{:?}] {} ({}): {} pages, {} records, {} entries, {} rejected",
                site.status,
                site.site_id,
                site.display_name,
                site.pages_visited,
                site.records_extracted,
                site.entries_normalized,
                site.rejected()
            );
            for (reason, count) in &site.rejections {
                let _ = writeln!(out, "      rejected {reason}: {count}");
            }
            for (category, reason) in site.failed_categories() {
                let _ = writeln!(out, "      category {category} failed: {reason}");
            }
            if let Some(failure) = &site.failure {
                let _ = writeln!(out, "      failure: {failure}");
            }
            if let Some(merge) = &site.merge {
                let _ = writeln!(
                    out,
                    "      merge: new {}, updated {}, unchanged {}, duplicate {}, invalid {}, stale {}",
                    merge.new_count,
                    merge.updated_count,
                    merge.unchanged_count,
                    merge.skipped_duplicate,
                    merge.skipped_invalid,
                    merge.stale_count
                );
                if let Some(backup) = &merge.backup_ref {
                    let _ = writeln!(out, "      backup: {} ({})", backup.path.display(), backup.checksum);
                }
            }
        }

        let not_reached = self.not_reached();
        if !not_reached.is_empty() {
            let _ = writeln!(out, "  Not reached: {}", not_reached.join(", "));
        }
        out
    }

    /// Write `run-<timestamp>-<id>.json` into `dir`
    pub fn write_json(&self, dir: &Path) -> Result<PathBuf, StoreError> {
        let name = format!("run-{}-{}.json", self.started_at.format("%Y%m%dT%H%M%SZ"), self.run_id.simple());
        write_report(dir, &name, self)
    }
}

/// Render a quality report for the terminal
pub fn render_quality(report: &QualityReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Quality report for {} ({} entries)", report.mall_id, report.total_entries);
    let c = &report.completeness;
    let _ = writeln!(
        out,
        "  title {:.1}% | price {:.1}% | image {:.1}% | url {:.1}% | category {:.1}%",
        c.title, c.price, c.image, c.url, c.category
    );
    let _ = writeln!(out, "  score {:.1} -> {}", report.score, report.verdict);
    if let Some(stats) = &report.price_stats {
        let _ = writeln!(
            out,
            "  price min {} / max {} / mean {:.0} / median {:.0}",
            stats.min, stats.max, stats.mean, stats.median
        );
    }
    if report.stale_entries > 0 {
        let _ = writeln!(out, "  stale entries: {}", report.stale_entries);
    }
    for (category, count) in &report.category_distribution {
        let _ = writeln!(out, "  {category}: {count}");
    }
    for anomaly in &report.anomalies {
        let _ = writeln!(out, "  {:?} {:?} {}: {}", anomaly.severity, anomaly.kind, anomaly.entry_id, anomaly.detail);
    }
    out
}

/// Write `quality-<mall>-<timestamp>.json` into `dir`
pub fn write_quality_json(report: &QualityReport, dir: &Path) -> Result<PathBuf, StoreError> {
    let name = format!("quality-{}-{}.json", report.mall_id, Utc::now().format("%Y%m%dT%H%M%SZ"));
    write_report(dir, &name, report)
}

fn write_report<T: Serialize>(dir: &Path, name: &str, value: &T) -> Result<PathBuf, StoreError> {
    std::fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
    let path = dir.join(name);
    let json = serde_json::to_vec_pretty(value)?;
    std::fs::write(&path, json).map_err(|e| StoreError::io(&path, e))?;
    Ok(path)
}
