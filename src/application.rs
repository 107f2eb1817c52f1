//! Application layer: the ingestion pipeline itself
//!
//! Normalization, the per-category crawl state machine, post-merge
//! verification and the run orchestrator. I/O goes through the
//! infrastructure seams only.

pub mod category_rules;
pub mod crawler;
pub mod normalizer;
pub mod orchestrator;
pub mod run_report;
pub mod verifier;

pub use crawler::{SiteCrawl, SiteCrawler};
pub use normalizer::{NormalizedBatch, Normalizer, normalize};
pub use orchestrator::{Orchestrator, OrchestratorError, RunOptions};
pub use run_report::{RunReport, SiteReport, SiteStatus};
pub use verifier::{AnomalyKind, QualityReport, QualityVerifier, Verdict};
