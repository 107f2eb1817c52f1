//! Run orchestration
//!
//! One worker per site profile, at most `parallelism` at a time. Workers
//! crawl and normalize; only the orchestrator touches the catalog, and it
//! merges one finished site at a time so every merge keeps its
//! snapshot-then-rewrite sequence.

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::crawler::{SiteCrawl, SiteCrawler};
use super::normalizer::{NormalizedBatch, Normalizer};
use super::run_report::{RunReport, SiteReport, SiteStatus};
use crate::domain::{CategoryStatus, SiteProfile};
use crate::infrastructure::{CatalogStore, CrawlConfig, PageFetcher, SiteLimiters, StoreError};

#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// The catalog could not be read or written; the run is aborted
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub parallelism: usize,
    pub max_pages: u32,
    pub max_price: u64,
    pub deadline: Option<Duration>,
    pub dry_run: bool,
}

impl RunOptions {
    pub fn from_config(crawl: &CrawlConfig) -> Self {
        Self {
            parallelism: crawl.parallelism,
            max_pages: crawl.max_pages_per_category,
            max_price: crawl.max_plausible_price,
            deadline: None,
            dry_run: false,
        }
    }
}

/// What a site worker hands back to the orchestrator
struct SiteWork {
    index: usize,
    profile: SiteProfile,
    elapsed: Duration,
    outcome: WorkOutcome,
}

enum WorkOutcome {
    NotReached,
    Invalid(String),
    Crawled { crawl: SiteCrawl, batch: NormalizedBatch },
}

pub struct Orchestrator {
    fetcher: Arc<dyn PageFetcher>,
    store: CatalogStore,
    limiters: Arc<SiteLimiters>,
}

impl Orchestrator {
    pub fn new(fetcher: Arc<dyn PageFetcher>, store: CatalogStore) -> Self {
        Self {
            fetcher,
            store,
            limiters: Arc::new(SiteLimiters::new()),
        }
    }

    pub const fn store(&self) -> &CatalogStore {
        &self.store
    }

    /// Crawl every profile and merge the results.
    ///
    /// Sites that finished before cancellation (Ctrl-C or the deadline)
    /// stay merged; the rest are reported as not reached. Only a catalog
    /// read or write failure aborts the run.
    pub async fn run(
        &self,
        profiles: Vec<SiteProfile>,
        options: &RunOptions,
        cancel: &CancellationToken,
    ) -> Result<RunReport, OrchestratorError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let run_cancel = cancel.child_token();
        let deadline = options.deadline.map(|d| spawn_deadline(d, run_cancel.clone()));

        info!(
            run_id = %run_id,
            sites = profiles.len(),
            parallelism = options.parallelism,
            max_pages = options.max_pages,
            dry_run = options.dry_run,
            "Run started"
        );

        let names: Vec<(String, String)> = profiles
            .iter()
            .map(|p| (p.id.clone(), p.display_name.clone()))
            .collect();
        let mut reports: Vec<Option<SiteReport>> = vec![None; profiles.len()];

        let semaphore = Arc::new(Semaphore::new(options.parallelism.max(1)));
        let mut workers = JoinSet::new();
        for (index, profile) in profiles.into_iter().enumerate() {
            workers.spawn(site_worker(
                index,
                profile,
                Arc::clone(&self.fetcher),
                Arc::clone(&self.limiters),
                Arc::clone(&semaphore),
                options.clone(),
                run_cancel.clone(),
            ));
        }

        while let Some(joined) = workers.join_next().await {
            let work = match joined {
                Ok(work) => work,
                Err(e) => {
                    error!(run_id = %run_id, error = %e, "Site worker aborted");
                    continue;
                }
            };
            let index = work.index;
            match self.finish_site(work, options.dry_run) {
                Ok(report) => reports[index] = Some(report),
                Err(e) => {
                    error!(run_id = %run_id, error = %e, "Catalog merge failed; aborting run");
                    run_cancel.cancel();
                    workers.abort_all();
                    return Err(e);
                }
            }
        }

        let sites = reports
            .into_iter()
            .zip(names)
            .map(|(report, (id, name))| {
                report.unwrap_or_else(|| SiteReport::failed(&id, &name, "site worker panicked"))
            })
            .collect();

        let cancelled = run_cancel.is_cancelled();
        if let Some(timer) = deadline {
            timer.abort();
        }

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            dry_run: options.dry_run,
            cancelled,
            sites,
        };
        info!(
            run_id = %run_id,
            failed = report.any_site_failed(),
            not_reached = report.not_reached().len(),
            "Run finished"
        );
        Ok(report)
    }

    /// Merge (or preview) one site's entries and build its report
    fn finish_site(&self, work: SiteWork, dry_run: bool) -> Result<SiteReport, OrchestratorError> {
        let SiteWork {
            profile,
            elapsed,
            outcome,
            ..
        } = work;

        let (crawl, batch) = match outcome {
            WorkOutcome::NotReached => {
                info!(site = %profile.id, "Site not reached before cancellation");
                return Ok(SiteReport::not_reached(&profile.id, &profile.display_name));
            }
            WorkOutcome::Invalid(reason) => {
                return Ok(SiteReport::failed(&profile.id, &profile.display_name, reason));
            }
            WorkOutcome::Crawled { crawl, batch } => (crawl, batch),
        };

        let status = site_status(&crawl);
        let rejected = batch.rejected();
        let NormalizedBatch { entries, rejections } = batch;
        let entries_normalized = entries.len();
        let complete_mall = crawl.is_complete().then_some(profile.id.as_str());

        let merge = if entries.is_empty() {
            None
        } else if dry_run {
            Some(self.store.preview(entries, complete_mall)?)
        } else {
            Some(self.store.merge(entries, complete_mall)?)
        };

        let failure = (status == SiteStatus::Failed).then(|| {
            crawl
                .outcomes
                .iter()
                .find_map(|o| match &o.status {
                    CategoryStatus::Failed { reason } => Some(reason.clone()),
                    _ => None,
                })
                .unwrap_or_else(|| "no category could be crawled".to_string())
        });

        info!(
            site = %profile.id,
            status = ?status,
            records = crawl.records.len(),
            entries = entries_normalized,
            rejected,
            "Site finished"
        );

        Ok(SiteReport {
            site_id: profile.id.clone(),
            display_name: profile.display_name.clone(),
            status,
            pages_visited: crawl.pages_visited,
            records_extracted: crawl.records.len(),
            entries_normalized,
            rejections,
            categories: crawl.outcomes,
            errors: crawl.errors,
            merge,
            failure,
            elapsed_ms: elapsed.as_millis() as u64,
        })
    }
}

async fn site_worker(
    index: usize,
    profile: SiteProfile,
    fetcher: Arc<dyn PageFetcher>,
    limiters: Arc<SiteLimiters>,
    semaphore: Arc<Semaphore>,
    options: RunOptions,
    cancel: CancellationToken,
) -> SiteWork {
    let started = Instant::now();
    let work = |outcome: WorkOutcome| SiteWork {
        index,
        profile: profile.clone(),
        elapsed: started.elapsed(),
        outcome,
    };

    let _permit = tokio::select! {
        permit = semaphore.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return work(WorkOutcome::NotReached),
        },
        () = cancel.cancelled() => return work(WorkOutcome::NotReached),
    };
    if cancel.is_cancelled() {
        return work(WorkOutcome::NotReached);
    }

    let limiter = limiters.for_profile(&profile);
    let crawler = match SiteCrawler::new(&profile, fetcher.as_ref(), &limiter, options.max_pages) {
        Ok(crawler) => crawler,
        Err(e) => {
            warn!(site = %profile.id, error = %e, "Profile selectors rejected");
            return work(WorkOutcome::Invalid(e.to_string()));
        }
    };

    let crawl = crawler.crawl_site(&cancel).await;
    if crawl.outcomes.iter().all(|o| o.status == CategoryStatus::Cancelled && o.pages_fetched == 0) {
        return work(WorkOutcome::NotReached);
    }

    let batch = Normalizer::new(&profile, options.max_price).normalize_batch(&crawl.records);
    work(WorkOutcome::Crawled { crawl, batch })
}

/// Completed, partial or failed, from the category outcomes
fn site_status(crawl: &SiteCrawl) -> SiteStatus {
    if crawl.outcomes.is_empty() {
        return SiteStatus::Failed;
    }
    let fetched_anything = crawl.outcomes.iter().any(|o| o.pages_fetched > 0);
    if crawl.any_failed() && !fetched_anything {
        SiteStatus::Failed
    } else if crawl.is_complete() {
        SiteStatus::Completed
    } else {
        SiteStatus::Partial
    }
}

/// Cancels `token` once `deadline` has passed
fn spawn_deadline(deadline: Duration, token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            () = tokio::time::sleep(deadline) => {
                warn!(deadline_secs = deadline.as_secs(), "Run deadline reached; cancelling");
                token.cancel();
            }
            () = token.cancelled() => {}
        }
    })
}
