use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use mall_ingest::application::run_report::{render_quality, write_quality_json};
use mall_ingest::application::{Orchestrator, QualityVerifier, RunOptions, Verdict};
use mall_ingest::infrastructure::{
    AppConfig, BrowserlessRenderer, CatalogStore, HeadlessRenderer, HttpFetcher, ProfileLoader,
    init_logging_with_config, log_system_info,
};

/// Exit code for run-level failures (config, profiles, catalog I/O)
const EXIT_RUN_FAILURE: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "mall-ingest", version, about = "Regional mall catalog ingestion pipeline")]
struct Cli {
    /// Configuration file (default: ./mall-ingest.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Crawl sites and merge their products into the catalog
    Run {
        /// Site profile ids to crawl
        #[arg(required_unless_present = "all")]
        sites: Vec<String>,
        /// Crawl every profile in the profiles directory
        #[arg(long, conflicts_with = "sites")]
        all: bool,
        /// Page cap per category
        #[arg(long)]
        max_pages: Option<u32>,
        /// Number of sites crawled concurrently
        #[arg(long)]
        parallelism: Option<usize>,
        /// Cancel the run after this many seconds; finished sites stay merged
        #[arg(long)]
        deadline_secs: Option<u64>,
        /// Crawl and normalize only; no backup, no catalog write
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Quality-check the persisted entries of one site
    Verify {
        site: String,
    },
    /// List the loaded site profiles
    Profiles,
    /// List catalog snapshots, newest first
    Backups,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("mall-ingest: {e}");
            return ExitCode::from(EXIT_RUN_FAILURE);
        }
    };
    if let Err(e) = init_logging_with_config(&config.logging) {
        eprintln!("mall-ingest: failed to initialize logging: {e:#}");
    }
    log_system_info(&config.logging);

    match execute(cli.command, config).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Run aborted");
            eprintln!("mall-ingest: {e:#}");
            ExitCode::from(EXIT_RUN_FAILURE)
        }
    }
}

async fn execute(command: Commands, mut config: AppConfig) -> Result<ExitCode> {
    match command {
        Commands::Run {
            sites,
            all,
            max_pages,
            parallelism,
            deadline_secs,
            dry_run,
        } => {
            if let Some(max_pages) = max_pages {
                config.crawl.max_pages_per_category = max_pages;
            }
            if let Some(parallelism) = parallelism {
                config.crawl.parallelism = parallelism;
            }
            config.validate()?;

            let mut options = RunOptions::from_config(&config.crawl);
            options.deadline = deadline_secs.map(Duration::from_secs);
            options.dry_run = dry_run;
            run(&config, &sites, all, &options).await
        }
        Commands::Verify { site } => verify(&config, &site),
        Commands::Profiles => list_profiles(&config),
        Commands::Backups => list_backups(&config),
    }
}

async fn run(config: &AppConfig, sites: &[String], all: bool, options: &RunOptions) -> Result<ExitCode> {
    let loader = ProfileLoader::new(&config.paths.profiles_dir);
    let profiles = if all {
        loader.load_all()?
    } else {
        loader.load_selected(sites)?
    };

    let renderer = BrowserlessRenderer::from_config(&config.renderer)
        .context("Failed to set up headless renderer")?
        .map(|r| Arc::new(r) as Arc<dyn HeadlessRenderer>);
    if renderer.is_none() && profiles.iter().any(|p| p.is_headless()) {
        warn!("Headless profiles selected but no renderer endpoint is configured; they will fail");
    }
    let fetcher = HttpFetcher::new(&config.crawl, renderer).context("Failed to create HTTP client")?;
    let orchestrator = Orchestrator::new(Arc::new(fetcher), CatalogStore::from_config(&config.paths));

    let cancel = CancellationToken::new();
    let ctrl_c = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted; finishing merges of completed sites");
                cancel.cancel();
            }
        }
    });

    let result = orchestrator.run(profiles, options, &cancel).await;
    ctrl_c.abort();
    let report = result?;

    print!("{}", report.render_summary());
    match report.write_json(&config.paths.report_dir) {
        Ok(path) => info!(path = %path.display(), "Run report written"),
        Err(e) => warn!(error = %e, "Failed to write run report"),
    }

    Ok(ExitCode::from(report.exit_code() as u8))
}

fn verify(config: &AppConfig, site: &str) -> Result<ExitCode> {
    let loader = ProfileLoader::new(&config.paths.profiles_dir);
    let profile = loader
        .load_selected(&[site.to_string()])?
        .into_iter()
        .next()
        .with_context(|| format!("Profile '{site}' not found"))?;

    let store = CatalogStore::from_config(&config.paths);
    let entries = store.entries_for_mall(&profile.id)?;
    let verifier = QualityVerifier::new(config.quality.clone(), config.crawl.max_plausible_price);
    let report = verifier.verify(&profile.id, &entries);

    print!("{}", render_quality(&report));
    match write_quality_json(&report, &config.paths.report_dir) {
        Ok(path) => info!(path = %path.display(), "Quality report written"),
        Err(e) => warn!(error = %e, "Failed to write quality report"),
    }

    Ok(if report.verdict == Verdict::NoGo {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn list_profiles(config: &AppConfig) -> Result<ExitCode> {
    let loader = ProfileLoader::new(&config.paths.profiles_dir);
    let profiles = loader.load_all()?;
    println!("{} profiles in {}", profiles.len(), loader.dir().display());
    for p in profiles {
        println!(
            "  {:<16} {:<20} {:<12} {} categories, {:?}, {}ms delay",
            p.id,
            p.display_name,
            p.region,
            p.categories.len(),
            p.render.mode,
            p.request_delay_ms
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn list_backups(config: &AppConfig) -> Result<ExitCode> {
    let store = CatalogStore::from_config(&config.paths);
    let backups = store.list_backups()?;
    if backups.is_empty() {
        println!("No snapshots in {}", config.paths.backup_dir.display());
    }
    for backup in backups {
        let modified = backup
            .modified
            .map(|m| m.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!("  {}  {:>10} bytes  {}", modified, backup.bytes, backup.path.display());
    }
    Ok(ExitCode::SUCCESS)
}
