//! Logging system configuration and initialization
//!
//! - Console and/or file output (file logs rotated on start)
//! - Structured JSON logging (optional)
//! - KST (Korea Standard Time) timestamps
//! - Noisy HTTP/HTML dependencies clamped unless TRACE is requested

#![allow(clippy::uninlined_format_args)]

use anyhow::{Result, anyhow};
use chrono::{FixedOffset, Offset, Utc};
use lazy_static::lazy_static;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

pub use crate::infrastructure::config::LoggingConfig;

const LOG_FILE_NAME: &str = "mall-ingest.log";
const KST_OFFSET_SECS: i32 = 9 * 3600;

// Keeps the non-blocking file writer alive for the process lifetime
lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<tracing_appender::non_blocking::WorkerGuard>> =
        Mutex::new(Vec::new());
}

fn kst() -> FixedOffset {
    FixedOffset::east_opt(KST_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// Custom time formatter for KST (Korea Standard Time, UTC+9)
struct KstTimeFormatter;

impl FormatTime for KstTimeFormatter {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        let kst_time = Utc::now().with_timezone(&kst());
        write!(w, "{}", kst_time.format("%Y-%m-%d %H:%M:%S%.3f %Z"))
    }
}

/// Configured log directory, or `<data_local_dir>/mall-ingest/logs`
pub fn get_log_directory(config: &LoggingConfig) -> PathBuf {
    if let Some(dir) = &config.directory {
        return dir.clone();
    }
    dirs::data_local_dir()
        .map(|d| d.join("mall-ingest").join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

/// Rename the previous run's log file with its modification timestamp
fn rotate_existing_log_file(log_dir: &Path) -> Result<()> {
    let log_file_path = log_dir.join(LOG_FILE_NAME);
    if !log_file_path.exists() {
        return Ok(());
    }

    let metadata = std::fs::metadata(&log_file_path)
        .map_err(|e| anyhow!("Failed to get log file metadata: {}", e))?;
    let file_time = metadata
        .modified()
        .unwrap_or_else(|_| std::time::SystemTime::now());
    let datetime: chrono::DateTime<Utc> = file_time.into();
    let stamp = datetime.with_timezone(&kst()).format("%Y%m%dT%H%M%S");

    let rotated = log_dir.join(format!("mall-ingest.{}.log", stamp));
    std::fs::rename(&log_file_path, &rotated).map_err(|e| {
        anyhow!(
            "Failed to rotate log file {} to {}: {}",
            log_file_path.display(),
            rotated.display(),
            e
        )
    })?;
    Ok(())
}

/// Build the filter: `RUST_LOG` wins; otherwise the configured level with
/// dependency noise suppressed below TRACE.
///
/// ```bash
/// # Show raw HTTP traffic while debugging a profile
/// RUST_LOG="debug,reqwest=debug,hyper=debug" mall-ingest run wemall
/// ```
fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let mut directives = vec![config.level.clone()];
    if !config.level.to_lowercase().contains("trace") {
        directives.extend(
            [
                "reqwest=info",
                "hyper=warn",
                "hyper_util=warn",
                "h2=warn",
                "html5ever=warn",
                "selectors=warn",
                "tokio=info",
            ]
            .iter()
            .map(ToString::to_string),
        );
        directives.push(format!("mall_ingest={}", config.level));
    }
    for (module, level) in &config.module_filters {
        directives.push(format!("{}={}", module, level));
    }

    let mut filter = EnvFilter::new("");
    for directive in directives {
        let parsed = directive
            .parse()
            .map_err(|e| anyhow!("Invalid log directive '{}': {}", directive, e))?;
        filter = filter.add_directive(parsed);
    }
    Ok(filter)
}

/// Initialize the global subscriber. Call once, before any work starts.
pub fn init_logging_with_config(config: &LoggingConfig) -> Result<()> {
    if !config.file_output && !config.console_output {
        return Err(anyhow!("No logging output configured"));
    }

    let env_filter = build_env_filter(config)?;

    let file_layer = if config.file_output {
        let log_dir = get_log_directory(config);
        std::fs::create_dir_all(&log_dir)
            .map_err(|e| anyhow!("Failed to create log directory {:?}: {}", log_dir, e))?;
        rotate_existing_log_file(&log_dir)?;

        let (file_writer, file_guard) = non_blocking(rolling::never(&log_dir, LOG_FILE_NAME));
        LOG_GUARDS
            .lock()
            .map_err(|_| anyhow!("Log guard registry poisoned"))?
            .push(file_guard);

        let layer = if config.json_format {
            fmt::Layer::new()
                .json()
                .with_writer(file_writer)
                .with_timer(KstTimeFormatter)
                .with_target(true)
                .with_ansi(false)
                .boxed()
        } else {
            fmt::Layer::new()
                .with_writer(file_writer)
                .with_timer(KstTimeFormatter)
                .with_target(false)
                .with_ansi(false)
                .boxed()
        };
        Some(layer)
    } else {
        None
    };

    let console_layer = config.console_output.then(|| {
        if config.json_format {
            fmt::Layer::new()
                .json()
                .with_writer(std::io::stderr)
                .with_timer(KstTimeFormatter)
                .boxed()
        } else {
            fmt::Layer::new()
                .with_writer(std::io::stderr)
                .with_timer(KstTimeFormatter)
                .with_target(false)
                .boxed()
        }
    });

    Registry::default()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))?;

    info!(
        level = %config.level,
        json = config.json_format,
        file = config.file_output,
        "Logging system initialized"
    );
    Ok(())
}

/// Log system information for diagnostics
pub fn log_system_info(config: &LoggingConfig) {
    info!("Application version: {}", env!("CARGO_PKG_VERSION"));
    info!("Operating system: {} ({})", std::env::consts::OS, std::env::consts::ARCH);
    if let Ok(current_dir) = std::env::current_dir() {
        info!("Working directory: {:?}", current_dir);
    }
    if config.file_output {
        info!("Log directory: {:?}", get_log_directory(config));
    }
}
