//! Configuration infrastructure
//!
//! Application settings are layered with the `config` crate:
//! 1. Built-in defaults (the `defaults` module)
//! 2. `mall-ingest.toml` in the working directory, or an explicit `--config` file
//! 3. Environment variables, e.g. `MALL_INGEST__CRAWL__PARALLELISM=2`

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default values for every setting
pub mod defaults {
    pub const CONFIG_FILE_STEM: &str = "mall-ingest";
    pub const ENV_PREFIX: &str = "MALL_INGEST";

    pub const PROFILES_DIR: &str = "profiles";
    pub const CATALOG_FILE: &str = "data/products.json";
    pub const BACKUP_DIR: &str = "data/backups";
    pub const REPORT_DIR: &str = "output";

    pub const PARALLELISM: usize = 4;
    pub const MAX_PAGES_PER_CATEGORY: u32 = 50;
    pub const MAX_RETRIES: u32 = 3;
    pub const BACKOFF_BASE_MS: u64 = 2_000;
    pub const BACKOFF_CAP_MS: u64 = 15_000;
    pub const RATE_LIMITED_FLOOR_MS: u64 = 10_000;
    pub const DIRECT_TIMEOUT_SECS: u64 = 30;
    pub const HEADLESS_TIMEOUT_SECS: u64 = 60;
    pub const MAX_PLAUSIBLE_PRICE: u64 = 10_000_000;
    pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
    pub const ACCEPT_LANGUAGE: &str = "ko-KR,ko;q=0.9,en;q=0.8";

    pub const GO_THRESHOLD: f64 = 90.0;
    pub const REVIEW_THRESHOLD: f64 = 70.0;
    pub const MIN_TITLE_LENGTH: usize = 5;

    pub const LOG_LEVEL: &str = "info";
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {source}")]
    Load {
        #[from]
        source: config::ConfigError,
    },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },
}

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub crawl: CrawlConfig,
    pub renderer: RendererConfig,
    pub quality: QualityConfig,
    pub logging: LoggingConfig,
}

/// Where profiles, the catalog, backups and reports live
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub profiles_dir: PathBuf,
    pub catalog_file: PathBuf,
    pub backup_dir: PathBuf,
    pub report_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            profiles_dir: PathBuf::from(defaults::PROFILES_DIR),
            catalog_file: PathBuf::from(defaults::CATALOG_FILE),
            backup_dir: PathBuf::from(defaults::BACKUP_DIR),
            report_dir: PathBuf::from(defaults::REPORT_DIR),
        }
    }
}

/// Crawl behaviour shared by every site
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Sites crawled concurrently
    pub parallelism: usize,
    /// Hard per-category page cap
    pub max_pages_per_category: u32,
    /// Retries after the initial attempt
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    /// Minimum wait after an HTTP 429
    pub rate_limited_floor_ms: u64,
    pub direct_timeout_secs: u64,
    pub headless_timeout_secs: u64,
    pub user_agent: String,
    /// Prices above this are treated as mis-selected page furniture
    pub max_plausible_price: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            parallelism: defaults::PARALLELISM,
            max_pages_per_category: defaults::MAX_PAGES_PER_CATEGORY,
            max_retries: defaults::MAX_RETRIES,
            backoff_base_ms: defaults::BACKOFF_BASE_MS,
            backoff_cap_ms: defaults::BACKOFF_CAP_MS,
            rate_limited_floor_ms: defaults::RATE_LIMITED_FLOOR_MS,
            direct_timeout_secs: defaults::DIRECT_TIMEOUT_SECS,
            headless_timeout_secs: defaults::HEADLESS_TIMEOUT_SECS,
            user_agent: defaults::USER_AGENT.to_string(),
            max_plausible_price: defaults::MAX_PLAUSIBLE_PRICE,
        }
    }
}

impl CrawlConfig {
    pub const fn direct_timeout(&self) -> Duration {
        Duration::from_secs(self.direct_timeout_secs)
    }

    pub const fn headless_timeout(&self) -> Duration {
        Duration::from_secs(self.headless_timeout_secs)
    }
}

/// Headless rendering service (Browserless-compatible `/content` endpoint)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub endpoint: Option<String>,
    pub token: Option<String>,
}

/// Quality verifier scoring
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub weights: ScoreWeights,
    /// Score at or above which a crawl may be promoted without review
    pub go_threshold: f64,
    /// Score below which a crawl must not be promoted
    pub review_threshold: f64,
    pub min_title_length: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            go_threshold: defaults::GO_THRESHOLD,
            review_threshold: defaults::REVIEW_THRESHOLD,
            min_title_length: defaults::MIN_TITLE_LENGTH,
        }
    }
}

/// Relative weight of each completeness metric in the quality score
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub title: f64,
    pub price: f64,
    pub image: f64,
    pub url: f64,
    pub category: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            title: 0.30,
            price: 0.30,
            image: 0.15,
            url: 0.15,
            category: 0.10,
        }
    }
}

impl ScoreWeights {
    pub fn total(&self) -> f64 {
        self.title + self.price + self.image + self.url + self.category
    }
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted logs
    pub json_format: bool,

    /// Enable console output
    pub console_output: bool,

    /// Enable file output
    pub file_output: bool,

    /// Log directory; defaults to the platform data dir
    pub directory: Option<PathBuf>,

    /// Module-specific log level filters (e.g., "reqwest": "warn")
    pub module_filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: false,
            console_output: true,
            file_output: false,
            directory: None,
            module_filters: HashMap::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file_source = match path {
            Some(p) => config::File::from(p),
            None => config::File::with_name(defaults::CONFIG_FILE_STEM).required(false),
        };

        let settings = config::Config::builder()
            .add_source(file_source)
            .add_source(
                config::Environment::with_prefix(defaults::ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |message: &str| {
            Err(ConfigError::Validation {
                message: message.to_string(),
            })
        };

        if self.crawl.parallelism == 0 {
            return fail("crawl.parallelism must be at least 1");
        }
        if self.crawl.max_pages_per_category == 0 {
            return fail("crawl.max_pages_per_category must be at least 1");
        }
        if self.crawl.backoff_base_ms > self.crawl.backoff_cap_ms {
            return fail("crawl.backoff_base_ms cannot exceed crawl.backoff_cap_ms");
        }
        if self.crawl.max_plausible_price == 0 {
            return fail("crawl.max_plausible_price must be positive");
        }
        if self.quality.weights.total() <= 0.0 {
            return fail("quality.weights must sum to a positive value");
        }
        if self.quality.review_threshold > self.quality.go_threshold {
            return fail("quality.review_threshold cannot exceed quality.go_threshold");
        }
        Ok(())
    }
}
