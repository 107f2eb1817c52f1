//! Infrastructure layer: network, rendering, parsing, persistence, config
//!
//! Everything that touches the outside world lives here; the application
//! layer only sees the `PageFetcher` and `HeadlessRenderer` seams, the
//! parser and the catalog store.

pub mod catalog_store;
pub mod charset;
pub mod config;
pub mod fetch_error;
pub mod http_client;
pub mod logging;
pub mod parsing;
pub mod profile_loader;
pub mod rate_limiter;
pub mod renderer;
pub mod retry_policy;

// Re-export commonly used items
pub use catalog_store::{BackupInfo, CatalogStore, StoreError, merge_entries};
pub use config::{AppConfig, ConfigError, CrawlConfig, QualityConfig};
pub use fetch_error::FetchError;
pub use http_client::{HttpFetcher, PageFetcher, RawPage};
pub use logging::{init_logging_with_config, log_system_info};
pub use parsing::{ListingPage, ParseContext, ParsingError, ProductListParser};
pub use profile_loader::{ProfileError, ProfileLoader};
pub use rate_limiter::{SiteLimiter, SiteLimiters};
pub use renderer::{BrowserlessRenderer, HeadlessRenderer};
pub use retry_policy::RetryPolicy;
