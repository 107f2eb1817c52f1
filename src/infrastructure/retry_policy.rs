//! Bounded retry with exponential backoff and jitter
//!
//! One initial attempt plus `max_retries` retries. Only errors that
//! `FetchError::is_retryable` accepts are retried; a 429 waits at least
//! the rate-limit floor (or the server's Retry-After, if longer).

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::config::CrawlConfig;
use super::fetch_error::FetchError;

/// Upper bound on a server-supplied Retry-After
const MAX_RETRY_AFTER: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_backoff: Duration,
    max_backoff: Duration,
    rate_limited_floor: Duration,
}

impl RetryPolicy {
    pub const fn new(
        max_retries: u32,
        base_backoff: Duration,
        max_backoff: Duration,
        rate_limited_floor: Duration,
    ) -> Self {
        Self {
            max_retries,
            base_backoff,
            max_backoff,
            rate_limited_floor,
        }
    }

    pub const fn from_config(config: &CrawlConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_millis(config.backoff_cap_ms),
            Duration::from_millis(config.rate_limited_floor_ms),
        )
    }

    pub const fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Backoff before retry number `retry` (1-based), with equal jitter:
    /// half the exponential delay is fixed, the other half random.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let exponential = self
            .base_backoff
            .saturating_mul(1_u32 << exponent)
            .min(self.max_backoff);

        let half_ms = (exponential.as_millis() / 2) as u64;
        let jitter_ms = if half_ms == 0 { 0 } else { fastrand::u64(0..=half_ms) };
        Duration::from_millis(half_ms + jitter_ms)
    }

    /// Delay before retrying after `error`
    pub fn delay_for(&self, error: &FetchError, retry: u32) -> Duration {
        let backoff = self.backoff(retry);
        match error {
            FetchError::RateLimited { retry_after, .. } => {
                let requested = retry_after.unwrap_or_default().min(MAX_RETRY_AFTER);
                backoff.max(self.rate_limited_floor).max(requested)
            }
            _ => backoff,
        }
    }

    /// Run `operation` until it succeeds, fails terminally, exhausts its
    /// attempts or `cancel` fires.
    pub async fn run<T, F, Fut>(
        &self,
        url: &str,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            attempt += 1;

            let error = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(url, attempt, "Fetch succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !error.is_retryable() {
                return Err(error);
            }
            if attempt >= self.max_attempts() {
                return Err(FetchError::RetriesExhausted {
                    url: url.to_string(),
                    attempts: attempt,
                    last_error: error.to_string(),
                });
            }

            let delay = self.delay_for(&error, attempt);
            warn!(url, attempt, delay_ms = delay.as_millis() as u64, error = %error, "Retrying fetch");

            tokio::select! {
                () = cancel.cancelled() => return Err(FetchError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&CrawlConfig::default())
    }
}
