//! Per-site request pacing
//!
//! Each site gets one `SiteLimiter`: a governor quota of one request per
//! `request_delay` plus a gate that serializes requests, so at most one
//! request is in flight per site. Different sites never wait on each other.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::fetch_error::FetchError;
use crate::domain::SiteProfile;

pub struct SiteLimiter {
    site_id: String,
    min_interval: Duration,
    gate: AsyncMutex<()>,
    quota: Option<DefaultDirectRateLimiter>,
}

/// Held for the duration of one request
pub struct SitePermit<'a> {
    _gate: MutexGuard<'a, ()>,
}

impl SiteLimiter {
    pub fn new(site_id: &str, min_interval: Duration) -> Self {
        let quota = Quota::with_period(min_interval).map(RateLimiter::direct);
        Self {
            site_id: site_id.to_string(),
            min_interval,
            gate: AsyncMutex::new(()),
            quota,
        }
    }

    pub fn for_profile(profile: &SiteProfile) -> Self {
        Self::new(&profile.id, profile.request_delay())
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub const fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait for this site's turn. The returned permit keeps other requests
    /// to the same site queued until it is dropped.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<SitePermit<'_>, FetchError> {
        let gate = tokio::select! {
            guard = self.gate.lock() => guard,
            () = cancel.cancelled() => return Err(FetchError::Cancelled),
        };

        if let Some(quota) = &self.quota {
            tokio::select! {
                () = quota.until_ready() => {}
                () = cancel.cancelled() => return Err(FetchError::Cancelled),
            }
        }

        debug!(site = %self.site_id, "Request slot acquired");
        Ok(SitePermit { _gate: gate })
    }
}

/// Registry handing out one limiter per site id for the lifetime of a run
#[derive(Default)]
pub struct SiteLimiters {
    limiters: Mutex<HashMap<String, Arc<SiteLimiter>>>,
}

impl SiteLimiters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_profile(&self, profile: &SiteProfile) -> Arc<SiteLimiter> {
        let mut limiters = match self.limiters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        limiters
            .entry(profile.id.clone())
            .or_insert_with(|| Arc::new(SiteLimiter::for_profile(profile)))
            .clone()
    }
}
