//! Page fetching with per-site pacing, retry and charset handling
//!
//! `PageFetcher` is the seam between the crawler and the network: the
//! production `HttpFetcher` talks HTTP (or a headless renderer), tests
//! substitute scripted sources.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, HeaderMap, HeaderValue, RETRY_AFTER, USER_AGENT};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::charset::{charset_from_content_type, decode_page};
use super::config::{CrawlConfig, defaults};
use super::fetch_error::FetchError;
use super::rate_limiter::SiteLimiter;
use super::renderer::HeadlessRenderer;
use super::retry_policy::RetryPolicy;
use crate::domain::SiteProfile;

/// One fetched listing page
#[derive(Debug, Clone)]
pub struct RawPage {
    /// URL that was requested
    pub url: String,
    pub status: u16,
    /// Decoded document text
    pub body: String,
    pub encoding: &'static str,
    /// Declared charset failed; `body` came from a fallback decode
    pub charset_fallback: bool,
}

impl RawPage {
    /// Page built from already-decoded text (renderer output, fixtures)
    pub fn from_text(url: &str, body: impl Into<String>) -> Self {
        let body = body.into();
        Self {
            url: url.to_string(),
            status: 200,
            body,
            encoding: "UTF-8",
            charset_fallback: false,
        }
    }
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch one page of `profile`'s site. Implementations must honour the
    /// limiter for every request attempt and stop when `cancel` fires.
    async fn fetch(
        &self,
        url: &str,
        profile: &SiteProfile,
        limiter: &SiteLimiter,
        cancel: &CancellationToken,
    ) -> Result<RawPage, FetchError>;
}

/// Production fetcher: reqwest for direct pages, a `HeadlessRenderer` for
/// JavaScript-rendered ones.
pub struct HttpFetcher {
    client: Client,
    retry: RetryPolicy,
    renderer: Option<Arc<dyn HeadlessRenderer>>,
    direct_timeout: Duration,
    headless_timeout: Duration,
}

impl HttpFetcher {
    pub fn new(
        config: &CrawlConfig,
        renderer: Option<Arc<dyn HeadlessRenderer>>,
    ) -> Result<Self, FetchError> {
        let build_error = |reason: String| FetchError::Terminal {
            url: String::new(),
            status: None,
            reason,
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| build_error(format!("Invalid user agent: {e}")))?,
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(defaults::ACCEPT_LANGUAGE));

        let client = Client::builder()
            .timeout(config.direct_timeout())
            .default_headers(headers)
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| build_error(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            retry: RetryPolicy::from_config(config),
            renderer,
            direct_timeout: config.direct_timeout(),
            headless_timeout: config.headless_timeout(),
        })
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn fetch_direct_once(&self, url: &str, profile: &SiteProfile) -> Result<RawPage, FetchError> {
        let response = self
            .client
            .get(url)
            .timeout(self.direct_timeout)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(FetchError::from_status(url, status.as_u16(), retry_after));
        }

        let header_charset = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(charset_from_content_type)
            .map(str::to_string);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::from_reqwest(url, &e))?;

        let decoded = decode_page(&bytes, profile.encoding.as_deref(), header_charset.as_deref());
        debug!(url, bytes = bytes.len(), encoding = decoded.encoding, "Fetched page");

        Ok(RawPage {
            url: url.to_string(),
            status: status.as_u16(),
            body: decoded.text,
            encoding: decoded.encoding,
            charset_fallback: decoded.fallback,
        })
    }

    async fn render_once(
        &self,
        renderer: &dyn HeadlessRenderer,
        url: &str,
        profile: &SiteProfile,
    ) -> Result<RawPage, FetchError> {
        let timeout = profile
            .render
            .timeout_secs
            .map_or(self.headless_timeout, Duration::from_secs);
        let html = renderer
            .render(url, profile.render.ready_selector.as_deref(), timeout)
            .await?;
        Ok(RawPage::from_text(url, html))
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        profile: &SiteProfile,
        limiter: &SiteLimiter,
        cancel: &CancellationToken,
    ) -> Result<RawPage, FetchError> {
        if profile.is_headless() {
            let Some(renderer) = self.renderer.as_deref() else {
                return Err(FetchError::RendererUnavailable { url: url.to_string() });
            };
            info!(site = %profile.id, url, "Fetching page (headless)");
            return self
                .retry
                .run(url, cancel, || async move {
                    let _permit = limiter.acquire(cancel).await?;
                    self.render_once(renderer, url, profile).await
                })
                .await;
        }

        info!(site = %profile.id, url, "Fetching page");
        self.retry
            .run(url, cancel, || async move {
                let _permit = limiter.acquire(cancel).await?;
                tokio::select! {
                    result = self.fetch_direct_once(url, profile) => result,
                    () = cancel.cancelled() => Err(FetchError::Cancelled),
                }
            })
            .await
    }
}
