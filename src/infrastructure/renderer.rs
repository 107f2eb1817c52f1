//! Headless page rendering
//!
//! Sites that build their listings in JavaScript are fetched through an
//! external Browserless-compatible service that returns the rendered DOM.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

use super::config::RendererConfig;
use super::fetch_error::FetchError;

/// Extra time the HTTP call gets on top of the in-browser wait
const RENDER_TRANSPORT_MARGIN: Duration = Duration::from_secs(10);

#[async_trait]
pub trait HeadlessRenderer: Send + Sync {
    /// Render `url` and return the serialized DOM once `ready_selector`
    /// (if any) is present or `timeout` elapses.
    async fn render(
        &self,
        url: &str,
        ready_selector: Option<&str>,
        timeout: Duration,
    ) -> Result<String, FetchError>;
}

/// Client for the Browserless `/content` endpoint
pub struct BrowserlessRenderer {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl BrowserlessRenderer {
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| FetchError::Terminal {
                url: base_url.to_string(),
                status: None,
                reason: format!("Failed to build renderer client: {e}"),
            })?;

        info!(base_url, "Headless renderer configured");
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        })
    }

    /// `None` when no endpoint is configured
    pub fn from_config(config: &RendererConfig) -> Result<Option<Self>, FetchError> {
        config
            .endpoint
            .as_deref()
            .map(|endpoint| Self::new(endpoint, config.token.as_deref()))
            .transpose()
    }

    fn endpoint(&self) -> String {
        match &self.token {
            Some(token) => format!("{}/content?token={token}", self.base_url),
            None => format!("{}/content", self.base_url),
        }
    }
}

#[async_trait]
impl HeadlessRenderer for BrowserlessRenderer {
    async fn render(
        &self,
        url: &str,
        ready_selector: Option<&str>,
        timeout: Duration,
    ) -> Result<String, FetchError> {
        let timeout_ms = timeout.as_millis() as u64;
        let mut body = serde_json::json!({
            "url": url,
            "gotoOptions": { "waitUntil": "networkidle2", "timeout": timeout_ms },
        });
        if let Some(selector) = ready_selector {
            body["waitForSelector"] = serde_json::json!({ "selector": selector, "timeout": timeout_ms });
        }

        debug!(url, fetcher = "browserless", "Rendering page");

        let response = self
            .client
            .post(self.endpoint())
            .timeout(timeout + RENDER_TRANSPORT_MARGIN)
            .json(&body)
            .send()
            .await
            .map_err(|e| FetchError::Render {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            // Renderer-side 4xx (bad token, bad request) will not heal on retry
            if status.is_client_error() && status.as_u16() != 429 {
                return Err(FetchError::Terminal {
                    url: url.to_string(),
                    status: Some(status.as_u16()),
                    reason: format!("renderer rejected request: {message}"),
                });
            }
            return Err(FetchError::Render {
                url: url.to_string(),
                reason: format!("renderer returned HTTP {}: {message}", status.as_u16()),
            });
        }

        response.text().await.map_err(|e| FetchError::Render {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}
