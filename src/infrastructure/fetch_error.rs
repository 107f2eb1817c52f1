//! Fetch failure taxonomy
//!
//! Every transport problem is classified once, here, into retryable and
//! terminal kinds. The retry loop only ever asks `is_retryable`.

use std::error::Error as _;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum FetchError {
    /// 5xx, timeouts, connection resets
    #[error("Transient failure fetching {url}: {reason}")]
    Transient {
        url: String,
        reason: String,
        status: Option<u16>,
    },

    #[error("Rate limited by {url}")]
    RateLimited {
        url: String,
        retry_after: Option<Duration>,
    },

    /// 4xx other than 429 (408 included), DNS failures, malformed URLs
    #[error("Terminal failure fetching {url}: {reason}")]
    Terminal {
        url: String,
        status: Option<u16>,
        reason: String,
    },

    #[error("Giving up on {url} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Headless render of {url} failed: {reason}")]
    Render { url: String, reason: String },

    #[error("Profile requires headless rendering but no renderer is configured ({url})")]
    RendererUnavailable { url: String },

    #[error("Fetch cancelled")]
    Cancelled,
}

impl FetchError {
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient { .. } | Self::RateLimited { .. } | Self::Render { .. }
        )
    }

    /// Classify a non-success HTTP status
    pub fn from_status(url: &str, status: u16, retry_after: Option<Duration>) -> Self {
        match status {
            429 => Self::RateLimited {
                url: url.to_string(),
                retry_after,
            },
            500..=599 => Self::Transient {
                url: url.to_string(),
                reason: format!("HTTP {status}"),
                status: Some(status),
            },
            _ => Self::Terminal {
                url: url.to_string(),
                status: Some(status),
                reason: format!("HTTP {status}"),
            },
        }
    }

    /// Classify a transport-level reqwest error
    pub fn from_reqwest(url: &str, error: &reqwest::Error) -> Self {
        let chain = error_chain(error);

        if error.is_builder() || chain.to_lowercase().contains("dns error") {
            return Self::Terminal {
                url: url.to_string(),
                status: None,
                reason: chain,
            };
        }

        if let Some(status) = error.status() {
            return Self::from_status(url, status.as_u16(), None);
        }

        Self::Transient {
            url: url.to_string(),
            reason: chain,
            status: None,
        }
    }
}

/// Flatten an error and its sources into one line
fn error_chain(error: &reqwest::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
