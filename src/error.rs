//! Error types shared by the adapters, the orchestrator and the HTTP surface

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Uniform failure signal returned by every provider adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// Required credentials or endpoints are missing from the configuration.
    #[error("adapter is not configured")]
    NotConfigured,

    /// The upstream answered with a non-success status, or could not be reached (status 0).
    #[error("upstream unavailable (status {0})")]
    UpstreamUnavailable(u16),

    /// The upstream answered but the payload failed validation.
    #[error("malformed upstream response")]
    MalformedResponse,

    /// The call did not finish within the adapter timeout.
    #[error("upstream timed out")]
    Timeout,

    /// The target resolves to a loopback, private or link-local address.
    #[error("destination is not a public host")]
    Blocked,
}

impl AdapterError {
    /// Short machine-readable label used in logs and degraded-source reports.
    pub fn label(&self) -> &'static str {
        match self {
            Self::NotConfigured => "not_configured",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::MalformedResponse => "malformed_response",
            Self::Timeout => "timeout",
            Self::Blocked => "blocked_destination",
        }
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::MalformedResponse
        } else {
            Self::UpstreamUnavailable(err.status().map_or(0, |s| s.as_u16()))
        }
    }
}

impl From<serde_json::Error> for AdapterError {
    fn from(_: serde_json::Error) -> Self {
        Self::MalformedResponse
    }
}

pub type AdapterResult<T> = Result<T, AdapterError>;

/// Caller-visible error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    InvalidInput,
    RateLimited,
    Internal,
}

/// Hard failures of a search. Adapter failures never surface here; they degrade.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("rate limit exceeded, retry in {}s", retry_after.as_secs().max(1))]
    RateLimited { retry_after: Duration },

    #[error("internal error: {0}")]
    Internal(String),
}

impl SearchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Message that is safe to hand back to the caller.
    ///
    /// Internal failures are collapsed into a generic sentence so that upstream
    /// bodies and credentials can never leak through them.
    pub fn public_message(&self) -> String {
        match self {
            Self::InvalidInput(msg) => msg.clone(),
            Self::RateLimited { retry_after } => format!(
                "Rate limit exceeded. Try again in {} seconds.",
                retry_after.as_secs().max(1)
            ),
            Self::Internal(_) => "Search failed".to_string(),
        }
    }
}

pub type SearchResult<T> = Result<T, SearchError>;
