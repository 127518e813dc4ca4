//! Error types for the device flow.

use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;
use url::Url;

/// Primary error type returned by [`DeviceFlow::run`](crate::DeviceFlow::run).
///
/// `authorization_pending` and `slow_down` responses are handled inside the
/// poll loop and never appear here; `expired_token` only appears indirectly,
/// as [`FlowError::Cancelled`] when the caller's token fired while the device
/// code was expiring.
#[derive(Debug, Error)]
pub enum FlowError {
    /// The flow was configured without a client ID.
    #[error("client ID not provided")]
    MissingClientId,

    /// The flow was configured without a prompter.
    #[error("prompter not provided")]
    MissingPrompter,

    /// The device-code request failed.
    #[error("get device code: {0}")]
    DeviceCode(#[source] ExchangeError),

    /// The prompter reported a failure; the flow is aborted, not retried.
    #[error("prompt: {0}")]
    Prompt(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A poll against the token endpoint failed.
    #[error("get access token: {0}")]
    AccessToken(#[source] ExchangeError),

    /// The server answered 200 without an access token.
    #[error("get access token: server did not return an access token")]
    MissingAccessToken,

    /// The caller's cancellation token fired.
    #[error("authorization flow cancelled")]
    Cancelled,
}

/// Outcome classification for a single form-encoded exchange.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// The request never produced a usable response (connection refused,
    /// timeout, TLS failure, ...).
    #[error("post {url}: {source}")]
    Transport {
        url: Url,
        #[source]
        source: reqwest::Error,
    },

    /// The endpoint was reachable but the response was not a form-encoded
    /// body (wrong or missing content type, unreadable body). Raised even on
    /// HTTP 200.
    #[error("post {url}: {detail}")]
    Format { url: Url, detail: String },

    /// Non-200 status with a body that yielded no structured OAuth error.
    #[error("post {url}: http {status}")]
    Status { url: Url, status: StatusCode },

    /// The endpoint reported a structured OAuth error.
    #[error("post {url}: {source}")]
    OAuth {
        url: Url,
        #[source]
        source: OAuthError,
    },
}

impl ExchangeError {
    /// The structured OAuth error, if that is what this is.
    pub fn oauth(&self) -> Option<&OAuthError> {
        match self {
            Self::OAuth { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Structured OAuth error payload (`error`, `error_description`, `interval`)
/// from the token endpoint.
///
/// The poll loop branches on [`code`](Self::code); `interval` carries the
/// server-suggested poll period accompanying `slow_down`, when present and
/// positive.
#[derive(Debug, Clone)]
pub struct OAuthError {
    pub code: String,
    pub description: String,
    pub interval: Option<Duration>,
}

impl fmt::Display for OAuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.description.is_empty() {
            write!(f, "oauth {}", self.code)
        } else {
            f.write_str(&self.description)
        }
    }
}

impl std::error::Error for OAuthError {}
