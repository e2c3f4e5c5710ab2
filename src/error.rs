//! Error types for configuration and probe failures.

use serde::Serialize;
use thiserror::Error;

/// Problems found while turning configuration into a probe target.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid probe url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported url scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid header name: {0}")]
    InvalidHeaderName(String),

    #[error("invalid value for header {0}")]
    InvalidHeaderValue(String),

    #[error("{field} must be greater than zero")]
    ZeroValue { field: &'static str },

    #[error("retry max backoff {max}s is below initial backoff {initial}s")]
    BackoffRange { initial: u64, max: u64 },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Transport-level failure of a single probe request.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TransportError {
    /// No response headers arrived within the configured budget.
    #[error("request timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// DNS failure, refused connection or TLS handshake failure.
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),
}

/// Why a tick did not end in `Success`.
///
/// Every kind is normalized to `PollOutcome::RetryableFailure`; the kind
/// itself is only carried for logging and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    #[error("no network path available")]
    ConnectivityUnavailable,

    #[error("transport error: {error}")]
    Transport { error: TransportError },

    #[error("unhealthy response status {status}")]
    UnhealthyResponse { status: u16 },

    #[error("internal defect: {message}")]
    InternalDefect { message: String },
}

impl From<TransportError> for FailureKind {
    fn from(error: TransportError) -> Self {
        FailureKind::Transport { error }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
