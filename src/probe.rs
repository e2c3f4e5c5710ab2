//! One outbound health-check request and its classification.
//!
//! The HTTP client sits behind [`HttpTransport`] so the poller can be
//! driven by a fake in tests. [`probe`] never fails: transport errors and
//! non-2xx statuses are folded into the returned [`ProbeResult`].

use crate::config::{AppConfig, ProbeConfig};
use crate::error::{ConfigError, ConfigResult, TransportError};
use crate::utils::redact;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::Url;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Immutable description of the endpoint being watched.
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub url: Url,
    pub headers: HeaderMap,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl ProbeTarget {
    pub fn new(url: &str, connect_timeout: Duration, read_timeout: Duration) -> ConfigResult<Self> {
        let parsed = Url::parse(url).map_err(|e| ConfigError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
        if connect_timeout.is_zero() {
            return Err(ConfigError::ZeroValue { field: "connect_timeout" });
        }
        if read_timeout.is_zero() {
            return Err(ConfigError::ZeroValue { field: "read_timeout" });
        }
        Ok(ProbeTarget {
            url: parsed,
            headers: HeaderMap::new(),
            connect_timeout,
            read_timeout,
        })
    }

    pub fn with_header(mut self, name: &str, value: &str) -> ConfigResult<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ConfigError::InvalidHeaderName(name.to_string()))?;
        let mut value = HeaderValue::from_str(value)
            .map_err(|_| ConfigError::InvalidHeaderValue(name.to_string()))?;
        if is_credential(&name) {
            value.set_sensitive(true);
        }
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Build the target from config, pulling credentials from the
    /// environment variables the config names.
    pub fn from_config(cfg: &ProbeConfig) -> ConfigResult<Self> {
        let mut target = ProbeTarget::new(
            &cfg.url,
            Duration::from_millis(cfg.connect_timeout_ms),
            Duration::from_millis(cfg.read_timeout_ms),
        )?;
        for (name, value) in &cfg.headers {
            target = target.with_header(name, value)?;
        }
        if let Some(key) = AppConfig::credential_from_env(cfg.api_key_env.as_deref()) {
            target = target.with_header(&cfg.api_key_header, &key)?;
        }
        if let Some(token) = AppConfig::credential_from_env(cfg.bearer_token_env.as_deref()) {
            target = target.with_header(AUTHORIZATION.as_str(), &format!("Bearer {token}"))?;
        }
        Ok(target)
    }

    /// Upper bound on a single request, used as a backstop around any
    /// transport.
    pub fn deadline(&self) -> Duration {
        self.connect_timeout + self.read_timeout
    }

    /// Header names with credential values masked, for logging.
    pub fn describe_headers(&self) -> Vec<String> {
        self.headers
            .iter()
            .map(|(name, value)| {
                let shown = if value.is_sensitive() {
                    redact(value.to_str().unwrap_or_default())
                } else {
                    value.to_str().unwrap_or("<binary>").to_string()
                };
                format!("{name}: {shown}")
            })
            .collect()
    }
}

fn is_credential(name: &HeaderName) -> bool {
    let n = name.as_str();
    *name == AUTHORIZATION || n.contains("key") || n.contains("token")
}

/// Result of a single probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub success: bool,
    pub status_code: Option<u16>,
    pub latency_millis: u64,
    pub error: Option<TransportError>,
}

/// Issues one GET request and reports the response status code.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, target: &ProbeTarget) -> Result<u16, TransportError>;
}

/// `reqwest`-backed transport. `send()` resolves once response headers
/// arrive, so the body is never read.
///
/// The read timeout counts from the start of the request to the response
/// headers; `ProbeTarget::deadline` stays as the outer bound.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .user_agent(concat!("health-poller/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(ReqwestTransport { client })
    }

    pub fn for_target(target: &ProbeTarget) -> anyhow::Result<Self> {
        Self::new(target.connect_timeout, target.read_timeout)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, target: &ProbeTarget) -> Result<u16, TransportError> {
        let read_timeout_ms = target.read_timeout.as_millis() as u64;
        let send = self
            .client
            .get(target.url.clone())
            .headers(target.headers.clone())
            .timeout(target.deadline())
            .send();

        let resp = match tokio::time::timeout(target.read_timeout, send).await {
            Ok(result) => result.map_err(|e| classify_reqwest_error(&e, read_timeout_ms))?,
            Err(_) => {
                return Err(TransportError::Timeout {
                    after_ms: read_timeout_ms,
                })
            }
        };
        Ok(resp.status().as_u16())
    }
}

fn classify_reqwest_error(e: &reqwest::Error, read_timeout_ms: u64) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout {
            after_ms: read_timeout_ms,
        }
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Request(e.to_string())
    }
}

/// Probe `target` once through `transport`.
///
/// Latency covers the span from just before the request to the response
/// headers, or to the failure point.
pub async fn probe(transport: &dyn HttpTransport, target: &ProbeTarget) -> ProbeResult {
    let started = Instant::now();
    let outcome = tokio::time::timeout(target.deadline(), transport.get(target)).await;
    let latency_millis = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(Ok(status)) => {
            let success = (200..300).contains(&status);
            if !success {
                tracing::debug!(status, url = %target.url, "probe returned non-2xx");
            }
            ProbeResult {
                success,
                status_code: Some(status),
                latency_millis,
                error: None,
            }
        }
        Ok(Err(error)) => {
            tracing::debug!(error = %error, url = %target.url, "probe transport failed");
            ProbeResult {
                success: false,
                status_code: None,
                latency_millis,
                error: Some(error),
            }
        }
        Err(_) => {
            let after_ms = target.deadline().as_millis() as u64;
            tracing::debug!(after_ms, url = %target.url, "probe hit deadline");
            ProbeResult {
                success: false,
                status_code: None,
                latency_millis,
                error: Some(TransportError::Timeout { after_ms }),
            }
        }
    }
}
