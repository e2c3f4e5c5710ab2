use crate::config::{ConnectivityConfig, ConnectivityMode};
use crate::probe::ProbeTarget;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

/// Host network-reachability signal.
///
/// A `true` answer is a precondition gate only; the probe that follows may
/// still fail.
#[async_trait]
pub trait ConnectivityChecker: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Treats the network as always reachable.
pub struct AssumeOnline;

#[async_trait]
impl ConnectivityChecker for AssumeOnline {
    async fn is_online(&self) -> bool {
        true
    }
}

/// Reachable when a TCP connection to the probe host can be opened.
pub struct TcpConnectivity {
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpConnectivity {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        TcpConnectivity {
            host: host.into(),
            port,
            timeout,
        }
    }

    /// Check the host and port the probe will hit. Returns `None` for urls
    /// without a host.
    pub fn for_target(target: &ProbeTarget, timeout: Duration) -> Option<Self> {
        let host = target.url.host_str()?.to_string();
        let port = target.url.port_or_known_default()?;
        Some(Self::new(host, port, timeout))
    }
}

#[async_trait]
impl ConnectivityChecker for TcpConnectivity {
    async fn is_online(&self) -> bool {
        let addr = (self.host.as_str(), self.port);
        match tokio::time::timeout(self.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::debug!(host = %self.host, port = self.port, error = %e, "connectivity check failed");
                false
            }
            Err(_) => {
                tracing::debug!(host = %self.host, port = self.port, "connectivity check timed out");
                false
            }
        }
    }
}

/// Pick the checker the config asks for.
pub fn checker_from_config(
    cfg: &ConnectivityConfig,
    target: &ProbeTarget,
) -> Arc<dyn ConnectivityChecker> {
    let timeout = Duration::from_millis(cfg.timeout_ms);
    match cfg.mode {
        ConnectivityMode::AssumeOnline => Arc::new(AssumeOnline),
        ConnectivityMode::Tcp => match TcpConnectivity::for_target(target, timeout) {
            Some(tcp) => Arc::new(tcp),
            None => {
                tracing::warn!(url = %target.url, "probe url has no host, assuming online");
                Arc::new(AssumeOnline)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_assume_online() {
        assert!(AssumeOnline.is_online().await);
    }

    #[tokio::test]
    async fn test_tcp_connectivity_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let checker = TcpConnectivity::new("127.0.0.1", port, Duration::from_millis(500));
        assert!(checker.is_online().await);
    }

    #[tokio::test]
    async fn test_tcp_connectivity_closed_port() {
        // Bind then drop so the port is known to be closed.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let checker = TcpConnectivity::new("127.0.0.1", port, Duration::from_millis(500));
        assert!(!checker.is_online().await);
    }

    #[test]
    fn test_for_target_uses_default_port() {
        let target = ProbeTarget::new(
            "https://api.example.com/health",
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .unwrap();
        let tcp = TcpConnectivity::for_target(&target, Duration::from_secs(1)).unwrap();
        assert_eq!(tcp.host, "api.example.com");
        assert_eq!(tcp.port, 443);
    }
}
