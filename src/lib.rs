//! health_poller: periodic health checks against a remote HTTP API.
//!
//! ```text
//! Scheduler (interval, KEEP / REPLACE, retry backoff)
//!   └── HealthPoller::run_once()
//!         ├── ConnectivityChecker::is_online()  (gate, no request when offline)
//!         ├── probe() → ProbeResult             (one GET, bounded by timeouts)
//!         └── PollOutcome + one log record
//! ```

pub mod config;
pub mod error;
#[cfg(test)]
mod mocks;
pub mod network;
pub mod poller;
pub mod probe;
pub mod scheduler;
pub mod utils;

pub use config::{AppConfig, UniquenessPolicy};
pub use error::{FailureKind, TransportError};
pub use network::{AssumeOnline, ConnectivityChecker, TcpConnectivity};
pub use poller::{HealthPoller, PollOutcome, TickReport};
pub use probe::{HttpTransport, ProbeResult, ProbeTarget, ReqwestTransport};
pub use scheduler::{PollerStatus, RetryPolicy, Scheduler, TriggerDecision};
