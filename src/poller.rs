//! One health-check cycle: connectivity gate, probe, classification.
//!
//! `HealthPoller` keeps no state between ticks. Every call to
//! [`HealthPoller::run_once`] produces exactly one [`TickReport`] and one
//! log record, and always resolves to a [`PollOutcome`]; a panic inside
//! the tick is caught at this boundary and reported as an internal defect.

use crate::error::FailureKind;
use crate::network::ConnectivityChecker;
use crate::probe::{self, HttpTransport, ProbeResult, ProbeTarget};
use crate::utils::epoch_millis;
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// What the scheduler should do with a finished tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollOutcome {
    Success,
    RetryableFailure,
    /// Reserved. The poller never produces it; schedulers stop the
    /// identity when they see it.
    FatalFailure,
}

/// Everything observed during one tick.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub outcome: PollOutcome,
    /// Absent when the connectivity gate short-circuited the tick.
    pub probe: Option<ProbeResult>,
    pub failure: Option<FailureKind>,
    pub checked_at_ms: u128,
}

impl TickReport {
    fn success(probe: ProbeResult) -> Self {
        TickReport {
            outcome: PollOutcome::Success,
            probe: Some(probe),
            failure: None,
            checked_at_ms: epoch_millis(),
        }
    }

    fn retryable(probe: Option<ProbeResult>, failure: FailureKind) -> Self {
        TickReport {
            outcome: PollOutcome::RetryableFailure,
            probe,
            failure: Some(failure),
            checked_at_ms: epoch_millis(),
        }
    }
}

#[derive(Clone)]
pub struct HealthPoller {
    target: Arc<ProbeTarget>,
    connectivity: Arc<dyn ConnectivityChecker>,
    transport: Arc<dyn HttpTransport>,
}

impl HealthPoller {
    pub fn new(
        target: Arc<ProbeTarget>,
        connectivity: Arc<dyn ConnectivityChecker>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        HealthPoller {
            target,
            connectivity,
            transport,
        }
    }

    pub async fn check_connectivity(&self) -> bool {
        self.connectivity.is_online().await
    }

    pub async fn probe(&self) -> ProbeResult {
        probe::probe(self.transport.as_ref(), &self.target).await
    }

    pub async fn run_once(&self) -> PollOutcome {
        self.run_tick().await.outcome
    }

    /// Run one tick and return the full report.
    pub async fn run_tick(&self) -> TickReport {
        let report = match AssertUnwindSafe(self.evaluate()).catch_unwind().await {
            Ok(report) => report,
            Err(panic) => TickReport::retryable(
                None,
                FailureKind::InternalDefect {
                    message: panic_message(panic.as_ref()),
                },
            ),
        };
        self.log_report(&report);
        report
    }

    async fn evaluate(&self) -> TickReport {
        if !self.check_connectivity().await {
            return TickReport::retryable(None, FailureKind::ConnectivityUnavailable);
        }

        let result = self.probe().await;
        if result.success {
            return TickReport::success(result);
        }

        let failure = match (&result.error, result.status_code) {
            (Some(error), _) => FailureKind::from(error.clone()),
            (None, Some(status)) => FailureKind::UnhealthyResponse { status },
            (None, None) => FailureKind::InternalDefect {
                message: "probe failed without status or error".to_string(),
            },
        };
        TickReport::retryable(Some(result), failure)
    }

    fn log_report(&self, report: &TickReport) {
        let url = self.target.url.as_str();
        let latency_ms = report.probe.as_ref().map(|p| p.latency_millis);
        let status = report.probe.as_ref().and_then(|p| p.status_code);

        match &report.failure {
            None => tracing::info!(
                target: "health_poller::tick",
                url,
                outcome = ?report.outcome,
                latency_ms,
                status,
                "health check passed"
            ),
            Some(failure @ FailureKind::InternalDefect { .. }) => tracing::error!(
                target: "health_poller::tick",
                url,
                outcome = ?report.outcome,
                latency_ms,
                error = %failure,
                "health check aborted by internal defect"
            ),
            Some(failure) => tracing::warn!(
                target: "health_poller::tick",
                url,
                outcome = ?report.outcome,
                latency_ms,
                status,
                error = %failure,
                "health check failed"
            ),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
