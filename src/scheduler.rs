//! Periodic driver for [`HealthPoller`] ticks.
//!
//! The scheduler owns at most one in-flight run per identity. A trigger
//! that arrives while a run is still going is resolved by the configured
//! [`UniquenessPolicy`]: `Keep` drops the new trigger, `Replace` aborts the
//! running tick and starts over. Retry backoff after a failed tick lives
//! here; the poller itself stays stateless.

use crate::config::{ScheduleConfig, UniquenessPolicy};
use crate::poller::{HealthPoller, PollOutcome, TickReport};
use crate::utils::epoch_millis;
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    Started,
    /// A run was already in flight and the policy is `Keep`.
    Skipped,
    /// The in-flight run was aborted in favour of this one.
    Replaced,
}

/// Exponential backoff applied between retries of a failing identity.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
    /// Extra random delay, as a percentage of the base delay.
    pub jitter_percent: u8,
}

impl RetryPolicy {
    /// Base delay after `consecutive_failures` failed ticks in a row.
    pub fn delay(&self, consecutive_failures: u32) -> Duration {
        let exp = consecutive_failures.saturating_sub(1).min(16);
        self.initial.saturating_mul(1u32 << exp).min(self.max)
    }

    pub fn jittered_delay(&self, consecutive_failures: u32) -> Duration {
        let base = self.delay(consecutive_failures);
        if self.jitter_percent == 0 {
            return base;
        }
        let spread = base
            .as_millis()
            .saturating_mul(self.jitter_percent as u128)
            / 100;
        let spread = u64::try_from(spread).unwrap_or(u64::MAX);
        let extra = rand::thread_rng().gen_range(0..=spread);
        base.saturating_add(Duration::from_millis(extra))
    }
}

/// Per-identity counters, readable while the scheduler runs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PollerStatus {
    pub is_running: bool,
    pub total_runs: u64,
    pub successes: u64,
    pub consecutive_failures: u32,
    pub skipped_triggers: u64,
    pub replaced_runs: u64,
    pub last_outcome: Option<PollOutcome>,
    pub last_completed_ms: Option<u128>,
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub identity: String,
    pub report: TickReport,
}

struct RunSlot {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Clone)]
pub struct Scheduler {
    policy: UniquenessPolicy,
    interval: Duration,
    retry: RetryPolicy,
    runs: Arc<Mutex<HashMap<String, RunSlot>>>,
    statuses: Arc<Mutex<HashMap<String, PollerStatus>>>,
    next_generation: Arc<AtomicU64>,
    completions: broadcast::Sender<Completion>,
}

impl Scheduler {
    pub fn new(policy: UniquenessPolicy, interval: Duration, retry: RetryPolicy) -> Self {
        let (completions, _) = broadcast::channel(64);
        Scheduler {
            policy,
            interval,
            retry,
            runs: Arc::new(Mutex::new(HashMap::new())),
            statuses: Arc::new(Mutex::new(HashMap::new())),
            next_generation: Arc::new(AtomicU64::new(0)),
            completions,
        }
    }

    pub fn from_config(cfg: &ScheduleConfig) -> Self {
        let interval = cfg.interval();
        let retry = RetryPolicy {
            initial: Duration::from_secs(cfg.retry_initial_backoff_secs),
            max: Duration::from_secs(cfg.retry_max_backoff_secs).min(interval),
            jitter_percent: cfg.retry_jitter_percent,
        };
        Self::new(cfg.policy, interval, retry)
    }

    pub fn policy(&self) -> UniquenessPolicy {
        self.policy
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Completion> {
        self.completions.subscribe()
    }

    pub async fn status(&self, identity: &str) -> Option<PollerStatus> {
        self.statuses.lock().await.get(identity).cloned()
    }

    /// Start a tick for `identity` unless the uniqueness policy says not to.
    pub async fn trigger(&self, identity: &str, poller: HealthPoller) -> TriggerDecision {
        let mut runs = self.runs.lock().await;

        let in_flight = runs
            .get(identity)
            .map(|slot| !slot.handle.is_finished())
            .unwrap_or(false);

        let decision = match (in_flight, self.policy) {
            (false, _) => TriggerDecision::Started,
            (true, UniquenessPolicy::Keep) => {
                drop(runs);
                self.update_status(identity, |s| s.skipped_triggers += 1).await;
                tracing::debug!(%identity, "tick already in flight, trigger skipped");
                return TriggerDecision::Skipped;
            }
            (true, UniquenessPolicy::Replace) => TriggerDecision::Replaced,
        };

        if let Some(old) = runs.remove(identity) {
            old.handle.abort();
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let scheduler = self.clone();
        let identity_owned = identity.to_string();
        // The runs lock is held until the slot is inserted, so `finish` can
        // never observe the map before this run is in it.
        let handle = tokio::spawn(async move {
            let report = poller.run_tick().await;
            scheduler.finish(identity_owned, generation, report).await;
        });
        runs.insert(identity.to_string(), RunSlot { generation, handle });

        // Marked running before the runs lock is released so `finish` always
        // clears the flag after this.
        self.update_status(identity, |s| {
            s.is_running = true;
            if decision == TriggerDecision::Replaced {
                s.replaced_runs += 1;
            }
        })
        .await;
        drop(runs);

        if decision == TriggerDecision::Replaced {
            tracing::info!(%identity, "in-flight tick replaced");
        }
        decision
    }

    async fn finish(&self, identity: String, generation: u64, report: TickReport) {
        {
            let mut runs = self.runs.lock().await;
            match runs.get(&identity) {
                Some(slot) if slot.generation == generation => {
                    runs.remove(&identity);
                }
                // Superseded by a newer run; its result is discarded.
                _ => return,
            }
        }

        let outcome = report.outcome;
        self.update_status(&identity, |s| {
            s.is_running = false;
            s.total_runs += 1;
            s.last_outcome = Some(outcome);
            s.last_completed_ms = Some(epoch_millis());
            if outcome == PollOutcome::Success {
                s.successes += 1;
                s.consecutive_failures = 0;
            } else {
                s.consecutive_failures += 1;
            }
        })
        .await;

        // No subscribers is fine.
        let _ = self.completions.send(Completion { identity, report });
    }

    async fn update_status(&self, identity: &str, f: impl FnOnce(&mut PollerStatus)) {
        let mut statuses = self.statuses.lock().await;
        f(statuses.entry(identity.to_string()).or_default());
    }

    /// Delay before the next tick, given the last outcome.
    pub fn next_delay(&self, outcome: PollOutcome, consecutive_failures: u32) -> Duration {
        match outcome {
            PollOutcome::Success => self.interval,
            _ => self.retry.jittered_delay(consecutive_failures).min(self.interval),
        }
    }

    /// Drive ticks for one identity until `shutdown` flips to `true`.
    pub async fn run_periodic(
        &self,
        identity: &str,
        poller: HealthPoller,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!(
            %identity,
            interval_secs = self.interval.as_secs(),
            policy = ?self.policy,
            "periodic health checks starting"
        );
        let mut completions = self.subscribe();

        loop {
            self.trigger(identity, poller.clone()).await;

            let outcome = tokio::select! {
                outcome = self.wait_for(&mut completions, identity) => outcome,
                _ = shutdown.changed() => break,
            };
            let Some(outcome) = outcome else { break };

            if outcome == PollOutcome::FatalFailure {
                tracing::error!(%identity, "fatal health check outcome, stopping");
                break;
            }

            let failures = self
                .status(identity)
                .await
                .map(|s| s.consecutive_failures)
                .unwrap_or(0);
            let delay = self.next_delay(outcome, failures);
            tracing::debug!(%identity, ?outcome, delay_ms = delay.as_millis() as u64, "next tick scheduled");

            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.cancel(identity).await;
        tracing::info!(%identity, "periodic health checks stopped");
    }

    /// Next completion for `identity`; `None` once the channel is closed.
    ///
    /// A lagged receiver may have lost the completion, so it is
    /// resubscribed and the status map answers instead when the run has
    /// already finished.
    async fn wait_for(
        &self,
        completions: &mut broadcast::Receiver<Completion>,
        identity: &str,
    ) -> Option<PollOutcome> {
        loop {
            match completions.recv().await {
                Ok(c) if c.identity == identity => return Some(c.report.outcome),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(%identity, skipped = n, "completion receiver lagged");
                    *completions = completions.resubscribe();
                    if let Some(status) = self.status(identity).await {
                        if !status.is_running {
                            if let Some(outcome) = status.last_outcome {
                                return Some(outcome);
                            }
                        }
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Abort the in-flight run for `identity`, if any.
    pub async fn cancel(&self, identity: &str) {
        if let Some(slot) = self.runs.lock().await.remove(identity) {
            slot.handle.abort();
            self.update_status(identity, |s| s.is_running = false).await;
        }
    }

    pub async fn shutdown_all(&self) {
        let mut runs = self.runs.lock().await;
        for (identity, slot) in runs.drain() {
            slot.handle.abort();
            tracing::debug!(%identity, "in-flight tick aborted");
        }
    }
}
