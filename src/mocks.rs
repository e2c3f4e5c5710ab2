//! Test doubles for the transport and connectivity seams.

use crate::error::TransportError;
use crate::network::ConnectivityChecker;
use crate::probe::{HttpTransport, ProbeTarget};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum MockBehavior {
    Status(u16),
    Fail(TransportError),
    /// Answer with `status` after `delay`, unless the target's read timeout
    /// runs out first.
    Delay { delay: Duration, status: u16 },
    /// Never answer.
    Hang,
    Panic,
}

pub struct MockTransport {
    behavior: MockBehavior,
    calls: AtomicUsize,
}

impl MockTransport {
    pub fn new(behavior: MockBehavior) -> Self {
        MockTransport {
            behavior,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn get(&self, target: &ProbeTarget) -> Result<u16, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            MockBehavior::Status(status) => Ok(*status),
            MockBehavior::Fail(err) => Err(err.clone()),
            MockBehavior::Delay { delay, status } => {
                match tokio::time::timeout(target.read_timeout, tokio::time::sleep(*delay)).await {
                    Ok(()) => Ok(*status),
                    Err(_) => Err(TransportError::Timeout {
                        after_ms: target.read_timeout.as_millis() as u64,
                    }),
                }
            }
            MockBehavior::Hang => futures::future::pending().await,
            MockBehavior::Panic => panic!("transport defect"),
        }
    }
}

pub struct FakeConnectivity {
    online: bool,
    calls: AtomicUsize,
}

impl FakeConnectivity {
    pub fn new(online: bool) -> Self {
        FakeConnectivity {
            online,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectivityChecker for FakeConnectivity {
    async fn is_online(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.online
    }
}
