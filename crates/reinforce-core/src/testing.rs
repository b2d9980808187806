//! Shared fixtures for unit tests.

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::action::ActionRecord;
use crate::clock::ManualClock;
use crate::config::SyncConfig;
use crate::coordinator::SyncCoordinator;
use crate::error::{Result, SyncError};
use crate::remote::{DecisionRefill, DecisionService};
use crate::store::InMemoryStore;

pub const START_MILLIS: i64 = 1_700_000_000_000;

pub fn decisions(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{prefix}{i}")).collect()
}

#[derive(Default)]
struct Recorded {
    last_batch_len: usize,
    last_requested: Option<(String, usize)>,
    delay: Option<Duration>,
    gate: Option<Arc<Notify>>,
    refill_expiry: Option<i64>,
}

/// Scriptable [`DecisionService`].
pub struct MockService {
    track_calls: AtomicUsize,
    report_calls: AtomicUsize,
    refill_calls: AtomicUsize,
    failing: AtomicBool,
    status: AtomicU16,
    refill_size: AtomicUsize,
    recorded: Mutex<Recorded>,
}

impl Default for MockService {
    fn default() -> Self {
        Self {
            track_calls: AtomicUsize::new(0),
            report_calls: AtomicUsize::new(0),
            refill_calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            status: AtomicU16::new(200),
            refill_size: AtomicUsize::new(10),
            recorded: Mutex::new(Recorded::default()),
        }
    }
}

impl MockService {
    pub fn track_calls(&self) -> usize {
        self.track_calls.load(Ordering::SeqCst)
    }

    pub fn report_calls(&self) -> usize {
        self.report_calls.load(Ordering::SeqCst)
    }

    pub fn refill_calls(&self) -> usize {
        self.refill_calls.load(Ordering::SeqCst)
    }

    pub fn last_batch_len(&self) -> usize {
        self.recorded.lock().unwrap().last_batch_len
    }

    pub fn last_requested(&self) -> Option<(String, usize)> {
        self.recorded.lock().unwrap().last_requested.clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_status(&self, status: u16) {
        self.status.store(status, Ordering::SeqCst);
    }

    pub fn set_refill_size(&self, n: usize) {
        self.refill_size.store(n, Ordering::SeqCst);
    }

    pub fn set_refill_expiry(&self, millis: Option<i64>) {
        self.recorded.lock().unwrap().refill_expiry = millis;
    }

    pub fn set_delay(&self, delay: Duration) {
        self.recorded.lock().unwrap().delay = Some(delay);
    }

    /// Every call after this blocks until the returned gate is notified.
    pub fn install_gate(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.recorded.lock().unwrap().gate = Some(gate.clone());
        gate
    }

    async fn hold(&self) -> Result<()> {
        let (gate, delay) = {
            let r = self.recorded.lock().unwrap();
            (r.gate.clone(), r.delay)
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(SyncError::Network("mock service offline".into()));
        }
        Ok(())
    }

    async fn send(&self, counter: &AtomicUsize, actions: &[ActionRecord]) -> Result<u16> {
        counter.fetch_add(1, Ordering::SeqCst);
        self.recorded.lock().unwrap().last_batch_len = actions.len();
        self.hold().await?;
        Ok(self.status.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl DecisionService for MockService {
    async fn send_track_batch(&self, actions: &[ActionRecord]) -> Result<u16> {
        self.send(&self.track_calls, actions).await
    }

    async fn send_report_batch(&self, actions: &[ActionRecord]) -> Result<u16> {
        self.send(&self.report_calls, actions).await
    }

    async fn request_decisions(
        &self,
        action_id: &str,
        requested_count: usize,
    ) -> Result<DecisionRefill> {
        self.refill_calls.fetch_add(1, Ordering::SeqCst);
        self.recorded.lock().unwrap().last_requested =
            Some((action_id.to_string(), requested_count));
        self.hold().await?;
        let status = self.status.load(Ordering::SeqCst);
        if !(200..300).contains(&status) {
            return Err(SyncError::Rejected { status });
        }
        let n = self.refill_size.load(Ordering::SeqCst);
        Ok(DecisionRefill {
            decisions: decisions(&format!("{action_id}-"), n),
            expires_in_millis: self.recorded.lock().unwrap().refill_expiry,
        })
    }
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub store: Arc<InMemoryStore>,
    pub remote: Arc<MockService>,
    pub coordinator: SyncCoordinator,
}

/// Coordinator over an in-memory store, a mock remote and a manual clock.
/// Must be called inside a tokio runtime.
pub fn harness(config: SyncConfig) -> Harness {
    let clock = Arc::new(ManualClock::new(START_MILLIS));
    let store = Arc::new(InMemoryStore::new());
    let remote = Arc::new(MockService::default());
    let coordinator = SyncCoordinator::builder(store.clone(), remote.clone())
        .config(config)
        .clock(clock.clone())
        .build()
        .expect("coordinator");
    Harness {
        clock,
        store,
        remote,
        coordinator,
    }
}
