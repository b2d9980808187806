//! Decide-and-fire synchronization.
//!
//! Every `maybe_sync_*` call evaluates the sync policy on the caller's thread
//! and, when a sync is due and none is in flight for that key, spawns one
//! background task on the coordinator's runtime. Nothing on the caller path
//! waits on the network.
//!
//! # Per-key state
//!
//! ```text
//!   Idle ──(should_sync ∧ no flight)──▶ SyncInFlight ──(remote done)──▶ Idle
//! ```
//!
//! A call that arrives while its key is in flight is a no-op; the policy is
//! re-evaluated on the next call. There is no retry timer.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::action::QueueKind;
use crate::cartridge::CartridgeStore;
use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::meta::QueueSyncMeta;
use crate::policy;
use crate::queue::DurableQueue;
use crate::remote::DecisionService;
use crate::store::PersistentStore;

// ---------------------------------------------------------------------------
// SyncKey / SyncCause / SyncResult / SyncOutcome
// ---------------------------------------------------------------------------

/// Single-flight key: one per queue kind and one per cartridge actionID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", content = "action_id", rename_all = "snake_case")]
pub enum SyncKey {
    Track,
    Report,
    Cartridge(String),
}

impl From<QueueKind> for SyncKey {
    fn from(kind: QueueKind) -> Self {
        match kind {
            QueueKind::Track => Self::Track,
            QueueKind::Report => Self::Report,
        }
    }
}

impl fmt::Display for SyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Track => f.write_str("track"),
            Self::Report => f.write_str("report"),
            Self::Cartridge(id) => write!(f, "cartridge:{id}"),
        }
    }
}

/// Which clause of the policy fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncCause {
    /// Queue reached its suggested batch size.
    BatchSize,
    /// Cartridge pool at or below the refill threshold.
    LowPool,
    /// Last successful sync is older than the TTL.
    TimerExpired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncResult {
    /// Queue batch acknowledged and removed locally.
    Sent { records: usize },
    /// Queue was empty; the timer was restarted without a remote call.
    NothingToSend,
    /// Decisions received and appended to the cartridge.
    Refilled { decisions: usize },
    /// Remote refused the payload as invalid. The sent records (or the
    /// cartridge) were dropped rather than retried.
    Discarded { dropped: usize },
    /// Remote call failed or timed out; nothing was changed.
    Failed { error: String },
}

/// Record of one completed background sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub key: SyncKey,
    pub cause: SyncCause,
    pub result: SyncResult,
    pub started_at: i64,
    pub duration_millis: i64,
}

impl SyncOutcome {
    pub fn succeeded(&self) -> bool {
        !matches!(self.result, SyncResult::Failed { .. })
    }
}

// ---------------------------------------------------------------------------
// Single-flight registry
// ---------------------------------------------------------------------------

struct FlightRegistry {
    keys: Mutex<HashSet<SyncKey>>,
    active: watch::Sender<usize>,
}

impl FlightRegistry {
    fn new() -> Self {
        let (active, _) = watch::channel(0);
        Self {
            keys: Mutex::new(HashSet::new()),
            active,
        }
    }

    fn keys(&self) -> MutexGuard<'_, HashSet<SyncKey>> {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomically claim `key`. `None` if it is already in flight.
    fn try_begin(self: &Arc<Self>, key: SyncKey) -> Option<FlightGuard> {
        let mut keys = self.keys();
        if !keys.insert(key.clone()) {
            return None;
        }
        self.active.send_replace(keys.len());
        Some(FlightGuard {
            registry: Arc::clone(self),
            key,
        })
    }
}

/// Releases its key when dropped, whether the sync succeeded, failed,
/// panicked or was cancelled.
struct FlightGuard {
    registry: Arc<FlightRegistry>,
    key: SyncKey,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let mut keys = self.registry.keys();
        keys.remove(&self.key);
        self.registry.active.send_replace(keys.len());
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct SyncCoordinatorBuilder {
    config: SyncConfig,
    store: Arc<dyn PersistentStore>,
    remote: Arc<dyn DecisionService>,
    clock: Arc<dyn Clock>,
    runtime: Option<Handle>,
}

impl SyncCoordinatorBuilder {
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Runtime that background syncs are spawned on. Defaults to the
    /// runtime current at `build()`.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Load queues and cartridges from the store and assemble the coordinator.
    pub fn build(self) -> Result<SyncCoordinator> {
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| SyncError::NoRuntime)?,
        };
        for w in self.config.validate() {
            warn!(field = %w.field, "sync config: {}", w.message);
        }

        let now = self.clock.now_millis();
        let track = DurableQueue::open(
            QueueKind::Track,
            self.store.clone(),
            initial_queue_meta(&self.config, QueueKind::Track),
            now,
        );
        let report = DurableQueue::open(
            QueueKind::Report,
            self.store.clone(),
            initial_queue_meta(&self.config, QueueKind::Report),
            now,
        );
        let cartridges = CartridgeStore::open(
            self.store.clone(),
            self.config.cartridge_capacity,
            self.config.cartridge_ttl_millis,
        );

        Ok(SyncCoordinator {
            inner: Arc::new(Inner {
                config: self.config,
                store: self.store,
                remote: self.remote,
                clock: self.clock,
                runtime,
                track,
                report,
                cartridges,
                flights: Arc::new(FlightRegistry::new()),
                history: Mutex::new(VecDeque::new()),
            }),
        })
    }
}

fn initial_queue_meta(config: &SyncConfig, kind: QueueKind) -> QueueSyncMeta {
    let batch = match kind {
        QueueKind::Track => config.track_batch_size,
        QueueKind::Report => config.report_batch_size,
    };
    QueueSyncMeta::new(batch, config.queue_ttl_millis, 0)
}

// ---------------------------------------------------------------------------
// SyncCoordinator
// ---------------------------------------------------------------------------

struct Inner {
    config: SyncConfig,
    store: Arc<dyn PersistentStore>,
    remote: Arc<dyn DecisionService>,
    clock: Arc<dyn Clock>,
    runtime: Handle,
    track: DurableQueue,
    report: DurableQueue,
    cartridges: CartridgeStore,
    flights: Arc<FlightRegistry>,
    history: Mutex<VecDeque<SyncOutcome>>,
}

/// Owns the queues, the cartridges and every sync timestamp.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

impl SyncCoordinator {
    pub fn builder(
        store: Arc<dyn PersistentStore>,
        remote: Arc<dyn DecisionService>,
    ) -> SyncCoordinatorBuilder {
        SyncCoordinatorBuilder {
            config: SyncConfig::default(),
            store,
            remote,
            clock: Arc::new(SystemClock),
            runtime: None,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn clock(&self) -> &dyn Clock {
        self.inner.clock.as_ref()
    }

    pub fn queue(&self, kind: QueueKind) -> &DurableQueue {
        self.inner.queue(kind)
    }

    pub fn cartridges(&self) -> &CartridgeStore {
        &self.inner.cartridges
    }

    pub fn is_in_flight(&self, key: &SyncKey) -> bool {
        self.inner.flights.keys().contains(key)
    }

    /// Completed syncs, newest first.
    pub fn recent_syncs(&self) -> Vec<SyncOutcome> {
        self.inner.history().iter().rev().cloned().collect()
    }

    /// Resolve once no sync is in flight for any key.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.flights.active.subscribe();
        // The sender lives as long as `self`, so this only ends at zero.
        let _ = rx.wait_for(|active| *active == 0).await;
    }

    // -----------------------------------------------------------------------
    // Triggers
    // -----------------------------------------------------------------------

    pub fn maybe_sync_track(&self) -> Option<JoinHandle<SyncOutcome>> {
        self.maybe_sync_queue(QueueKind::Track)
    }

    pub fn maybe_sync_report(&self) -> Option<JoinHandle<SyncOutcome>> {
        self.maybe_sync_queue(QueueKind::Report)
    }

    fn maybe_sync_queue(&self, kind: QueueKind) -> Option<JoinHandle<SyncOutcome>> {
        let now = self.inner.clock.now_millis();
        let (meta, pending) = self.inner.queue(kind).meta_and_count();
        let due = match kind {
            QueueKind::Track => policy::track_should_sync(&meta, pending, now),
            QueueKind::Report => policy::report_should_sync(&meta, pending, now),
        };
        debug!(
            queue = %kind,
            pending,
            batch_size = meta.suggested_batch_size,
            size_reached = meta.size_reached(pending),
            expires_in_ms = meta.expires_at().saturating_sub(now),
            timer_expired = meta.timer_expired(now),
            due,
            "evaluated queue sync policy"
        );
        if !due {
            return None;
        }
        let cause = if meta.size_reached(pending) {
            SyncCause::BatchSize
        } else {
            SyncCause::TimerExpired
        };

        let key = SyncKey::from(kind);
        let Some(guard) = self.inner.flights.try_begin(key.clone()) else {
            debug!(key = %key, "sync already in flight, skipping");
            return None;
        };
        let inner = Arc::clone(&self.inner);
        Some(self.inner.runtime.spawn(async move {
            let outcome = inner.sync_queue(kind, cause).await;
            drop(guard);
            outcome
        }))
    }

    pub fn maybe_sync_cartridge(&self, action_id: &str) -> Option<JoinHandle<SyncOutcome>> {
        let now = self.inner.clock.now_millis();
        let cartridge = self.inner.cartridges.metadata(action_id);
        let due = policy::cartridge_should_sync(&cartridge, now);
        debug!(
            action_id,
            available = cartridge.available_count,
            capacity = cartridge.capacity,
            expires_in_ms = cartridge.expires_at().saturating_sub(now),
            due,
            "evaluated cartridge sync policy"
        );
        if !due {
            return None;
        }
        let cause = if cartridge.timer_expired(now) {
            SyncCause::TimerExpired
        } else {
            SyncCause::LowPool
        };

        let key = SyncKey::Cartridge(action_id.to_string());
        let Some(guard) = self.inner.flights.try_begin(key.clone()) else {
            debug!(key = %key, "sync already in flight, skipping");
            return None;
        };
        let inner = Arc::clone(&self.inner);
        let action_id = action_id.to_string();
        Some(self.inner.runtime.spawn(async move {
            let outcome = inner.sync_cartridge(action_id, cause).await;
            drop(guard);
            outcome
        }))
    }

    /// Evaluate Track, Report and every known cartridge.
    pub fn maybe_sync_all(&self) -> Vec<JoinHandle<SyncOutcome>> {
        let mut handles = Vec::new();
        handles.extend(self.maybe_sync_track());
        handles.extend(self.maybe_sync_report());
        for action_id in self.inner.cartridges.action_ids() {
            handles.extend(self.maybe_sync_cartridge(&action_id));
        }
        handles
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Change the batch size that triggers a `kind` sync.
    pub fn set_batch_size(&self, kind: QueueKind, size: usize) {
        info!(queue = %kind, size, "batch size updated");
        self.inner.queue(kind).set_batch_size(size);
    }

    /// Drop every queued record, cached decision and piece of sync metadata.
    ///
    /// Meant for idle moments (logout, reset); a sync still in flight may
    /// re-create the cartridge it was refilling.
    pub fn erase(&self) -> Result<()> {
        self.inner.store.erase()?;
        let now = self.inner.clock.now_millis();
        for kind in QueueKind::all() {
            self.inner
                .queue(kind)
                .reset(initial_queue_meta(&self.inner.config, kind), now);
        }
        self.inner.cartridges.clear();
        self.inner.history().clear();
        info!("local sync state erased");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Background work
// ---------------------------------------------------------------------------

impl Inner {
    fn queue(&self, kind: QueueKind) -> &DurableQueue {
        match kind {
            QueueKind::Track => &self.track,
            QueueKind::Report => &self.report,
        }
    }

    fn history(&self) -> MutexGuard<'_, VecDeque<SyncOutcome>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, outcome: &SyncOutcome) {
        let mut history = self.history();
        history.push_back(outcome.clone());
        while history.len() > self.config.history_retention {
            history.pop_front();
        }
    }

    async fn call_remote<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        let timeout = self.config.remote_timeout();
        tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| SyncError::Timeout(timeout))?
    }

    async fn sync_queue(&self, kind: QueueKind, cause: SyncCause) -> SyncOutcome {
        let queue = self.queue(kind);
        let started_at = self.clock.now_millis();
        // The batch size is only a trigger; the whole queue goes out.
        let records = queue.snapshot();

        let result = if records.is_empty() {
            debug!(queue = %kind, "nothing to send, restarting timer");
            queue.mark_synced(started_at);
            SyncResult::NothingToSend
        } else {
            info!(queue = %kind, count = records.len(), ?cause, "sending queued actions");
            let call = async {
                match kind {
                    QueueKind::Track => self.remote.send_track_batch(&records).await,
                    QueueKind::Report => self.remote.send_report_batch(&records).await,
                }
            };
            match self.call_remote(call).await.and_then(check_status) {
                Ok(status) => {
                    let removed = queue.remove_batch(&records);
                    queue.mark_synced(self.clock.now_millis());
                    info!(queue = %kind, status, removed, "queue synced");
                    SyncResult::Sent {
                        records: records.len(),
                    }
                }
                Err(e) if e.is_final_rejection() => {
                    let dropped = queue.remove_batch(&records);
                    queue.mark_synced(self.clock.now_millis());
                    warn!(queue = %kind, dropped, error = %e, "remote refused batch, discarded");
                    SyncResult::Discarded { dropped }
                }
                Err(e) => {
                    warn!(queue = %kind, count = records.len(), error = %e, "queue sync failed");
                    SyncResult::Failed {
                        error: e.to_string(),
                    }
                }
            }
        };

        self.finish(SyncKey::from(kind), cause, result, started_at)
    }

    async fn sync_cartridge(&self, action_id: String, cause: SyncCause) -> SyncOutcome {
        let started_at = self.clock.now_millis();
        let cartridge = self.cartridges.metadata(&action_id);
        let requested = cartridge
            .capacity
            .saturating_sub(cartridge.available_count)
            .max(1);
        info!(
            action_id = %action_id,
            available = cartridge.available_count,
            requested,
            ?cause,
            "requesting decisions"
        );

        let result = match self
            .call_remote(self.remote.request_decisions(&action_id, requested))
            .await
        {
            Ok(refill) => {
                let received = refill.decisions.len();
                let snapshot = self.cartridges.apply_refill(
                    &action_id,
                    refill.decisions,
                    self.clock.now_millis(),
                    refill.expires_in_millis,
                );
                info!(
                    action_id = %action_id,
                    received,
                    available = snapshot.available_count,
                    "cartridge refilled"
                );
                SyncResult::Refilled {
                    decisions: received,
                }
            }
            Err(e) if e.is_final_rejection() => {
                let dropped = self.cartridges.flush(&action_id);
                warn!(
                    action_id = %action_id,
                    dropped,
                    error = %e,
                    "remote refused actionID, cartridge flushed"
                );
                SyncResult::Discarded { dropped }
            }
            Err(e) => {
                warn!(action_id = %action_id, error = %e, "cartridge refill failed");
                SyncResult::Failed {
                    error: e.to_string(),
                }
            }
        };

        self.finish(SyncKey::Cartridge(action_id), cause, result, started_at)
    }

    fn finish(
        &self,
        key: SyncKey,
        cause: SyncCause,
        result: SyncResult,
        started_at: i64,
    ) -> SyncOutcome {
        let outcome = SyncOutcome {
            key,
            cause,
            result,
            started_at,
            duration_millis: self.clock.now_millis().saturating_sub(started_at),
        };
        self.record(&outcome);
        outcome
    }
}

fn check_status(status: u16) -> Result<u16> {
    if (200..300).contains(&status) {
        Ok(status)
    } else {
        Err(SyncError::Rejected { status })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionRecord;
    use crate::testing::{decisions, harness, Harness};
    use std::time::Duration;

    fn append_tracked(h: &Harness, kind: QueueKind, n: usize) {
        for i in 0..n {
            let rec = ActionRecord::tracked(format!("action-{i}"), None, h.clock.as_ref()).unwrap();
            h.coordinator.queue(kind).append(rec);
        }
    }

    fn small_batches() -> SyncConfig {
        SyncConfig {
            track_batch_size: 3,
            report_batch_size: 3,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn track_sync_fires_at_batch_size_and_clears_queue() {
        let h = harness(small_batches());
        append_tracked(&h, QueueKind::Track, 2);
        assert!(h.coordinator.maybe_sync_track().is_none());

        append_tracked(&h, QueueKind::Track, 1);
        h.clock.advance(10);
        let outcome = h.coordinator.maybe_sync_track().unwrap().await.unwrap();

        assert_eq!(outcome.result, SyncResult::Sent { records: 3 });
        assert_eq!(outcome.cause, SyncCause::BatchSize);
        assert_eq!(h.remote.track_calls(), 1);
        assert_eq!(h.remote.last_batch_len(), 3);
        let queue = h.coordinator.queue(QueueKind::Track);
        assert_eq!(queue.count(), 0);
        assert_eq!(queue.meta().last_sync_timestamp, h.clock.now_millis());
        assert!(h.coordinator.maybe_sync_track().is_none());
    }

    #[tokio::test]
    async fn whole_queue_is_sent_not_just_one_batch() {
        let h = harness(small_batches());
        append_tracked(&h, QueueKind::Report, 7);
        let outcome = h.coordinator.maybe_sync_report().unwrap().await.unwrap();
        assert_eq!(outcome.result, SyncResult::Sent { records: 7 });
        assert_eq!(h.remote.last_batch_len(), 7);
    }

    #[tokio::test]
    async fn failed_send_keeps_records_and_timestamp() {
        let h = harness(small_batches());
        append_tracked(&h, QueueKind::Track, 3);
        let before = h.coordinator.queue(QueueKind::Track).meta();
        h.remote.set_failing(true);

        let outcome = h.coordinator.maybe_sync_track().unwrap().await.unwrap();
        assert!(matches!(outcome.result, SyncResult::Failed { .. }));
        let queue = h.coordinator.queue(QueueKind::Track);
        assert_eq!(queue.count(), 3);
        assert_eq!(queue.meta(), before);
        assert!(!h.coordinator.is_in_flight(&SyncKey::Track));

        // The next triggering call retries.
        h.remote.set_failing(false);
        let outcome = h.coordinator.maybe_sync_track().unwrap().await.unwrap();
        assert_eq!(outcome.result, SyncResult::Sent { records: 3 });
        assert_eq!(h.remote.track_calls(), 2);
    }

    #[tokio::test]
    async fn non_success_status_is_a_failure() {
        let h = harness(small_batches());
        append_tracked(&h, QueueKind::Report, 3);
        h.remote.set_status(503);
        let outcome = h.coordinator.maybe_sync_report().unwrap().await.unwrap();
        assert!(!outcome.succeeded());
        assert_eq!(h.coordinator.queue(QueueKind::Report).count(), 3);
    }

    #[tokio::test]
    async fn refused_batch_is_discarded_not_resent() {
        let h = harness(small_batches());
        append_tracked(&h, QueueKind::Report, 3);
        h.clock.advance(50);
        h.remote.set_status(400);

        let outcome = h.coordinator.maybe_sync_report().unwrap().await.unwrap();
        assert_eq!(outcome.result, SyncResult::Discarded { dropped: 3 });
        let queue = h.coordinator.queue(QueueKind::Report);
        assert_eq!(queue.count(), 0);
        assert_eq!(queue.meta().last_sync_timestamp, h.clock.now_millis());
        assert!(h.coordinator.maybe_sync_report().is_none());
        assert_eq!(h.remote.report_calls(), 1);
    }

    #[tokio::test]
    async fn discard_keeps_records_queued_during_flight() {
        let h = harness(small_batches());
        let gate = h.remote.install_gate();
        h.remote.set_status(400);
        append_tracked(&h, QueueKind::Track, 3);
        let handle = h.coordinator.maybe_sync_track().unwrap();
        while h.remote.track_calls() == 0 {
            tokio::task::yield_now().await;
        }
        append_tracked(&h, QueueKind::Track, 1);
        gate.notify_one();
        assert_eq!(handle.await.unwrap().result, SyncResult::Discarded { dropped: 3 });
        assert_eq!(h.coordinator.queue(QueueKind::Track).count(), 1);
    }

    #[tokio::test]
    async fn refused_action_id_flushes_cartridge() {
        let h = harness(SyncConfig::default());
        let cartridges = h.coordinator.cartridges();
        cartridges.push_decisions("retired", decisions("d", 3));
        h.remote.set_status(400);

        let outcome = h.coordinator.maybe_sync_cartridge("retired").unwrap().await.unwrap();
        assert_eq!(outcome.result, SyncResult::Discarded { dropped: 3 });
        assert!(cartridges.action_ids().is_empty());
        assert!(h.store.cartridge_ids().unwrap().is_empty());
        assert!(h.store.load_decision_pool("retired").unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_stored_state_falls_back_to_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sync.redb");
        {
            let store = crate::store::RedbStore::open(&path).unwrap();
            store.put_raw("queue_meta", "track", b"not json");
            store.put_raw("queues", "report", b"[{broken");
            store.put_raw("cartridge_meta", "a", b"{");
            store.put_raw("decision_pools", "a", b"nope");
        }
        let store = Arc::new(crate::store::RedbStore::open(&path).unwrap());
        let clock = Arc::new(crate::clock::ManualClock::new(crate::testing::START_MILLIS));
        let remote = Arc::new(crate::testing::MockService::default());
        let coordinator = SyncCoordinator::builder(store, remote.clone())
            .config(small_batches())
            .clock(clock.clone())
            .build()
            .unwrap();

        let track = coordinator.queue(QueueKind::Track).meta();
        assert_eq!(track.suggested_batch_size, 3);
        assert_eq!(track.last_sync_timestamp, crate::testing::START_MILLIS);
        assert_eq!(coordinator.queue(QueueKind::Report).count(), 0);
        let a = coordinator.cartridges().metadata("a");
        assert_eq!(a.available_count, 0);
        assert_eq!(a.capacity, 10);

        let outcome = coordinator.maybe_sync_cartridge("a").unwrap().await.unwrap();
        assert_eq!(outcome.result, SyncResult::Refilled { decisions: 10 });
        assert_eq!(coordinator.cartridges().decision_count("a"), 10);
    }

    #[tokio::test]
    async fn concurrent_report_triggers_make_one_remote_call() {
        let h = harness(small_batches());
        let gate = h.remote.install_gate();
        append_tracked(&h, QueueKind::Report, 3);

        let first = h.coordinator.maybe_sync_report().unwrap();
        while h.remote.report_calls() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(h.coordinator.is_in_flight(&SyncKey::Report));
        assert!(h.coordinator.maybe_sync_report().is_none());
        assert!(h.coordinator.maybe_sync_report().is_none());

        gate.notify_one();
        first.await.unwrap();
        assert_eq!(h.remote.report_calls(), 1);
        assert!(!h.coordinator.is_in_flight(&SyncKey::Report));
    }

    #[tokio::test]
    async fn flights_for_different_keys_are_independent() {
        let h = harness(small_batches());
        append_tracked(&h, QueueKind::Report, 3);
        append_tracked(&h, QueueKind::Track, 3);

        let report = h.coordinator.maybe_sync_report().unwrap();
        let track = h.coordinator.maybe_sync_track().unwrap();
        assert!(h.coordinator.is_in_flight(&SyncKey::Report));
        assert!(h.coordinator.is_in_flight(&SyncKey::Track));

        assert!(report.await.unwrap().succeeded());
        assert!(track.await.unwrap().succeeded());
        assert_eq!(h.remote.report_calls(), 1);
        assert_eq!(h.remote.track_calls(), 1);
    }

    #[tokio::test]
    async fn records_appended_during_flight_stay_queued() {
        let h = harness(small_batches());
        let gate = h.remote.install_gate();
        append_tracked(&h, QueueKind::Track, 3);
        let handle = h.coordinator.maybe_sync_track().unwrap();
        while h.remote.track_calls() == 0 {
            tokio::task::yield_now().await;
        }
        append_tracked(&h, QueueKind::Track, 2);
        gate.notify_one();
        handle.await.unwrap();
        assert_eq!(h.coordinator.queue(QueueKind::Track).count(), 2);
    }

    #[tokio::test]
    async fn expired_empty_queue_restarts_timer_without_remote_call() {
        let h = harness(small_batches());
        h.clock.advance(h.coordinator.config().queue_ttl_millis + 1);
        let outcome = h.coordinator.maybe_sync_track().unwrap().await.unwrap();
        assert_eq!(outcome.result, SyncResult::NothingToSend);
        assert_eq!(outcome.cause, SyncCause::TimerExpired);
        assert_eq!(h.remote.track_calls(), 0);
        assert_eq!(
            h.coordinator.queue(QueueKind::Track).meta().last_sync_timestamp,
            h.clock.now_millis()
        );
    }

    #[tokio::test]
    async fn slow_remote_times_out_without_mutation() {
        let config = SyncConfig {
            remote_timeout_millis: 20,
            ..small_batches()
        };
        let h = harness(config);
        h.remote.set_delay(Duration::from_secs(5));
        append_tracked(&h, QueueKind::Track, 3);

        let outcome = h.coordinator.maybe_sync_track().unwrap().await.unwrap();
        match outcome.result {
            SyncResult::Failed { error } => assert!(error.contains("timed out"), "{error}"),
            other => panic!("expected timeout failure, got {other:?}"),
        }
        assert_eq!(h.coordinator.queue(QueueKind::Track).count(), 3);
        assert!(!h.coordinator.is_in_flight(&SyncKey::Track));
    }

    #[tokio::test]
    async fn new_cartridge_refills_and_stamps_time() {
        let h = harness(SyncConfig::default());
        h.remote.set_refill_size(10);
        h.clock.advance(1_000);

        let outcome = h.coordinator.maybe_sync_cartridge("workout").unwrap().await.unwrap();
        assert_eq!(outcome.result, SyncResult::Refilled { decisions: 10 });
        assert_eq!(outcome.cause, SyncCause::TimerExpired);
        assert_eq!(h.remote.last_requested(), Some(("workout".to_string(), 10)));

        let meta = h.coordinator.cartridges().metadata("workout");
        assert_eq!(meta.available_count, 10);
        assert_eq!(meta.last_sync_timestamp, h.clock.now_millis());
        assert!(h.coordinator.maybe_sync_cartridge("workout").is_none());
    }

    #[tokio::test]
    async fn failed_refill_leaves_cartridge_untouched() {
        let h = harness(SyncConfig::default());
        h.remote.set_failing(true);
        let outcome = h.coordinator.maybe_sync_cartridge("a").unwrap().await.unwrap();
        assert!(!outcome.succeeded());
        let meta = h.coordinator.cartridges().metadata("a");
        assert_eq!(meta.available_count, 0);
        assert_eq!(meta.last_sync_timestamp, 0);
    }

    #[tokio::test]
    async fn refill_applies_remote_expiry() {
        let h = harness(SyncConfig::default());
        h.remote.set_refill_size(8);
        h.remote.set_refill_expiry(Some(60_000));
        h.coordinator.maybe_sync_cartridge("a").unwrap().await.unwrap();
        assert_eq!(h.coordinator.cartridges().metadata("a").ttl_millis, 60_000);
    }

    #[tokio::test]
    async fn requested_count_is_the_missing_capacity() {
        let h = harness(SyncConfig::default());
        let now = h.clock.now_millis();
        h.coordinator
            .cartridges()
            .apply_refill("a", decisions("d", 4), now, None);
        h.coordinator.maybe_sync_cartridge("a").unwrap().await.unwrap();
        assert_eq!(h.remote.last_requested(), Some(("a".to_string(), 6)));
    }

    #[tokio::test]
    async fn sync_all_covers_queues_and_known_cartridges() {
        let h = harness(small_batches());
        h.remote.set_refill_size(10);
        append_tracked(&h, QueueKind::Track, 3);
        append_tracked(&h, QueueKind::Report, 3);
        h.coordinator.cartridges().metadata("a");
        h.coordinator.cartridges().metadata("b");

        let handles = h.coordinator.maybe_sync_all();
        assert_eq!(handles.len(), 4);
        for handle in handles {
            assert!(handle.await.unwrap().succeeded());
        }
        assert_eq!(h.remote.refill_calls(), 2);
    }

    #[tokio::test]
    async fn history_keeps_newest_outcomes_within_retention() {
        let config = SyncConfig {
            history_retention: 2,
            ..small_batches()
        };
        let h = harness(config);
        for id in ["a", "b", "c"] {
            h.coordinator.maybe_sync_cartridge(id).unwrap().await.unwrap();
        }
        let history = h.coordinator.recent_syncs();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].key, SyncKey::Cartridge("c".into()));
        assert_eq!(history[1].key, SyncKey::Cartridge("b".into()));
    }

    #[tokio::test]
    async fn set_batch_size_changes_trigger() {
        let h = harness(SyncConfig::default());
        append_tracked(&h, QueueKind::Track, 2);
        assert!(h.coordinator.maybe_sync_track().is_none());
        h.coordinator.set_batch_size(QueueKind::Track, 2);
        assert!(h.coordinator.maybe_sync_track().is_some());
        h.coordinator.wait_idle().await;
    }

    #[tokio::test]
    async fn erase_drops_everything() {
        let h = harness(small_batches());
        append_tracked(&h, QueueKind::Track, 2);
        h.coordinator.cartridges().push_decisions("a", decisions("d", 3));
        h.coordinator.erase().unwrap();

        assert_eq!(h.coordinator.queue(QueueKind::Track).count(), 0);
        assert!(h.coordinator.cartridges().action_ids().is_empty());
        assert!(h.store.cartridge_ids().unwrap().is_empty());
        assert!(h.store.load_queue(QueueKind::Track).unwrap().is_empty());
    }

    #[test]
    fn build_outside_runtime_without_handle_fails() {
        let store = Arc::new(crate::store::InMemoryStore::new());
        let remote = Arc::new(crate::testing::MockService::default());
        let err = SyncCoordinator::builder(store, remote).build().err().unwrap();
        assert!(matches!(err, SyncError::NoRuntime));
    }

    #[test]
    fn sync_key_display() {
        assert_eq!(SyncKey::Track.to_string(), "track");
        assert_eq!(SyncKey::Cartridge("x".into()).to_string(), "cartridge:x");
    }
}
