//! Append-only action queues backed by a [`PersistentStore`].
//!
//! The in-memory copy is authoritative for the running process. Every
//! mutation rewrites the stored queue; if that write fails the record stays
//! queued in memory and the next successful write persists it.
//!
//! A stored queue that cannot be read at all is never overwritten: the queue
//! runs in memory only until the store is erased.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::action::{ActionRecord, QueueKind};
use crate::meta::QueueSyncMeta;
use crate::store::PersistentStore;

struct QueueState {
    records: Vec<ActionRecord>,
    meta: QueueSyncMeta,
    /// `meta` exists only in memory so far.
    meta_pending: bool,
    /// The stored queue failed to load; writing would destroy it.
    store_unreadable: bool,
}

pub struct DurableQueue {
    kind: QueueKind,
    store: Arc<dyn PersistentStore>,
    state: Mutex<QueueState>,
}

impl DurableQueue {
    /// Load the `kind` queue and its metadata from `store`.
    ///
    /// Missing metadata starts the TTL timer at `now` with `initial`'s batch
    /// size and TTL; it is written on the first mutation, not here. Unreadable
    /// metadata falls back to the same defaults and is logged.
    pub fn open(
        kind: QueueKind,
        store: Arc<dyn PersistentStore>,
        initial: QueueSyncMeta,
        now: i64,
    ) -> Self {
        let (records, store_unreadable) = match store.load_queue(kind) {
            Ok(records) => (records, false),
            Err(e) => {
                warn!(
                    queue = %kind,
                    error = %e,
                    "failed to load queue, keeping new records in memory only"
                );
                (Vec::new(), true)
            }
        };

        let fresh = QueueSyncMeta {
            last_sync_timestamp: now,
            ..initial
        };
        let (meta, meta_pending) = match store.load_queue_meta(kind) {
            Ok(Some(meta)) => (meta, false),
            Ok(None) => (fresh, true),
            Err(e) => {
                warn!(queue = %kind, error = %e, "unreadable queue metadata, using defaults");
                (fresh, true)
            }
        };

        debug!(queue = %kind, pending = records.len(), "queue opened");
        Self {
            kind,
            store,
            state: Mutex::new(QueueState {
                records,
                meta,
                meta_pending,
                store_unreadable,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    fn persist_records(&self, state: &mut QueueState) {
        if state.store_unreadable {
            debug!(queue = %self.kind, "stored queue unreadable, not overwriting");
            return;
        }
        if let Err(e) = self.store.save_queue(self.kind, &state.records) {
            warn!(
                queue = %self.kind,
                pending = state.records.len(),
                error = %e,
                "failed to persist queue, records retained in memory only"
            );
        }
    }

    fn persist_meta(&self, state: &mut QueueState) {
        match self.store.save_queue_meta(self.kind, &state.meta) {
            Ok(()) => state.meta_pending = false,
            Err(e) => warn!(queue = %self.kind, error = %e, "failed to persist queue metadata"),
        }
    }

    /// Queue `record`. Never fails: a persistence error is logged and the
    /// record is kept in memory.
    pub fn append(&self, record: ActionRecord) {
        let mut state = self.state();
        state.records.push(record);
        self.persist_records(&mut state);
        if state.meta_pending {
            self.persist_meta(&mut state);
        }
    }

    pub fn count(&self) -> usize {
        self.state().records.len()
    }

    /// Up to `n` records, oldest first.
    pub fn peek_batch(&self, n: usize) -> Vec<ActionRecord> {
        self.state().records.iter().take(n).cloned().collect()
    }

    /// Every queued record, oldest first.
    pub fn snapshot(&self) -> Vec<ActionRecord> {
        self.state().records.clone()
    }

    /// Remove exactly `records` (matched by id). Records already gone are
    /// ignored. Returns how many were removed.
    pub fn remove_batch(&self, records: &[ActionRecord]) -> usize {
        let ids: HashSet<Uuid> = records.iter().map(ActionRecord::id).collect();
        let mut state = self.state();
        let before = state.records.len();
        state.records.retain(|r| !ids.contains(&r.id()));
        let removed = before - state.records.len();
        if removed > 0 {
            self.persist_records(&mut state);
        }
        removed
    }

    pub fn meta(&self) -> QueueSyncMeta {
        self.state().meta.clone()
    }

    /// Metadata and pending count read under one lock.
    pub fn meta_and_count(&self) -> (QueueSyncMeta, usize) {
        let state = self.state();
        (state.meta.clone(), state.records.len())
    }

    pub(crate) fn mark_synced(&self, now: i64) {
        self.update_meta(|meta| meta.last_sync_timestamp = now);
    }

    pub(crate) fn set_batch_size(&self, size: usize) {
        self.update_meta(|meta| meta.suggested_batch_size = size);
    }

    fn update_meta(&self, f: impl FnOnce(&mut QueueSyncMeta)) {
        let mut state = self.state();
        f(&mut state.meta);
        self.persist_meta(&mut state);
    }

    /// Drop all records and restart the timer at `now`. Used by erase, after
    /// the store itself has been wiped.
    pub(crate) fn reset(&self, initial: QueueSyncMeta, now: i64) {
        let mut state = self.state();
        state.records.clear();
        state.store_unreadable = false;
        state.meta = QueueSyncMeta {
            last_sync_timestamp: now,
            ..initial
        };
        self.persist_meta(&mut state);
    }
}
