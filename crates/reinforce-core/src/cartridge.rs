//! Per-action pools of pre-fetched reinforcement decisions.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::meta::Cartridge;
use crate::store::PersistentStore;

struct Entry {
    meta: Cartridge,
    pool: VecDeque<String>,
}

impl Entry {
    fn snapshot(&self) -> Cartridge {
        Cartridge {
            available_count: self.pool.len(),
            ..self.meta.clone()
        }
    }
}

/// FIFO decision pools keyed by actionID, plus their freshness metadata.
///
/// Every read and mutation of one pool happens under a single lock, so a
/// reader never sees half of a refill.
pub struct CartridgeStore {
    store: Arc<dyn PersistentStore>,
    capacity: usize,
    ttl_millis: i64,
    entries: Mutex<HashMap<String, Entry>>,
}

impl CartridgeStore {
    /// Open the store and load every cartridge already known to `store`.
    ///
    /// `capacity` and `ttl_millis` apply to cartridges created from now on.
    pub fn open(store: Arc<dyn PersistentStore>, capacity: usize, ttl_millis: i64) -> Self {
        let this = Self {
            store,
            capacity,
            ttl_millis,
            entries: Mutex::new(HashMap::new()),
        };
        let ids = this.store.cartridge_ids().unwrap_or_else(|e| {
            warn!(error = %e, "failed to list known cartridges");
            Vec::new()
        });
        {
            let mut entries = this.entries();
            for id in ids {
                let entry = this.load_entry(&id);
                entries.insert(id, entry);
            }
            debug!(cartridges = entries.len(), "cartridge store opened");
        }
        this
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load_entry(&self, action_id: &str) -> Entry {
        let meta = match self.store.load_cartridge_meta(action_id) {
            Ok(Some(mut meta)) => {
                meta.action_id = action_id.to_string();
                meta
            }
            Ok(None) => self.create_meta(action_id),
            Err(e) => {
                warn!(action_id, error = %e, "unreadable cartridge metadata, using defaults");
                self.create_meta(action_id)
            }
        };
        let pool = self.store.load_decision_pool(action_id).unwrap_or_else(|e| {
            warn!(action_id, error = %e, "unreadable decision pool, starting empty");
            Vec::new()
        });
        Entry {
            meta,
            pool: pool.into(),
        }
    }

    fn create_meta(&self, action_id: &str) -> Cartridge {
        let meta = Cartridge::new(action_id, self.capacity, self.ttl_millis);
        if let Err(e) = self.store.save_cartridge_meta(action_id, &meta) {
            warn!(action_id, error = %e, "failed to persist new cartridge metadata");
        }
        meta
    }

    fn with_entry<T>(&self, action_id: &str, f: impl FnOnce(&mut Entry) -> T) -> T {
        let mut entries = self.entries();
        let entry = entries
            .entry(action_id.to_string())
            .or_insert_with(|| self.load_entry(action_id));
        f(entry)
    }

    fn persist_pool(&self, action_id: &str, pool: &VecDeque<String>) {
        let pool: Vec<String> = pool.iter().cloned().collect();
        if let Err(e) = self.store.save_decision_pool(action_id, &pool) {
            warn!(action_id, error = %e, "failed to persist decision pool");
        }
    }

    pub fn decision_count(&self, action_id: &str) -> usize {
        self.with_entry(action_id, |entry| entry.pool.len())
    }

    /// Dequeue the oldest cached decision. Local only; sync timestamps are
    /// left alone.
    pub fn pop_decision(&self, action_id: &str) -> Option<String> {
        self.with_entry(action_id, |entry| {
            let decision = entry.pool.pop_front()?;
            self.persist_pool(action_id, &entry.pool);
            Some(decision)
        })
    }

    /// Append `decisions` to the tail of the pool.
    pub fn push_decisions(&self, action_id: &str, decisions: Vec<String>) {
        self.with_entry(action_id, |entry| {
            entry.pool.extend(decisions);
            self.persist_pool(action_id, &entry.pool);
        })
    }

    /// Metadata snapshot with `available_count` filled in. Creates and
    /// registers the cartridge on first access.
    pub fn metadata(&self, action_id: &str) -> Cartridge {
        self.with_entry(action_id, |entry| entry.snapshot())
    }

    /// Every known actionID, sorted.
    pub fn action_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Push a refill and stamp the sync time in one lock window.
    pub(crate) fn apply_refill(
        &self,
        action_id: &str,
        decisions: Vec<String>,
        now: i64,
        ttl_millis: Option<i64>,
    ) -> Cartridge {
        self.with_entry(action_id, |entry| {
            entry.pool.extend(decisions);
            entry.meta.last_sync_timestamp = now;
            if let Some(ttl) = ttl_millis {
                entry.meta.ttl_millis = ttl;
            }
            self.persist_pool(action_id, &entry.pool);
            if let Err(e) = self.store.save_cartridge_meta(action_id, &entry.meta) {
                warn!(action_id, error = %e, "failed to persist cartridge metadata");
            }
            entry.snapshot()
        })
    }

    /// Forget `action_id` entirely, in memory and in the store. Returns how
    /// many cached decisions were dropped.
    pub(crate) fn flush(&self, action_id: &str) -> usize {
        let dropped = self
            .entries()
            .remove(action_id)
            .map_or(0, |entry| entry.pool.len());
        if let Err(e) = self.store.remove_cartridge(action_id) {
            warn!(action_id, error = %e, "failed to remove flushed cartridge");
        }
        dropped
    }

    /// Forget every cartridge. The backing store is wiped separately.
    pub(crate) fn clear(&self) {
        self.entries().clear();
    }
}
