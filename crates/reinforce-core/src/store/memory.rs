use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::action::{ActionRecord, QueueKind};
use crate::error::{Result, SyncError};
use crate::meta::{Cartridge, QueueSyncMeta};

use super::PersistentStore;

#[derive(Default)]
struct Tables {
    queues: HashMap<QueueKind, Vec<ActionRecord>>,
    queue_meta: HashMap<QueueKind, QueueSyncMeta>,
    cartridge_meta: BTreeMap<String, Cartridge>,
    decision_pools: HashMap<String, Vec<String>>,
}

/// Process-local store. Loses everything on exit.
///
/// `fail_writes(true)` makes every `save_*` return a persistence error, which
/// is how tests drive the write-failure paths.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    fail_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn tables(&self) -> Result<std::sync::MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| SyncError::Persistence("in-memory store lock poisoned".into()))
    }

    fn writable(&self) -> Result<std::sync::MutexGuard<'_, Tables>> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SyncError::Persistence("writes disabled".into()));
        }
        self.tables()
    }
}

impl PersistentStore for InMemoryStore {
    fn load_queue(&self, kind: QueueKind) -> Result<Vec<ActionRecord>> {
        Ok(self.tables()?.queues.get(&kind).cloned().unwrap_or_default())
    }

    fn save_queue(&self, kind: QueueKind, records: &[ActionRecord]) -> Result<()> {
        self.writable()?.queues.insert(kind, records.to_vec());
        Ok(())
    }

    fn load_queue_meta(&self, kind: QueueKind) -> Result<Option<QueueSyncMeta>> {
        Ok(self.tables()?.queue_meta.get(&kind).cloned())
    }

    fn save_queue_meta(&self, kind: QueueKind, meta: &QueueSyncMeta) -> Result<()> {
        self.writable()?.queue_meta.insert(kind, meta.clone());
        Ok(())
    }

    fn load_cartridge_meta(&self, action_id: &str) -> Result<Option<Cartridge>> {
        Ok(self.tables()?.cartridge_meta.get(action_id).cloned())
    }

    fn save_cartridge_meta(&self, action_id: &str, cartridge: &Cartridge) -> Result<()> {
        self.writable()?
            .cartridge_meta
            .insert(action_id.to_string(), cartridge.clone());
        Ok(())
    }

    fn load_decision_pool(&self, action_id: &str) -> Result<Vec<String>> {
        Ok(self
            .tables()?
            .decision_pools
            .get(action_id)
            .cloned()
            .unwrap_or_default())
    }

    fn save_decision_pool(&self, action_id: &str, decisions: &[String]) -> Result<()> {
        self.writable()?
            .decision_pools
            .insert(action_id.to_string(), decisions.to_vec());
        Ok(())
    }

    fn remove_cartridge(&self, action_id: &str) -> Result<()> {
        let mut tables = self.writable()?;
        tables.cartridge_meta.remove(action_id);
        tables.decision_pools.remove(action_id);
        Ok(())
    }

    fn cartridge_ids(&self) -> Result<Vec<String>> {
        Ok(self.tables()?.cartridge_meta.keys().cloned().collect())
    }

    fn erase(&self) -> Result<()> {
        *self.writable()? = Tables::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn queue_roundtrip_preserves_order() {
        let store = InMemoryStore::new();
        let clock = ManualClock::new(1);
        let a = ActionRecord::tracked("a", None, &clock).unwrap();
        let b = ActionRecord::tracked("b", None, &clock).unwrap();
        store.save_queue(QueueKind::Track, &[a.clone(), b.clone()]).unwrap();
        assert_eq!(store.load_queue(QueueKind::Track).unwrap(), vec![a, b]);
        assert!(store.load_queue(QueueKind::Report).unwrap().is_empty());
    }

    #[test]
    fn failing_writes_leave_previous_state() {
        let store = InMemoryStore::new();
        store.save_decision_pool("a", &["x".to_string()]).unwrap();
        store.fail_writes(true);
        assert!(store.save_decision_pool("a", &[]).is_err());
        assert_eq!(store.load_decision_pool("a").unwrap(), vec!["x".to_string()]);
    }

    #[test]
    fn cartridge_ids_are_sorted_and_erase_clears() {
        let store = InMemoryStore::new();
        for id in ["b", "a"] {
            store
                .save_cartridge_meta(id, &Cartridge::new(id, 10, 1))
                .unwrap();
        }
        assert_eq!(store.cartridge_ids().unwrap(), vec!["a", "b"]);
        store.erase().unwrap();
        assert!(store.cartridge_ids().unwrap().is_empty());
    }

    #[test]
    fn remove_cartridge_respects_write_switch() {
        let store = InMemoryStore::new();
        store.save_decision_pool("a", &["x".to_string()]).unwrap();
        store.fail_writes(true);
        assert!(store.remove_cartridge("a").is_err());
        store.fail_writes(false);
        store.remove_cartridge("a").unwrap();
        assert!(store.load_decision_pool("a").unwrap().is_empty());
    }
}
