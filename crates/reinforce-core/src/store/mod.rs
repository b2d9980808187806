//! Durable key/blob storage consumed by queues and cartridges.
//!
//! All calls are synchronous: implementations sit on local disk (or memory)
//! and are expected to answer at local-store latency.

mod memory;
mod redb_store;

pub use self::memory::InMemoryStore;
pub use self::redb_store::RedbStore;

use crate::action::{ActionRecord, QueueKind};
use crate::error::Result;
use crate::meta::{Cartridge, QueueSyncMeta};

pub trait PersistentStore: Send + Sync {
    fn load_queue(&self, kind: QueueKind) -> Result<Vec<ActionRecord>>;

    /// Replace the stored contents of the `kind` queue.
    fn save_queue(&self, kind: QueueKind, records: &[ActionRecord]) -> Result<()>;

    fn load_queue_meta(&self, kind: QueueKind) -> Result<Option<QueueSyncMeta>>;

    fn save_queue_meta(&self, kind: QueueKind, meta: &QueueSyncMeta) -> Result<()>;

    fn load_cartridge_meta(&self, action_id: &str) -> Result<Option<Cartridge>>;

    fn save_cartridge_meta(&self, action_id: &str, cartridge: &Cartridge) -> Result<()>;

    fn load_decision_pool(&self, action_id: &str) -> Result<Vec<String>>;

    fn save_decision_pool(&self, action_id: &str, decisions: &[String]) -> Result<()>;

    /// Forget one cartridge: its metadata and its decision pool.
    fn remove_cartridge(&self, action_id: &str) -> Result<()>;

    /// Every actionID that has cartridge metadata, sorted.
    fn cartridge_ids(&self) -> Result<Vec<String>>;

    /// Remove every queue, pool and metadata record.
    fn erase(&self) -> Result<()>;
}
