//! On-disk store using redb.
//!
//! # Table design
//!
//! ```text
//! queues          "track" | "report"  → JSON {version, records: [ActionRecord]}
//! queue_meta      "track" | "report"  → JSON QueueSyncMeta
//! cartridge_meta  actionID            → JSON Cartridge
//! decision_pools  actionID            → JSON array of decision strings
//! ```
//!
//! Each `save_*` is its own write transaction, so a crash leaves either the
//! previous or the new value for a key, never a mix.

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition, TableHandle};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::action::{validate_action_id, ActionRecord, QueueKind};
use crate::error::{Result, SyncError};
use crate::meta::{Cartridge, QueueSyncMeta, SCHEMA_VERSION};

use super::PersistentStore;

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

/// Key: queue kind or actionID. Value: JSON bytes.
type Table = TableDefinition<'static, &'static str, &'static [u8]>;

const QUEUES: Table = TableDefinition::new("queues");
const QUEUE_META: Table = TableDefinition::new("queue_meta");
const CARTRIDGE_META: Table = TableDefinition::new("cartridge_meta");
const DECISION_POOLS: Table = TableDefinition::new("decision_pools");

const ALL_TABLES: [Table; 4] = [QUEUES, QUEUE_META, CARTRIDGE_META, DECISION_POOLS];

fn db_err(e: impl std::fmt::Display) -> SyncError {
    SyncError::Persistence(e.to_string())
}

// ---------------------------------------------------------------------------
// Queue document
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct QueueDocument<'a> {
    version: u32,
    records: &'a [ActionRecord],
}

/// Stored queue as read back: the versioned document, or the bare array
/// written before the envelope existed. Records stay raw JSON until each is
/// decoded on its own.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredQueue {
    Document {
        #[serde(default)]
        version: u32,
        records: Vec<Value>,
    },
    Bare(Vec<Value>),
}

/// Decode every readable record, logging and skipping the rest.
fn decode_queue(kind: QueueKind, raw: &[u8]) -> Result<Vec<ActionRecord>> {
    let stored: StoredQueue = serde_json::from_slice(raw)
        .map_err(|e| SyncError::Persistence(format!("corrupt queue '{kind}': {e}")))?;
    let values = match stored {
        StoredQueue::Document { version, records } => {
            if version > SCHEMA_VERSION {
                warn!(queue = %kind, version, "queue written by a newer schema");
            }
            records
        }
        StoredQueue::Bare(records) => records,
    };

    let mut records = Vec::with_capacity(values.len());
    for (index, value) in values.into_iter().enumerate() {
        let decoded = serde_json::from_value::<ActionRecord>(value)
            .map_err(SyncError::from)
            .and_then(|r| validate_action_id(r.action_id()).map(|()| r));
        match decoded {
            Ok(record) => records.push(record),
            Err(e) => warn!(queue = %kind, index, error = %e, "skipping unreadable queued record"),
        }
    }
    Ok(records)
}

// ---------------------------------------------------------------------------
// RedbStore
// ---------------------------------------------------------------------------

pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open or create the database at `path`, creating all tables.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;
        let wt = db.begin_write().map_err(db_err)?;
        for table in ALL_TABLES {
            wt.open_table(table).map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }

    fn get_raw(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(table).map_err(db_err)?;
        let raw = table.get(key).map_err(db_err)?;
        Ok(raw.map(|raw| raw.value().to_vec()))
    }

    fn get<T: DeserializeOwned>(&self, table: Table, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.get_raw(table, key)? else {
            return Ok(None);
        };
        let value = serde_json::from_slice(&raw)
            .map_err(|e| SyncError::Persistence(format!("corrupt record '{key}': {e}")))?;
        Ok(Some(value))
    }

    fn put<T: Serialize + ?Sized>(&self, table: Table, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(table).map_err(db_err)?;
            table.insert(key, bytes.as_slice()).map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    /// Write `raw` bytes under `key` in the table named `table`.
    #[cfg(test)]
    pub(crate) fn put_raw(&self, table: &str, key: &str, raw: &[u8]) {
        let table = ALL_TABLES
            .into_iter()
            .find(|t| t.name() == table)
            .unwrap();
        let wt = self.db.begin_write().unwrap();
        {
            let mut table = wt.open_table(table).unwrap();
            table.insert(key, raw).unwrap();
        }
        wt.commit().unwrap();
    }
}

impl PersistentStore for RedbStore {
    fn load_queue(&self, kind: QueueKind) -> Result<Vec<ActionRecord>> {
        match self.get_raw(QUEUES, kind.as_str())? {
            Some(raw) => decode_queue(kind, &raw),
            None => Ok(Vec::new()),
        }
    }

    fn save_queue(&self, kind: QueueKind, records: &[ActionRecord]) -> Result<()> {
        let doc = QueueDocument {
            version: SCHEMA_VERSION,
            records,
        };
        self.put(QUEUES, kind.as_str(), &doc)
    }

    fn load_queue_meta(&self, kind: QueueKind) -> Result<Option<QueueSyncMeta>> {
        self.get(QUEUE_META, kind.as_str())
    }

    fn save_queue_meta(&self, kind: QueueKind, meta: &QueueSyncMeta) -> Result<()> {
        self.put(QUEUE_META, kind.as_str(), meta)
    }

    fn load_cartridge_meta(&self, action_id: &str) -> Result<Option<Cartridge>> {
        self.get(CARTRIDGE_META, action_id)
    }

    fn save_cartridge_meta(&self, action_id: &str, cartridge: &Cartridge) -> Result<()> {
        self.put(CARTRIDGE_META, action_id, cartridge)
    }

    fn load_decision_pool(&self, action_id: &str) -> Result<Vec<String>> {
        Ok(self.get(DECISION_POOLS, action_id)?.unwrap_or_default())
    }

    fn save_decision_pool(&self, action_id: &str, decisions: &[String]) -> Result<()> {
        self.put(DECISION_POOLS, action_id, decisions)
    }

    fn remove_cartridge(&self, action_id: &str) -> Result<()> {
        let wt = self.db.begin_write().map_err(db_err)?;
        for table in [CARTRIDGE_META, DECISION_POOLS] {
            let mut table = wt.open_table(table).map_err(db_err)?;
            table.remove(action_id).map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    fn cartridge_ids(&self) -> Result<Vec<String>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(CARTRIDGE_META).map_err(db_err)?;
        let mut ids = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (k, _) = entry.map_err(db_err)?;
            ids.push(k.value().to_string());
        }
        // Key order is byte order, which for UTF-8 matches str ordering.
        Ok(ids)
    }

    fn erase(&self) -> Result<()> {
        let wt = self.db.begin_write().map_err(db_err)?;
        for table in ALL_TABLES {
            wt.delete_table(table).map_err(db_err)?;
            wt.open_table(table).map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
