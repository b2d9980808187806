//! Sync metadata for queues and cartridges.
//!
//! Both types persist as JSON with an explicit `version`. Every field carries
//! `#[serde(default)]` and unknown fields are ignored, so records written by
//! older or newer builds still decode.

use serde::{Deserialize, Serialize};

/// Current on-disk schema version for metadata records.
pub const SCHEMA_VERSION: u32 = 1;

const DEFAULT_TTL_MILLIS: i64 = 48 * 3_600_000;

fn default_version() -> u32 {
    SCHEMA_VERSION
}

fn default_batch_size() -> usize {
    15
}

fn default_ttl_millis() -> i64 {
    DEFAULT_TTL_MILLIS
}

fn default_capacity() -> usize {
    10
}

/// `last_sync + ttl`, saturating so a huge TTL never wraps into the past.
fn expiry(last_sync_timestamp: i64, ttl_millis: i64) -> i64 {
    last_sync_timestamp.saturating_add(ttl_millis)
}

// ---------------------------------------------------------------------------
// QueueSyncMeta
// ---------------------------------------------------------------------------

/// Trigger state for one queue kind (Track or Report).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSyncMeta {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_batch_size")]
    pub suggested_batch_size: usize,
    /// Epoch millis of the last successful sync; 0 = never synced.
    #[serde(default)]
    pub last_sync_timestamp: i64,
    #[serde(default = "default_ttl_millis")]
    pub ttl_millis: i64,
}

impl Default for QueueSyncMeta {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION,
            suggested_batch_size: default_batch_size(),
            last_sync_timestamp: 0,
            ttl_millis: default_ttl_millis(),
        }
    }
}

impl QueueSyncMeta {
    pub fn new(suggested_batch_size: usize, ttl_millis: i64, last_sync_timestamp: i64) -> Self {
        Self {
            version: SCHEMA_VERSION,
            suggested_batch_size,
            last_sync_timestamp,
            ttl_millis,
        }
    }

    pub fn expires_at(&self) -> i64 {
        expiry(self.last_sync_timestamp, self.ttl_millis)
    }

    /// Strictly past the TTL: `last_sync + ttl < now`.
    pub fn timer_expired(&self, now: i64) -> bool {
        self.expires_at() < now
    }

    pub fn size_reached(&self, pending_count: usize) -> bool {
        pending_count >= self.suggested_batch_size
    }
}

// ---------------------------------------------------------------------------
// Cartridge
// ---------------------------------------------------------------------------

/// Pool metadata for one reinforceable action.
///
/// `available_count` is derived from the decision pool and never persisted;
/// [`crate::cartridge::CartridgeStore::metadata`] fills it in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cartridge {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(rename = "actionID", default)]
    pub action_id: String,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Epoch millis of the last successful refill; 0 forces a first refill.
    #[serde(default)]
    pub last_sync_timestamp: i64,
    #[serde(default = "default_ttl_millis")]
    pub ttl_millis: i64,
    #[serde(skip)]
    pub available_count: usize,
}

impl Cartridge {
    pub fn new(action_id: impl Into<String>, capacity: usize, ttl_millis: i64) -> Self {
        Self {
            version: SCHEMA_VERSION,
            action_id: action_id.into(),
            capacity,
            last_sync_timestamp: 0,
            ttl_millis,
            available_count: 0,
        }
    }

    pub fn expires_at(&self) -> i64 {
        expiry(self.last_sync_timestamp, self.ttl_millis)
    }

    pub fn timer_expired(&self, now: i64) -> bool {
        self.expires_at() < now
    }

    /// Nothing left to hand out, or the TTL has lapsed.
    pub fn is_expired(&self, now: i64) -> bool {
        self.available_count == 0 || self.timer_expired(now)
    }

    /// More than one decision left and still within the TTL.
    pub fn is_fresh(&self, now: i64) -> bool {
        self.available_count > 1 && !self.timer_expired(now)
    }
}
