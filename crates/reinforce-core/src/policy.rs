//! Sync trigger predicates. Pure functions of metadata, counts and `now`.

use crate::meta::{Cartridge, QueueSyncMeta};

/// A cartridge at or below this many cached decisions asks for a refill.
pub const CARTRIDGE_REFILL_THRESHOLD: usize = 5;

fn queue_should_sync(meta: &QueueSyncMeta, pending_count: usize, now: i64) -> bool {
    meta.size_reached(pending_count) || meta.timer_expired(now)
}

pub fn track_should_sync(meta: &QueueSyncMeta, pending_count: usize, now: i64) -> bool {
    queue_should_sync(meta, pending_count, now)
}

pub fn report_should_sync(meta: &QueueSyncMeta, pending_count: usize, now: i64) -> bool {
    queue_should_sync(meta, pending_count, now)
}

pub fn cartridge_should_sync(cartridge: &Cartridge, now: i64) -> bool {
    cartridge.available_count <= CARTRIDGE_REFILL_THRESHOLD || cartridge.timer_expired(now)
}
