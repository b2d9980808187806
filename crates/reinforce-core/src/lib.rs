//! `reinforce-core`: offline-first synchronization for behavioral actions and
//! pre-fetched reinforcement decisions.
//!
//! # Architecture
//!
//! ```text
//! Client::track / Client::reinforce      ← never blocks, never errors
//!     │
//!     ├── DurableQueue (Track | Report)  ← append-only, persisted on every write
//!     ├── CartridgeStore                 ← per-actionID FIFO of decisions
//!     ▼
//! SyncCoordinator                        ← SyncPolicy check + single-flight per key
//!     │                                     tokio background task
//!     ▼
//! DecisionService                        ← remote round trip (abstract)
//! ```
//!
//! Persistence goes through the [`PersistentStore`] trait; [`RedbStore`] is the
//! on-disk implementation and [`InMemoryStore`] serves tests and ephemeral
//! hosts.

pub mod action;
pub mod cartridge;
pub mod client;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod io;
pub mod meta;
pub mod policy;
pub mod queue;
pub mod remote;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use action::{ActionRecord, MetaData, QueueKind};
pub use client::Client;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SyncConfig;
pub use coordinator::{
    SyncCause, SyncCoordinator, SyncCoordinatorBuilder, SyncKey, SyncOutcome, SyncResult,
};
pub use error::{Result, SyncError};
pub use meta::{Cartridge, QueueSyncMeta};
pub use remote::{DecisionRefill, DecisionService, OfflineService};
pub use store::{InMemoryStore, PersistentStore, RedbStore};
