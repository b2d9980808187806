//! Caller-facing entry points: `track` and `reinforce`.
//!
//! Neither call blocks on the network or returns an error. Invalid input is
//! logged and dropped; persistence problems are absorbed by the queues.

use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::action::{validate_action_id, ActionRecord, MetaData, QueueKind};
use crate::coordinator::SyncCoordinator;

#[derive(Clone)]
pub struct Client {
    coordinator: SyncCoordinator,
}

impl Client {
    pub fn new(coordinator: SyncCoordinator) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }

    /// Record that `action_id` happened. Queues the action and, if the Track
    /// queue is due, starts a background sync.
    pub fn track(&self, action_id: &str, meta_data: Option<MetaData>) {
        match ActionRecord::tracked(action_id, meta_data, self.coordinator.clock()) {
            Ok(record) => {
                self.coordinator.queue(QueueKind::Track).append(record);
                self.coordinator.maybe_sync_track();
            }
            Err(e) => warn!(error = %e, "track call dropped"),
        }
    }

    /// Return the next reinforcement decision for `action_id`.
    ///
    /// Serves the oldest cached decision, or the configured default when the
    /// cartridge is empty. The decision is queued for reporting and the
    /// Report queue and the cartridge are checked for a background sync.
    pub fn reinforce(&self, action_id: &str, meta_data: Option<MetaData>) -> String {
        let Some(decision) = self.resolve(action_id) else {
            return self.coordinator.config().default_decision.clone();
        };
        self.report(action_id, meta_data, &decision);
        decision
    }

    /// Like [`Client::reinforce`], but hands the decision to `deliver` on
    /// `handle` instead of returning it. `deliver` runs after the local
    /// cache read; the report and the sync checks do not wait for it.
    pub fn reinforce_on<F>(
        &self,
        handle: &Handle,
        action_id: &str,
        meta_data: Option<MetaData>,
        deliver: F,
    ) where
        F: FnOnce(String) + Send + 'static,
    {
        let decision = self.resolve(action_id);
        let delivered = decision
            .clone()
            .unwrap_or_else(|| self.coordinator.config().default_decision.clone());
        handle.spawn(async move { deliver(delivered) });
        if let Some(decision) = decision {
            self.report(action_id, meta_data, &decision);
        }
    }

    /// `None` for an invalid actionID.
    fn resolve(&self, action_id: &str) -> Option<String> {
        if let Err(e) = validate_action_id(action_id) {
            warn!(error = %e, "reinforce call not reported");
            return None;
        }
        let decision = match self.coordinator.cartridges().pop_decision(action_id) {
            Some(decision) => decision,
            None => {
                debug!(action_id, "cartridge empty, using default decision");
                self.coordinator.config().default_decision.clone()
            }
        };
        Some(decision)
    }

    fn report(&self, action_id: &str, meta_data: Option<MetaData>, decision: &str) {
        match ActionRecord::reported(action_id, meta_data, decision, self.coordinator.clock()) {
            Ok(record) => self.coordinator.queue(QueueKind::Report).append(record),
            Err(e) => warn!(error = %e, "report record dropped"),
        }
        self.coordinator.maybe_sync_report();
        self.coordinator.maybe_sync_cartridge(action_id);
    }
}
