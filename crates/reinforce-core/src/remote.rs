//! The remote decision service, as seen by the coordinator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::action::ActionRecord;
use crate::error::{Result, SyncError};

/// A fresh batch of decisions for one actionID.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DecisionRefill {
    pub decisions: Vec<String>,
    /// When set, replaces the cartridge's TTL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in_millis: Option<i64>,
}

impl DecisionRefill {
    pub fn new(decisions: Vec<String>) -> Self {
        Self {
            decisions,
            expires_in_millis: None,
        }
    }
}

/// Remote endpoint for action batches and decision refills.
///
/// Batches may be delivered more than once (a crash between send and
/// acknowledgement resends them), so the service must count idempotently.
/// Any `Err` is treated as a network failure; a returned status outside
/// 200–299 is treated the same way.
#[async_trait]
pub trait DecisionService: Send + Sync {
    async fn send_track_batch(&self, actions: &[ActionRecord]) -> Result<u16>;

    async fn send_report_batch(&self, actions: &[ActionRecord]) -> Result<u16>;

    async fn request_decisions(
        &self,
        action_id: &str,
        requested_count: usize,
    ) -> Result<DecisionRefill>;
}

/// A service with no connectivity: every call fails with a network error.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineService;

#[async_trait]
impl DecisionService for OfflineService {
    async fn send_track_batch(&self, _actions: &[ActionRecord]) -> Result<u16> {
        Err(SyncError::Network("offline".into()))
    }

    async fn send_report_batch(&self, _actions: &[ActionRecord]) -> Result<u16> {
        Err(SyncError::Network("offline".into()))
    }

    async fn request_decisions(
        &self,
        _action_id: &str,
        _requested_count: usize,
    ) -> Result<DecisionRefill> {
        Err(SyncError::Network("offline".into()))
    }
}
