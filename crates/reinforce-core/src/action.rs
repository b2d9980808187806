//! Action records: the immutable unit queued for Track and Report syncs.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{Result, SyncError};

/// App-supplied details for an action, insertion-ordered.
pub type MetaData = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// QueueKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    /// Fire-and-forget events with no decision attached.
    Track,
    /// Actions whose reinforcement decision was already handed to the caller.
    Report,
}

impl QueueKind {
    pub fn all() -> [QueueKind; 2] {
        [QueueKind::Track, QueueKind::Report]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Track => "track",
            Self::Report => "report",
        }
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueueKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "track" => Ok(Self::Track),
            "report" => Ok(Self::Report),
            other => Err(format!("unknown queue kind '{other}' (expected track or report)")),
        }
    }
}

// ---------------------------------------------------------------------------
// ActionRecord
// ---------------------------------------------------------------------------

/// One tracked or reported event.
///
/// Fields are private so a record cannot change after creation; `id` is
/// local-only and lets a queue remove exactly the records it sent. Every
/// field decodes with a default, so records written by older builds still
/// load; a record without an actionID is rejected by [`validate_action_id`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    #[serde(default = "Uuid::new_v4")]
    id: Uuid,
    #[serde(rename = "actionID", default)]
    action_id: String,
    #[serde(rename = "metaData", default, skip_serializing_if = "Option::is_none")]
    meta_data: Option<MetaData>,
    #[serde(rename = "utc", default)]
    utc_millis: i64,
    #[serde(rename = "timezoneOffset", default)]
    timezone_offset_millis: i64,
    #[serde(
        rename = "reinforcementDecision",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    reinforcement_decision: Option<String>,
}

impl ActionRecord {
    /// A tracked action, timestamped from `clock`.
    pub fn tracked(
        action_id: impl Into<String>,
        meta_data: Option<MetaData>,
        clock: &dyn Clock,
    ) -> Result<Self> {
        Self::build(action_id.into(), meta_data, None, clock)
    }

    /// A reported action carrying the decision that was returned to the caller.
    pub fn reported(
        action_id: impl Into<String>,
        meta_data: Option<MetaData>,
        decision: impl Into<String>,
        clock: &dyn Clock,
    ) -> Result<Self> {
        Self::build(action_id.into(), meta_data, Some(decision.into()), clock)
    }

    fn build(
        action_id: String,
        meta_data: Option<MetaData>,
        reinforcement_decision: Option<String>,
        clock: &dyn Clock,
    ) -> Result<Self> {
        validate_action_id(&action_id)?;
        Ok(Self {
            id: Uuid::new_v4(),
            action_id,
            meta_data,
            utc_millis: clock.now_millis(),
            timezone_offset_millis: clock.timezone_offset_millis(),
            reinforcement_decision,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn action_id(&self) -> &str {
        &self.action_id
    }

    pub fn meta_data(&self) -> Option<&MetaData> {
        self.meta_data.as_ref()
    }

    pub fn utc_millis(&self) -> i64 {
        self.utc_millis
    }

    pub fn timezone_offset_millis(&self) -> i64 {
        self.timezone_offset_millis
    }

    pub fn reinforcement_decision(&self) -> Option<&str> {
        self.reinforcement_decision.as_deref()
    }
}

pub fn validate_action_id(action_id: &str) -> Result<()> {
    if action_id.trim().is_empty() {
        return Err(SyncError::InvalidActionId(action_id.to_string()));
    }
    Ok(())
}
