use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const HOUR_MILLIS: i64 = 3_600_000;

// ---------------------------------------------------------------------------
// ConfigWarning
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
}

// ---------------------------------------------------------------------------
// SyncConfig
// ---------------------------------------------------------------------------

/// Tunables for queues, cartridges and remote calls.
///
/// Every field has a default, so an empty YAML document is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Returned by `reinforce` when the cartridge has nothing cached.
    #[serde(default = "default_decision")]
    pub default_decision: String,
    #[serde(default = "default_batch_size")]
    pub track_batch_size: usize,
    #[serde(default = "default_batch_size")]
    pub report_batch_size: usize,
    #[serde(default = "default_ttl_millis")]
    pub queue_ttl_millis: i64,
    #[serde(default = "default_ttl_millis")]
    pub cartridge_ttl_millis: i64,
    #[serde(default = "default_cartridge_capacity")]
    pub cartridge_capacity: usize,
    #[serde(default = "default_remote_timeout_millis")]
    pub remote_timeout_millis: u64,
    /// Number of completed sync outcomes kept in memory.
    #[serde(default = "default_history_retention")]
    pub history_retention: usize,
}

fn default_decision() -> String {
    "neutralResponse".to_string()
}

fn default_batch_size() -> usize {
    15
}

fn default_ttl_millis() -> i64 {
    48 * HOUR_MILLIS
}

fn default_cartridge_capacity() -> usize {
    10
}

fn default_remote_timeout_millis() -> u64 {
    3_000
}

fn default_history_retention() -> usize {
    50
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_decision: default_decision(),
            track_batch_size: default_batch_size(),
            report_batch_size: default_batch_size(),
            queue_ttl_millis: default_ttl_millis(),
            cartridge_ttl_millis: default_ttl_millis(),
            cartridge_capacity: default_cartridge_capacity(),
            remote_timeout_millis: default_remote_timeout_millis(),
            history_retention: default_history_retention(),
        }
    }
}

impl SyncConfig {
    pub fn from_yaml_str(data: &str) -> Result<Self> {
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(data)?)
    }

    /// Load from `path`, or return defaults if the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&data)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_millis)
    }

    /// Check for values that make the sync policy degenerate.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut warn = |field: &str, message: &str| {
            warnings.push(ConfigWarning {
                field: field.to_string(),
                message: message.to_string(),
            })
        };

        if self.default_decision.is_empty() {
            warn("default_decision", "empty default decision");
        }
        if self.track_batch_size == 0 {
            warn("track_batch_size", "0 makes every track call sync");
        }
        if self.report_batch_size == 0 {
            warn("report_batch_size", "0 makes every reinforce call sync");
        }
        if self.queue_ttl_millis <= 0 {
            warn("queue_ttl_millis", "non-positive TTL keeps queues always expired");
        }
        if self.cartridge_ttl_millis <= 0 {
            warn(
                "cartridge_ttl_millis",
                "non-positive TTL keeps cartridges always expired",
            );
        }
        if self.cartridge_capacity == 0 {
            warn("cartridge_capacity", "capacity 0 never requests decisions");
        }
        if self.remote_timeout_millis == 0 {
            warn("remote_timeout_millis", "0 fails every remote call");
        }
        warnings
    }
}
