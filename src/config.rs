use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::buffer::EvictionPolicy;
use crate::error::DbResult;

/// Runtime settings for one storage engine instance.
///
/// Every field has a default, so a partial JSON document is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Maximum number of resident pages
    pub cache_capacity: usize,
    /// How long a lock request may wait before the transaction is aborted
    pub lock_timeout_ms: u64,
    pub eviction: EvictionPolicy,
    /// Attempts made by `run_in_transaction` before giving up
    pub max_attempts: usize,
    pub btree: BTreeConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 500,
            lock_timeout_ms: 300,
            eviction: EvictionPolicy::default(),
            max_attempts: 3,
            btree: BTreeConfig::default(),
        }
    }
}

impl StorageConfig {
    pub fn from_json_str(json: &str) -> DbResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load settings from a JSON file
    pub fn load(path: &Path) -> DbResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

/// B-tree page geometry. `None` means the largest capacity that fits a page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BTreeConfig {
    pub leaf_capacity: Option<usize>,
    pub internal_capacity: Option<usize>,
}
