//! Runtime cache configuration

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::attr_cache::MAX_CACHE_ENTRIES;

/// Errors loading a [`CacheConfig`]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Malformed JSON or wrong field types
    #[error("invalid cache config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Tunables for the cache runtime.
///
/// Capacities are clamped to `1..=MAX_CACHE_ENTRIES`; the entry arrays are
/// fixed-size so a larger request cannot be honoured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries per instance attribute site
    pub attr_entries: usize,
    /// Entries per instance method site
    pub method_entries: usize,
    /// Attach the runtime's shared [`CacheStats`](crate::CacheStats) to
    /// sites created without an explicit reporter
    pub collect_stats: bool,
    /// Worker threads used by [`prefill_parallel`](crate::prefill_parallel)
    pub warmup_workers: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            attr_entries: MAX_CACHE_ENTRIES,
            method_entries: MAX_CACHE_ENTRIES,
            collect_stats: false,
            warmup_workers: 2,
        }
    }
}

impl CacheConfig {
    /// Parse from JSON; absent fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> String {
        // Plain struct of scalars; serialization cannot fail.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Effective attribute site capacity
    pub fn attr_capacity(&self) -> usize {
        self.attr_entries.clamp(1, MAX_CACHE_ENTRIES)
    }

    /// Effective method site capacity
    pub fn method_capacity(&self) -> usize {
        self.method_entries.clamp(1, MAX_CACHE_ENTRIES)
    }

    /// Effective warmup worker count
    pub fn workers(&self) -> usize {
        self.warmup_workers.max(1)
    }
}
