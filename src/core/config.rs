//! History engine configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Result;
use crate::snapshot::store::SPARSE_FILL_THRESHOLD;
use crate::snapshot::CaptureOptions;

/// Tunables for the history manager and snapshot engine.
///
/// Every field has a default, so a config file only needs to list overrides.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Simple-pool depth per actor; the oldest entry is evicted past this
    pub max_simple_per_actor: usize,
    /// Complex-pool capacity shared by all actors
    pub max_complex_entries: usize,
    /// Fill fraction below which captures use the sparse store
    pub sparse_fill_threshold: f32,
    /// Extra voxels around a capture box searched for entities
    pub entity_search_margin: u32,
    /// Time slice handed to the in-flight task on each tick (milliseconds)
    pub tick_budget_ms: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_simple_per_actor: 10,
            max_complex_entries: 5,
            sparse_fill_threshold: SPARSE_FILL_THRESHOLD,
            entity_search_margin: 1,
            tick_budget_ms: 10,
        }
    }
}

impl HistoryConfig {
    /// Load a config from a JSON file and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let config: HistoryConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the manager cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.max_simple_per_actor == 0 {
            return Err(Error::Config("max_simple_per_actor must be at least 1".into()));
        }
        if self.max_complex_entries == 0 {
            return Err(Error::Config("max_complex_entries must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.sparse_fill_threshold) {
            return Err(Error::Config(format!(
                "sparse_fill_threshold {} outside [0, 1]",
                self.sparse_fill_threshold
            )));
        }
        Ok(())
    }

    /// Tick budget as a `Duration`.
    pub fn tick_budget(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_budget_ms)
    }

    /// Capture settings derived from this config.
    pub fn capture_options(&self) -> CaptureOptions {
        CaptureOptions {
            sparse_fill_threshold: self.sparse_fill_threshold,
            entity_search_margin: self.entity_search_margin,
        }
    }
}
