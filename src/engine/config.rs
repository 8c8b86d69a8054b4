use std::path::Path;

use crate::foundation::error::{TileError, TileResult};
use crate::tile::cache::TileCacheOpts;
use crate::tile::factory::TileFactoryOpts;
use crate::tile::scheduler::SchedulerOpts;

/// Settings for an [`crate::EngineContext`], loadable from JSON.
///
/// Every section and field is optional; missing values take their defaults:
///
/// ```json
/// {
///   "scheduler": { "parallelism": 4, "prefetch_parallelism": 1, "track_status": true },
///   "cache": { "memory_capacity": 67108864, "memory_threshold": 0.75, "spill_dir": "/tmp" },
///   "factory": { "max_pool_bytes": 33554432, "max_buffers_per_bucket": 16 }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Worker pools and request defaults.
    pub scheduler: SchedulerOpts,
    /// Tile cache budget.
    pub cache: TileCacheOpts,
    /// Tile buffer pool bounds.
    pub factory: TileFactoryOpts,
}

impl EngineConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(s: &str) -> TileResult<Self> {
        let config: Self = serde_json::from_str(s)
            .map_err(|e| TileError::config(format!("invalid engine config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> TileResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            TileError::config(format!("failed to read '{}': {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    /// Pretty-printed JSON.
    pub fn to_json_pretty(&self) -> TileResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| TileError::config(format!("failed to encode engine config: {e}")))
    }

    /// Check every section.
    pub fn validate(&self) -> TileResult<()> {
        self.scheduler.validate()?;
        self.cache.validate()?;
        if self.factory.max_pool_bytes > 0 && self.factory.max_buffers_per_bucket == 0 {
            return Err(TileError::config(
                "factory max_buffers_per_bucket must be > 0 when max_pool_bytes is set",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/engine/config.rs"]
mod tests;
