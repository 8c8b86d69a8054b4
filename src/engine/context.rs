use std::sync::Arc;

use crate::engine::config::EngineConfig;
use crate::foundation::error::TileResult;
use crate::image::factories::register_builtin_operations;
use crate::registry::operation_registry::OperationRegistry;
use crate::registry::params::ParameterBlock;
use crate::tile::cache::{MemoryTileCache, TileCacheStats};
use crate::tile::factory::{RecyclingTileFactory, TileFactoryStats};
use crate::tile::scheduler::{SchedulerStats, TileScheduler};
use crate::tile::source::TileSource;

/// Counters of every engine component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct EngineStats {
    /// Scheduler counters.
    pub scheduler: SchedulerStats,
    /// Tile cache counters.
    pub cache: TileCacheStats,
    /// Buffer pool counters.
    pub factory: TileFactoryStats,
}

/// One wired-up engine: buffer pool, tile cache, scheduler and operation registry.
///
/// Contexts are independent; nothing is shared through globals.
#[derive(Debug)]
pub struct EngineContext {
    config: EngineConfig,
    factory: Arc<RecyclingTileFactory>,
    cache: Arc<MemoryTileCache>,
    scheduler: TileScheduler,
    registry: OperationRegistry,
}

impl EngineContext {
    /// Build a context with the built-in operations registered.
    pub fn new(config: EngineConfig) -> TileResult<Self> {
        config.validate()?;
        let factory = Arc::new(RecyclingTileFactory::new(config.factory));
        let cache =
            Arc::new(MemoryTileCache::new(config.cache.clone()).with_recycler(factory.clone()));
        let scheduler = TileScheduler::with_parts(
            config.scheduler,
            cache.clone(),
            factory.clone(),
            Some(factory.clone()),
        )?;
        let registry = OperationRegistry::new();
        register_builtin_operations(&registry)?;

        tracing::debug!(
            parallelism = config.scheduler.parallelism,
            cache_bytes = config.cache.memory_capacity,
            "engine context ready"
        );
        Ok(Self {
            config,
            factory,
            cache,
            scheduler,
            registry,
        })
    }

    /// Configuration the context was built from.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Tile buffer pool.
    pub fn factory(&self) -> &Arc<RecyclingTileFactory> {
        &self.factory
    }

    /// Tile cache.
    pub fn cache(&self) -> &Arc<MemoryTileCache> {
        &self.cache
    }

    /// Scheduler.
    pub fn scheduler(&self) -> &TileScheduler {
        &self.scheduler
    }

    /// Operation registry.
    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    /// Shorthand for [`OperationRegistry::create`].
    pub fn create(&self, op: &str, params: &ParameterBlock) -> TileResult<Arc<dyn TileSource>> {
        self.registry.create(op, params)
    }

    /// Snapshot of all counters.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            scheduler: self.scheduler.stats(),
            cache: self.cache.stats(),
            factory: self.factory.stats(),
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/engine/context.rs"]
mod tests;
