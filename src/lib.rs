//! tilecore is the scheduling, caching and ordering core of a deferred, tiled image pipeline.
//!
//! Images are [`TileSource`]s: they describe their tile grid and fill one tile on demand. The
//! engine around them is built from a few independent parts:
//!
//! - [`TileScheduler`] computes tiles on a worker pool and reports each tile's outcome to the
//!   [`TileComputationListener`]s of a [`TileRequest`]
//! - [`MemoryTileCache`] keeps computed tiles within a memory budget
//! - [`RecyclingTileFactory`] hands out tile buffers and takes them back for reuse
//! - [`OperationRegistry`] picks among competing factories for an operation, ordered by
//!   preferences held in [`OperationGraph`]s
//!
//! [`EngineContext`] wires one of each together from an [`EngineConfig`].
#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod foundation;

pub(crate) mod engine;
pub(crate) mod graph;
pub(crate) mod image;
pub(crate) mod registry;
pub(crate) mod tile;

pub use crate::foundation::core::{
    ImageId, ImageLayout, RasterLayout, SampleType, TileCost, TileIndex, TileKey, TileOrigin,
};
pub use crate::foundation::error::{TileError, TileResult};
pub use crate::foundation::fingerprint::ImageFingerprinter;

pub use crate::engine::config::EngineConfig;
pub use crate::engine::context::{EngineContext, EngineStats};
pub use crate::graph::key::NameKey;
pub use crate::graph::node::PartialOrderNode;
pub use crate::graph::operation_graph::OperationGraph;
pub use crate::image::factories::{
    BUILTIN_PRODUCT, ConstantFactory, GradientFactory, RescaleFactory,
    register_builtin_operations,
};
pub use crate::image::sources::{Axis, ConstantImage, FnImage, GradientImage, RescaleImage};
pub use crate::registry::operation_registry::{OperationRegistry, RegisteredFactory, TileOpFactory};
pub use crate::registry::params::ParameterBlock;
pub use crate::tile::cache::{
    CachedTile, CostComparator, MemoryTileCache, TileCache, TileCacheOpts, TileCacheStats,
    TileComparator,
};
pub use crate::tile::factory::{
    AllocatingTileFactory, RecyclingTileFactory, TileFactory, TileFactoryOpts, TileFactoryStats,
    TileRecycler, recycle_shared,
};
pub use crate::tile::listener::TileComputationListener;
pub use crate::tile::raster::{Raster, SampleBuffer};
pub use crate::tile::request::{TileRequest, TileStatus};
pub use crate::tile::scheduler::{SchedulerOpts, SchedulerStats, TileScheduler};
pub use crate::tile::source::TileSource;
