use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::foundation::core::{RasterLayout, SampleType, TileOrigin};
use crate::foundation::error::{TileError, TileResult};
use crate::tile::raster::{Raster, SampleBuffer};

/// Manufactures writable tiles, optionally from reclaimed backing storage.
pub trait TileFactory: Send + Sync {
    /// Whether this factory can reuse storage handed back through a [`TileRecycler`].
    fn can_reclaim_memory(&self) -> bool;

    /// Whether the factory retains memory that counts towards [`TileFactory::memory_used`].
    fn is_memory_cache(&self) -> bool;

    /// Bytes currently retained for reuse; zero for non-caching factories.
    fn memory_used(&self) -> u64;

    /// Drop every retained buffer.
    fn flush(&self);

    /// Create a zero-filled tile with `layout` whose upper-left pixel is `origin`.
    fn create_tile(&self, layout: RasterLayout, origin: TileOrigin) -> TileResult<Raster>;
}

/// Accepts tiles whose backing storage may be reused.
///
/// Taking the [`Raster`] by value transfers ownership of its buffer; no other reference to it can
/// survive the call.
pub trait TileRecycler: Send + Sync {
    /// Hand `tile`'s backing storage back for reuse.
    fn recycle_tile(&self, tile: Raster) -> TileResult<()>;
}

/// Recycle a shared tile.
///
/// Fails with [`TileError::InvalidArgument`] while any other `Arc` to the tile is alive, since its
/// storage could otherwise be handed out again under a live reader.
pub fn recycle_shared(recycler: &dyn TileRecycler, tile: Arc<Raster>) -> TileResult<()> {
    let tile = Arc::try_unwrap(tile).map_err(|_| {
        TileError::invalid_argument("cannot recycle a tile that is still referenced elsewhere")
    })?;
    recycler.recycle_tile(tile)
}

/// Non-caching factory: every tile is freshly allocated.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllocatingTileFactory;

impl TileFactory for AllocatingTileFactory {
    fn can_reclaim_memory(&self) -> bool {
        false
    }

    fn is_memory_cache(&self) -> bool {
        false
    }

    fn memory_used(&self) -> u64 {
        0
    }

    fn flush(&self) {}

    fn create_tile(&self, layout: RasterLayout, origin: TileOrigin) -> TileResult<Raster> {
        Raster::zeroed(layout, origin)
    }
}

/// Pool bounds for [`RecyclingTileFactory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TileFactoryOpts {
    /// Maximum bytes retained across all buckets.
    pub max_pool_bytes: usize,
    /// Maximum number of retained buffers per (sample type, length) bucket.
    pub max_buffers_per_bucket: usize,
}

impl Default for TileFactoryOpts {
    fn default() -> Self {
        Self {
            max_pool_bytes: 64 * 1024 * 1024,
            max_buffers_per_bucket: 32,
        }
    }
}

/// Allocation and reuse counters of a [`RecyclingTileFactory`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct TileFactoryStats {
    /// Buffers currently retained.
    pub retained_buffers: usize,
    /// Bytes currently retained.
    pub retained_bytes: usize,
    /// Tiles served from fresh allocations.
    pub allocations: u64,
    /// Tiles served from reclaimed buffers.
    pub reuses: u64,
    /// Buffers accepted back into the pool.
    pub recycled: u64,
    /// Buffers dropped on recycle because a pool bound was hit.
    pub dropped_on_recycle: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BufferKey {
    sample_type: SampleType,
    len: usize,
}

impl BufferKey {
    fn of(buf: &SampleBuffer) -> Self {
        Self {
            sample_type: buf.sample_type(),
            len: buf.len(),
        }
    }

    fn byte_len(self) -> usize {
        self.len.saturating_mul(self.sample_type.bytes_per_sample())
    }
}

#[derive(Default)]
struct Pool {
    stats: TileFactoryStats,
    buckets: HashMap<BufferKey, Vec<SampleBuffer>>,
}

/// Bounded pooled factory that reuses recycled tile buffers.
///
/// Buffers are bucketed by `(sample type, sample count)`; a request reuses a buffer only on an
/// exact match, zero-filling it before handing it out. It is both the [`TileFactory`] and the
/// [`TileRecycler`] of a pool.
pub struct RecyclingTileFactory {
    opts: TileFactoryOpts,
    pool: Mutex<Pool>,
}

impl std::fmt::Debug for RecyclingTileFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecyclingTileFactory")
            .field("opts", &self.opts)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Default for RecyclingTileFactory {
    fn default() -> Self {
        Self::new(TileFactoryOpts::default())
    }
}

impl RecyclingTileFactory {
    /// Create an empty pool.
    pub fn new(opts: TileFactoryOpts) -> Self {
        Self {
            opts,
            pool: Mutex::new(Pool::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Pool> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the pool counters.
    pub fn stats(&self) -> TileFactoryStats {
        self.lock().stats
    }
}

impl TileFactory for RecyclingTileFactory {
    fn can_reclaim_memory(&self) -> bool {
        true
    }

    fn is_memory_cache(&self) -> bool {
        true
    }

    fn memory_used(&self) -> u64 {
        self.lock().stats.retained_bytes as u64
    }

    fn flush(&self) {
        let mut pool = self.lock();
        let dropped = pool.stats.retained_buffers;
        pool.buckets.clear();
        pool.stats.retained_buffers = 0;
        pool.stats.retained_bytes = 0;
        tracing::debug!(dropped, "flushed tile buffer pool");
    }

    fn create_tile(&self, layout: RasterLayout, origin: TileOrigin) -> TileResult<Raster> {
        let key = BufferKey {
            sample_type: layout.sample_type,
            len: layout.sample_count()?,
        };

        let reclaimed = {
            let mut pool = self.lock();
            let buf = pool.buckets.get_mut(&key).and_then(Vec::pop);
            if buf.is_some() {
                pool.stats.retained_buffers = pool.stats.retained_buffers.saturating_sub(1);
                pool.stats.retained_bytes =
                    pool.stats.retained_bytes.saturating_sub(key.byte_len());
                pool.stats.reuses = pool.stats.reuses.saturating_add(1);
            } else {
                pool.stats.allocations = pool.stats.allocations.saturating_add(1);
            }
            buf
        };

        let data = match reclaimed {
            Some(mut buf) => {
                buf.fill_zero();
                buf
            }
            None => SampleBuffer::zeroed(key.sample_type, key.len),
        };
        Raster::new(layout, origin, data)
    }
}

impl TileRecycler for RecyclingTileFactory {
    fn recycle_tile(&self, tile: Raster) -> TileResult<()> {
        let buf = tile.into_buffer();
        if buf.is_empty() {
            return Err(TileError::invalid_argument("cannot recycle an empty tile"));
        }
        let key = BufferKey::of(&buf);
        let bytes = key.byte_len();

        let mut pool = self.lock();
        let over_bytes = pool.stats.retained_bytes.saturating_add(bytes) > self.opts.max_pool_bytes;
        let bucket_len = pool.buckets.get(&key).map_or(0, Vec::len);
        if over_bytes || bucket_len >= self.opts.max_buffers_per_bucket {
            pool.stats.dropped_on_recycle = pool.stats.dropped_on_recycle.saturating_add(1);
            return Ok(());
        }

        pool.buckets.entry(key).or_default().push(buf);
        pool.stats.retained_buffers = pool.stats.retained_buffers.saturating_add(1);
        pool.stats.retained_bytes = pool.stats.retained_bytes.saturating_add(bytes);
        pool.stats.recycled = pool.stats.recycled.saturating_add(1);
        Ok(())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/tile/factory.rs"]
mod tests;
