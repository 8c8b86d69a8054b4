use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::foundation::core::{ImageId, TileCost, TileIndex, TileKey};
use crate::foundation::error::{TileError, TileResult};
use crate::tile::factory::{TileRecycler, recycle_shared};
use crate::tile::raster::Raster;
use crate::tile::spill::SpillStore;

/// A tile held by a cache, with the accounting used for eviction.
#[derive(Clone, Debug)]
pub struct CachedTile {
    key: TileKey,
    tile: Arc<Raster>,
    cost: TileCost,
    timestamp: u64,
    memory_size: u64,
}

impl CachedTile {
    /// Image that owns the tile.
    pub fn owner(&self) -> ImageId {
        self.key.image
    }

    /// Tile index within the owner.
    pub fn index(&self) -> TileIndex {
        self.key.index
    }

    /// Cache key.
    pub fn key(&self) -> TileKey {
        self.key
    }

    /// The cached tile.
    pub fn tile(&self) -> &Arc<Raster> {
        &self.tile
    }

    /// Compute-cost metric supplied when the tile was added.
    pub fn cost(&self) -> TileCost {
        self.cost
    }

    /// Logical time of the last add or access; larger is more recent.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Bytes accounted for this tile.
    pub fn memory_size(&self) -> u64 {
        self.memory_size
    }
}

/// Eviction order for [`MemoryTileCache`]: tiles comparing `Less` are evicted first.
pub trait TileComparator: Send + Sync {
    /// Compare two cached tiles.
    fn compare(&self, a: &CachedTile, b: &CachedTile) -> Ordering;
}

impl<F> TileComparator for F
where
    F: Fn(&CachedTile, &CachedTile) -> Ordering + Send + Sync,
{
    fn compare(&self, a: &CachedTile, b: &CachedTile) -> Ordering {
        self(a, b)
    }
}

/// Evicts the cheapest tiles to recompute first, oldest first among equal costs.
#[derive(Debug, Default, Clone, Copy)]
pub struct CostComparator;

impl TileComparator for CostComparator {
    fn compare(&self, a: &CachedTile, b: &CachedTile) -> Ordering {
        a.cost
            .cmp(&b.cost)
            .then_with(|| a.timestamp.cmp(&b.timestamp))
    }
}

/// Storage for computed tiles keyed by owner and tile index.
pub trait TileCache: Send + Sync {
    /// Add a tile. A tile already cached under `key` only has its timestamp refreshed.
    fn add(&self, key: TileKey, tile: Arc<Raster>, cost: TileCost);

    /// Look up a tile, refreshing its timestamp on a hit.
    fn get(&self, key: &TileKey) -> Option<Arc<Raster>>;

    /// Whether `get` would find the tile. Neither counters nor timestamps change.
    fn contains(&self, key: &TileKey) -> bool;

    /// Remove one tile. Removing an absent tile does nothing.
    fn remove(&self, key: &TileKey);

    /// Remove every tile owned by `owner`.
    fn remove_tiles(&self, owner: ImageId);

    /// Every cached tile of `owner`, ordered by tile index.
    fn tiles(&self, owner: ImageId) -> Vec<(TileIndex, Arc<Raster>)>;

    /// Drop every cached tile.
    fn flush(&self);

    /// Bytes held by cached tiles.
    fn memory_used(&self) -> u64;

    /// Memory budget in bytes.
    fn memory_capacity(&self) -> u64;

    /// Change the memory budget, evicting immediately if usage now exceeds it.
    fn set_memory_capacity(&self, bytes: u64);
}

/// Configuration for [`MemoryTileCache`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TileCacheOpts {
    /// Memory budget in bytes. Zero disables caching.
    pub memory_capacity: u64,
    /// Fraction of the budget that eviction brings usage down to, in `(0, 1]`.
    pub memory_threshold: f32,
    /// Emit a trace event for every add, hit, removal and eviction.
    pub diagnostics: bool,
    /// Write evicted tiles below this directory and read them back on a miss.
    pub spill_dir: Option<PathBuf>,
}

impl Default for TileCacheOpts {
    fn default() -> Self {
        Self {
            memory_capacity: 16 * 1024 * 1024,
            memory_threshold: 0.75,
            diagnostics: false,
            spill_dir: None,
        }
    }
}

impl TileCacheOpts {
    /// Reject thresholds outside `(0, 1]`.
    pub fn validate(&self) -> TileResult<()> {
        if !(self.memory_threshold > 0.0 && self.memory_threshold <= 1.0) {
            return Err(TileError::config(format!(
                "tile cache memory_threshold must be in (0, 1], got {}",
                self.memory_threshold
            )));
        }
        if let Some(dir) = &self.spill_dir
            && dir.as_os_str().is_empty()
        {
            return Err(TileError::config("tile cache spill_dir must not be empty"));
        }
        Ok(())
    }
}

/// Counters of a [`MemoryTileCache`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct TileCacheStats {
    /// Tiles currently cached.
    pub tile_count: u64,
    /// Bytes currently cached.
    pub memory_used: u64,
    /// Lookups and re-adds that found the tile.
    pub hits: u64,
    /// Lookups that missed.
    pub misses: u64,
    /// Tiles evicted by memory control.
    pub evictions: u64,
    /// Evicted tiles written to the spill directory.
    pub tiles_written: u64,
    /// Spilled tiles read back into memory.
    pub tiles_read: u64,
    /// Tiles currently in the spill directory.
    pub tiles_on_disk: u64,
}

#[derive(Debug, Clone, Copy)]
enum CacheAction {
    Add,
    UpdateFromAdd,
    UpdateFromGet,
    Remove,
    RemoveFromFlush,
    RemoveFromMemoryControl,
    Reload,
}

struct CacheInner {
    capacity: u64,
    threshold: f32,
    entries: HashMap<TileKey, CachedTile>,
    // Timestamp -> key, oldest first.
    lru: BTreeMap<u64, TileKey>,
    clock: u64,
    stats: TileCacheStats,
    comparator: Option<Arc<dyn TileComparator>>,
    spill: Option<SpillStore>,
}

impl CacheInner {
    fn tick(&mut self) -> u64 {
        let t = self.clock;
        self.clock = self.clock.wrapping_add(1);
        t
    }

    fn touch(&mut self, key: &TileKey) -> Option<Arc<Raster>> {
        let now = self.tick();
        let entry = self.entries.get_mut(key)?;
        self.lru.remove(&entry.timestamp);
        entry.timestamp = now;
        self.lru.insert(now, *key);
        Some(Arc::clone(&entry.tile))
    }

    fn take(&mut self, key: &TileKey) -> Option<CachedTile> {
        let entry = self.entries.remove(key)?;
        self.lru.remove(&entry.timestamp);
        self.stats.tile_count = self.stats.tile_count.saturating_sub(1);
        self.stats.memory_used = self.stats.memory_used.saturating_sub(entry.memory_size);
        Some(entry)
    }

    // Insert a tile that is not cached yet. `None` when it is too large to keep.
    fn insert(
        &mut self,
        key: TileKey,
        tile: Arc<Raster>,
        cost: TileCost,
    ) -> Option<Vec<CachedTile>> {
        let memory_size = tile.byte_len() as u64;
        if self.stats.memory_used.saturating_add(memory_size) > self.capacity
            && memory_size > self.limit()
        {
            return None;
        }
        let timestamp = self.tick();
        self.entries.insert(
            key,
            CachedTile {
                key,
                tile,
                cost,
                timestamp,
                memory_size,
            },
        );
        self.lru.insert(timestamp, key);
        self.stats.tile_count = self.stats.tile_count.saturating_add(1);
        self.stats.memory_used = self.stats.memory_used.saturating_add(memory_size);

        if self.stats.memory_used > self.capacity {
            Some(self.memory_control())
        } else {
            Some(Vec::new())
        }
    }

    fn sync_spill_stats(&mut self) {
        if let Some(spill) = &self.spill {
            self.stats.tiles_written = spill.tiles_written();
            self.stats.tiles_read = spill.tiles_read();
            self.stats.tiles_on_disk = spill.len() as u64;
        }
    }

    fn drop_spilled(&mut self, key: &TileKey) {
        if let Some(spill) = &mut self.spill
            && spill.remove(key)
        {
            self.sync_spill_stats();
        }
    }

    // Evicted tiles go to the spill directory when one is configured.
    fn spill_evicted(&mut self, evicted: &[CachedTile]) {
        let Some(spill) = &mut self.spill else {
            return;
        };
        for e in evicted {
            if let Err(err) = spill.write(e.key, &e.tile, e.cost) {
                tracing::warn!(tile = %e.key.index, error = %err, "tile not spilled");
            }
        }
        self.sync_spill_stats();
    }

    // Move a spilled tile back into memory; counts as a hit.
    fn reload(&mut self, key: &TileKey) -> Option<(Arc<Raster>, Vec<CachedTile>)> {
        let spill = self.spill.as_mut()?;
        let loaded = spill.take(key);
        self.sync_spill_stats();
        let (tile, cost) = match loaded {
            Ok(Some(found)) => found,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(tile = %key.index, error = %err, "spilled tile lost");
                return None;
            }
        };
        let tile = Arc::new(tile);
        let evicted = self.insert(*key, Arc::clone(&tile), cost).unwrap_or_default();
        self.stats.hits = self.stats.hits.saturating_add(1);
        Some((tile, evicted))
    }

    fn limit(&self) -> u64 {
        (self.capacity as f64 * f64::from(self.threshold)) as u64
    }

    // Evict until usage is at most `capacity * threshold`.
    fn memory_control(&mut self) -> Vec<CachedTile> {
        let limit = self.limit();
        let victims: Vec<TileKey> = match &self.comparator {
            None => {
                let mut used = self.stats.memory_used;
                let mut out = Vec::new();
                for (_, key) in self.lru.iter() {
                    if used <= limit {
                        break;
                    }
                    if let Some(e) = self.entries.get(key) {
                        used = used.saturating_sub(e.memory_size);
                        out.push(*key);
                    }
                }
                out
            }
            Some(cmp) => {
                let mut sorted: Vec<&CachedTile> = self.entries.values().collect();
                sorted.sort_by(|a, b| cmp.compare(a, b));
                let mut used = self.stats.memory_used;
                let mut out = Vec::new();
                for e in sorted {
                    if used <= limit {
                        break;
                    }
                    used = used.saturating_sub(e.memory_size);
                    out.push(e.key);
                }
                out
            }
        };

        let mut evicted = Vec::with_capacity(victims.len());
        for key in victims {
            if let Some(e) = self.take(&key) {
                self.stats.evictions = self.stats.evictions.saturating_add(1);
                evicted.push(e);
            }
        }
        self.spill_evicted(&evicted);
        evicted
    }
}

/// Memory-bounded tile cache (least-recently-used by default).
///
/// When usage exceeds the capacity, tiles are evicted until usage is at most
/// `capacity * threshold`. Without a comparator the least recently added or accessed tiles go
/// first; with one, tiles are evicted in ascending comparator order. A new tile that would be
/// evicted immediately (it alone is larger than that limit while the cache is full) is not
/// cached.
///
/// Evicted tiles that nobody else references are passed to the optional recycler. With a
/// `spill_dir`, evicted tiles are first written to disk; a later miss reads them back into
/// memory, and `remove`, `remove_tiles` and `flush` drop the disk copies too.
pub struct MemoryTileCache {
    inner: Mutex<CacheInner>,
    diagnostics: bool,
    recycler: Option<Arc<dyn TileRecycler>>,
}

impl std::fmt::Debug for MemoryTileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTileCache")
            .field("stats", &self.stats())
            .field("capacity", &self.memory_capacity())
            .finish_non_exhaustive()
    }
}

impl Default for MemoryTileCache {
    fn default() -> Self {
        Self::new(TileCacheOpts::default())
    }
}

impl MemoryTileCache {
    /// Create an empty cache. The threshold is clamped into `(0, 1]`.
    pub fn new(opts: TileCacheOpts) -> Self {
        let spill = opts.spill_dir.as_deref().map(SpillStore::new);
        Self {
            inner: Mutex::new(CacheInner {
                capacity: opts.memory_capacity,
                threshold: clamp_threshold(opts.memory_threshold),
                entries: HashMap::new(),
                lru: BTreeMap::new(),
                clock: 0,
                stats: TileCacheStats::default(),
                comparator: None,
                spill,
            }),
            diagnostics: opts.diagnostics,
            recycler: None,
        }
    }

    /// Hand evicted, unreferenced tiles to `recycler`.
    pub fn with_recycler(mut self, recycler: Arc<dyn TileRecycler>) -> Self {
        self.recycler = Some(recycler);
        self
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn trace(&self, action: CacheAction, key: &TileKey) {
        if self.diagnostics {
            tracing::trace!(?action, image = %key.image, tile = %key.index, "tile cache");
        }
    }

    fn release(&self, evicted: Vec<CachedTile>, action: CacheAction) {
        for e in evicted {
            self.trace(action, &e.key);
            if let Some(recycler) = &self.recycler {
                // Still referenced by a consumer; the buffer is simply dropped later.
                let _ = recycle_shared(recycler.as_ref(), e.tile);
            }
        }
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> TileCacheStats {
        self.lock().stats
    }

    /// Number of cached tiles.
    pub fn tile_count(&self) -> u64 {
        self.lock().stats.tile_count
    }

    /// Zero the hit, miss and eviction counters.
    pub fn reset_counts(&self) {
        let mut c = self.lock();
        c.stats.hits = 0;
        c.stats.misses = 0;
        c.stats.evictions = 0;
    }

    /// Current eviction threshold.
    pub fn memory_threshold(&self) -> f32 {
        self.lock().threshold
    }

    /// Set the fraction of the capacity that eviction brings usage down to.
    pub fn set_memory_threshold(&self, threshold: f32) -> TileResult<()> {
        TileCacheOpts {
            memory_threshold: threshold,
            ..TileCacheOpts::default()
        }
        .validate()
        .map_err(|e| TileError::invalid_argument(e.to_string()))?;
        let evicted = {
            let mut c = self.lock();
            c.threshold = threshold;
            if c.stats.memory_used > c.capacity {
                c.memory_control()
            } else {
                Vec::new()
            }
        };
        self.release(evicted, CacheAction::RemoveFromMemoryControl);
        Ok(())
    }

    /// Install (or clear, with `None`) a comparator that overrides LRU eviction order.
    pub fn set_tile_comparator(&self, comparator: Option<Arc<dyn TileComparator>>) {
        self.lock().comparator = comparator;
    }

    /// Snapshot of the accounting for one tile.
    pub fn cached_tile(&self, key: &TileKey) -> Option<CachedTile> {
        self.lock().entries.get(key).cloned()
    }

    /// Directory holding this cache's spilled tiles, if spilling is enabled.
    pub fn spill_dir(&self) -> Option<PathBuf> {
        self.lock().spill.as_ref().map(|s| s.dir().to_path_buf())
    }

    /// Whether the tile is held on disk rather than in memory.
    pub fn is_spilled(&self, key: &TileKey) -> bool {
        self.lock().spill.as_ref().is_some_and(|s| s.contains(key))
    }

    /// Force eviction down to the threshold.
    pub fn memory_control(&self) {
        let evicted = self.lock().memory_control();
        self.release(evicted, CacheAction::RemoveFromMemoryControl);
    }
}

fn clamp_threshold(t: f32) -> f32 {
    if t.is_finite() && t > 0.0 { t.min(1.0) } else { 0.75 }
}

impl TileCache for MemoryTileCache {
    fn add(&self, key: TileKey, tile: Arc<Raster>, cost: TileCost) {
        let (action, evicted) = {
            let mut c = self.lock();
            if c.capacity == 0 {
                return;
            }
            if c.touch(&key).is_some() {
                c.stats.hits = c.stats.hits.saturating_add(1);
                (CacheAction::UpdateFromAdd, Vec::new())
            } else {
                c.drop_spilled(&key);
                let Some(evicted) = c.insert(key, tile, cost) else {
                    return;
                };
                (CacheAction::Add, evicted)
            }
        };
        self.trace(action, &key);
        self.release(evicted, CacheAction::RemoveFromMemoryControl);
    }

    fn get(&self, key: &TileKey) -> Option<Arc<Raster>> {
        let (hit, action, evicted) = {
            let mut c = self.lock();
            if let Some(hit) = c.touch(key) {
                c.stats.hits = c.stats.hits.saturating_add(1);
                (Some(hit), CacheAction::UpdateFromGet, Vec::new())
            } else if let Some((hit, evicted)) = c.reload(key) {
                (Some(hit), CacheAction::Reload, evicted)
            } else {
                c.stats.misses = c.stats.misses.saturating_add(1);
                return None;
            }
        };
        self.trace(action, key);
        self.release(evicted, CacheAction::RemoveFromMemoryControl);
        hit
    }

    fn contains(&self, key: &TileKey) -> bool {
        let c = self.lock();
        c.entries.contains_key(key) || c.spill.as_ref().is_some_and(|s| s.contains(key))
    }

    fn remove(&self, key: &TileKey) {
        let removed = {
            let mut c = self.lock();
            c.drop_spilled(key);
            c.take(key)
        };
        if let Some(e) = removed {
            self.release(vec![e], CacheAction::Remove);
        }
    }

    fn remove_tiles(&self, owner: ImageId) {
        let removed: Vec<CachedTile> = {
            let mut c = self.lock();
            if let Some(spill) = &mut c.spill {
                spill.remove_owner(owner);
            }
            c.sync_spill_stats();
            let keys: Vec<TileKey> = c
                .entries
                .keys()
                .filter(|k| k.image == owner)
                .copied()
                .collect();
            keys.iter().filter_map(|k| c.take(k)).collect()
        };
        self.release(removed, CacheAction::Remove);
    }

    fn tiles(&self, owner: ImageId) -> Vec<(TileIndex, Arc<Raster>)> {
        let c = self.lock();
        let mut out: Vec<(TileIndex, Arc<Raster>)> = c
            .entries
            .values()
            .filter(|e| e.key.image == owner)
            .map(|e| (e.key.index, Arc::clone(&e.tile)))
            .collect();
        out.sort_by_key(|(index, _)| (index.y, index.x));
        out
    }

    fn flush(&self) {
        let removed: Vec<CachedTile> = {
            let mut c = self.lock();
            c.lru.clear();
            c.stats.tile_count = 0;
            c.stats.memory_used = 0;
            if let Some(spill) = &mut c.spill {
                spill.clear();
            }
            c.sync_spill_stats();
            c.entries.drain().map(|(_, e)| e).collect()
        };
        tracing::debug!(tiles = removed.len(), "flushed tile cache");
        self.release(removed, CacheAction::RemoveFromFlush);
    }

    fn memory_used(&self) -> u64 {
        self.lock().stats.memory_used
    }

    fn memory_capacity(&self) -> u64 {
        self.lock().capacity
    }

    fn set_memory_capacity(&self, bytes: u64) {
        let evicted = {
            let mut c = self.lock();
            c.capacity = bytes;
            if bytes == 0 {
                c.lru.clear();
                c.stats.tile_count = 0;
                c.stats.memory_used = 0;
                if let Some(spill) = &mut c.spill {
                    spill.clear();
                }
                c.sync_spill_stats();
                c.entries.drain().map(|(_, e)| e).collect()
            } else if c.stats.memory_used > bytes {
                c.memory_control()
            } else {
                Vec::new()
            }
        };
        self.release(evicted, CacheAction::RemoveFromMemoryControl);
    }
}

#[cfg(test)]
#[path = "../../tests/unit/tile/cache.rs"]
mod tests;
