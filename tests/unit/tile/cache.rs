use super::*;
use crate::foundation::core::{RasterLayout, SampleType, TileOrigin};
use crate::tile::factory::{RecyclingTileFactory, TileFactory};

// 8x8 single-band u8: 64 bytes.
fn tile() -> Arc<Raster> {
    let layout = RasterLayout {
        width: 8,
        height: 8,
        bands: 1,
        sample_type: SampleType::U8,
    };
    Arc::new(Raster::zeroed(layout, TileOrigin::default()).unwrap())
}

fn big_tile() -> Arc<Raster> {
    let layout = RasterLayout {
        width: 16,
        height: 16,
        bands: 1,
        sample_type: SampleType::U8,
    };
    Arc::new(Raster::zeroed(layout, TileOrigin::default()).unwrap())
}

fn key(image: ImageId, x: i32) -> TileKey {
    TileKey::new(image, TileIndex::new(x, 0))
}

fn small_cache() -> MemoryTileCache {
    MemoryTileCache::new(TileCacheOpts {
        memory_capacity: 256,
        memory_threshold: 0.5,
        diagnostics: true,
        spill_dir: None,
    })
}

fn spilling_cache(root: &tempfile::TempDir) -> MemoryTileCache {
    MemoryTileCache::new(TileCacheOpts {
        memory_capacity: 256,
        memory_threshold: 0.5,
        diagnostics: true,
        spill_dir: Some(root.path().to_path_buf()),
    })
}

// 64-byte tile whose first sample is `value`.
fn marked_tile(value: f32) -> Arc<Raster> {
    let mut t = Raster::clone(&tile());
    t.set_sample(0, 0, 0, value).unwrap();
    Arc::new(t)
}

fn files_in(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir).map_or(0, |entries| entries.count())
}

#[test]
fn get_counts_hits_and_misses() {
    let cache = MemoryTileCache::default();
    let img = ImageId::unique();
    cache.add(key(img, 0), tile(), TileCost(1));

    assert!(cache.get(&key(img, 0)).is_some());
    assert!(cache.get(&key(img, 1)).is_none());
    let st = cache.stats();
    assert_eq!(st.hits, 1);
    assert_eq!(st.misses, 1);
    assert_eq!(st.tile_count, 1);
    assert_eq!(cache.memory_used(), 64);

    cache.reset_counts();
    let st = cache.stats();
    assert_eq!((st.hits, st.misses, st.evictions), (0, 0, 0));
    assert_eq!(st.tile_count, 1);
}

#[test]
fn re_adding_a_tile_only_refreshes_it() {
    let cache = MemoryTileCache::default();
    let img = ImageId::unique();
    let first = tile();
    cache.add(key(img, 0), Arc::clone(&first), TileCost(1));
    let before = cache.cached_tile(&key(img, 0)).unwrap().timestamp();

    cache.add(key(img, 0), tile(), TileCost(99));
    let after = cache.cached_tile(&key(img, 0)).unwrap();
    assert!(after.timestamp() > before);
    assert_eq!(after.cost(), TileCost(1));
    assert!(Arc::ptr_eq(after.tile(), &first));
    assert_eq!(cache.tile_count(), 1);
    assert_eq!(cache.memory_used(), 64);
}

#[test]
fn lru_eviction_drops_least_recently_used_down_to_threshold() {
    let cache = small_cache();
    let img = ImageId::unique();
    for x in 0..4 {
        cache.add(key(img, x), tile(), TileCost(1));
    }
    assert_eq!(cache.memory_used(), 256);

    // Touch tile 0 so it becomes the most recent of the first four.
    assert!(cache.get(&key(img, 0)).is_some());
    cache.add(key(img, 4), tile(), TileCost(1));

    assert_eq!(cache.memory_used(), 128);
    let kept: Vec<i32> = cache.tiles(img).iter().map(|(i, _)| i.x).collect();
    assert_eq!(kept, vec![0, 4]);
    assert_eq!(cache.stats().evictions, 3);
}

#[test]
fn cost_comparator_evicts_cheapest_first() {
    let cache = small_cache();
    cache.set_tile_comparator(Some(Arc::new(CostComparator)));
    let img = ImageId::unique();
    for (x, cost) in [(0, 5), (1, 1), (2, 9), (3, 3)] {
        cache.add(key(img, x), tile(), TileCost(cost));
    }
    cache.add(key(img, 4), tile(), TileCost(7));

    let kept: Vec<i32> = cache.tiles(img).iter().map(|(i, _)| i.x).collect();
    assert_eq!(kept, vec![2, 4]);
}

#[test]
fn closure_comparator_overrides_lru() {
    let cache = small_cache();
    // Evict the highest tile index first.
    cache.set_tile_comparator(Some(Arc::new(|a: &CachedTile, b: &CachedTile| {
        b.index().x.cmp(&a.index().x)
    })));
    let img = ImageId::unique();
    for x in 0..5 {
        cache.add(key(img, x), tile(), TileCost(0));
    }
    let kept: Vec<i32> = cache.tiles(img).iter().map(|(i, _)| i.x).collect();
    assert_eq!(kept, vec![0, 1]);
}

#[test]
fn oversized_tile_is_not_cached_when_full() {
    let cache = small_cache();
    let img = ImageId::unique();
    for x in 0..4 {
        cache.add(key(img, x), tile(), TileCost(1));
    }
    cache.add(key(img, 9), big_tile(), TileCost(1));

    assert!(cache.cached_tile(&key(img, 9)).is_none());
    assert_eq!(cache.tile_count(), 4);
    assert_eq!(cache.memory_used(), 256);
}

#[test]
fn owner_scoped_removal_and_listing() {
    let cache = MemoryTileCache::default();
    let a = ImageId::unique();
    let b = ImageId::unique();
    cache.add(TileKey::new(a, TileIndex::new(1, 1)), tile(), TileCost(1));
    cache.add(TileKey::new(a, TileIndex::new(0, 1)), tile(), TileCost(1));
    cache.add(TileKey::new(a, TileIndex::new(3, 0)), tile(), TileCost(1));
    cache.add(key(b, 0), tile(), TileCost(1));

    let listed: Vec<TileIndex> = cache.tiles(a).into_iter().map(|(i, _)| i).collect();
    assert_eq!(
        listed,
        vec![TileIndex::new(3, 0), TileIndex::new(0, 1), TileIndex::new(1, 1)]
    );

    cache.remove_tiles(a);
    assert!(cache.tiles(a).is_empty());
    assert_eq!(cache.tiles(b).len(), 1);
    assert_eq!(cache.memory_used(), 64);

    cache.remove(&key(b, 0));
    cache.remove(&key(b, 0));
    assert_eq!(cache.tile_count(), 0);
    assert_eq!(cache.memory_used(), 0);
}

#[test]
fn flush_empties_the_cache() {
    let cache = MemoryTileCache::default();
    let img = ImageId::unique();
    for x in 0..3 {
        cache.add(key(img, x), tile(), TileCost(1));
    }
    cache.flush();
    assert_eq!(cache.tile_count(), 0);
    assert_eq!(cache.memory_used(), 0);
    assert!(cache.get(&key(img, 0)).is_none());
}

#[test]
fn shrinking_capacity_evicts_immediately() {
    let cache = MemoryTileCache::default();
    let img = ImageId::unique();
    for x in 0..4 {
        cache.add(key(img, x), tile(), TileCost(1));
    }
    cache.set_memory_capacity(128);
    assert_eq!(cache.memory_capacity(), 128);
    // 0.75 * 128 = 96, so only one 64-byte tile survives.
    assert_eq!(cache.memory_used(), 64);
    assert_eq!(cache.tiles(img)[0].0, TileIndex::new(3, 0));

    cache.set_memory_capacity(0);
    assert_eq!(cache.tile_count(), 0);
    cache.add(key(img, 7), tile(), TileCost(1));
    assert_eq!(cache.tile_count(), 0);
}

#[test]
fn threshold_must_be_a_fraction() {
    let cache = MemoryTileCache::default();
    assert!(cache.set_memory_threshold(0.0).unwrap_err().is_invalid_argument());
    assert!(cache.set_memory_threshold(1.5).unwrap_err().is_invalid_argument());
    cache.set_memory_threshold(0.5).unwrap();
    assert_eq!(cache.memory_threshold(), 0.5);

    let bad = TileCacheOpts {
        memory_threshold: f32::NAN,
        ..TileCacheOpts::default()
    };
    assert!(matches!(bad.validate(), Err(TileError::Config(_))));
}

#[test]
fn evicted_unreferenced_tiles_are_recycled() {
    let pool = Arc::new(RecyclingTileFactory::default());
    let cache = small_cache().with_recycler(pool.clone());
    let img = ImageId::unique();

    let held = tile();
    cache.add(key(img, 0), Arc::clone(&held), TileCost(1));
    for x in 1..5 {
        cache.add(key(img, x), tile(), TileCost(1));
    }

    // Tile 0 was still referenced, so only tiles 1 and 2 went back to the pool.
    assert_eq!(pool.stats().recycled, 2);
    assert_eq!(pool.memory_used(), 128);
    assert_eq!(Arc::strong_count(&held), 1);
}

#[test]
fn contains_leaves_counters_and_order_alone() {
    let cache = MemoryTileCache::default();
    let img = ImageId::unique();
    cache.add(key(img, 0), tile(), TileCost(1));
    let before = cache.cached_tile(&key(img, 0)).unwrap().timestamp();

    assert!(cache.contains(&key(img, 0)));
    assert!(!cache.contains(&key(img, 1)));
    assert_eq!(cache.cached_tile(&key(img, 0)).unwrap().timestamp(), before);
    let st = cache.stats();
    assert_eq!((st.hits, st.misses), (0, 0));
}

#[test]
fn evicted_tiles_spill_to_disk_and_reload_on_miss() {
    let root = tempfile::tempdir().unwrap();
    let cache = spilling_cache(&root);
    let img = ImageId::unique();
    for x in 0..5 {
        cache.add(key(img, x), marked_tile(x as f32), TileCost(1));
    }

    // Tiles 0..3 were evicted down to the 128-byte threshold and written out.
    let st = cache.stats();
    assert_eq!((st.evictions, st.tiles_written, st.tiles_on_disk), (3, 3, 3));
    assert_eq!(cache.memory_used(), 128);
    let dir = cache.spill_dir().unwrap();
    assert!(dir.starts_with(root.path()));
    assert_eq!(files_in(&dir), 3);
    assert!(cache.is_spilled(&key(img, 1)));
    assert!(cache.contains(&key(img, 1)));

    let back = cache.get(&key(img, 1)).unwrap();
    assert_eq!(back.sample(0, 0, 0), Some(1.0));
    assert!(!cache.is_spilled(&key(img, 1)));
    assert!(cache.cached_tile(&key(img, 1)).is_some());
    let st = cache.stats();
    assert_eq!((st.tiles_read, st.tiles_on_disk), (1, 2));
    assert_eq!((st.hits, st.misses), (1, 0));
    assert_eq!(cache.memory_used(), 192);
    assert_eq!(files_in(&dir), 2);

    assert!(cache.get(&key(img, 9)).is_none());
    assert_eq!(cache.stats().misses, 1);
}

#[test]
fn removal_and_flush_drop_spilled_tiles() {
    let root = tempfile::tempdir().unwrap();
    let cache = spilling_cache(&root);
    let (a, b) = (ImageId::unique(), ImageId::unique());
    for x in 0..3 {
        cache.add(key(a, x), tile(), TileCost(1));
    }
    for x in 0..2 {
        cache.add(key(b, x), tile(), TileCost(1));
    }
    // a0, a1 and a2 spilled; b0 and b1 stay in memory.
    assert_eq!(cache.stats().tiles_on_disk, 3);

    cache.remove(&key(a, 0));
    assert!(!cache.contains(&key(a, 0)));
    assert_eq!(cache.stats().tiles_on_disk, 2);

    cache.remove_tiles(a);
    assert_eq!(cache.stats().tiles_on_disk, 0);
    assert!(cache.get(&key(a, 1)).is_none());

    for x in 5..8 {
        cache.add(key(a, x), tile(), TileCost(1));
    }
    assert_eq!(cache.stats().tiles_on_disk, 3);
    cache.flush();
    assert_eq!(cache.stats().tiles_on_disk, 0);
    assert_eq!(files_in(&cache.spill_dir().unwrap()), 0);
}

#[test]
fn re_added_tile_replaces_its_disk_copy() {
    let root = tempfile::tempdir().unwrap();
    let cache = spilling_cache(&root);
    let img = ImageId::unique();
    for x in 0..5 {
        cache.add(key(img, x), marked_tile(x as f32), TileCost(1));
    }
    assert!(cache.is_spilled(&key(img, 0)));

    cache.add(key(img, 0), marked_tile(42.0), TileCost(1));
    assert!(!cache.is_spilled(&key(img, 0)));
    assert_eq!(cache.get(&key(img, 0)).unwrap().sample(0, 0, 0), Some(42.0));
}

#[test]
fn dropping_the_cache_removes_its_spill_directory() {
    let root = tempfile::tempdir().unwrap();
    let dir = {
        let cache = spilling_cache(&root);
        let img = ImageId::unique();
        for x in 0..5 {
            cache.add(key(img, x), tile(), TileCost(1));
        }
        cache.spill_dir().unwrap()
    };
    assert!(!dir.exists());
}
