use super::*;

fn layout(w: u32, h: u32) -> RasterLayout {
    RasterLayout {
        width: w,
        height: h,
        bands: 1,
        sample_type: SampleType::U8,
    }
}

fn dirty_tile(f: &RecyclingTileFactory, w: u32, h: u32) -> Raster {
    let mut t = f.create_tile(layout(w, h), TileOrigin::default()).unwrap();
    t.set_sample(0, 0, 0, 42.0).unwrap();
    t
}

#[test]
fn recycle_then_create_reuses_and_zeroes_storage() {
    let f = RecyclingTileFactory::default();
    let t = dirty_tile(&f, 8, 8);
    f.recycle_tile(t).unwrap();
    assert_eq!(f.memory_used(), 64);

    let again = f.create_tile(layout(8, 8), TileOrigin::new(8, 0)).unwrap();
    assert!(again.data().is_zeroed());
    assert_eq!(again.origin(), TileOrigin::new(8, 0));
    assert_eq!(f.memory_used(), 0);

    let st = f.stats();
    assert_eq!(st.allocations, 1);
    assert_eq!(st.reuses, 1);
    assert_eq!(st.recycled, 1);
}

#[test]
fn incompatible_layouts_allocate_fresh() {
    let f = RecyclingTileFactory::default();
    f.recycle_tile(dirty_tile(&f, 8, 8)).unwrap();

    let wider = f.create_tile(layout(16, 8), TileOrigin::default()).unwrap();
    assert!(wider.data().is_zeroed());
    assert_eq!(f.stats().allocations, 2);
    assert_eq!(f.stats().reuses, 0);
    assert_eq!(f.stats().retained_buffers, 1);
}

#[test]
fn pool_honors_bucket_cap() {
    let f = RecyclingTileFactory::new(TileFactoryOpts {
        max_pool_bytes: 1 << 30,
        max_buffers_per_bucket: 1,
    });
    let a = dirty_tile(&f, 8, 8);
    let b = dirty_tile(&f, 8, 8);
    f.recycle_tile(a).unwrap();
    f.recycle_tile(b).unwrap();

    let st = f.stats();
    assert_eq!(st.retained_buffers, 1);
    assert_eq!(st.dropped_on_recycle, 1);
}

#[test]
fn pool_honors_global_byte_cap() {
    let f = RecyclingTileFactory::new(TileFactoryOpts {
        max_pool_bytes: 64,
        max_buffers_per_bucket: 8,
    });
    let a = dirty_tile(&f, 8, 8);
    let b = dirty_tile(&f, 8, 8);
    f.recycle_tile(a).unwrap();
    f.recycle_tile(b).unwrap();

    let st = f.stats();
    assert_eq!(st.retained_bytes, 64);
    assert_eq!(st.retained_buffers, 1);
    assert!(st.dropped_on_recycle >= 1);
}

#[test]
fn flush_drops_retained_buffers() {
    let f = RecyclingTileFactory::default();
    f.recycle_tile(dirty_tile(&f, 4, 4)).unwrap();
    f.recycle_tile(dirty_tile(&f, 2, 2)).unwrap();
    assert_eq!(f.memory_used(), 20);
    f.flush();
    assert_eq!(f.memory_used(), 0);
    assert_eq!(f.stats().retained_buffers, 0);
}

#[test]
fn shared_tiles_are_only_recycled_when_unreferenced() {
    let f = RecyclingTileFactory::default();
    let tile = Arc::new(dirty_tile(&f, 4, 4));
    let reader = Arc::clone(&tile);

    let err = recycle_shared(&f, tile).unwrap_err();
    assert!(matches!(err, TileError::InvalidArgument(_)));
    assert_eq!(f.memory_used(), 0);

    recycle_shared(&f, reader).unwrap();
    assert_eq!(f.memory_used(), 16);
}

#[test]
fn allocating_factory_never_retains_memory() {
    let f = AllocatingTileFactory;
    let t = f.create_tile(layout(4, 4), TileOrigin::default()).unwrap();
    assert!(t.data().is_zeroed());
    assert!(!f.can_reclaim_memory());
    assert_eq!(f.memory_used(), 0);
}

#[test]
fn invalid_layout_is_rejected() {
    let f = RecyclingTileFactory::default();
    let err = f
        .create_tile(layout(0, 4), TileOrigin::default())
        .unwrap_err();
    assert!(err.is_invalid_argument());
}

#[test]
fn concurrent_create_and_recycle_keep_accounting_consistent() {
    let f = Arc::new(RecyclingTileFactory::default());
    std::thread::scope(|s| {
        for _ in 0..4 {
            let f = Arc::clone(&f);
            s.spawn(move || {
                for _ in 0..50 {
                    let t = f.create_tile(layout(8, 8), TileOrigin::default()).unwrap();
                    assert!(t.data().is_zeroed());
                    f.recycle_tile(t).unwrap();
                }
            });
        }
    });
    let st = f.stats();
    assert_eq!(st.allocations + st.reuses, 200);
    assert_eq!(st.retained_bytes, st.retained_buffers * 64);
    assert!(st.retained_buffers <= 4);
}
