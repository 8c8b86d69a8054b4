use super::*;
use crate::foundation::core::{ImageId, ImageLayout};
use crate::tile::raster::Raster;
use std::sync::atomic::AtomicUsize;
use std::thread;

struct Blank {
    id: ImageId,
    layout: ImageLayout,
}

impl TileSource for Blank {
    fn id(&self) -> ImageId {
        self.id
    }

    fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    fn compute_tile(&self, _index: TileIndex, _tile: &mut Raster) -> anyhow::Result<()> {
        Ok(())
    }
}

fn blank() -> Arc<dyn TileSource> {
    Arc::new(Blank {
        id: ImageId::unique(),
        layout: ImageLayout {
            width: 32,
            height: 32,
            tile_width: 16,
            tile_height: 16,
            bands: 1,
            sample_type: Default::default(),
        },
    })
}

#[derive(Default)]
struct CountCancels {
    seen: Mutex<Vec<TileIndex>>,
}

impl TileComputationListener for CountCancels {
    fn tile_cancelled(
        &self,
        requests: &[Arc<TileRequest>],
        _image: &Arc<dyn TileSource>,
        index: TileIndex,
    ) {
        assert_eq!(requests.len(), 1);
        // Status is already terminal when the callback runs.
        assert_eq!(
            requests[0].tile_status(index.x, index.y).unwrap(),
            TileStatus::Cancelled
        );
        self.seen.lock().unwrap().push(index);
    }
}

fn indices() -> Vec<TileIndex> {
    vec![TileIndex::new(0, 0), TileIndex::new(1, 0)]
}

#[test]
fn new_request_is_pending_and_deduplicated() {
    let req = TileRequest::new(
        blank(),
        &[TileIndex::new(0, 0), TileIndex::new(1, 0), TileIndex::new(0, 0)],
        Vec::new(),
        true,
    );
    assert_eq!(req.tile_indices(), indices().as_slice());
    assert!(req.is_status_available());
    assert_eq!(req.tile_status(1, 0).unwrap(), TileStatus::Pending);
    assert!(!req.is_complete());
}

#[test]
fn status_query_errors() {
    let req = TileRequest::new(blank(), &indices(), Vec::new(), true);
    assert!(matches!(
        req.tile_status(5, 5),
        Err(TileError::UnknownTile { x: 5, y: 5 })
    ));

    let untracked = TileRequest::new(blank(), &indices(), Vec::new(), false);
    assert!(!untracked.is_status_available());
    assert!(matches!(
        untracked.tile_status(0, 0),
        Err(TileError::Unsupported(_))
    ));
}

#[test]
fn transitions_follow_the_state_machine() {
    let req = TileRequest::new(blank(), &indices(), Vec::new(), true);
    assert!(!req.try_finish(0, TileStatus::Computed));
    assert!(req.try_begin(0));
    assert!(!req.try_begin(0));
    assert_eq!(req.status_at(0), TileStatus::Processing);
    assert!(req.try_finish(0, TileStatus::Computed));
    assert!(!req.try_cancel(0));
    assert_eq!(req.status_at(0), TileStatus::Computed);

    assert!(req.try_begin(1));
    assert!(req.try_cancel(1));
    assert!(!req.try_finish(1, TileStatus::Failed));
    assert_eq!(req.status_at(1), TileStatus::Cancelled);
    assert!(req.is_complete());
}

#[test]
fn cancel_all_notifies_once_per_tile() {
    let listener = Arc::new(CountCancels::default());
    let req = Arc::new(TileRequest::new(
        blank(),
        &indices(),
        vec![listener.clone() as Arc<dyn TileComputationListener>],
        true,
    ));

    req.cancel_tiles(None);
    req.cancel_tiles(None);
    req.cancel_tiles(Some(&[]));

    assert_eq!(*listener.seen.lock().unwrap(), indices());
    assert_eq!(req.tile_status(0, 0).unwrap(), TileStatus::Cancelled);
    assert_eq!(req.tile_status(1, 0).unwrap(), TileStatus::Cancelled);
    assert!(req.wait(Duration::from_millis(1)));
}

#[test]
fn cancel_subset_ignores_unknown_and_terminal_tiles() {
    let listener = Arc::new(CountCancels::default());
    let req = Arc::new(TileRequest::new(
        blank(),
        &indices(),
        vec![listener.clone() as Arc<dyn TileComputationListener>],
        true,
    ));
    assert!(req.try_begin(0));
    assert!(req.try_finish(0, TileStatus::Failed));

    req.cancel_tiles(Some(&[TileIndex::new(0, 0), TileIndex::new(9, 9)]));
    assert!(listener.seen.lock().unwrap().is_empty());
    assert_eq!(req.tile_status(0, 0).unwrap(), TileStatus::Failed);

    req.cancel_tiles(Some(&[TileIndex::new(1, 0)]));
    assert_eq!(*listener.seen.lock().unwrap(), vec![TileIndex::new(1, 0)]);
}

#[test]
fn wait_times_out_while_tiles_are_open() {
    let req = TileRequest::new(blank(), &indices(), Vec::new(), true);
    assert!(!req.wait(Duration::from_millis(10)));
}

#[test]
fn concurrent_finish_and_cancel_have_one_winner() {
    for _ in 0..200 {
        let req = Arc::new(TileRequest::new(blank(), &indices()[..1], Vec::new(), true));
        assert!(req.try_begin(0));
        let wins = Arc::new(AtomicUsize::new(0));

        let finisher = {
            let req = Arc::clone(&req);
            let wins = Arc::clone(&wins);
            thread::spawn(move || {
                if req.try_finish(0, TileStatus::Computed) {
                    wins.fetch_add(1, Ordering::SeqCst);
                }
            })
        };
        if req.try_cancel(0) {
            wins.fetch_add(1, Ordering::SeqCst);
        }
        finisher.join().unwrap();

        assert_eq!(wins.load(Ordering::SeqCst), 1);
        assert!(req.status_at(0).is_terminal());
        assert!(req.is_complete());
    }
}
