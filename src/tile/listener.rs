use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::foundation::core::TileIndex;
use crate::foundation::error::TileError;
use crate::tile::raster::Raster;
use crate::tile::request::TileRequest;
use crate::tile::source::TileSource;

/// Receives the terminal outcome of tiles in the requests it was registered with.
///
/// Each method is called at most once per tile per request, after the tile's status has been
/// updated. `requests` lists every request this listener belongs to that shared the computation.
/// Callbacks run on scheduler worker threads (or on the cancelling thread) and should return
/// quickly.
pub trait TileComputationListener: Send + Sync {
    /// Tile `index` was computed.
    fn tile_computed(
        &self,
        requests: &[Arc<TileRequest>],
        image: &Arc<dyn TileSource>,
        index: TileIndex,
        tile: &Arc<Raster>,
    ) {
        let _ = (requests, image, index, tile);
    }

    /// Tile `index` was cancelled before its result was delivered.
    fn tile_cancelled(
        &self,
        requests: &[Arc<TileRequest>],
        image: &Arc<dyn TileSource>,
        index: TileIndex,
    ) {
        let _ = (requests, image, index);
    }

    /// Computing tile `index` failed with `error`.
    fn tile_computation_failure(
        &self,
        requests: &[Arc<TileRequest>],
        image: &Arc<dyn TileSource>,
        index: TileIndex,
        error: &TileError,
    ) {
        let _ = (requests, image, index, error);
    }
}

// A panicking listener must not take down the worker or starve the other listeners.
pub(crate) fn guarded(index: TileIndex, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::warn!(tile = %index, "tile listener panicked");
    }
}
