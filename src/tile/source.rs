use crate::foundation::core::{ImageId, ImageLayout, TileIndex};
use crate::tile::raster::Raster;

/// Pixel logic of a tiled image.
///
/// The scheduler owns buffering, caching and dispatch; a source only fills one tile at a time.
/// `compute_tile` may run concurrently on several worker threads for different tiles.
pub trait TileSource: Send + Sync {
    /// Identity used to key this image's tiles in the cache.
    fn id(&self) -> ImageId;

    /// Image geometry and tile grid.
    fn layout(&self) -> &ImageLayout;

    /// Fill `tile` (already zeroed and positioned at the tile's origin) with tile `index`.
    fn compute_tile(&self, index: TileIndex, tile: &mut Raster) -> anyhow::Result<()>;

    /// Short name for logs.
    fn name(&self) -> &str {
        "image"
    }
}

impl std::fmt::Debug for dyn TileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileSource")
            .field("name", &self.name())
            .field("id", &self.id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/tile/source.rs"]
mod tests;
