use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::foundation::error::{TileError, TileResult};

/// Column/row index of a tile within an image's tile grid.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct TileIndex {
    /// Tile column.
    pub x: i32,
    /// Tile row.
    pub y: i32,
}

impl TileIndex {
    /// Construct a tile index.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for TileIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Pixel position of a tile's upper-left corner in image coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TileOrigin {
    /// Pixel column.
    pub x: i32,
    /// Pixel row.
    pub y: i32,
}

impl TileOrigin {
    /// Construct a tile origin.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Storage type of a single sample.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SampleType {
    /// Unsigned 8-bit samples.
    #[default]
    U8,
    /// Unsigned 16-bit samples.
    U16,
    /// 32-bit float samples.
    F32,
}

impl SampleType {
    /// Size of one sample in bytes.
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::F32 => 4,
        }
    }
}

/// Sample layout of a single tile buffer: dimensions, band count and sample type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RasterLayout {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Samples per pixel.
    pub bands: u32,
    /// Storage type of each sample.
    pub sample_type: SampleType,
}

impl RasterLayout {
    /// Number of samples a buffer with this layout holds.
    pub fn sample_count(&self) -> TileResult<usize> {
        if self.width == 0 || self.height == 0 || self.bands == 0 {
            return Err(TileError::invalid_argument(
                "raster layout dimensions and band count must be > 0",
            ));
        }
        (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|px| px.checked_mul(self.bands as usize))
            .ok_or_else(|| TileError::invalid_argument("raster layout sample count overflows"))
    }

    /// Number of bytes a buffer with this layout occupies.
    pub fn byte_len(&self) -> TileResult<usize> {
        self.sample_count()?
            .checked_mul(self.sample_type.bytes_per_sample())
            .ok_or_else(|| TileError::invalid_argument("raster layout byte size overflows"))
    }
}

/// Geometry of a tiled image: bounds, tile size and sample layout.
///
/// Tiles are laid out on a grid anchored at pixel `(0, 0)`. Edge tiles keep the full tile size;
/// samples outside the image bounds are left untouched by compute logic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ImageLayout {
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Tile width in pixels.
    pub tile_width: u32,
    /// Tile height in pixels.
    pub tile_height: u32,
    /// Samples per pixel.
    pub bands: u32,
    /// Storage type of each sample.
    #[serde(default)]
    pub sample_type: SampleType,
}

impl ImageLayout {
    /// Reject zero-sized images, tiles or band counts.
    pub fn validate(&self) -> TileResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(TileError::invalid_argument("image dimensions must be > 0"));
        }
        if self.tile_width == 0 || self.tile_height == 0 {
            return Err(TileError::invalid_argument("tile dimensions must be > 0"));
        }
        if i32::try_from(self.width).is_err() || i32::try_from(self.height).is_err() {
            return Err(TileError::invalid_argument("image dimensions exceed i32"));
        }
        if i32::try_from(self.tile_width).is_err() || i32::try_from(self.tile_height).is_err() {
            return Err(TileError::invalid_argument("tile dimensions exceed i32"));
        }
        self.raster_layout().sample_count().map(|_| ())
    }

    /// Number of tile columns.
    pub fn num_x_tiles(&self) -> u32 {
        self.width.div_ceil(self.tile_width.max(1))
    }

    /// Number of tile rows.
    pub fn num_y_tiles(&self) -> u32 {
        self.height.div_ceil(self.tile_height.max(1))
    }

    /// Total tile count.
    pub fn num_tiles(&self) -> u64 {
        u64::from(self.num_x_tiles()) * u64::from(self.num_y_tiles())
    }

    /// Whether `index` lies inside the tile grid.
    pub fn contains_tile(&self, index: TileIndex) -> bool {
        index.x >= 0
            && index.y >= 0
            && (index.x as u32) < self.num_x_tiles()
            && (index.y as u32) < self.num_y_tiles()
    }

    /// Layout of one tile buffer.
    pub fn raster_layout(&self) -> RasterLayout {
        RasterLayout {
            width: self.tile_width,
            height: self.tile_height,
            bands: self.bands,
            sample_type: self.sample_type,
        }
    }

    /// Upper-left pixel of the tile at `index`. Saturates at the `i32` range.
    pub fn tile_origin(&self, index: TileIndex) -> TileOrigin {
        let tw = i32::try_from(self.tile_width).unwrap_or(i32::MAX);
        let th = i32::try_from(self.tile_height).unwrap_or(i32::MAX);
        TileOrigin {
            x: index.x.saturating_mul(tw),
            y: index.y.saturating_mul(th),
        }
    }

    /// Every tile index in row-major order.
    pub fn all_tile_indices(&self) -> Vec<TileIndex> {
        let (nx, ny) = (self.num_x_tiles() as i32, self.num_y_tiles() as i32);
        (0..ny)
            .flat_map(|y| (0..nx).map(move |x| TileIndex::new(x, y)))
            .collect()
    }
}

static UNIQUE_IMAGE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// 128-bit image identity used to key cached tiles.
///
/// Ids derived from a content description (see [`crate::ImageFingerprinter`]) are equal for
/// identical operation chains, so their tiles are shared in the cache. [`ImageId::unique`]
/// yields a process-unique id for images without a stable description.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImageId {
    /// High 64 bits.
    pub hi: u64,
    /// Low 64 bits.
    pub lo: u64,
}

impl ImageId {
    /// A process-unique id. The high word is zero, which content fingerprints avoid.
    pub fn unique() -> Self {
        Self {
            hi: 0,
            lo: UNIQUE_IMAGE_COUNTER.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}{:016x}", self.hi, self.lo)
    }
}

/// Cache identity of a tile: owning image plus tile index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileKey {
    /// Owning image.
    pub image: ImageId,
    /// Tile index within the owner.
    pub index: TileIndex,
}

impl TileKey {
    /// Construct a tile key.
    pub const fn new(image: ImageId, index: TileIndex) -> Self {
        Self { image, index }
    }
}

/// Opaque, comparable compute-cost metric attached to cached tiles.
///
/// The scheduler records the wall-clock compute time in microseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileCost(pub u64);

#[cfg(test)]
#[path = "../../tests/unit/foundation/core.rs"]
mod tests;
