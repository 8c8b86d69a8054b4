//! Synthetic and point-operation images.

use std::sync::Arc;

use crate::foundation::core::{ImageId, ImageLayout, TileIndex};
use crate::foundation::error::{TileError, TileResult};
use crate::tile::raster::Raster;
use crate::tile::source::TileSource;

// Visit every in-bounds pixel of `tile` and write `f(x, y, band)`.
fn fill(
    tile: &mut Raster,
    layout: &ImageLayout,
    f: impl Fn(i32, i32, u32) -> f32,
) -> TileResult<()> {
    let o = tile.origin();
    let x_end = (o.x + tile.width() as i32).min(layout.width as i32);
    let y_end = (o.y + tile.height() as i32).min(layout.height as i32);
    for y in o.y..y_end {
        for x in o.x..x_end {
            for band in 0..tile.bands() {
                tile.set_sample(x, y, band, f(x, y, band))?;
            }
        }
    }
    Ok(())
}

/// Image with the same value per band everywhere.
#[derive(Debug, Clone)]
pub struct ConstantImage {
    id: ImageId,
    layout: ImageLayout,
    values: Vec<f32>,
}

impl ConstantImage {
    /// `values` holds one value per band.
    pub fn new(id: ImageId, layout: ImageLayout, values: Vec<f32>) -> TileResult<Self> {
        layout.validate()?;
        if values.len() != layout.bands as usize {
            return Err(TileError::invalid_argument(format!(
                "constant image needs {} band values, got {}",
                layout.bands,
                values.len()
            )));
        }
        Ok(Self { id, layout, values })
    }

    /// Band values.
    pub fn values(&self) -> &[f32] {
        &self.values
    }
}

impl TileSource for ConstantImage {
    fn id(&self) -> ImageId {
        self.id
    }

    fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    fn compute_tile(&self, _index: TileIndex, tile: &mut Raster) -> anyhow::Result<()> {
        fill(tile, &self.layout, |_, _, band| self.values[band as usize])?;
        Ok(())
    }

    fn name(&self) -> &str {
        "constant"
    }
}

/// Direction of a [`GradientImage`] ramp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    /// Left to right.
    #[default]
    Horizontal,
    /// Top to bottom.
    Vertical,
}

/// Linear ramp from `start` at the first column (or row) to `end` at the last, on every band.
#[derive(Debug, Clone)]
pub struct GradientImage {
    id: ImageId,
    layout: ImageLayout,
    start: f32,
    end: f32,
    axis: Axis,
}

impl GradientImage {
    /// Build a gradient image.
    pub fn new(
        id: ImageId,
        layout: ImageLayout,
        start: f32,
        end: f32,
        axis: Axis,
    ) -> TileResult<Self> {
        layout.validate()?;
        Ok(Self {
            id,
            layout,
            start,
            end,
            axis,
        })
    }

    fn value_at(&self, x: i32, y: i32) -> f32 {
        let (pos, extent) = match self.axis {
            Axis::Horizontal => (x, self.layout.width),
            Axis::Vertical => (y, self.layout.height),
        };
        if extent <= 1 {
            return self.start;
        }
        let t = pos as f32 / (extent - 1) as f32;
        self.start + (self.end - self.start) * t
    }
}

impl TileSource for GradientImage {
    fn id(&self) -> ImageId {
        self.id
    }

    fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    fn compute_tile(&self, _index: TileIndex, tile: &mut Raster) -> anyhow::Result<()> {
        fill(tile, &self.layout, |x, y, _| self.value_at(x, y))?;
        Ok(())
    }

    fn name(&self) -> &str {
        "gradient"
    }
}

/// `source * factor + offset`, sample by sample.
pub struct RescaleImage {
    id: ImageId,
    source: Arc<dyn TileSource>,
    factor: f32,
    offset: f32,
}

impl std::fmt::Debug for RescaleImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RescaleImage")
            .field("id", &self.id)
            .field("source", &self.source.id())
            .field("factor", &self.factor)
            .field("offset", &self.offset)
            .finish()
    }
}

impl RescaleImage {
    /// Rescale `source`; the result has the source's layout.
    pub fn new(id: ImageId, source: Arc<dyn TileSource>, factor: f32, offset: f32) -> Self {
        Self {
            id,
            source,
            factor,
            offset,
        }
    }
}

impl TileSource for RescaleImage {
    fn id(&self) -> ImageId {
        self.id
    }

    fn layout(&self) -> &ImageLayout {
        self.source.layout()
    }

    fn compute_tile(&self, index: TileIndex, tile: &mut Raster) -> anyhow::Result<()> {
        self.source.compute_tile(index, tile)?;
        let src = tile.clone();
        fill(tile, self.source.layout(), |x, y, band| {
            src.sample(x, y, band).unwrap_or(0.0) * self.factor + self.offset
        })?;
        Ok(())
    }

    fn name(&self) -> &str {
        "rescale"
    }
}

type SampleFn = dyn Fn(i32, i32, u32) -> f32 + Send + Sync;

/// Image whose samples come from a closure of `(x, y, band)`.
pub struct FnImage {
    id: ImageId,
    layout: ImageLayout,
    name: String,
    f: Box<SampleFn>,
}

impl std::fmt::Debug for FnImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnImage")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl FnImage {
    /// Image named `name` evaluating `f` per sample.
    pub fn new(
        id: ImageId,
        layout: ImageLayout,
        name: impl Into<String>,
        f: impl Fn(i32, i32, u32) -> f32 + Send + Sync + 'static,
    ) -> TileResult<Self> {
        layout.validate()?;
        Ok(Self {
            id,
            layout,
            name: name.into(),
            f: Box::new(f),
        })
    }
}

impl TileSource for FnImage {
    fn id(&self) -> ImageId {
        self.id
    }

    fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    fn compute_tile(&self, _index: TileIndex, tile: &mut Raster) -> anyhow::Result<()> {
        fill(tile, &self.layout, &self.f)?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
#[path = "../../tests/unit/image/sources.rs"]
mod tests;
