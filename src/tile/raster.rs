use crate::foundation::core::{RasterLayout, SampleType, TileOrigin};
use crate::foundation::error::{TileError, TileResult};

/// Typed backing storage of a tile.
#[derive(Clone, Debug, PartialEq)]
pub enum SampleBuffer {
    /// Unsigned 8-bit samples.
    U8(Vec<u8>),
    /// Unsigned 16-bit samples.
    U16(Vec<u16>),
    /// 32-bit float samples.
    F32(Vec<f32>),
}

impl SampleBuffer {
    /// Allocate a zero-filled buffer of `len` samples.
    pub fn zeroed(sample_type: SampleType, len: usize) -> Self {
        match sample_type {
            SampleType::U8 => Self::U8(vec![0; len]),
            SampleType::U16 => Self::U16(vec![0; len]),
            SampleType::F32 => Self::F32(vec![0.0; len]),
        }
    }

    /// Storage type of the samples.
    pub fn sample_type(&self) -> SampleType {
        match self {
            Self::U8(_) => SampleType::U8,
            Self::U16(_) => SampleType::U16,
            Self::F32(_) => SampleType::F32,
        }
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        match self {
            Self::U8(v) => v.len(),
            Self::U16(v) => v.len(),
            Self::F32(v) => v.len(),
        }
    }

    /// Whether the buffer holds no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the samples in bytes.
    pub fn byte_len(&self) -> usize {
        self.len()
            .saturating_mul(self.sample_type().bytes_per_sample())
    }

    /// Overwrite every sample with zero.
    pub fn fill_zero(&mut self) {
        match self {
            Self::U8(v) => v.fill(0),
            Self::U16(v) => v.fill(0),
            Self::F32(v) => v.fill(0.0),
        }
    }

    /// Whether every sample is zero.
    pub fn is_zeroed(&self) -> bool {
        match self {
            Self::U8(v) => v.iter().all(|&s| s == 0),
            Self::U16(v) => v.iter().all(|&s| s == 0),
            Self::F32(v) => v.iter().all(|&s| s == 0.0),
        }
    }

    fn get_f32(&self, i: usize) -> f32 {
        match self {
            Self::U8(v) => f32::from(v[i]),
            Self::U16(v) => f32::from(v[i]),
            Self::F32(v) => v[i],
        }
    }

    fn set_f32(&mut self, i: usize, value: f32) {
        match self {
            Self::U8(v) => v[i] = value.round().clamp(0.0, f32::from(u8::MAX)) as u8,
            Self::U16(v) => v[i] = value.round().clamp(0.0, f32::from(u16::MAX)) as u16,
            Self::F32(v) => v[i] = value,
        }
    }
}

/// A writable tile: pixel-interleaved samples positioned in image coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct Raster {
    origin: TileOrigin,
    layout: RasterLayout,
    data: SampleBuffer,
}

impl Raster {
    /// Wrap `data` as a raster, checking that it matches `layout` in type and length.
    pub fn new(layout: RasterLayout, origin: TileOrigin, data: SampleBuffer) -> TileResult<Self> {
        let expected = layout.sample_count()?;
        if data.sample_type() != layout.sample_type {
            return Err(TileError::invalid_argument(
                "raster buffer sample type does not match layout",
            ));
        }
        if data.len() != expected {
            return Err(TileError::invalid_argument(format!(
                "raster buffer holds {} samples, layout needs {expected}",
                data.len()
            )));
        }
        Ok(Self {
            origin,
            layout,
            data,
        })
    }

    /// Allocate a zero-filled raster.
    pub fn zeroed(layout: RasterLayout, origin: TileOrigin) -> TileResult<Self> {
        let len = layout.sample_count()?;
        Self::new(layout, origin, SampleBuffer::zeroed(layout.sample_type, len))
    }

    /// Upper-left pixel in image coordinates.
    pub fn origin(&self) -> TileOrigin {
        self.origin
    }

    /// Sample layout.
    pub fn layout(&self) -> RasterLayout {
        self.layout
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.layout.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.layout.height
    }

    /// Samples per pixel.
    pub fn bands(&self) -> u32 {
        self.layout.bands
    }

    /// Backing samples.
    pub fn data(&self) -> &SampleBuffer {
        &self.data
    }

    /// Mutable backing samples.
    pub fn data_mut(&mut self) -> &mut SampleBuffer {
        &mut self.data
    }

    /// Memory footprint of the samples in bytes.
    pub fn byte_len(&self) -> usize {
        self.data.byte_len()
    }

    /// Give up the raster and keep its backing buffer.
    pub fn into_buffer(self) -> SampleBuffer {
        self.data
    }

    fn sample_offset(&self, x: i32, y: i32, band: u32) -> Option<usize> {
        let lx = x.checked_sub(self.origin.x)?;
        let ly = y.checked_sub(self.origin.y)?;
        if lx < 0 || ly < 0 || band >= self.layout.bands {
            return None;
        }
        let (lx, ly) = (lx as u32, ly as u32);
        if lx >= self.layout.width || ly >= self.layout.height {
            return None;
        }
        let pixel = ly as usize * self.layout.width as usize + lx as usize;
        Some(pixel * self.layout.bands as usize + band as usize)
    }

    /// Read a sample at image coordinates `(x, y)` as `f32`; `None` outside the tile.
    pub fn sample(&self, x: i32, y: i32, band: u32) -> Option<f32> {
        self.sample_offset(x, y, band).map(|i| self.data.get_f32(i))
    }

    /// Write a sample at image coordinates `(x, y)`, rounding and clamping for integer types.
    pub fn set_sample(&mut self, x: i32, y: i32, band: u32, value: f32) -> TileResult<()> {
        let i = self.sample_offset(x, y, band).ok_or_else(|| {
            TileError::invalid_argument(format!(
                "sample ({x}, {y}) band {band} is outside the tile"
            ))
        })?;
        self.data.set_f32(i, value);
        Ok(())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/tile/raster.rs"]
mod tests;
