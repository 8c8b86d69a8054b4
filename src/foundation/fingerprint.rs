use xxhash_rust::xxh3::Xxh3;

use crate::foundation::core::{ImageId, ImageLayout, SampleType};

const XXH3_SEED: u64 = 0x5f1c_2e4d_a7b3_9061;

/// Stable 128-bit hasher for deriving content-addressed [`ImageId`]s.
///
/// Feed it everything that determines an image's pixels (operation name, parameters, source
/// ids, layout) and call [`ImageFingerprinter::finish`]. Writes are length/tag prefixed so that
/// different field sequences cannot collide by concatenation.
pub struct ImageFingerprinter {
    inner: Xxh3,
}

impl Default for ImageFingerprinter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ImageFingerprinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageFingerprinter").finish_non_exhaustive()
    }
}

impl ImageFingerprinter {
    /// Start a fingerprint.
    pub fn new() -> Self {
        Self {
            inner: Xxh3::with_seed(XXH3_SEED),
        }
    }

    fn write_bytes(&mut self, b: &[u8]) {
        self.inner.update(b);
    }

    /// Hash a string, length prefixed.
    pub fn write_str(&mut self, s: &str) -> &mut Self {
        self.write_u64(s.len() as u64);
        self.write_bytes(s.as_bytes());
        self
    }

    /// Hash a `u32`.
    pub fn write_u32(&mut self, v: u32) -> &mut Self {
        self.write_bytes(&v.to_le_bytes());
        self
    }

    /// Hash a `u64`.
    pub fn write_u64(&mut self, v: u64) -> &mut Self {
        self.write_bytes(&v.to_le_bytes());
        self
    }

    /// Hash an `f64` by bit pattern.
    pub fn write_f64(&mut self, v: f64) -> &mut Self {
        self.write_u64(v.to_bits())
    }

    /// Hash another image's identity, e.g. an operation source.
    pub fn write_image_id(&mut self, id: ImageId) -> &mut Self {
        self.write_u64(id.hi);
        self.write_u64(id.lo)
    }

    /// Hash the full image geometry.
    pub fn write_layout(&mut self, layout: &ImageLayout) -> &mut Self {
        self.write_u32(layout.width)
            .write_u32(layout.height)
            .write_u32(layout.tile_width)
            .write_u32(layout.tile_height)
            .write_u32(layout.bands);
        let tag = match layout.sample_type {
            SampleType::U8 => 0u8,
            SampleType::U16 => 1,
            SampleType::F32 => 2,
        };
        self.write_bytes(&[tag]);
        self
    }

    /// Finish into an [`ImageId`]. Content ids never have a zero high word.
    pub fn finish(&self) -> ImageId {
        let v = self.inner.digest128();
        let hi = (v >> 64) as u64;
        ImageId {
            hi: if hi == 0 { 1 } else { hi },
            lo: v as u64,
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/fingerprint.rs"]
mod tests;
