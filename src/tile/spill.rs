use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;

use crate::foundation::core::{ImageId, RasterLayout, SampleType, TileCost, TileKey, TileOrigin};
use crate::foundation::error::TileResult;
use crate::tile::raster::{Raster, SampleBuffer};

static STORE_COUNTER: AtomicU64 = AtomicU64::new(0);

struct SpilledTile {
    path: PathBuf,
    layout: RasterLayout,
    origin: TileOrigin,
    cost: TileCost,
}

/// Second cache tier for tiles evicted from memory.
///
/// Each store owns a private directory below the configured root, created on the first write and
/// removed on drop. Tile samples are stored as raw little-endian bytes, one file per tile; the
/// geometry stays in the in-memory index. Reading a tile back removes it from disk.
pub(crate) struct SpillStore {
    dir: PathBuf,
    created: bool,
    tiles: HashMap<TileKey, SpilledTile>,
    written: u64,
    read: u64,
}

impl SpillStore {
    pub(crate) fn new(root: &Path) -> Self {
        let dir = root.join(format!(
            "tilecore-{}-{}",
            std::process::id(),
            STORE_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        Self {
            dir,
            created: false,
            tiles: HashMap::new(),
            written: 0,
            read: 0,
        }
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn contains(&self, key: &TileKey) -> bool {
        self.tiles.contains_key(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.tiles.len()
    }

    pub(crate) fn tiles_written(&self) -> u64 {
        self.written
    }

    pub(crate) fn tiles_read(&self) -> u64 {
        self.read
    }

    pub(crate) fn write(&mut self, key: TileKey, tile: &Raster, cost: TileCost) -> TileResult<()> {
        if !self.created {
            fs::create_dir_all(&self.dir).with_context(|| {
                format!("failed to create spill directory '{}'", self.dir.display())
            })?;
            self.created = true;
        }

        let path = self.dir.join(file_name(key));
        fs::write(&path, encode(tile.data()))
            .with_context(|| format!("failed to spill tile to '{}'", path.display()))?;
        self.tiles.insert(
            key,
            SpilledTile {
                path,
                layout: tile.layout(),
                origin: tile.origin(),
                cost,
            },
        );
        self.written = self.written.saturating_add(1);
        Ok(())
    }

    /// Read a spilled tile back and drop its file.
    pub(crate) fn take(&mut self, key: &TileKey) -> TileResult<Option<(Raster, TileCost)>> {
        let Some(entry) = self.tiles.remove(key) else {
            return Ok(None);
        };
        let bytes = fs::read(&entry.path)
            .with_context(|| format!("failed to read spilled tile '{}'", entry.path.display()));
        discard(&entry.path);

        let data = decode(entry.layout.sample_type, &bytes?)?;
        let tile = Raster::new(entry.layout, entry.origin, data)?;
        self.read = self.read.saturating_add(1);
        Ok(Some((tile, entry.cost)))
    }

    pub(crate) fn remove(&mut self, key: &TileKey) -> bool {
        match self.tiles.remove(key) {
            Some(entry) => {
                discard(&entry.path);
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove_owner(&mut self, owner: ImageId) -> usize {
        let keys: Vec<TileKey> = self.tiles.keys().filter(|k| k.image == owner).copied().collect();
        keys.iter().filter(|k| self.remove(k)).count()
    }

    pub(crate) fn clear(&mut self) {
        for (_, entry) in self.tiles.drain() {
            discard(&entry.path);
        }
    }
}

impl Drop for SpillStore {
    fn drop(&mut self) {
        self.clear();
        if self.created
            && let Err(e) = fs::remove_dir(&self.dir)
        {
            tracing::debug!(dir = %self.dir.display(), error = %e, "spill directory not removed");
        }
    }
}

fn file_name(key: TileKey) -> String {
    format!("{}_{}_{}.tile", key.image, key.index.x, key.index.y)
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        tracing::debug!(path = %path.display(), error = %e, "spilled tile not deleted");
    }
}

fn encode(data: &SampleBuffer) -> Vec<u8> {
    match data {
        SampleBuffer::U8(v) => v.clone(),
        SampleBuffer::U16(v) => v.iter().flat_map(|s| s.to_le_bytes()).collect(),
        SampleBuffer::F32(v) => v.iter().flat_map(|s| s.to_le_bytes()).collect(),
    }
}

fn decode(sample_type: SampleType, bytes: &[u8]) -> anyhow::Result<SampleBuffer> {
    let width = sample_type.bytes_per_sample();
    anyhow::ensure!(
        bytes.len() % width == 0,
        "spilled tile has {} bytes, not a multiple of {width}",
        bytes.len()
    );
    Ok(match sample_type {
        SampleType::U8 => SampleBuffer::U8(bytes.to_vec()),
        SampleType::U16 => SampleBuffer::U16(
            bytes
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect(),
        ),
        SampleType::F32 => SampleBuffer::F32(
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
    })
}

#[cfg(test)]
#[path = "../../tests/unit/tile/spill.rs"]
mod tests;
