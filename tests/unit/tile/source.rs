use std::sync::Arc;

use super::*;
use crate::foundation::core::SampleType;
use crate::foundation::error::{TileError, TileResult};

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

    fn name(&self) -> &str {
        "blank"
    }
}

fn blank() -> Arc<dyn TileSource> {
    Arc::new(Blank {
        id: ImageId { hi: 1, lo: 2 },
        layout: ImageLayout {
            width: 8,
            height: 8,
            tile_width: 4,
            tile_height: 4,
            bands: 1,
            sample_type: SampleType::U8,
        },
    })
}

#[test]
fn debug_shows_name_and_id() {
    let text = format!("{:?}", blank());
    assert!(text.contains(r#"name: "blank""#));
    assert!(text.contains("hi: 1"));
}

#[test]
fn results_holding_sources_can_be_unwrapped() {
    let ok: TileResult<Arc<dyn TileSource>> = Ok(blank());
    assert_eq!(ok.unwrap().name(), "blank");

    let failed: TileResult<Arc<dyn TileSource>> = Err(TileError::unsupported("no factory"));
    assert!(matches!(failed.unwrap_err(), TileError::Unsupported(_)));
}
