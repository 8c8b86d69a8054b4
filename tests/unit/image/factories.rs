use super::*;
use crate::foundation::core::{SampleType, TileIndex};
use crate::foundation::error::TileError;
use crate::tile::raster::Raster;
use serde_json::json;

fn layout_json() -> serde_json::Value {
    json!({ "width": 8, "height": 8, "tile_width": 4, "tile_height": 4, "bands": 1 })
}

fn registry() -> OperationRegistry {
    let r = OperationRegistry::new();
    register_builtin_operations(&r).unwrap();
    r
}

fn first_tile(img: &Arc<dyn TileSource>) -> Raster {
    let l = img.layout();
    let mut t = Raster::zeroed(l.raster_layout(), l.tile_origin(TileIndex::new(0, 0))).unwrap();
    img.compute_tile(TileIndex::new(0, 0), &mut t).unwrap();
    t
}

#[test]
fn builtins_are_registered() {
    assert_eq!(
        registry().operation_names(),
        vec!["constant", "gradient", "rescale"]
    );
}

#[test]
fn constant_from_params() {
    let params = ParameterBlock::new()
        .with_param("layout", layout_json())
        .with_param("values", json!([42]));
    let img = registry().create("Constant", &params).unwrap();
    assert_eq!(img.layout().sample_type, SampleType::U8);
    assert_eq!(first_tile(&img).sample(2, 2, 0), Some(42.0));
}

#[test]
fn identical_blocks_share_an_identity() {
    let r = registry();
    let params = ParameterBlock::new()
        .with_param("layout", layout_json())
        .with_param("end", 7.0);
    let a = r.create("gradient", &params).unwrap();
    let b = r.create("gradient", &params).unwrap();
    assert_eq!(a.id(), b.id());

    let other = params.clone().with_param("end", 8.0);
    assert_ne!(r.create("gradient", &other).unwrap().id(), a.id());
}

#[test]
fn rescale_chains_onto_a_source() {
    let r = registry();
    let base = r
        .create(
            "constant",
            &ParameterBlock::new()
                .with_param("layout", layout_json())
                .with_param("values", json!([10])),
        )
        .unwrap();
    let scaled = r
        .create(
            "rescale",
            &ParameterBlock::new()
                .with_source(base)
                .with_param("factor", 3.0)
                .with_param("offset", 2.0),
        )
        .unwrap();
    assert_eq!(first_tile(&scaled).sample(0, 0, 0), Some(32.0));
}

#[test]
fn bad_parameters_surface_as_unsupported() {
    let r = registry();
    let err = r.create("constant", &ParameterBlock::new()).unwrap_err();
    assert!(matches!(err, TileError::Unsupported(_)));
    assert!(err.to_string().contains("missing parameter 'layout'"));

    let err = r.create("rescale", &ParameterBlock::new()).unwrap_err();
    assert!(err.to_string().contains("source 0"));
}
