//! Operation factories for the built-in images.

use std::sync::Arc;

use crate::foundation::core::ImageLayout;
use crate::foundation::error::TileResult;
use crate::image::sources::{Axis, ConstantImage, GradientImage, RescaleImage};
use crate::registry::operation_registry::{OperationRegistry, TileOpFactory};
use crate::registry::params::ParameterBlock;
use crate::tile::source::TileSource;

/// Product name the built-in factories are registered under.
pub const BUILTIN_PRODUCT: &str = "tilecore";

/// `constant`: parameters `layout` and `values` (one per band).
#[derive(Debug, Default, Clone, Copy)]
pub struct ConstantFactory;

impl TileOpFactory for ConstantFactory {
    fn create(&self, params: &ParameterBlock) -> TileResult<Option<Arc<dyn TileSource>>> {
        let layout: ImageLayout = params.require("layout")?;
        let values: Vec<f32> = params.require("values")?;
        let image = ConstantImage::new(params.fingerprint("constant"), layout, values)?;
        Ok(Some(Arc::new(image)))
    }
}

/// `gradient`: parameters `layout`, optional `start` (0), `end` (255) and `axis` (horizontal).
#[derive(Debug, Default, Clone, Copy)]
pub struct GradientFactory;

impl TileOpFactory for GradientFactory {
    fn create(&self, params: &ParameterBlock) -> TileResult<Option<Arc<dyn TileSource>>> {
        let layout: ImageLayout = params.require("layout")?;
        let start = params.get::<f32>("start")?.unwrap_or(0.0);
        let end = params.get::<f32>("end")?.unwrap_or(255.0);
        let axis = params.get::<Axis>("axis")?.unwrap_or_default();
        let image = GradientImage::new(params.fingerprint("gradient"), layout, start, end, axis)?;
        Ok(Some(Arc::new(image)))
    }
}

/// `rescale`: one source, optional `factor` (1) and `offset` (0).
#[derive(Debug, Default, Clone, Copy)]
pub struct RescaleFactory;

impl TileOpFactory for RescaleFactory {
    fn create(&self, params: &ParameterBlock) -> TileResult<Option<Arc<dyn TileSource>>> {
        let source = Arc::clone(params.source(0)?);
        let factor = params.get::<f32>("factor")?.unwrap_or(1.0);
        let offset = params.get::<f32>("offset")?.unwrap_or(0.0);
        Ok(Some(Arc::new(RescaleImage::new(
            params.fingerprint("rescale"),
            source,
            factor,
            offset,
        ))))
    }
}

/// Register the built-in operations under [`BUILTIN_PRODUCT`].
pub fn register_builtin_operations(registry: &OperationRegistry) -> TileResult<()> {
    registry.register_factory("constant", BUILTIN_PRODUCT, "constant", Arc::new(ConstantFactory))?;
    registry.register_factory("gradient", BUILTIN_PRODUCT, "gradient", Arc::new(GradientFactory))?;
    registry.register_factory("rescale", BUILTIN_PRODUCT, "rescale", Arc::new(RescaleFactory))?;
    Ok(())
}

#[cfg(test)]
#[path = "../../tests/unit/image/factories.rs"]
mod tests;
