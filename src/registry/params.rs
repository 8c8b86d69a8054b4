use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::foundation::core::ImageId;
use crate::foundation::error::{TileError, TileResult};
use crate::foundation::fingerprint::ImageFingerprinter;
use crate::tile::source::TileSource;

/// Source images and named parameters handed to an operation factory.
#[derive(Clone, Default)]
pub struct ParameterBlock {
    sources: Vec<Arc<dyn TileSource>>,
    params: Map<String, Value>,
}

impl std::fmt::Debug for ParameterBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterBlock")
            .field(
                "sources",
                &self.sources.iter().map(|s| s.id()).collect::<Vec<_>>(),
            )
            .field("params", &self.params)
            .finish()
    }
}

impl ParameterBlock {
    /// Empty block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Block whose parameters are the fields of a JSON object.
    pub fn from_json(value: Value) -> TileResult<Self> {
        match value {
            Value::Object(params) => Ok(Self {
                sources: Vec::new(),
                params,
            }),
            Value::Null => Ok(Self::default()),
            other => Err(TileError::invalid_argument(format!(
                "operation parameters must be a JSON object, got {other}"
            ))),
        }
    }

    /// Append a source image.
    pub fn with_source(mut self, source: Arc<dyn TileSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Set parameter `name`.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_param(name, value);
        self
    }

    /// Append a source image.
    pub fn add_source(&mut self, source: Arc<dyn TileSource>) {
        self.sources.push(source);
    }

    /// Set parameter `name`, replacing any previous value.
    pub fn set_param(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.params.insert(name.into(), value.into());
    }

    /// Source images in insertion order.
    pub fn sources(&self) -> &[Arc<dyn TileSource>] {
        &self.sources
    }

    /// Source image `i`.
    pub fn source(&self, i: usize) -> TileResult<&Arc<dyn TileSource>> {
        self.sources.get(i).ok_or_else(|| {
            TileError::invalid_argument(format!(
                "source {i} requested but only {} given",
                self.sources.len()
            ))
        })
    }

    /// All parameters.
    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    /// Raw value of parameter `name`.
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    /// Parameter `name` decoded as `T`, or `None` when absent.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> TileResult<Option<T>> {
        self.params
            .get(name)
            .map(|v| {
                T::deserialize(v).map_err(|e| {
                    TileError::invalid_argument(format!("parameter '{name}': {e}"))
                })
            })
            .transpose()
    }

    /// Parameter `name` decoded as `T`; absent parameters are an error.
    pub fn require<T: DeserializeOwned>(&self, name: &str) -> TileResult<T> {
        self.get(name)?
            .ok_or_else(|| TileError::invalid_argument(format!("missing parameter '{name}'")))
    }

    /// Content identity of applying operation `op` to this block.
    ///
    /// Equal operation names (case-insensitive), source ids and parameters give equal ids, so
    /// images built from identical blocks share cached tiles.
    pub fn fingerprint(&self, op: &str) -> ImageId {
        let mut fp = ImageFingerprinter::new();
        fp.write_str(&op.to_lowercase())
            .write_u64(self.sources.len() as u64);
        for source in &self.sources {
            fp.write_image_id(source.id());
        }
        // serde_json::Map keeps keys sorted, so the encoding is canonical.
        fp.write_str(&Value::Object(self.params.clone()).to_string());
        fp.finish()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/registry/params.rs"]
mod tests;
