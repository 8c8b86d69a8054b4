use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::foundation::error::{TileError, TileResult};
use crate::graph::key::NameKey;
use crate::graph::operation_graph::OperationGraph;
use crate::registry::params::ParameterBlock;
use crate::tile::source::TileSource;

/// Builds images for one operation.
pub trait TileOpFactory: Send + Sync {
    /// Build an image from `params`, or `Ok(None)` to let the next factory in preference order
    /// try.
    fn create(&self, params: &ParameterBlock) -> TileResult<Option<Arc<dyn TileSource>>>;
}

impl<F> TileOpFactory for F
where
    F: Fn(&ParameterBlock) -> TileResult<Option<Arc<dyn TileSource>>> + Send + Sync,
{
    fn create(&self, params: &ParameterBlock) -> TileResult<Option<Arc<dyn TileSource>>> {
        self(params)
    }
}

/// A factory together with the names it was registered under.
#[derive(Clone)]
pub struct RegisteredFactory {
    product: NameKey,
    name: NameKey,
    factory: Arc<dyn TileOpFactory>,
}

impl std::fmt::Debug for RegisteredFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredFactory")
            .field("product", &self.product.as_str())
            .field("name", &self.name.as_str())
            .finish_non_exhaustive()
    }
}

impl RegisteredFactory {
    /// Product (implementation family) the factory belongs to.
    pub fn product(&self) -> &str {
        self.product.as_str()
    }

    /// Factory name, unique within its product.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// The factory.
    pub fn factory(&self) -> &Arc<dyn TileOpFactory> {
        &self.factory
    }
}

type FactoryGraph = OperationGraph<NameKey, Arc<RegisteredFactory>>;
type ProductGraph = OperationGraph<NameKey, Arc<FactoryGraph>>;

/// Per-operation registry of competing factories ordered by declared preferences.
///
/// Each operation name owns a graph of products; each product owns a graph of factories. The
/// factory order for an operation is every product in product-preference order, each expanded
/// into its factories in factory-preference order. Names are case-insensitive.
#[derive(Default)]
pub struct OperationRegistry {
    ops: Mutex<HashMap<NameKey, Arc<ProductGraph>>>,
}

impl std::fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("operations", &self.operation_names())
            .finish()
    }
}

fn non_empty(what: &str, name: &str) -> TileResult<NameKey> {
    if name.trim().is_empty() {
        return Err(TileError::invalid_argument(format!("{what} name is empty")));
    }
    Ok(NameKey::new(name))
}

impl OperationRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<NameKey, Arc<ProductGraph>>> {
        self.ops.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn products(&self, op: &str) -> TileResult<Arc<ProductGraph>> {
        self.lock()
            .get(&NameKey::new(op))
            .cloned()
            .ok_or_else(|| TileError::invalid_argument(format!("unknown operation '{op}'")))
    }

    fn factories(&self, op: &str, product: &str) -> TileResult<Arc<FactoryGraph>> {
        self.products(op)?
            .payload(&NameKey::new(product))
            .ok_or_else(|| {
                TileError::invalid_argument(format!(
                    "unknown product '{product}' for operation '{op}'"
                ))
            })
    }

    /// Registered operation names, sorted.
    pub fn operation_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock()
            .keys()
            .map(|k| k.as_str().to_owned())
            .collect();
        names.sort_by_key(|n| n.to_lowercase());
        names
    }

    /// Register `factory` as `name` under `product` of operation `op`, creating the operation
    /// and product on first use. A second factory with the same name in the same product is
    /// rejected.
    pub fn register_factory(
        &self,
        op: &str,
        product: &str,
        name: &str,
        factory: Arc<dyn TileOpFactory>,
    ) -> TileResult<()> {
        let op_key = non_empty("operation", op)?;
        let product_key = non_empty("product", product)?;
        let name_key = non_empty("factory", name)?;

        let products = Arc::clone(self.lock().entry(op_key).or_default());
        let factories = match products.payload(&product_key) {
            Some(f) => f,
            None => {
                let f = Arc::new(FactoryGraph::new());
                if !products.add_node(product_key.clone(), Arc::clone(&f)) {
                    // Lost a race with a concurrent registration of the same product.
                    products.payload(&product_key).unwrap_or(f)
                } else {
                    f
                }
            }
        };

        let entry = Arc::new(RegisteredFactory {
            product: product_key,
            name: name_key.clone(),
            factory,
        });
        if !factories.add_node(name_key, entry) {
            return Err(TileError::invalid_argument(format!(
                "factory '{name}' is already registered for product '{product}' of '{op}'"
            )));
        }
        tracing::debug!(op, product, name, "registered factory");
        Ok(())
    }

    /// Remove factory `name` and every preference that mentions it.
    pub fn unregister_factory(&self, op: &str, product: &str, name: &str) -> TileResult<()> {
        if !self.factories(op, product)?.remove_node(&NameKey::new(name)) {
            return Err(TileError::invalid_argument(format!(
                "factory '{name}' is not registered for product '{product}' of '{op}'"
            )));
        }
        tracing::debug!(op, product, name, "unregistered factory");
        Ok(())
    }

    /// Prefer product `preferred` over `other` for operation `op`.
    pub fn set_product_preference(
        &self,
        op: &str,
        preferred: &str,
        other: &str,
    ) -> TileResult<bool> {
        self.products(op)?
            .set_preference(&NameKey::new(preferred), &NameKey::new(other))
    }

    /// Remove a product preference; `false` when it was not set.
    pub fn unset_product_preference(
        &self,
        op: &str,
        preferred: &str,
        other: &str,
    ) -> TileResult<bool> {
        Ok(self
            .products(op)?
            .unset_preference(&NameKey::new(preferred), &NameKey::new(other)))
    }

    /// Prefer factory `preferred` over `other` within `product` of operation `op`.
    pub fn set_factory_preference(
        &self,
        op: &str,
        product: &str,
        preferred: &str,
        other: &str,
    ) -> TileResult<bool> {
        self.factories(op, product)?
            .set_preference(&NameKey::new(preferred), &NameKey::new(other))
    }

    /// Remove a factory preference; `false` when it was not set.
    pub fn unset_factory_preference(
        &self,
        op: &str,
        product: &str,
        preferred: &str,
        other: &str,
    ) -> TileResult<bool> {
        Ok(self
            .factories(op, product)?
            .unset_preference(&NameKey::new(preferred), &NameKey::new(other)))
    }

    /// Product names of `op` in preference order, or `None` on a preference cycle.
    pub fn ordered_products(&self, op: &str) -> TileResult<Option<Vec<String>>> {
        Ok(self
            .products(op)?
            .ordered_keys()
            .map(|keys| keys.into_iter().map(|k| k.as_str().to_owned()).collect()))
    }

    /// Factories of `op` in preference order, or `None` when the product graph or any factory
    /// graph contains a cycle.
    pub fn ordered_factories(&self, op: &str) -> TileResult<Option<Vec<Arc<RegisteredFactory>>>> {
        let Some(products) = self.products(op)?.ordered_list() else {
            return Ok(None);
        };
        let mut out = Vec::new();
        for factories in products {
            match factories.ordered_list() {
                Some(list) => out.extend(list),
                None => return Ok(None),
            }
        }
        Ok(Some(out))
    }

    /// Factories of `op` in registration order, ignoring preferences.
    pub fn registered_factories(&self, op: &str) -> TileResult<Vec<Arc<RegisteredFactory>>> {
        Ok(self
            .products(op)?
            .nodes()
            .into_iter()
            .flat_map(|factories| factories.nodes())
            .collect())
    }

    /// Build an image for `op` with the first factory, in preference order, that produces one.
    ///
    /// With cyclic preferences the registration order is used instead. A factory error is
    /// logged and the next factory tried. Fails with [`TileError::Unsupported`] when no
    /// factory produced an image.
    #[tracing::instrument(skip(self, params))]
    pub fn create(&self, op: &str, params: &ParameterBlock) -> TileResult<Arc<dyn TileSource>> {
        let candidates = match self.ordered_factories(op)? {
            Some(list) => list,
            None => {
                tracing::warn!("preference cycle, falling back to registration order");
                self.registered_factories(op)?
            }
        };

        let mut last_error = None;
        for candidate in &candidates {
            match candidate.factory.create(params) {
                Ok(Some(image)) => {
                    tracing::debug!(
                        product = candidate.product(),
                        factory = candidate.name(),
                        image = %image.id(),
                        "created image"
                    );
                    return Ok(image);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(factory = candidate.name(), error = %e, "factory failed");
                    last_error = Some(e);
                }
            }
        }

        Err(TileError::unsupported(match last_error {
            Some(e) => format!("no factory for '{op}' could create an image; last error: {e}"),
            None => format!(
                "no factory for '{op}' could create an image ({} tried)",
                candidates.len()
            ),
        }))
    }
}

#[cfg(test)]
#[path = "../../tests/unit/registry/operation_registry.rs"]
mod tests;
