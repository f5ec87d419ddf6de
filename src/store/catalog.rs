use crate::models::ProductRef;
use indexmap::IndexMap;
use std::sync::{PoisonError, RwLock};

/// Lookup of products known to the application.
///
/// The product catalog proper (CRUD, DXF import) lives outside this crate;
/// the engine only needs to turn an id into a [`ProductRef`].
#[cfg_attr(test, mockall::automock)]
pub trait ProductCatalog: Send + Sync {
    fn resolve(&self, product_id: &str) -> Option<ProductRef>;
}

/// Fixed in-memory catalog.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    products: RwLock<IndexMap<String, ProductRef>>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_products(products: impl IntoIterator<Item = ProductRef>) -> Self {
        let catalog = Self::new();
        for product in products {
            catalog.register(product);
        }
        catalog
    }

    pub fn register(&self, product: ProductRef) {
        self.products
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(product.id.clone(), product);
    }
}

impl ProductCatalog for StaticCatalog {
    fn resolve(&self, product_id: &str) -> Option<ProductRef> {
        self.products
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(product_id)
            .cloned()
    }
}
