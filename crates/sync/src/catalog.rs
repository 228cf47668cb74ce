//! Product lookup collaborator.
//!
//! The cart stores only product ids; price and display data come from a
//! [`ProductCatalog`]. Lookups are cached with `moka` since the same products
//! are resolved on every load and merge.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use moka::future::Cache;
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::{debug, instrument};

use cartsync_core::{CurrencyCode, Price, Product, ProductId};

use crate::config::ProductCacheConfig;
use crate::remote::StoreError;

/// Lookup of product snapshots by id.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Fetch a product, or `None` if the catalog does not know it.
    async fn product(&self, id: &ProductId) -> Result<Option<Product>, StoreError>;
}

#[async_trait]
impl<C: ProductCatalog + ?Sized> ProductCatalog for Arc<C> {
    async fn product(&self, id: &ProductId) -> Result<Option<Product>, StoreError> {
        (**self).product(id).await
    }
}

// =============================================================================
// CachedCatalog
// =============================================================================

/// Caching wrapper around any catalog.
///
/// Only hits are cached; unknown products and errors are retried next time.
pub struct CachedCatalog<C> {
    inner: C,
    cache: Cache<ProductId, Product>,
}

impl<C: ProductCatalog> CachedCatalog<C> {
    /// Wrap `inner` with a cache sized by `config`.
    #[must_use]
    pub fn new(inner: C, config: ProductCacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(config.time_to_live)
            .build();

        Self { inner, cache }
    }

    /// Drop a cached entry, e.g. after a price change.
    pub async fn invalidate(&self, id: &ProductId) {
        self.cache.invalidate(id).await;
    }
}

#[async_trait]
impl<C: ProductCatalog> ProductCatalog for CachedCatalog<C> {
    async fn product(&self, id: &ProductId) -> Result<Option<Product>, StoreError> {
        if let Some(product) = self.cache.get(id).await {
            debug!(product_id = %id, "Product cache hit");
            return Ok(Some(product));
        }

        let product = self.inner.product(id).await?;
        if let Some(product) = &product {
            self.cache.insert(id.clone(), product.clone()).await;
        }
        Ok(product)
    }
}

// =============================================================================
// StaticCatalog
// =============================================================================

/// Fixed in-memory catalog.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    products: HashMap<ProductId, Product>,
}

impl StaticCatalog {
    #[must_use]
    pub fn new(products: impl IntoIterator<Item = Product>) -> Self {
        Self {
            products: products.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }
}

#[async_trait]
impl ProductCatalog for StaticCatalog {
    async fn product(&self, id: &ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.products.get(id).cloned())
    }
}

// =============================================================================
// PgProductCatalog
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: String,
    name: String,
    price: Decimal,
    currency: String,
    images: Vec<String>,
    stock: Option<i32>,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Self {
            id: ProductId::new(row.id),
            name: row.name,
            price: Price::new(
                row.price,
                CurrencyCode::from_code(&row.currency).unwrap_or_default(),
            ),
            images: row.images,
            stock: row.stock.and_then(|s| u32::try_from(s).ok()),
        }
    }
}

/// Catalog backed by the `products` table.
#[derive(Clone)]
pub struct PgProductCatalog {
    pool: PgPool,
}

impl PgProductCatalog {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductCatalog for PgProductCatalog {
    #[instrument(skip(self))]
    async fn product(&self, id: &ProductId) -> Result<Option<Product>, StoreError> {
        let row: Option<ProductRow> = sqlx::query_as(
            "SELECT id, name, price, currency, images, stock FROM products WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Product::from))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingCatalog {
        inner: StaticCatalog,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProductCatalog for CountingCatalog {
        async fn product(&self, id: &ProductId) -> Result<Option<Product>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.product(id).await
        }
    }

    fn tee() -> Product {
        Product::new("tee", "Tee", Price::from_cents(2500, CurrencyCode::USD))
    }

    #[tokio::test]
    async fn test_cached_catalog_hits_inner_once() {
        let counting = Arc::new(CountingCatalog {
            inner: StaticCatalog::new([tee()]),
            calls: AtomicUsize::new(0),
        });
        let catalog = CachedCatalog::new(Arc::clone(&counting), ProductCacheConfig::default());

        let id = ProductId::new("tee");
        assert_eq!(catalog.product(&id).await.unwrap(), Some(tee()));
        assert_eq!(catalog.product(&id).await.unwrap(), Some(tee()));
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);

        catalog.invalidate(&id).await;
        catalog.product(&id).await.unwrap();
        assert_eq!(counting.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cached_catalog_does_not_cache_misses() {
        let counting = Arc::new(CountingCatalog {
            inner: StaticCatalog::default(),
            calls: AtomicUsize::new(0),
        });
        let catalog = CachedCatalog::new(Arc::clone(&counting), ProductCacheConfig::default());

        let id = ProductId::new("ghost");
        assert_eq!(catalog.product(&id).await.unwrap(), None);
        assert_eq!(catalog.product(&id).await.unwrap(), None);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_product_row_conversion() {
        let row = ProductRow {
            id: "mug".to_string(),
            name: "Mug".to_string(),
            price: Decimal::new(1250, 2),
            currency: "eur".to_string(),
            images: vec!["mug.jpg".to_string()],
            stock: Some(-3),
        };
        let product = Product::from(row);
        assert_eq!(product.price.currency_code, CurrencyCode::EUR);
        assert_eq!(product.stock, None);
        assert_eq!(product.thumbnail(), Some("mug.jpg"));
    }
}
