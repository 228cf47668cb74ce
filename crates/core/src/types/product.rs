//! Product snapshot supplied by the catalog collaborator.

use serde::{Deserialize, Serialize};

use super::id::ProductId;
use super::price::Price;

/// The subset of catalog data the cart needs for display and totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Price,
    #[serde(default)]
    pub images: Vec<String>,
    /// Units available, when the catalog tracks inventory.
    #[serde(default)]
    pub stock: Option<u32>,
}

impl Product {
    /// Create a product with no images and untracked stock.
    #[must_use]
    pub fn new(id: impl Into<ProductId>, name: impl Into<String>, price: Price) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            price,
            images: Vec::new(),
            stock: None,
        }
    }

    /// Returns false only when stock is tracked and exhausted.
    #[must_use]
    pub fn in_stock(&self) -> bool {
        self.stock.is_none_or(|units| units > 0)
    }

    /// First image, used as the thumbnail.
    #[must_use]
    pub fn thumbnail(&self) -> Option<&str> {
        self.images.first().map(String::as_str)
    }
}
