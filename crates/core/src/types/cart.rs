//! Cart lines, saved-for-later lines and their identity keys.
//!
//! A cart holds at most one [`CartLine`] per [`LineKey`]; the key is the
//! `(product, variant)` pair. Lines are serialized camelCase because the same
//! shape is written to device-local storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::id::ProductId;

/// A selected product configuration (size and/or color).
///
/// A variant with neither attribute set carries no information and is
/// normalized to "no variant" by [`Variant::normalize`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Variant {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl Variant {
    /// Create a variant from optional size and color.
    ///
    /// Empty strings are treated as absent.
    #[must_use]
    pub fn new(size: Option<String>, color: Option<String>) -> Self {
        Self {
            size: size.filter(|s| !s.is_empty()),
            color: color.filter(|c| !c.is_empty()),
        }
    }

    /// Returns true when neither size nor color is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.size.is_none() && self.color.is_none()
    }

    /// Collapse an empty variant to `None` so identity keys compare equal.
    #[must_use]
    pub fn normalize(variant: Option<Self>) -> Option<Self> {
        variant
            .map(|v| Self::new(v.size, v.color))
            .filter(|v| !v.is_empty())
    }
}

/// Identity key of a cart line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineKey {
    pub product_id: ProductId,
    pub variant: Option<Variant>,
}

impl LineKey {
    /// Create a key, normalizing the variant.
    #[must_use]
    pub fn new(product_id: ProductId, variant: Option<Variant>) -> Self {
        Self {
            product_id,
            variant: Variant::normalize(variant),
        }
    }

    /// Key for a product without a selected variant.
    #[must_use]
    pub const fn product(product_id: ProductId) -> Self {
        Self {
            product_id,
            variant: None,
        }
    }

    /// Selected size, if any.
    #[must_use]
    pub fn size(&self) -> Option<&str> {
        self.variant.as_ref().and_then(|v| v.size.as_deref())
    }

    /// Selected color, if any.
    #[must_use]
    pub fn color(&self) -> Option<&str> {
        self.variant.as_ref().and_then(|v| v.color.as_deref())
    }
}

impl From<ProductId> for LineKey {
    fn from(product_id: ProductId) -> Self {
        Self::product(product_id)
    }
}

/// One distinct purchasable configuration in a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: ProductId,
    /// Always between 1 and [`CartLine::MAX_QUANTITY`].
    #[serde(deserialize_with = "quantity_in_range")]
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<Variant>,
    pub added_at: DateTime<Utc>,
}

impl CartLine {
    /// Largest quantity a line may hold; remote stores keep it in a signed
    /// 32-bit column.
    pub const MAX_QUANTITY: u32 = 2_147_483_647;

    /// Create a line, normalizing the variant and clamping quantity into
    /// `1..=MAX_QUANTITY`.
    #[must_use]
    pub fn new(
        product_id: ProductId,
        quantity: u32,
        variant: Option<Variant>,
        added_at: DateTime<Utc>,
    ) -> Self {
        Self {
            product_id,
            quantity: quantity.clamp(1, Self::MAX_QUANTITY),
            variant: Variant::normalize(variant),
            added_at,
        }
    }

    /// The identity key of this line.
    #[must_use]
    pub fn key(&self) -> LineKey {
        LineKey::new(self.product_id.clone(), self.variant.clone())
    }

    /// Returns true if this line has the given identity key.
    #[must_use]
    pub fn has_key(&self, key: &LineKey) -> bool {
        self.product_id == key.product_id && Variant::normalize(self.variant.clone()) == key.variant
    }
}

/// A deferred purchase intent, keyed by product only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedLine {
    pub product_id: ProductId,
    pub saved_at: DateTime<Utc>,
}

impl SavedLine {
    #[must_use]
    pub const fn new(product_id: ProductId, saved_at: DateTime<Utc>) -> Self {
        Self {
            product_id,
            saved_at,
        }
    }
}

fn quantity_in_range<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let quantity = u32::deserialize(deserializer)?;
    if (1..=CartLine::MAX_QUANTITY).contains(&quantity) {
        Ok(quantity)
    } else {
        Err(serde::de::Error::custom(format_args!(
            "quantity {quantity} outside 1..={}",
            CartLine::MAX_QUANTITY
        )))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sized(size: &str) -> Option<Variant> {
        Some(Variant::new(Some(size.to_string()), None))
    }

    #[test]
    fn test_empty_variant_normalizes_to_none() {
        let empty = Some(Variant::new(Some(String::new()), None));
        assert_eq!(Variant::normalize(empty), None);
        assert_eq!(
            LineKey::new(ProductId::new("p1"), Some(Variant::new(None, None))),
            LineKey::product(ProductId::new("p1"))
        );
    }

    #[test]
    fn test_line_key_distinguishes_variants() {
        let small = LineKey::new(ProductId::new("p1"), sized("S"));
        let large = LineKey::new(ProductId::new("p1"), sized("L"));
        assert_ne!(small, large);
        assert_eq!(small.size(), Some("S"));
        assert_eq!(small.color(), None);
    }

    #[test]
    fn test_new_line_clamps_quantity() {
        let line = CartLine::new(ProductId::new("p1"), 0, None, Utc::now());
        assert_eq!(line.quantity, 1);
        let line = CartLine::new(ProductId::new("p1"), u32::MAX, None, Utc::now());
        assert_eq!(line.quantity, CartLine::MAX_QUANTITY);
    }

    #[test]
    fn test_deserialize_rejects_out_of_range_quantity() {
        let zero = r#"{"productId":"p1","quantity":0,"addedAt":"2026-01-01T00:00:00Z"}"#;
        assert!(serde_json::from_str::<CartLine>(zero).is_err());

        let huge = format!(
            r#"{{"productId":"p1","quantity":{},"addedAt":"2026-01-01T00:00:00Z"}}"#,
            u32::MAX
        );
        assert!(serde_json::from_str::<CartLine>(&huge).is_err());

        let ok = r#"{"productId":"p1","quantity":3,"addedAt":"2026-01-01T00:00:00Z"}"#;
        assert_eq!(serde_json::from_str::<CartLine>(ok).unwrap().quantity, 3);
    }

    #[test]
    fn test_has_key() {
        let line = CartLine::new(ProductId::new("p1"), 2, sized("M"), Utc::now());
        assert!(line.has_key(&LineKey::new(ProductId::new("p1"), sized("M"))));
        assert!(!line.has_key(&LineKey::product(ProductId::new("p1"))));
    }

    #[test]
    fn test_cart_line_serializes_camel_case() {
        let line = CartLine::new(ProductId::new("p1"), 2, None, Utc::now());
        let json = serde_json::to_value(&line).unwrap();
        assert_eq!(json["productId"], "p1");
        assert_eq!(json["quantity"], 2);
        assert!(json.get("addedAt").is_some());
        assert!(json.get("variant").is_none());
    }
}
