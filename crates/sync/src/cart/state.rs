//! In-memory cart and saved-for-later lists.

use chrono::{DateTime, Utc};

use cartsync_core::{CartLine, LineKey, ProductId, SavedLine, Variant};

/// The cart lines and saved lines of one session.
///
/// Quantities stay at or above 1 and no two lines share a [`LineKey`]; every
/// method preserves both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CartState {
    lines: Vec<CartLine>,
    saved: Vec<SavedLine>,
}

impl CartState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    #[must_use]
    pub fn saved(&self) -> &[SavedLine] {
        &self.saved
    }

    /// Replace the cart lines. Later duplicates of a key and lines with an
    /// out-of-range quantity are dropped.
    pub fn set_lines(&mut self, lines: Vec<CartLine>) {
        self.lines = Vec::with_capacity(lines.len());
        for line in lines {
            if !(1..=CartLine::MAX_QUANTITY).contains(&line.quantity) {
                continue;
            }
            if self.find(&line.key()).is_none() {
                self.lines.push(line);
            }
        }
    }

    /// Replace the saved lines. Later duplicates of a product are dropped.
    pub fn set_saved(&mut self, saved: Vec<SavedLine>) {
        self.saved = Vec::with_capacity(saved.len());
        for line in saved {
            if !self.is_saved(&line.product_id) {
                self.saved.push(line);
            }
        }
    }

    #[must_use]
    pub fn line(&self, key: &LineKey) -> Option<&CartLine> {
        self.lines.iter().find(|l| l.has_key(key))
    }

    fn find(&self, key: &LineKey) -> Option<usize> {
        self.lines.iter().position(|l| l.has_key(key))
    }

    /// Add `quantity` to the line for this key, creating it if needed.
    ///
    /// Returns the key and its resulting quantity, or `None` when `quantity`
    /// is zero. Quantities stop at [`CartLine::MAX_QUANTITY`].
    pub fn add(
        &mut self,
        product_id: ProductId,
        quantity: u32,
        variant: Option<Variant>,
        now: DateTime<Utc>,
    ) -> Option<(LineKey, u32)> {
        if quantity == 0 {
            return None;
        }

        let key = LineKey::new(product_id, variant);
        if let Some(line) = self.lines.iter_mut().find(|l| l.has_key(&key)) {
            line.quantity = line.quantity.saturating_add(quantity).min(CartLine::MAX_QUANTITY);
            return Some((key, line.quantity));
        }

        self.lines.push(CartLine::new(
            key.product_id.clone(),
            quantity,
            key.variant.clone(),
            now,
        ));
        Some((key, quantity.min(CartLine::MAX_QUANTITY)))
    }

    /// Replace a line's quantity. Non-positive values remove the line and
    /// values above [`CartLine::MAX_QUANTITY`] are capped.
    #[must_use = "the change must be persisted or mirrored"]
    pub fn set_quantity(&mut self, key: &LineKey, quantity: i64) -> QuantityChange {
        if quantity <= 0 {
            return if self.remove(key) {
                QuantityChange::Removed
            } else {
                QuantityChange::Unchanged
            };
        }

        let Some(line) = self.lines.iter_mut().find(|l| l.has_key(key)) else {
            return QuantityChange::Unchanged;
        };
        line.quantity = u32::try_from(quantity)
            .unwrap_or(u32::MAX)
            .min(CartLine::MAX_QUANTITY);
        QuantityChange::Set(line.quantity)
    }

    /// Remove the line with exactly this key.
    pub fn remove(&mut self, key: &LineKey) -> bool {
        match self.find(key) {
            Some(index) => {
                self.lines.remove(index);
                true
            }
            None => false,
        }
    }

    /// Remove every variant line of a product, returning how many went.
    pub fn remove_product(&mut self, product_id: &ProductId) -> usize {
        let before = self.lines.len();
        self.lines.retain(|l| &l.product_id != product_id);
        before - self.lines.len()
    }

    /// Append a saved line unless the product is already saved.
    pub fn save(&mut self, product_id: ProductId, now: DateTime<Utc>) -> bool {
        if self.is_saved(&product_id) {
            return false;
        }
        self.saved.push(SavedLine::new(product_id, now));
        true
    }

    /// Remove the saved line for a product.
    pub fn unsave(&mut self, product_id: &ProductId) -> bool {
        let before = self.saved.len();
        self.saved.retain(|s| &s.product_id != product_id);
        self.saved.len() != before
    }

    #[must_use]
    pub fn is_saved(&self, product_id: &ProductId) -> bool {
        self.saved.iter().any(|s| &s.product_id == product_id)
    }

    pub fn clear_lines(&mut self) {
        self.lines.clear();
    }

    /// Total quantity across lines.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.lines.iter().map(|l| u64::from(l.quantity)).sum()
    }
}

/// Effect of [`CartState::set_quantity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityChange {
    Set(u32),
    Removed,
    Unchanged,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn small() -> Option<Variant> {
        Some(Variant::new(Some("S".into()), None))
    }

    #[test]
    fn test_add_sums_quantity_for_same_key() {
        let mut state = CartState::new();
        let now = Utc::now();
        state.add(ProductId::new("p1"), 2, small(), now);
        let (_, quantity) = state.add(ProductId::new("p1"), 3, small(), now).unwrap();

        assert_eq!(quantity, 5);
        assert_eq!(state.lines().len(), 1);
        assert_eq!(state.count(), 5);
    }

    #[test]
    fn test_add_distinguishes_variants() {
        let mut state = CartState::new();
        let now = Utc::now();
        state.add(ProductId::new("p1"), 1, small(), now);
        state.add(ProductId::new("p1"), 1, None, now);
        // An empty variant is the same key as no variant
        state.add(ProductId::new("p1"), 1, Some(Variant::new(None, None)), now);

        assert_eq!(state.lines().len(), 2);
        assert_eq!(state.line(&LineKey::product(ProductId::new("p1"))).unwrap().quantity, 2);
    }

    #[test]
    fn test_add_zero_is_ignored() {
        let mut state = CartState::new();
        assert!(state.add(ProductId::new("p1"), 0, None, Utc::now()).is_none());
        assert!(state.lines().is_empty());
    }

    #[test]
    fn test_set_quantity() {
        let mut state = CartState::new();
        let key = LineKey::product(ProductId::new("p1"));
        state.add(ProductId::new("p1"), 4, None, Utc::now());

        assert_eq!(state.set_quantity(&key, 2), QuantityChange::Set(2));
        assert_eq!(state.set_quantity(&key, -1), QuantityChange::Removed);
        assert_eq!(state.set_quantity(&key, 3), QuantityChange::Unchanged);
        assert!(state.lines().is_empty());
    }

    #[test]
    fn test_quantities_are_capped() {
        let mut state = CartState::new();
        let key = LineKey::product(ProductId::new("p1"));
        let now = Utc::now();

        let (_, first) = state.add(ProductId::new("p1"), u32::MAX, None, now).unwrap();
        assert_eq!(first, CartLine::MAX_QUANTITY);
        let (_, summed) = state.add(ProductId::new("p1"), 5, None, now).unwrap();
        assert_eq!(summed, CartLine::MAX_QUANTITY);
        assert_eq!(
            state.set_quantity(&key, i64::MAX),
            QuantityChange::Set(CartLine::MAX_QUANTITY)
        );
    }

    #[test]
    fn test_remove_is_key_exact() {
        let mut state = CartState::new();
        let now = Utc::now();
        state.add(ProductId::new("p1"), 1, small(), now);
        state.add(ProductId::new("p1"), 1, None, now);

        assert!(state.remove(&LineKey::new(ProductId::new("p1"), small())));
        assert_eq!(state.lines().len(), 1);
        assert_eq!(state.remove_product(&ProductId::new("p1")), 1);
        assert!(state.lines().is_empty());
    }

    #[test]
    fn test_save_is_unique_per_product() {
        let mut state = CartState::new();
        assert!(state.save(ProductId::new("p1"), Utc::now()));
        assert!(!state.save(ProductId::new("p1"), Utc::now()));
        assert_eq!(state.saved().len(), 1);
        assert!(state.unsave(&ProductId::new("p1")));
        assert!(!state.is_saved(&ProductId::new("p1")));
    }

    #[test]
    fn test_set_lines_drops_duplicate_keys() {
        let now = Utc::now();
        let mut state = CartState::new();
        state.set_lines(vec![
            CartLine::new(ProductId::new("p1"), 2, None, now),
            CartLine::new(ProductId::new("p1"), 7, None, now),
        ]);

        assert_eq!(state.lines().len(), 1);
        assert_eq!(state.lines()[0].quantity, 2);
    }

    #[test]
    fn test_set_lines_drops_zero_quantities() {
        let now = Utc::now();
        let mut zero = CartLine::new(ProductId::new("p1"), 1, None, now);
        zero.quantity = 0;
        let mut state = CartState::new();
        state.set_lines(vec![zero, CartLine::new(ProductId::new("p2"), 1, None, now)]);

        assert_eq!(state.lines().len(), 1);
        assert_eq!(state.count(), 1);
    }
}
