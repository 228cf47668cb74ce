use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use cartsync_core::{AccountId, CartLine, LineKey, Product, ProductId, SavedLine, Variant};

use super::merge::plan_merge;
use super::state::{CartState, QuantityChange};
use crate::catalog::ProductCatalog;
use crate::error::{Advisory, add_breadcrumb, clear_sentry_user, report_failure, set_sentry_user};
use crate::local::{LocalCache, keys};
use crate::mirror::{Lane, RemoteMirror, WriteFuture, WriteIntent, WriteOrdering, boxed_write};
use crate::remote::{RemoteCartStore, StoreError};

/// Who the cart belongs to when the engine starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Session {
    Anonymous,
    Account(AccountId),
}

/// Where mutations are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMode {
    /// No account; the device-local store holds the cart.
    Guest,
    /// Account attached and merged; mutations are mirrored remotely.
    Synced(AccountId),
    /// Account attached but the merge failed; mutations stay local until the
    /// next `attach_account` retries the merge.
    Unsynced(AccountId),
}

impl SyncMode {
    #[must_use]
    pub const fn account(&self) -> Option<&AccountId> {
        match self {
            Self::Guest => None,
            Self::Synced(account) | Self::Unsynced(account) => Some(account),
        }
    }
}

/// Result of merge-on-authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The local cart was folded into the account's cart.
    Merged {
        /// Local-only lines inserted remotely.
        inserted: usize,
        /// Lines in the resulting cart.
        lines: usize,
    },
    /// The remote store failed; the local cart is shown as-is.
    Degraded,
}

/// Collaborators of a [`CartSync`].
pub struct CartDeps {
    pub local: LocalCache,
    pub remote: Arc<dyn RemoteCartStore>,
    pub catalog: Arc<dyn ProductCatalog>,
}

/// A cart line joined with its product snapshot.
#[derive(Debug, Clone, Copy)]
pub struct CartItem<'a> {
    pub line: &'a CartLine,
    /// `None` if the catalog does not know the product.
    pub product: Option<&'a Product>,
}

impl CartItem<'_> {
    #[must_use]
    pub fn line_total(&self) -> Option<Decimal> {
        self.product.map(|p| p.price.line_total(self.line.quantity))
    }
}

enum CartWrite {
    Upsert(LineKey, u32),
    Delete(LineKey),
    DeleteProduct(ProductId),
    DeleteAll,
}

/// Owner of the cart and saved-for-later state.
///
/// Every mutation updates memory synchronously. The change is then persisted
/// to the device-local store (guest or unsynced) or handed to the remote
/// mirror (synced). Saved lines are device-scoped and always stay local.
pub struct CartSync {
    local: LocalCache,
    remote: Arc<dyn RemoteCartStore>,
    catalog: Arc<dyn ProductCatalog>,
    mirror: RemoteMirror,
    mode: SyncMode,
    state: CartState,
    products: HashMap<ProductId, Product>,
}

impl CartSync {
    #[must_use]
    pub fn new(deps: CartDeps, ordering: WriteOrdering) -> Self {
        Self {
            local: deps.local,
            remote: deps.remote,
            catalog: deps.catalog,
            mirror: RemoteMirror::new(ordering),
            mode: SyncMode::Guest,
            state: CartState::new(),
            products: HashMap::new(),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Load state for the starting session.
    ///
    /// Returns the merge outcome when the session has an account.
    #[instrument(skip(self))]
    pub async fn init(&mut self, session: Session) -> Option<MergeOutcome> {
        self.state.set_saved(self.local.load::<SavedLine>(keys::SAVED));

        match session {
            Session::Anonymous => {
                self.load_guest_cart();
                self.hydrate().await;
                None
            }
            Session::Account(account) => Some(self.attach_account(account).await),
        }
    }

    /// Merge the device cart into `account`'s cart and start mirroring.
    ///
    /// On failure the local cart is presented alone, local storage is left
    /// untouched and the merge is retried by the next call.
    #[instrument(skip(self), fields(account = %account))]
    pub async fn attach_account(&mut self, account: AccountId) -> MergeOutcome {
        if matches!(&self.mode, SyncMode::Synced(current) if current != &account) {
            self.detach_account().await;
        }
        set_sentry_user(&account);
        add_breadcrumb("cart", "Attaching account", Some(&[("account_id", account.as_str())]));

        // Re-merging the same account must see every optimistic write
        self.mirror.flush().await;
        let local = self.local.load::<CartLine>(keys::CART);
        let outcome = match self.merge(&account, &local).await {
            Ok((merged, inserted)) => {
                let lines = merged.len();
                self.state.set_lines(merged);
                if let Err(e) = self.local.clear(keys::CART) {
                    self.mirror.advise(report_failure("cart.clear_local", &e));
                }
                self.mode = SyncMode::Synced(account);
                info!(inserted, lines, "Cart merged");
                MergeOutcome::Merged { inserted, lines }
            }
            Err(e) => {
                self.mirror.advise(report_failure("cart.merge", &e));
                self.state.set_lines(local);
                self.mode = SyncMode::Unsynced(account);
                MergeOutcome::Degraded
            }
        };

        self.hydrate().await;
        outcome
    }

    async fn merge(
        &self,
        account: &AccountId,
        local: &[CartLine],
    ) -> Result<(Vec<CartLine>, usize), StoreError> {
        let remote = self.remote.fetch_lines(account).await?;
        let plan = plan_merge(local, &remote);
        for line in &plan.to_insert {
            self.remote.insert_line(account, line).await?;
        }
        Ok((plan.merged, plan.to_insert.len()))
    }

    /// Wait for pending writes and return to a guest cart.
    pub async fn detach_account(&mut self) {
        self.mirror.flush().await;
        if let Some(account) = self.mode.account() {
            debug!(account = %account, "Detaching account");
        }
        clear_sentry_user();
        self.mode = SyncMode::Guest;
        self.load_guest_cart();
        self.hydrate().await;
    }

    /// Wait for pending writes, then drop the engine.
    pub async fn dispose(mut self) {
        self.mirror.flush().await;
    }

    /// Wait for every pending remote write.
    pub async fn flush(&mut self) {
        self.mirror.flush().await;
    }

    fn load_guest_cart(&mut self) {
        self.state.set_lines(self.local.load::<CartLine>(keys::CART));
    }

    /// Fetch product snapshots for lines and saved lines that lack one.
    pub async fn hydrate(&mut self) {
        let missing: Vec<ProductId> = self
            .state
            .lines()
            .iter()
            .map(|l| &l.product_id)
            .chain(self.state.saved().iter().map(|s| &s.product_id))
            .filter(|id| !self.products.contains_key(*id))
            .cloned()
            .collect();

        for id in missing {
            if self.products.contains_key(&id) {
                continue;
            }
            match self.catalog.product(&id).await {
                Ok(Some(product)) => {
                    self.products.insert(id, product);
                }
                Ok(None) => debug!(product_id = %id, "Product not in catalog"),
                Err(e) => self.mirror.advise(report_failure("catalog.product", &e)),
            }
        }
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Add `quantity` of a product configuration. Zero is ignored.
    pub fn add_to_cart(&mut self, product: &Product, quantity: u32, variant: Option<Variant>) {
        self.products
            .entry(product.id.clone())
            .or_insert_with(|| product.clone());

        let Some((key, total)) = self.state.add(product.id.clone(), quantity, variant, Utc::now())
        else {
            return;
        };
        let quantity = total.to_string();
        add_breadcrumb(
            "cart",
            "Added to cart",
            Some(&[("product_id", product.id.as_str()), ("quantity", quantity.as_str())]),
        );
        self.sync_cart(CartWrite::Upsert(key, total));
    }

    /// Replace a line's quantity; `quantity <= 0` removes the line.
    pub fn update_quantity(&mut self, key: &LineKey, quantity: i64) {
        match self.state.set_quantity(key, quantity) {
            QuantityChange::Set(quantity) => {
                self.sync_cart(CartWrite::Upsert(key.clone(), quantity));
            }
            QuantityChange::Removed => self.sync_cart(CartWrite::Delete(key.clone())),
            QuantityChange::Unchanged => {}
        }
    }

    /// Remove the line with exactly this identity key.
    pub fn remove_from_cart(&mut self, key: &LineKey) {
        if self.state.remove(key) {
            add_breadcrumb(
                "cart",
                "Removed from cart",
                Some(&[("product_id", key.product_id.as_str())]),
            );
            self.sync_cart(CartWrite::Delete(key.clone()));
        }
    }

    /// Remove every variant line of a product.
    pub fn remove_product(&mut self, product_id: &ProductId) {
        if self.state.remove_product(product_id) > 0 {
            self.sync_cart(CartWrite::DeleteProduct(product_id.clone()));
        }
    }

    /// Move a product's lines out of the cart into the saved list.
    pub fn save_for_later(&mut self, product_id: &ProductId) {
        if self.state.remove_product(product_id) > 0 {
            self.sync_cart(CartWrite::DeleteProduct(product_id.clone()));
        }
        if self.state.save(product_id.clone(), Utc::now()) {
            self.persist_saved();
        }
    }

    /// Move a saved product back into the cart with quantity 1.
    pub fn move_to_cart(&mut self, product_id: &ProductId) {
        if !self.state.unsave(product_id) {
            return;
        }
        self.persist_saved();

        if let Some((key, total)) = self.state.add(product_id.clone(), 1, None, Utc::now()) {
            self.sync_cart(CartWrite::Upsert(key, total));
        }
    }

    pub fn remove_saved(&mut self, product_id: &ProductId) {
        if self.state.unsave(product_id) {
            self.persist_saved();
        }
    }

    /// Empty the cart.
    pub fn clear_cart(&mut self) {
        self.state.clear_lines();
        add_breadcrumb("cart", "Cleared cart", None);
        self.sync_cart(CartWrite::DeleteAll);
    }

    fn sync_cart(&mut self, write: CartWrite) {
        let SyncMode::Synced(account) = &self.mode else {
            self.persist_cart();
            return;
        };

        let account = account.clone();
        let remote = Arc::clone(&self.remote);
        let (intent, future): (WriteIntent, WriteFuture) = match write {
            CartWrite::Upsert(key, quantity) => (
                WriteIntent::new("cart.upsert_line", product_lane(&key.product_id), line_target(&key)),
                boxed_write(async move { remote.upsert_line(&account, &key, quantity).await }),
            ),
            CartWrite::Delete(key) => (
                WriteIntent::new("cart.delete_line", product_lane(&key.product_id), line_target(&key)),
                boxed_write(async move { remote.delete_line(&account, &key).await }),
            ),
            CartWrite::DeleteProduct(product_id) => (
                WriteIntent::new(
                    "cart.delete_product",
                    product_lane(&product_id),
                    format!("product:{product_id}"),
                ),
                boxed_write(async move { remote.delete_product(&account, &product_id).await }),
            ),
            CartWrite::DeleteAll => (
                WriteIntent::new("cart.delete_all", Lane::All, "cart:*"),
                boxed_write(async move { remote.delete_all(&account).await }),
            ),
        };
        self.mirror.submit(intent, future);
    }

    fn persist_cart(&mut self) {
        if let Err(e) = self.local.save(keys::CART, self.state.lines()) {
            self.mirror.advise(report_failure("cart.save_local", &e));
        }
    }

    fn persist_saved(&mut self) {
        if let Err(e) = self.local.save(keys::SAVED, self.state.saved()) {
            warn!(error = %e, "Failed to persist saved lines");
            self.mirror.advise(report_failure("cart.save_saved_local", &e));
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    #[must_use]
    pub fn lines(&self) -> &[CartLine] {
        self.state.lines()
    }

    #[must_use]
    pub fn saved(&self) -> &[SavedLine] {
        self.state.saved()
    }

    #[must_use]
    pub fn line(&self, key: &LineKey) -> Option<&CartLine> {
        self.state.line(key)
    }

    /// Lines joined with their product snapshots.
    #[must_use]
    pub fn items(&self) -> Vec<CartItem<'_>> {
        self.state
            .lines()
            .iter()
            .map(|line| CartItem {
                line,
                product: self.products.get(&line.product_id),
            })
            .collect()
    }

    #[must_use]
    pub fn product(&self, id: &ProductId) -> Option<&Product> {
        self.products.get(id)
    }

    /// Sum of price × quantity. Unknown products contribute nothing.
    #[must_use]
    pub fn cart_total(&self) -> Decimal {
        self.items()
            .iter()
            .filter_map(CartItem::line_total)
            .sum()
    }

    /// Sum of quantities.
    #[must_use]
    pub fn cart_count(&self) -> u64 {
        self.state.count()
    }

    #[must_use]
    pub fn saved_count(&self) -> usize {
        self.state.saved().len()
    }

    #[must_use]
    pub const fn mode(&self) -> &SyncMode {
        &self.mode
    }

    #[must_use]
    pub const fn account(&self) -> Option<&AccountId> {
        self.mode.account()
    }

    /// Receive advisories for failed background operations.
    #[must_use]
    pub fn advisories(&self) -> broadcast::Receiver<Advisory> {
        self.mirror.subscribe()
    }

    /// The device-local cache, for inspection.
    #[must_use]
    pub const fn local(&self) -> &LocalCache {
        &self.local
    }
}

fn product_lane(product_id: &ProductId) -> Lane {
    Lane::Key(format!("product:{product_id}"))
}

fn line_target(key: &LineKey) -> String {
    format!(
        "line:{}:{}:{}",
        key.product_id,
        key.size().unwrap_or_default(),
        key.color().unwrap_or_default()
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use cartsync_core::{CurrencyCode, Price};

    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::local::{LocalStore, MemoryStore};
    use crate::remote::memory::MemoryBackend;

    fn tee() -> Product {
        Product::new("tee", "Tee", Price::from_cents(2000, CurrencyCode::USD))
    }

    fn mug() -> Product {
        Product::new("mug", "Mug", Price::from_cents(1250, CurrencyCode::USD))
    }

    fn engine(backend: &MemoryBackend, ordering: WriteOrdering) -> CartSync {
        CartSync::new(
            CartDeps {
                local: LocalCache::new(Box::new(MemoryStore::new())),
                remote: Arc::new(backend.clone()),
                catalog: Arc::new(StaticCatalog::new([tee(), mug()])),
            },
            ordering,
        )
    }

    fn account() -> AccountId {
        AccountId::new("acct_1")
    }

    #[tokio::test]
    async fn test_guest_mutations_persist_locally() {
        let backend = MemoryBackend::new();
        let mut cart = engine(&backend, WriteOrdering::PerKey);
        cart.init(Session::Anonymous).await;

        cart.add_to_cart(&tee(), 2, None);
        cart.add_to_cart(&mug(), 1, None);

        let stored: Vec<CartLine> = cart.local().load(keys::CART);
        assert_eq!(stored.len(), 2);
        assert_eq!(cart.cart_count(), 3);
        assert_eq!(cart.cart_total(), Decimal::new(5250, 2));
        assert!(backend.write_log().is_empty());
    }

    #[tokio::test]
    async fn test_synced_mutations_mirror_remotely() {
        let backend = MemoryBackend::new();
        let mut cart = engine(&backend, WriteOrdering::PerKey);
        cart.init(Session::Account(account())).await;

        cart.add_to_cart(&tee(), 1, None);
        cart.update_quantity(&LineKey::product(ProductId::new("tee")), 4);
        cart.flush().await;

        let remote = backend.cart_lines(&account());
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].quantity, 4);
        assert!(cart.local().load::<CartLine>(keys::CART).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_key_ordering_keeps_last_quantity() {
        let backend = MemoryBackend::new();
        let mut cart = engine(&backend, WriteOrdering::PerKey);
        cart.init(Session::Account(account())).await;
        let key = LineKey::product(ProductId::new("tee"));

        backend.queue_delays([Duration::from_millis(50), Duration::from_millis(1)]);
        cart.add_to_cart(&tee(), 1, None);
        tokio::task::yield_now().await;
        cart.update_quantity(&key, 3);
        cart.flush().await;

        assert_eq!(backend.cart_lines(&account())[0].quantity, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unordered_writes_can_land_out_of_order() {
        let backend = MemoryBackend::new();
        let mut cart = engine(&backend, WriteOrdering::Unordered);
        cart.init(Session::Account(account())).await;
        let key = LineKey::product(ProductId::new("tee"));

        backend.queue_delays([Duration::from_millis(50), Duration::from_millis(1)]);
        cart.add_to_cart(&tee(), 1, None);
        tokio::task::yield_now().await;
        cart.update_quantity(&key, 3);
        cart.flush().await;

        assert_eq!(cart.line(&key).unwrap().quantity, 3);
        assert_eq!(backend.cart_lines(&account())[0].quantity, 1);
    }

    #[tokio::test]
    async fn test_write_failure_keeps_local_state() {
        let backend = MemoryBackend::new();
        let mut cart = engine(&backend, WriteOrdering::PerKey);
        cart.init(Session::Account(account())).await;
        let mut advisories = cart.advisories();

        backend.fail_writes(true);
        cart.add_to_cart(&tee(), 2, None);
        cart.flush().await;

        assert_eq!(cart.cart_count(), 2);
        assert_eq!(advisories.try_recv().unwrap().operation, "cart.upsert_line");
    }

    #[tokio::test]
    async fn test_merge_failure_is_retried_on_next_attach() {
        let backend = MemoryBackend::new();
        let mut cart = engine(&backend, WriteOrdering::PerKey);
        cart.init(Session::Anonymous).await;
        cart.add_to_cart(&tee(), 2, None);

        backend.fail_reads(true);
        assert_eq!(cart.attach_account(account()).await, MergeOutcome::Degraded);
        assert_eq!(cart.mode(), &SyncMode::Unsynced(account()));
        cart.add_to_cart(&mug(), 1, None);
        assert_eq!(cart.local().load::<CartLine>(keys::CART).len(), 2);
        assert!(backend.write_log().is_empty());

        backend.fail_reads(false);
        let outcome = cart.attach_account(account()).await;
        assert_eq!(outcome, MergeOutcome::Merged { inserted: 2, lines: 2 });
        assert_eq!(backend.cart_lines(&account()).len(), 2);
        assert!(cart.local().load::<CartLine>(keys::CART).is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_local_quantity_is_not_merged() {
        let backend = MemoryBackend::new();
        let mut store = MemoryStore::new();
        store
            .write(
                keys::CART,
                r#"[
                    {"productId":"tee","quantity":0,"addedAt":"2026-01-01T00:00:00Z"},
                    {"productId":"mug","quantity":1,"addedAt":"2026-01-01T00:00:00Z"}
                ]"#,
            )
            .unwrap();
        let mut cart = CartSync::new(
            CartDeps {
                local: LocalCache::new(Box::new(store)),
                remote: Arc::new(backend.clone()),
                catalog: Arc::new(StaticCatalog::new([tee(), mug()])),
            },
            WriteOrdering::PerKey,
        );

        cart.init(Session::Anonymous).await;
        assert_eq!(cart.lines().len(), 1);
        assert!(cart.lines().iter().all(|line| line.quantity >= 1));

        let outcome = cart.attach_account(account()).await;
        assert_eq!(outcome, MergeOutcome::Merged { inserted: 1, lines: 1 });
        assert_eq!(backend.cart_lines(&account())[0].product_id, ProductId::new("mug"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reattach_same_account_keeps_pending_writes() {
        let backend = MemoryBackend::new();
        let mut cart = engine(&backend, WriteOrdering::PerKey);
        cart.init(Session::Account(account())).await;

        backend.queue_delays([Duration::from_millis(100)]);
        cart.add_to_cart(&tee(), 2, None);
        let outcome = cart.attach_account(account()).await;

        assert_eq!(outcome, MergeOutcome::Merged { inserted: 0, lines: 1 });
        assert_eq!(cart.cart_count(), 2);
        cart.flush().await;
        assert_eq!(backend.cart_lines(&account())[0].quantity, 2);
    }

    #[tokio::test]
    async fn test_saved_lines_stay_local_when_synced() {
        let backend = MemoryBackend::new();
        let mut cart = engine(&backend, WriteOrdering::PerKey);
        cart.init(Session::Account(account())).await;
        cart.add_to_cart(&tee(), 2, Some(Variant::new(Some("M".into()), None)));

        cart.save_for_later(&ProductId::new("tee"));
        cart.flush().await;

        assert!(cart.lines().is_empty());
        assert_eq!(cart.saved_count(), 1);
        assert_eq!(cart.local().load::<SavedLine>(keys::SAVED).len(), 1);
        assert!(backend.cart_lines(&account()).is_empty());
    }

    #[tokio::test]
    async fn test_detach_returns_to_guest() {
        let backend = MemoryBackend::new();
        let mut cart = engine(&backend, WriteOrdering::PerKey);
        cart.init(Session::Account(account())).await;
        cart.add_to_cart(&tee(), 1, None);

        cart.detach_account().await;

        assert_eq!(cart.mode(), &SyncMode::Guest);
        assert!(cart.lines().is_empty());
        assert_eq!(backend.cart_lines(&account()).len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_products_do_not_count_toward_total() {
        let backend = MemoryBackend::new();
        backend.seed_cart(
            &account(),
            vec![
                CartLine::new(ProductId::new("tee"), 1, None, Utc::now()),
                CartLine::new(ProductId::new("retired"), 3, None, Utc::now()),
            ],
        );
        let mut cart = engine(&backend, WriteOrdering::PerKey);
        cart.init(Session::Account(account())).await;

        assert_eq!(cart.cart_count(), 4);
        assert_eq!(cart.cart_total(), Decimal::new(2000, 2));
        assert!(cart.items().iter().any(|item| item.product.is_none()));
    }
}
