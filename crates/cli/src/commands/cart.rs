//! Cart commands.
//!
//! Each command attaches the account (merging any guest cart stored in
//! `CARTSYNC_LOCAL_DIR`), applies its change, and waits for the remote write
//! before exiting.
//!
//! # Usage
//!
//! ```bash
//! cartsync cart show -a acct_123
//! cartsync cart add -a acct_123 -p tee-black -q 2 --size M --color black
//! cartsync cart remove -a acct_123 -p tee-black --all-variants
//! cartsync cart clear -a acct_123
//! ```

use std::sync::Arc;

use cartsync::catalog::{CachedCatalog, PgProductCatalog, ProductCatalog};
use cartsync::local::{FileStore, LocalCache};
use cartsync::remote::postgres::PgCartStore;
use cartsync::{Advisory, CartDeps, CartSync, MergeOutcome, Session, SyncConfig};
use cartsync_core::{AccountId, LineKey, ProductId, Variant};
use tokio::sync::broadcast;

use super::{CommandError, connect};

/// Which lines `remove` deletes.
pub enum RemoveScope {
    /// The line with exactly this variant.
    Line {
        size: Option<String>,
        color: Option<String>,
    },
    /// Every variant line of the product.
    AllVariants,
}

struct OpenCart {
    cart: CartSync,
    catalog: Arc<dyn ProductCatalog>,
}

async fn open(config: &SyncConfig, account: &str) -> Result<OpenCart, CommandError> {
    let pool = connect(config).await?;
    let catalog: Arc<dyn ProductCatalog> = Arc::new(CachedCatalog::new(
        PgProductCatalog::new(pool.clone()),
        config.product_cache,
    ));
    let local = LocalCache::new(Box::new(FileStore::open(config.local_dir.clone())?));

    let mut cart = CartSync::new(
        CartDeps {
            local,
            remote: Arc::new(PgCartStore::new(pool)),
            catalog: Arc::clone(&catalog),
        },
        config.write_ordering,
    );

    match cart.init(Session::Account(AccountId::new(account))).await {
        Some(MergeOutcome::Merged { inserted, lines }) if inserted > 0 => {
            tracing::info!(inserted, lines, "Merged local guest cart");
        }
        Some(MergeOutcome::Degraded) => {
            tracing::warn!("Remote cart unavailable; changes will stay local until the next run");
        }
        _ => {}
    }

    Ok(OpenCart { cart, catalog })
}

/// Wait for pending writes and fail if any of them did.
async fn finish(
    mut cart: CartSync,
    advisories: &mut broadcast::Receiver<Advisory>,
) -> Result<(), CommandError> {
    cart.flush().await;
    print_cart(&cart);
    cart.dispose().await;

    match advisories.try_recv() {
        Ok(advisory) => Err(CommandError::RemoteWrite(advisory)),
        Err(_) => Ok(()),
    }
}

/// Print an account's cart.
pub async fn show(config: &SyncConfig, account: &str) -> Result<(), CommandError> {
    let OpenCart { cart, .. } = open(config, account).await?;
    print_cart(&cart);
    cart.dispose().await;
    Ok(())
}

/// Add a product configuration to an account's cart.
pub async fn add(
    config: &SyncConfig,
    account: &str,
    product: &str,
    quantity: u32,
    size: Option<String>,
    color: Option<String>,
) -> Result<(), CommandError> {
    let OpenCart { mut cart, catalog } = open(config, account).await?;
    let product = catalog
        .product(&ProductId::new(product))
        .await?
        .ok_or_else(|| CommandError::UnknownProduct(product.to_owned()))?;

    let mut advisories = cart.advisories();
    cart.add_to_cart(&product, quantity, Some(Variant::new(size, color)));
    finish(cart, &mut advisories).await
}

/// Remove a line, or every variant of a product, from an account's cart.
pub async fn remove(
    config: &SyncConfig,
    account: &str,
    product: &str,
    scope: RemoveScope,
) -> Result<(), CommandError> {
    let OpenCart { mut cart, .. } = open(config, account).await?;
    let product_id = ProductId::new(product);

    let mut advisories = cart.advisories();
    match scope {
        RemoveScope::Line { size, color } => {
            let key = LineKey::new(product_id, Some(Variant::new(size, color)));
            if cart.line(&key).is_none() {
                tracing::warn!(product, "No matching line in cart");
            }
            cart.remove_from_cart(&key);
        }
        RemoveScope::AllVariants => cart.remove_product(&product_id),
    }
    finish(cart, &mut advisories).await
}

/// Remove every line from an account's cart.
pub async fn clear(config: &SyncConfig, account: &str) -> Result<(), CommandError> {
    let OpenCart { mut cart, .. } = open(config, account).await?;
    let mut advisories = cart.advisories();
    cart.clear_cart();
    finish(cart, &mut advisories).await
}

#[allow(clippy::print_stdout)]
fn print_cart(cart: &CartSync) {
    let items = cart.items();
    if items.is_empty() {
        println!("Cart is empty");
        return;
    }

    for item in &items {
        let key = item.line.key();
        let variant = match (key.size(), key.color()) {
            (None, None) => String::new(),
            (size, color) => format!(
                " [{}/{}]",
                size.unwrap_or("-"),
                color.unwrap_or("-")
            ),
        };
        match item.product {
            Some(product) => println!(
                "{:>3} x {}{} @ {} = {}",
                item.line.quantity,
                product.name,
                variant,
                product.price.display(),
                item.line_total().unwrap_or_default()
            ),
            None => println!(
                "{:>3} x {}{} (not in catalog)",
                item.line.quantity, item.line.product_id, variant
            ),
        }
    }

    println!(
        "{} item(s), total {}, {} saved for later",
        cart.cart_count(),
        cart.cart_total(),
        cart.saved_count()
    );
}
