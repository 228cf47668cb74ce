//! Integration test fixtures for cartsync.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p cartsync-integration-tests
//! ```
//!
//! Every scenario runs against [`MemoryBackend`], which implements the remote
//! cart store, notification store and realtime feed in-process. Device-local
//! storage is a [`FileStore`] in a temporary directory so that a scenario can
//! "restart the app" by opening a second engine over the same directory.
//!
//! # Test Categories
//!
//! - `cart_sync` - merge-on-authentication and steady-state cart mutations
//! - `notifications` - inbox snapshot, realtime inserts and read state

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tempfile::TempDir;

use cartsync::catalog::StaticCatalog;
use cartsync::local::{FileStore, LocalCache};
use cartsync::notifications::NotifierError;
use cartsync::remote::memory::MemoryBackend;
use cartsync::{CartDeps, CartSync, NotificationCenter, Permission, SystemNotifier, WriteOrdering};
use cartsync_core::{AccountId, CurrencyCode, Price, Product};

// =============================================================================
// Products
// =============================================================================

#[must_use]
pub fn tee() -> Product {
    let mut product = Product::new("tee", "Pineapple Tee", Price::from_cents(2500, CurrencyCode::USD));
    product.images = vec!["tee-front.jpg".to_string()];
    product
}

#[must_use]
pub fn mug() -> Product {
    Product::new("mug", "Enamel Mug", Price::from_cents(1400, CurrencyCode::USD))
}

#[must_use]
pub fn hoodie() -> Product {
    let mut product = Product::new("hoodie", "Hoodie", Price::from_cents(6000, CurrencyCode::USD));
    product.stock = Some(3);
    product
}

#[must_use]
pub fn catalog() -> StaticCatalog {
    StaticCatalog::new([tee(), mug(), hoodie()])
}

#[must_use]
pub fn account() -> AccountId {
    AccountId::new("acct_42")
}

// =============================================================================
// Device
// =============================================================================

/// A device with its own local storage directory.
pub struct Device {
    dir: TempDir,
}

impl Device {
    /// # Panics
    ///
    /// Panics if a temporary directory cannot be created.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("failed to create temp dir"),
        }
    }

    /// Open the device-local cache; each call simulates an app start.
    ///
    /// # Panics
    ///
    /// Panics if the store directory cannot be opened.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn local(&self) -> LocalCache {
        let store = FileStore::open(self.dir.path()).expect("failed to open file store");
        LocalCache::new(Box::new(store))
    }

    /// A cart engine on this device talking to `backend`.
    #[must_use]
    pub fn cart(&self, backend: &MemoryBackend, ordering: WriteOrdering) -> CartSync {
        CartSync::new(
            CartDeps {
                local: self.local(),
                remote: Arc::new(backend.clone()),
                catalog: Arc::new(catalog()),
            },
            ordering,
        )
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Notifications
// =============================================================================

/// System notifier that records what it surfaced.
pub struct RecordingNotifier {
    permission: Mutex<Permission>,
    shown: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new(permission: Permission) -> Arc<Self> {
        Arc::new(Self {
            permission: Mutex::new(permission),
            shown: Mutex::new(Vec::new()),
        })
    }

    /// Titles and bodies surfaced so far.
    #[must_use]
    pub fn shown(&self) -> Vec<(String, String)> {
        self.shown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Titles surfaced so far.
    #[must_use]
    pub fn titles(&self) -> Vec<String> {
        self.shown().into_iter().map(|(title, _)| title).collect()
    }
}

#[async_trait]
impl SystemNotifier for RecordingNotifier {
    fn permission(&self) -> Permission {
        *self.permission.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The simulated user grants the prompt on supported platforms.
    async fn request_permission(&self) -> Permission {
        let mut permission = self.permission.lock().unwrap_or_else(PoisonError::into_inner);
        if *permission == Permission::Denied {
            *permission = Permission::Granted;
        }
        *permission
    }

    fn show(&self, title: &str, body: &str) -> Result<(), NotifierError> {
        if self.permission() != Permission::Granted {
            return Err(NotifierError::Denied);
        }
        self.shown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((title.to_string(), body.to_string()));
        Ok(())
    }
}

/// A notification center over `backend` surfacing through `notifier`.
#[must_use]
pub fn notification_center(
    backend: &MemoryBackend,
    notifier: &Arc<RecordingNotifier>,
) -> NotificationCenter {
    NotificationCenter::new(
        Arc::new(backend.clone()),
        Arc::new(backend.clone()),
        Arc::clone(notifier) as Arc<dyn SystemNotifier>,
        WriteOrdering::PerKey,
    )
}
