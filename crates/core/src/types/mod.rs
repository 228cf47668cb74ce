//! Core types for cartsync.
//!
//! This module provides type-safe wrappers for the cart and inbox domain.

pub mod cart;
pub mod id;
pub mod notification;
pub mod price;
pub mod product;

pub use cart::{CartLine, LineKey, SavedLine, Variant};
pub use id::*;
pub use notification::{NotificationDraft, NotificationKind, NotificationRecord};
pub use price::{CurrencyCode, Price};
pub use product::Product;
