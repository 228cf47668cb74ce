//! Cart synchronization.
//!
//! [`CartSync`] owns the cart and saved-for-later lists of one device. A guest
//! cart lives in the device-local store; once an account attaches, the device
//! cart is merged into the account's remote cart ([`plan_merge`]) and every
//! later mutation is mirrored remotely.

mod engine;
mod merge;
mod state;

pub use engine::{CartDeps, CartItem, CartSync, MergeOutcome, Session, SyncMode};
pub use merge::{MergePlan, plan_merge};
pub use state::{CartState, QuantityChange};
