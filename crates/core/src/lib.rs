//! cartsync core - Shared domain types.
//!
//! This crate provides the types used across every cartsync component:
//! - `cartsync` - The cart and notification synchronization engine
//! - `cartsync-cli` - Command-line tools for migrations and inspection
//!
//! # Architecture
//!
//! The core crate contains only types and pure helpers - no I/O, no database
//! access, no clocks beyond what callers pass in. This keeps it lightweight and
//! allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype ids, cart lines, products, prices and notifications

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
