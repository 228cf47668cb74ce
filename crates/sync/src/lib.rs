//! cartsync - client-side cart and notification synchronization.
//!
//! The engine keeps a device's cart and notification inbox consistent with
//! per-account remote stores while never blocking on the network:
//!
//! - [`cart::CartSync`] - optimistic cart mutations, merge-on-authentication
//! - [`notifications::NotificationCenter`] - inbox fed by a realtime insert feed
//! - [`mirror::RemoteMirror`] - best-effort background remote writes
//! - [`local`] - device-local persistence
//! - [`remote`] - remote store contracts with `PostgreSQL` and in-process backends
//! - [`catalog`] - product lookup used for totals and display

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod cart;
pub mod catalog;
pub mod config;
pub mod error;
pub mod local;
pub mod mirror;
pub mod notifications;
pub mod remote;

pub use cart::{CartDeps, CartSync, MergeOutcome, Session, SyncMode};
pub use config::SyncConfig;
pub use error::{Advisory, Result, SyncError};
pub use mirror::WriteOrdering;
pub use notifications::{InboxStatus, NotificationCenter, Permission, SystemNotifier};
