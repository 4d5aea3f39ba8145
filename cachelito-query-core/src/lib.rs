//! # Cachelito Query Core
//!
//! Core building blocks for the cachelito-query reactive fetch cache.
//!
//! This crate knows nothing about fetch graphs. It provides the per-key
//! storage and the event plumbing the graph layer is built on.
//!
//! ## Features
//!
//! - **Freshness Strategies**: `available`, `refetch` and `expire(ms)` policies, plus custom ones
//! - **Fetch Coalescing**: At most one in-flight fetch per key, shared by every caller
//! - **Stale Completion Guard**: Superseded fetches never overwrite fresher state
//! - **Observable Cache**: Every slot mutation is broadcast as a `{loading, data, error}` event
//! - **Statistics**: Hit / miss / coalesced / stale counters (with the `stats` feature)
//!
//! ## Module Organization
//!
//! - [`strategy`] - Freshness policies
//! - [`cache`] - Per-key slot store with fetch tickets
//! - [`observable_cache`] - Cache decorator emitting [`CacheEvent`]s through per-key [`Subject`]s
//! - [`utils`] - Clock and list-key helpers
//!
pub mod cache;
mod event;
mod keys;
pub mod observable_cache;
mod slot;
pub mod strategy;
mod subject;
pub mod utils;

#[cfg(feature = "stats")]
mod stats;

pub use cache::{Cache, FetchTicket, StorePending};
pub use event::CacheEvent;
pub use keys::{default_key_fn, CacheableKey, KeyFn};
pub use observable_cache::{EventReceiver, ObservableCache};
pub use slot::{Completed, FetchResult, PendingFetch, Slot, SlotStatus};
pub use strategy::{available, expire, refetch, Freshness, ParseFreshnessError, Strategy};
pub use subject::Subject;

#[cfg(feature = "stats")]
pub use stats::CacheStats;
