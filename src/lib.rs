//! # Cachelito Query
//!
//! A reactive fetch graph with per-key caching.
//!
//! Asynchronous fetch functions are wrapped into cached nodes and combined
//! into a dependency graph. Every node can be fetched, observed as a live
//! stream of `{ loading, data, error }` events, and invalidated; composite
//! nodes derive their events from their children and keep them consistent
//! as upstream data changes.
//!
//! ## Features
//!
//! - **Fetch Coalescing**: At most one in-flight fetch per key, shared by every caller
//! - **Freshness Strategies**: `available`, `refetch`, `expire(ms)` or a custom [`Strategy`]
//! - **Composition**: Parallel products, dependent compositions and list (star) fetches
//! - **Live Events**: Stale-while-refreshing data, errors that keep the last good data
//! - **Invalidation**: Graph-aware eviction, including list entries containing an element
//! - **Deterministic Scheduling**: Pluggable [`Scheduler`] for background fetches and deferred work
//! - **Statistics**: Per-node hit / miss / coalesced counters (with the `stats` feature)
//!
//! ## Quick Start
//!
//! ```
//! use cachelito_query::{expire, invalidate, CacheOptions, CachedNode, Fetch, Node, QueryEngine};
//! use futures::StreamExt;
//! use serde_json::{json, Value};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let profile: Node<String> = CachedNode::new(
//!     Fetch::new(|id: Value| async move { Ok(json!({ "id": id, "name": "Ada" })) }),
//!     CacheOptions::new().name("profile").strategy(expire(60_000)),
//! )
//! .into();
//!
//! let engine = QueryEngine::new();
//! let mut events = engine.query(&profile, &json!(1)).unwrap();
//!
//! assert!(events.next().await.unwrap().is_loading());
//! let ready = events.next().await.unwrap();
//! assert_eq!(ready.data_value().unwrap()["name"], "Ada");
//!
//! // Still observed: the caller may want to fetch again.
//! assert!(invalidate(&profile, &json!(1)));
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`algebra`] - Cache-agnostic `product`, `compose` and `star` combinators
//! - [`cached`] - Cached nodes, including catalog and star list caches
//! - [`node`] - The graph node types
//! - [`engine`] - Observation and query streams
//! - [`scheduler`] - Background and deferred execution
//!
//! Malformed inputs (a product input that is not an object or lacks a
//! child's key, a star input that is not an array) are programming errors:
//! fetching panics with a [`ShapeError`] message, while
//! [`QueryEngine::observe`], [`QueryEngine::query`] and [`Node::check_input`]
//! return the error.
//!
pub mod algebra;
pub mod cached;
mod combine;
pub mod engine;
mod error;
mod event;
mod fetch;
mod invalidation;
pub mod node;
pub mod scheduler;

pub use cached::{CacheOptions, CachedNode, ElementInput};
pub use engine::{NodeStream, QueryEngine};
pub use error::ShapeError;
pub use event::NodeEvent;
pub use fetch::{Fetch, FetchFuture, FetchResult};
pub use invalidation::invalidate;
pub use node::{CompositionNode, Node, ProductNode};
pub use scheduler::{ManualScheduler, Scheduler, Task, TokioScheduler};

pub use cachelito_query_core::{
    available, expire, refetch, CacheEvent, Freshness, ParseFreshnessError, SlotStatus, Strategy,
};

#[cfg(feature = "stats")]
pub use cachelito_query_core::CacheStats;
