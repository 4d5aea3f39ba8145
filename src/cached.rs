//! # Cached Fetch Operators
//!
//! A [`CachedNode`] binds a raw [`Fetch`], a freshness [`Strategy`] and an
//! [`ObservableCache`] into one cacheable, observable graph node.
//!
//! ## Fetch Decision
//!
//! For an input `a`, [`CachedNode::fetch`] looks up the slot keyed by `a`:
//!
//! 1. a fetch is in flight: join it (no new work, no event)
//! 2. a completed value is available under the strategy: return it (no event)
//! 3. otherwise: start the raw fetch, install it as pending (emitting a
//!    loading event), and store its payload or report its failure when it
//!    settles
//!
//! The installed fetch is driven by the node's [`Scheduler`], so it settles
//! and updates the cache even if every caller drops its future.
//!
//! ## List Specializations
//!
//! - [`CachedNode::catalog`] caches a list fetch and can evict every cached
//!   list whose payload contains a given element
//! - [`CachedNode::star`] lifts a singleton fetch over lists and can evict
//!   every cached list whose input contains a given element

use crate::algebra;
use crate::error::items;
use crate::fetch::{Fetch, FetchFuture};
use crate::scheduler::{Scheduler, TokioScheduler};
use cachelito_query_core::utils::{join_list_key, split_list_key};
use cachelito_query_core::{
    default_key_fn, CacheEvent, EventReceiver, Freshness, KeyFn, ObservableCache,
    Strategy,
};
#[cfg(feature = "stats")]
use cachelito_query_core::CacheStats;
use futures::future::{self, FutureExt};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Maps one payload element of a catalog back to the singleton input it
/// answers.
pub type ElementInput = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Construction options for a [`CachedNode`].
///
/// # Defaults
///
/// | option | default |
/// |--------|---------|
/// | `name` | the node kind (`"cached"`, `"catalog"`, `"star"`) |
/// | `strategy` | [`Freshness::Available`] |
/// | `key_fn` | compact JSON of the input |
/// | `scheduler` | [`TokioScheduler`] |
///
/// # Examples
///
/// ```
/// use cachelito_query::{expire, CacheOptions, ManualScheduler};
/// use std::sync::Arc;
///
/// let options = CacheOptions::new()
///     .name("users")
///     .strategy(expire(30_000))
///     .key_fn(|input| input["id"].to_string())
///     .scheduler(Arc::new(ManualScheduler::new()));
/// ```
#[derive(Clone)]
pub struct CacheOptions {
    name: Option<String>,
    strategy: Arc<dyn Strategy>,
    key_fn: Option<KeyFn<Value>>,
    scheduler: Arc<dyn Scheduler>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            name: None,
            strategy: Arc::new(Freshness::Available),
            key_fn: None,
            scheduler: Arc::new(TokioScheduler),
        }
    }
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name used in logs.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn strategy<S: Strategy + 'static>(mut self, strategy: S) -> Self {
        self.strategy = Arc::new(strategy);
        self
    }

    /// Uses a strategy shared with other nodes.
    pub fn shared_strategy(mut self, strategy: Arc<dyn Strategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Overrides how inputs are stringified into slot keys.
    ///
    /// For [`CachedNode::star`] this keys each list element.
    pub fn key_fn<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&Value) -> String + Send + Sync + 'static,
    {
        self.key_fn = Some(Arc::new(key_fn));
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }
}

impl fmt::Debug for CacheOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOptions")
            .field("name", &self.name)
            .field("strategy", &self.strategy)
            .field("custom_key_fn", &self.key_fn.is_some())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

#[derive(Clone)]
enum Eviction {
    /// Only the exact key is ever evicted.
    Exact,
    /// Evicts cached lists holding a payload element that maps to the input.
    Catalog(ElementInput),
    /// Evicts cached lists whose input contains the element.
    Star(KeyFn<Value>),
}

struct Inner<L> {
    name: String,
    fetch: Fetch<L>,
    strategy: Arc<dyn Strategy>,
    cache: ObservableCache<Value, Value, L>,
    eviction: Eviction,
    scheduler: Arc<dyn Scheduler>,
}

/// A cached, observable fetch node.
///
/// Cloning is cheap and yields a handle to the same cache.
///
/// # Examples
///
/// ```
/// use cachelito_query::{CacheOptions, CachedNode, Fetch};
/// use serde_json::{json, Value};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let calls = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&calls);
/// let user = CachedNode::new(
///     Fetch::<String>::new(move |id: Value| {
///         counter.fetch_add(1, Ordering::SeqCst);
///         async move { Ok(json!({ "id": id })) }
///     }),
///     CacheOptions::new().name("user"),
/// );
///
/// let first = user.fetch(json!(1)).await.unwrap();
/// let second = user.fetch(json!(1)).await.unwrap();
/// assert!(Arc::ptr_eq(&first, &second));
/// assert_eq!(calls.load(Ordering::SeqCst), 1);
/// # }
/// ```
pub struct CachedNode<L> {
    inner: Arc<Inner<L>>,
}

impl<L> Clone for CachedNode<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L> fmt::Debug for CachedNode<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedNode")
            .field("name", &self.inner.name)
            .field("strategy", &self.inner.strategy)
            .field("slots", &self.inner.cache.cache().len())
            .finish()
    }
}

impl<L> CachedNode<L>
where
    L: Clone + Send + Sync + 'static,
{
    fn build(fetch: Fetch<L>, options: CacheOptions, kind: &str, eviction: Eviction, key_fn: KeyFn<Value>) -> Self {
        let name = options.name.unwrap_or_else(|| kind.to_string());
        debug!(cache = %name, kind, strategy = ?options.strategy, "creating cached node");
        Self {
            inner: Arc::new(Inner {
                name,
                fetch,
                strategy: options.strategy,
                cache: ObservableCache::with_key_fn(key_fn),
                eviction,
                scheduler: options.scheduler,
            }),
        }
    }

    /// Caches `fetch` per input key.
    pub fn new(fetch: Fetch<L>, options: CacheOptions) -> Self {
        let key_fn = options.key_fn.clone().unwrap_or_else(default_key_fn);
        Self::build(fetch, options, "cached", Eviction::Exact, key_fn)
    }

    /// Caches a list fetch (`[a, ..] -> [p, ..]`).
    ///
    /// `element_input` maps a payload element back to the singleton input it
    /// answers; [`evict_singleton`](Self::evict_singleton) uses it to drop
    /// every cached list that contains an answer for a given singleton.
    ///
    /// # Examples
    ///
    /// ```
    /// use cachelito_query::{CacheOptions, CachedNode, Fetch};
    /// use serde_json::{json, Value};
    /// use std::sync::Arc;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let users = CachedNode::catalog(
    ///     Fetch::<String>::new(|ids: Value| async move {
    ///         let users = ids.as_array().unwrap().iter().map(|id| json!({ "id": id })).collect();
    ///         Ok(Value::Array(users))
    ///     }),
    ///     CacheOptions::new(),
    ///     Arc::new(|user: &Value| user["id"].clone()),
    /// );
    ///
    /// users.fetch(json!([1, 2])).await.unwrap();
    /// users.fetch(json!([3])).await.unwrap();
    ///
    /// assert_eq!(users.evict_singleton(&json!(2)).len(), 1);
    /// assert!(users.cached_value(&json!([1, 2])).is_none());
    /// assert!(users.cached_value(&json!([3])).is_some());
    /// # }
    /// ```
    pub fn catalog(fetch: Fetch<L>, options: CacheOptions, element_input: ElementInput) -> Self {
        let key_fn = options.key_fn.clone().unwrap_or_else(default_key_fn);
        Self::build(fetch, options, "catalog", Eviction::Catalog(element_input), key_fn)
    }

    /// Caches [`algebra::star`] of a singleton fetch.
    ///
    /// Lists are keyed by the JSON array of their elements' keys, so two
    /// lists share a slot only if they hold the same elements in the same
    /// order.
    pub fn star(fetch: Fetch<L>, options: CacheOptions) -> Self {
        let element_key = options.key_fn.clone().unwrap_or_else(default_key_fn);
        let list_key = {
            let element_key = Arc::clone(&element_key);
            Arc::new(move |input: &Value| match input.as_array() {
                Some(elements) => join_list_key(elements.iter().map(|e| element_key(e)).collect()),
                None => element_key(input),
            }) as KeyFn<Value>
        };
        Self::build(algebra::star(fetch), options, "star", Eviction::Star(element_key), list_key)
    }

    /// Fetches `input` through the cache.
    ///
    /// Joins the in-flight fetch for the key if there is one, serves the
    /// completed value if the strategy allows it, and otherwise starts a new
    /// fetch.
    ///
    /// # Panics
    ///
    /// A star node panics if `input` is not an array.
    pub fn fetch(&self, input: Value) -> FetchFuture<L> {
        let inner = &self.inner;
        if let Some(slot) = inner.cache.get(&input) {
            if let Some(pending) = slot.pending() {
                trace!(cache = %inner.name, "joining in-flight fetch");
                #[cfg(feature = "stats")]
                self.stats().record_coalesced();
                return pending.clone().boxed();
            }
            if inner.strategy.is_available(slot.status()) {
                if let Some(value) = slot.value() {
                    trace!(cache = %inner.name, "serving cached value");
                    #[cfg(feature = "stats")]
                    self.stats().record_hit();
                    return future::ready(Ok(value)).boxed();
                }
            }
        }

        #[cfg(feature = "stats")]
        self.stats().record_miss();
        let ticket = inner.cache.ticket(&input);
        debug!(cache = %inner.name, key = ticket.key(), ticket = ticket.id(), "starting fetch");

        let raw = inner.fetch.call(input);
        let owner: Weak<Inner<L>> = Arc::downgrade(inner);
        let settle_ticket = ticket.clone();
        let settled = async move {
            let result = raw.await;
            if let Some(owner) = owner.upgrade() {
                match &result {
                    Ok(value) => {
                        owner.cache.store_payload(&settle_ticket, Arc::clone(value));
                    }
                    Err(error) => {
                        debug!(cache = %owner.name, key = settle_ticket.key(), "fetch failed");
                        owner.cache.store_failure(&settle_ticket, error.clone());
                    }
                }
            }
            result
        }
        .boxed()
        .shared();

        let pending = inner.cache.store_pending(&ticket, settled.clone());
        if pending.ptr_eq(&settled) {
            inner.scheduler.spawn(settled.map(|_| ()).boxed());
        }
        pending.boxed()
    }

    /// Starts (or joins) a fetch of `input` without awaiting it.
    pub fn trigger(&self, input: Value) {
        drop(self.fetch(input));
    }

    /// The last completed value for `input`, whatever its freshness.
    pub fn cached_value(&self, input: &Value) -> Option<Arc<Value>> {
        self.inner.cache.get(input).and_then(|slot| slot.value())
    }

    /// Subscribes to `input`'s key, replaying its latest event.
    pub fn subscribe(&self, input: &Value) -> EventReceiver<Value, L> {
        self.inner.cache.subscribe(input)
    }

    /// The latest event emitted for `input`'s key.
    pub fn latest(&self, input: &Value) -> Option<CacheEvent<Value, L>> {
        self.inner.cache.latest(input)
    }

    /// Deletes the slot of `input`'s exact key.
    pub fn delete(&self, input: &Value) -> bool {
        self.inner.cache.delete(input)
    }

    /// Deletes every cached list containing `input` as an element.
    ///
    /// Elements are matched by key: a star node applies its element key
    /// function to `input`, a catalog node compares the node's key of
    /// `input` against the key of each payload element's singleton input.
    ///
    /// Returns the evicted keys. Plain cached nodes have no list entries and
    /// evict nothing.
    pub fn evict_singleton(&self, input: &Value) -> Vec<String> {
        let cache = &self.inner.cache;
        let evicted = match &self.inner.eviction {
            Eviction::Exact => Vec::new(),
            Eviction::Catalog(element_input) => {
                let singleton = cache.key(input);
                cache.delete_where(|_, slot| {
                    slot.value()
                        .and_then(|payload| {
                            payload.as_array().map(|elements| {
                                elements
                                    .iter()
                                    .any(|element| cache.key(&element_input(element)) == singleton)
                            })
                        })
                        .unwrap_or(false)
                })
            }
            Eviction::Star(element_key) => {
                let singleton = element_key(input);
                cache.delete_where(|key, _| {
                    split_list_key(key).map_or(false, |keys| keys.contains(&singleton))
                })
            }
        };
        if !evicted.is_empty() {
            debug!(cache = %self.inner.name, count = evicted.len(), "evicted lists by element");
        }
        evicted
    }

    /// Returns `true` if anyone observes `input`'s key.
    pub fn has_observers(&self, input: &Value) -> bool {
        self.inner.cache.has_observers(input)
    }

    /// Returns `true` if anyone observes a slot key, such as one returned
    /// by [`evict_singleton`](Self::evict_singleton).
    pub fn has_key_observers(&self, key: &str) -> bool {
        self.inner.cache.key_observer_count(key) > 0
    }

    /// Ends the event streams of `input`'s key.
    pub fn dispose(&self, input: &Value) -> bool {
        self.inner.cache.dispose(input)
    }

    /// Drops per-key event state no one observes any more.
    pub fn dispose_unobserved(&self) -> usize {
        self.inner.cache.dispose_unobserved()
    }

    /// Validates `input` for this node without fetching.
    pub(crate) fn check_input(&self, input: &Value) -> Result<(), crate::ShapeError> {
        match self.inner.eviction {
            Eviction::Star(_) => items(input).map(|_| ()),
            _ => Ok(()),
        }
    }
}

impl<L> CachedNode<L> {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn strategy(&self) -> &Arc<dyn Strategy> {
        &self.inner.strategy
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.inner.scheduler
    }

    /// Number of slots currently held.
    pub fn len(&self) -> usize {
        self.inner.cache.cache().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.cache.cache().is_empty()
    }

    #[cfg(feature = "stats")]
    pub fn stats(&self) -> &CacheStats {
        self.inner.cache.cache().stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachelito_query_core::refetch;
    use futures::StreamExt;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(calls: &Arc<AtomicUsize>) -> Fetch<String> {
        let calls = Arc::clone(calls);
        Fetch::new(move |input: Value| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(json!({ "input": input, "call": n })) }
        })
    }

    #[tokio::test]
    async fn test_concurrent_calls_share_one_fetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let node = CachedNode::new(counting(&calls), CacheOptions::new());

        let (a, b) = futures::join!(node.fetch(json!(1)), node.fetch(json!(1)));
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        #[cfg(feature = "stats")]
        {
            assert_eq!(node.stats().misses(), 1);
            assert_eq!(node.stats().coalesced(), 1);
        }
    }

    #[tokio::test]
    async fn test_refetch_strategy_always_fetches() {
        let calls = Arc::new(AtomicUsize::new(0));
        let node = CachedNode::new(counting(&calls), CacheOptions::new().strategy(refetch()));

        node.fetch(json!(1)).await.unwrap();
        node.fetch(json!(1)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dropped_fetch_still_settles() {
        let calls = Arc::new(AtomicUsize::new(0));
        let node = CachedNode::new(counting(&calls), CacheOptions::new());
        let mut events = node.subscribe(&json!(1));

        node.trigger(json!(1));
        assert_eq!(events.next().await, Some(CacheEvent::loading(None)));
        let ready = events.next().await.unwrap();
        assert!(ready.is_settled());
        assert_eq!(node.cached_value(&json!(1)), ready.data);
    }

    #[tokio::test]
    async fn test_custom_key_fn_collapses_inputs() {
        let calls = Arc::new(AtomicUsize::new(0));
        let node = CachedNode::new(
            counting(&calls),
            CacheOptions::new().key_fn(|input| input["id"].to_string()),
        );

        node.fetch(json!({"id": 1, "noise": "a"})).await.unwrap();
        node.fetch(json!({"id": 1, "noise": "b"})).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_star_keys_by_element_keys() {
        let calls = Arc::new(AtomicUsize::new(0));
        let node = CachedNode::star(counting(&calls), CacheOptions::new());

        let out = node.fetch(json!([1, 2])).await.unwrap();
        assert_eq!(out.as_array().map(Vec::len), Some(2));
        assert!(node.cached_value(&json!([1, 2])).is_some());
        assert!(node.cached_value(&json!([2, 1])).is_none());

        assert_eq!(node.evict_singleton(&json!(2)), vec![r#"["1","2"]"#.to_string()]);
        assert!(node.is_empty());
    }

    #[test]
    fn test_star_rejects_non_list_input() {
        let node: CachedNode<String> = CachedNode::star(Fetch::new(|v: Value| async move { Ok(v) }), CacheOptions::new());
        assert!(node.check_input(&json!(1)).is_err());
        assert!(node.check_input(&json!([1])).is_ok());
    }

    #[test]
    fn test_plain_node_evicts_nothing_by_element() {
        let node: CachedNode<String> = CachedNode::new(Fetch::new(|v: Value| async move { Ok(v) }), CacheOptions::new().name("plain"));
        assert!(node.evict_singleton(&json!(1)).is_empty());
        assert_eq!(node.name(), "plain");
    }
}
