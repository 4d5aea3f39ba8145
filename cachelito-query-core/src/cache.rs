#[cfg(feature = "stats")]
use crate::CacheStats;
use crate::keys::{default_key_fn, CacheableKey, KeyFn};
use crate::slot::{Completed, PendingFetch, Slot};
use crate::utils::now_millis;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Handle identifying one fetch started for one key.
///
/// A ticket is allocated before the raw fetch is started and travels with
/// it, so that when the fetch settles the cache can tell whether it is still
/// the slot's current fetch or has been superseded (by deletion or by a
/// newer fetch).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchTicket {
    key: String,
    id: u64,
}

impl FetchTicket {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Outcome of [`Cache::store_pending`].
pub enum StorePending<V, E> {
    /// The fetch was installed; `previous` is the last completed value of the slot.
    Installed { previous: Option<Arc<V>> },
    /// Another fetch for the key was already in flight and is kept.
    InFlight(PendingFetch<V, E>),
}

/// Per-key fetch cache.
///
/// Slots live in a [`DashMap`] keyed by the stringified input. The cache owns
/// the key function (`atok`) used to address them.
///
/// # Type Parameters
///
/// * `A` - the input type the key function is applied to
/// * `V` - the payload type
/// * `E` - the error type of the fetches stored in pending slots
///
/// # Concurrency
///
/// * At most one fetch is pending per key; a settled fetch only touches its
///   slot if its [`FetchTicket`] is still the current one.
/// * Deleting a slot drops both the pending fetch and the completed value.
///   A fetch in flight at that moment still runs to completion, but its
///   result is discarded.
///
/// # Examples
///
/// ```
/// use cachelito_query_core::Cache;
/// use futures::FutureExt;
/// use std::sync::Arc;
///
/// let cache: Cache<String, u32, ()> = Cache::new();
/// let input = "answer".to_string();
///
/// let ticket = cache.ticket(&input);
/// let fetch = futures::future::ready(Ok(Arc::new(42))).boxed().shared();
/// cache.store_pending(&ticket, fetch);
/// assert!(cache.get(&input).unwrap().pending().is_some());
///
/// assert!(cache.store_payload(&ticket, Arc::new(42)));
/// let slot = cache.get(&input).unwrap();
/// assert!(slot.pending().is_none());
/// assert_eq!(slot.value().as_deref(), Some(&42));
/// ```
pub struct Cache<A, V, E> {
    slots: DashMap<String, Slot<V, E>>,
    key_fn: KeyFn<A>,
    next_ticket: AtomicU64,
    #[cfg(feature = "stats")]
    stats: CacheStats,
}

impl<A: CacheableKey + 'static, V, E> Cache<A, V, E> {
    /// Creates a cache keyed by [`CacheableKey::to_cache_key`].
    pub fn new() -> Self {
        Self::with_key_fn(default_key_fn())
    }
}

impl<A: CacheableKey + 'static, V, E> Default for Cache<A, V, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A, V, E> Cache<A, V, E> {
    /// Creates a cache keyed by a custom key function.
    pub fn with_key_fn(key_fn: KeyFn<A>) -> Self {
        Self {
            slots: DashMap::new(),
            key_fn,
            next_ticket: AtomicU64::new(1),
            #[cfg(feature = "stats")]
            stats: CacheStats::new(),
        }
    }

    /// Stringifies `input` into its slot key.
    pub fn key(&self, input: &A) -> String {
        (self.key_fn)(input)
    }

    /// Returns a snapshot of the slot for `input`.
    pub fn get(&self, input: &A) -> Option<Slot<V, E>> {
        self.get_by_key(&self.key(input))
    }

    pub fn get_by_key(&self, key: &str) -> Option<Slot<V, E>> {
        self.slots.get(key).map(|slot| slot.clone())
    }

    /// Allocates a ticket for a new fetch of `input`.
    pub fn ticket(&self, input: &A) -> FetchTicket {
        FetchTicket {
            key: self.key(input),
            id: self.next_ticket.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Installs `fetch` as the pending fetch of the ticket's key.
    ///
    /// This is the coalescing point: callers arriving after this returns join
    /// the installed fetch. If a fetch is already in flight for the key (a
    /// concurrent caller won the race between lookup and store), that fetch
    /// is kept and returned, and `fetch` is dropped without being polled.
    pub fn store_pending(&self, ticket: &FetchTicket, fetch: PendingFetch<V, E>) -> StorePending<V, E> {
        let mut slot = self
            .slots
            .entry(ticket.key.clone())
            .or_insert_with(Slot::empty);
        if let Some((_, running)) = &slot.pending {
            trace!(key = %ticket.key, ticket = ticket.id, "fetch already in flight");
            return StorePending::InFlight(running.clone());
        }
        slot.pending = Some((ticket.id, fetch));
        trace!(key = %ticket.key, ticket = ticket.id, "pending fetch stored");
        // `RefMut::value` would shadow `Slot::value` here.
        StorePending::Installed {
            previous: Slot::value(&*slot),
        }
    }

    /// Records the payload of a settled fetch.
    ///
    /// Returns `false` (and leaves the slot untouched) when the ticket is no
    /// longer the slot's pending fetch.
    pub fn store_payload(&self, ticket: &FetchTicket, value: Arc<V>) -> bool {
        match self.slots.get_mut(&ticket.key) {
            Some(mut slot) if slot.is_current(ticket.id) => {
                slot.done = Some(Completed {
                    value,
                    timestamp: now_millis(),
                });
                slot.pending = None;
                trace!(key = %ticket.key, ticket = ticket.id, "payload stored");
                true
            }
            _ => {
                self.discard_stale(ticket);
                false
            }
        }
    }

    /// Clears the pending fetch of a failed ticket so the next access retries.
    ///
    /// Returns the slot's last completed value wrapped in `Some` when the
    /// ticket was current, `None` when the failure was stale.
    pub fn settle_failure(&self, ticket: &FetchTicket) -> Option<Option<Arc<V>>> {
        let previous = match self.slots.entry(ticket.key.clone()) {
            Entry::Occupied(mut slot) if slot.get().is_current(ticket.id) => {
                slot.get_mut().pending = None;
                let previous = slot.get().value();
                if slot.get().is_vacant() {
                    slot.remove();
                }
                previous
            }
            _ => {
                self.discard_stale(ticket);
                return None;
            }
        };
        debug!(key = %ticket.key, ticket = ticket.id, "fetch failed, pending cleared");
        Some(previous)
    }

    fn discard_stale(&self, ticket: &FetchTicket) {
        #[cfg(feature = "stats")]
        self.stats.record_stale();
        debug!(key = %ticket.key, ticket = ticket.id, "stale completion discarded");
    }

    /// Removes the slot for `input`. Returns `true` if a slot existed.
    pub fn delete(&self, input: &A) -> bool {
        self.delete_key(&self.key(input))
    }

    pub fn delete_key(&self, key: &str) -> bool {
        self.slots.remove(key).is_some()
    }

    /// Removes every slot matching `predicate`, returning the removed keys.
    pub fn delete_where<F>(&self, predicate: F) -> Vec<String>
    where
        F: Fn(&str, &Slot<V, E>) -> bool,
    {
        let mut removed = Vec::new();
        self.slots.retain(|key, slot| {
            if predicate(key, slot) {
                removed.push(key.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn keys(&self) -> Vec<String> {
        self.slots.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clear(&self) {
        self.slots.clear();
    }

    #[cfg(feature = "stats")]
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}
