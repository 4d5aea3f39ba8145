use crate::cache::{Cache, FetchTicket, StorePending};
use crate::keys::{CacheableKey, KeyFn};
use crate::slot::{PendingFetch, Slot};
use crate::{CacheEvent, Subject};
use futures::channel::mpsc::UnboundedReceiver;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Stream of events for one cache key.
pub type EventReceiver<V, E> = UnboundedReceiver<CacheEvent<V, E>>;

/// A [`Cache`] that broadcasts every slot mutation as a [`CacheEvent`].
///
/// One replay-latest [`Subject`] is kept per key. Subjects are created on the
/// first subscription or emission for a key and are never removed
/// automatically, so the subject map grows with the number of distinct keys
/// ever touched. Long-lived owners with high key cardinality call
/// [`dispose_unobserved`](Self::dispose_unobserved) (or [`dispose`](Self::dispose)
/// per key) to bound it.
///
/// # Emission Rules
///
/// | mutation | event |
/// |----------|-------|
/// | [`store_pending`](Self::store_pending) installs a fetch | `{ loading: true, data: previous }` |
/// | [`store_payload`](Self::store_payload) accepts a payload | `{ loading: false, data }` |
/// | [`store_failure`](Self::store_failure) accepts a failure | `{ loading: false, data: previous, error }` |
///
/// Stale completions and deletions emit nothing. A deletion does forget the
/// key's latest event, so a subscriber arriving after it is not replayed the
/// evicted data.
pub struct ObservableCache<A, V, E> {
    cache: Cache<A, V, E>,
    subjects: Mutex<HashMap<String, Arc<Subject<CacheEvent<V, E>>>>>,
}

impl<A: CacheableKey + 'static, V, E> ObservableCache<A, V, E> {
    pub fn new() -> Self {
        Self::from_cache(Cache::new())
    }
}

impl<A: CacheableKey + 'static, V, E> Default for ObservableCache<A, V, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A, V, E> ObservableCache<A, V, E> {
    pub fn with_key_fn(key_fn: KeyFn<A>) -> Self {
        Self::from_cache(Cache::with_key_fn(key_fn))
    }

    pub fn from_cache(cache: Cache<A, V, E>) -> Self {
        Self {
            cache,
            subjects: Mutex::new(HashMap::new()),
        }
    }

    /// The decorated cache.
    pub fn cache(&self) -> &Cache<A, V, E> {
        &self.cache
    }

    pub fn key(&self, input: &A) -> String {
        self.cache.key(input)
    }

    pub fn get(&self, input: &A) -> Option<Slot<V, E>> {
        self.cache.get(input)
    }

    pub fn ticket(&self, input: &A) -> FetchTicket {
        self.cache.ticket(input)
    }

    /// Deletes the slot of `input`'s key. Returns `true` if a slot existed.
    pub fn delete(&self, input: &A) -> bool {
        let key = self.cache.key(input);
        let deleted = self.cache.delete_key(&key);
        self.forget(&key);
        deleted
    }

    /// Deletes every slot matching `predicate`, returning the removed keys.
    pub fn delete_where<F>(&self, predicate: F) -> Vec<String>
    where
        F: Fn(&str, &Slot<V, E>) -> bool,
    {
        let removed = self.cache.delete_where(predicate);
        for key in &removed {
            self.forget(key);
        }
        removed
    }

    fn forget(&self, key: &str) {
        let subject = self.subjects.lock().get(key).cloned();
        if let Some(subject) = subject {
            trace!(key, "latest event forgotten");
            subject.reset();
        }
    }

    /// Returns `true` if anyone is subscribed to `input`'s key.
    pub fn has_observers(&self, input: &A) -> bool {
        self.observer_count(input) > 0
    }

    pub fn observer_count(&self, input: &A) -> usize {
        self.key_observer_count(&self.cache.key(input))
    }

    /// Number of subscribers to an already stringified key.
    pub fn key_observer_count(&self, key: &str) -> usize {
        let subject = self.subjects.lock().get(key).cloned();
        subject.map_or(0, |subject| subject.observer_count())
    }

    /// Removes the subject of `input`'s key, ending its subscribers' streams.
    pub fn dispose(&self, input: &A) -> bool {
        let key = self.cache.key(input);
        self.subjects.lock().remove(&key).is_some()
    }

    /// Removes every subject without live observers. Returns how many were removed.
    pub fn dispose_unobserved(&self) -> usize {
        let mut subjects = self.subjects.lock();
        let before = subjects.len();
        subjects.retain(|_, subject| subject.has_observers());
        before - subjects.len()
    }

    /// Number of subjects currently held.
    pub fn subject_count(&self) -> usize {
        self.subjects.lock().len()
    }
}

impl<A, V, E> ObservableCache<A, V, E>
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn subject(&self, key: &str) -> Arc<Subject<CacheEvent<V, E>>> {
        let mut subjects = self.subjects.lock();
        Arc::clone(
            subjects
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Subject::new())),
        )
    }

    fn emit(&self, key: &str, event: CacheEvent<V, E>) {
        trace!(key, loading = event.loading, error = event.error.is_some(), "cache event");
        self.subject(key).next(event);
    }

    /// Subscribes to `input`'s key, replaying its latest event.
    pub fn subscribe(&self, input: &A) -> EventReceiver<V, E> {
        self.subject(&self.cache.key(input)).subscribe()
    }

    /// The latest event emitted for `input`'s key.
    pub fn latest(&self, input: &A) -> Option<CacheEvent<V, E>> {
        let key = self.cache.key(input);
        let subject = self.subjects.lock().get(&key).cloned();
        subject.and_then(|subject| subject.latest())
    }

    /// Stores a pending fetch and, if it was installed, emits a loading event
    /// carrying the previous data.
    ///
    /// Returns the fetch now pending for the key.
    pub fn store_pending(&self, ticket: &FetchTicket, fetch: PendingFetch<V, E>) -> PendingFetch<V, E> {
        match self.cache.store_pending(ticket, fetch.clone()) {
            StorePending::Installed { previous } => {
                self.emit(ticket.key(), CacheEvent::loading(previous));
                fetch
            }
            StorePending::InFlight(running) => running,
        }
    }

    /// Stores a payload and emits it if the ticket was current.
    pub fn store_payload(&self, ticket: &FetchTicket, value: Arc<V>) -> bool {
        let stored = self.cache.store_payload(ticket, Arc::clone(&value));
        if stored {
            self.emit(ticket.key(), CacheEvent::ready(value));
        }
        stored
    }

    /// Settles a failed fetch and emits the error if the ticket was current.
    ///
    /// The emitted event is settled (`loading: false`) and keeps the last
    /// completed value as its data.
    pub fn store_failure(&self, ticket: &FetchTicket, error: E) -> bool {
        match self.cache.settle_failure(ticket) {
            Some(previous) => {
                self.emit(ticket.key(), CacheEvent::failed(Arc::new(error), previous));
                true
            }
            None => false,
        }
    }
}
