use futures::future::{BoxFuture, Shared};
use std::fmt;
use std::sync::Arc;

/// Result of a fetch: a shared payload or the fetch's own error.
pub type FetchResult<V, E> = Result<Arc<V>, E>;

/// In-flight fetch stored in a slot so concurrent callers can join it.
pub type PendingFetch<V, E> = Shared<BoxFuture<'static, FetchResult<V, E>>>;

/// Last successful completion of a slot.
///
/// Replaced wholesale on every successful fetch, never merged.
pub struct Completed<V> {
    pub value: Arc<V>,
    /// Unix millis at which the fetch completed.
    pub timestamp: u64,
}

impl<V> Clone for Completed<V> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            timestamp: self.timestamp,
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for Completed<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completed")
            .field("value", &self.value)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

/// Per-key cache record.
///
/// A slot holds the in-flight fetch for its key (if any), tagged with the
/// ticket id that installed it, and the last completed value (if any).
/// A slot with neither is never stored.
///
/// # Fields
///
/// * `pending` - the in-flight fetch and its ticket id
/// * `done` - the last successful completion
pub struct Slot<V, E> {
    pub(crate) pending: Option<(u64, PendingFetch<V, E>)>,
    pub(crate) done: Option<Completed<V>>,
}

impl<V, E> Slot<V, E> {
    pub(crate) fn empty() -> Self {
        Self {
            pending: None,
            done: None,
        }
    }

    /// The in-flight fetch, if one is running.
    pub fn pending(&self) -> Option<&PendingFetch<V, E>> {
        self.pending.as_ref().map(|(_, fetch)| fetch)
    }

    /// The last successful completion, if any.
    pub fn done(&self) -> Option<&Completed<V>> {
        self.done.as_ref()
    }

    /// Shorthand for the last completed value.
    pub fn value(&self) -> Option<Arc<V>> {
        self.done.as_ref().map(|done| Arc::clone(&done.value))
    }

    /// Summary handed to [`Strategy::is_available`](crate::Strategy::is_available).
    pub fn status(&self) -> SlotStatus {
        SlotStatus {
            pending: self.pending.is_some(),
            completed_at: self.done.as_ref().map(|done| done.timestamp),
        }
    }

    pub(crate) fn is_vacant(&self) -> bool {
        self.pending.is_none() && self.done.is_none()
    }

    pub(crate) fn is_current(&self, ticket_id: u64) -> bool {
        matches!(self.pending, Some((id, _)) if id == ticket_id)
    }
}

impl<V, E> Clone for Slot<V, E> {
    fn clone(&self) -> Self {
        Self {
            pending: self.pending.clone(),
            done: self.done.clone(),
        }
    }
}

impl<V: fmt::Debug, E> fmt::Debug for Slot<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("pending", &self.pending.as_ref().map(|(id, _)| id))
            .field("done", &self.done)
            .finish()
    }
}

/// Type-erased view of a slot used by freshness strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct SlotStatus {
    /// A fetch is in flight.
    pub pending: bool,
    /// Completion time of the last successful fetch.
    pub completed_at: Option<u64>,
}
