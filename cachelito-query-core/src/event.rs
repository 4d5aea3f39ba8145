use std::fmt;
use std::sync::Arc;

/// Snapshot broadcast to the observers of a cache key.
///
/// # States
///
/// | loading | data | error | meaning |
/// |---------|------|-------|---------|
/// | `true`  | no   | no    | first fetch in flight |
/// | `true`  | yes  | no    | showing stale data while refreshing |
/// | `false` | yes  | no    | settled with a payload |
/// | `false` | any  | yes   | settled with a failure, last good data kept |
///
/// A settled event always carries `data` or `error`.
///
/// Payloads and errors are reference counted: two events carry "the same"
/// payload when they share the allocation, which is what
/// [`same_as`](CacheEvent::same_as) compares.
///
/// # Examples
///
/// ```
/// use cachelito_query_core::CacheEvent;
/// use std::sync::Arc;
///
/// let data = Arc::new(1);
/// let refreshing: CacheEvent<i32, String> = CacheEvent::loading(Some(Arc::clone(&data)));
/// assert!(refreshing.loading);
/// assert_eq!(refreshing.data.as_deref(), Some(&1));
///
/// let settled = CacheEvent::<i32, String>::ready(data);
/// assert!(settled.is_settled());
/// ```
pub struct CacheEvent<V, E> {
    pub loading: bool,
    pub data: Option<Arc<V>>,
    pub error: Option<Arc<E>>,
}

impl<V, E> CacheEvent<V, E> {
    /// A fetch is in flight; `previous` is the data still being shown.
    pub fn loading(previous: Option<Arc<V>>) -> Self {
        Self {
            loading: true,
            data: previous,
            error: None,
        }
    }

    /// A fetch settled successfully.
    pub fn ready(data: Arc<V>) -> Self {
        Self {
            loading: false,
            data: Some(data),
            error: None,
        }
    }

    /// A fetch failed; `previous` is the last known good data, if any.
    pub fn failed(error: Arc<E>, previous: Option<Arc<V>>) -> Self {
        Self {
            loading: false,
            data: previous,
            error: Some(error),
        }
    }

    /// Returns `true` for non-loading events.
    pub fn is_settled(&self) -> bool {
        !self.loading
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    /// Identity comparison: equal loading flags and the same data and error allocations.
    pub fn same_as(&self, other: &Self) -> bool {
        self.loading == other.loading
            && same_allocation(&self.data, &other.data)
            && same_allocation(&self.error, &other.error)
    }
}

fn same_allocation<T>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

impl<V, E> Clone for CacheEvent<V, E> {
    fn clone(&self) -> Self {
        Self {
            loading: self.loading,
            data: self.data.clone(),
            error: self.error.clone(),
        }
    }
}

/// Structural comparison of the carried values.
impl<V: PartialEq, E: PartialEq> PartialEq for CacheEvent<V, E> {
    fn eq(&self, other: &Self) -> bool {
        self.loading == other.loading && self.data == other.data && self.error == other.error
    }
}

impl<V: fmt::Debug, E: fmt::Debug> fmt::Debug for CacheEvent<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEvent")
            .field("loading", &self.loading)
            .field("data", &self.data)
            .field("error", &self.error)
            .finish()
    }
}
