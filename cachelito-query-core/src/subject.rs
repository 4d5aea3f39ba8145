use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use parking_lot::Mutex;

/// Multi-subscriber, replay-latest event source.
///
/// Every subscriber gets its own unbounded channel: it first receives the
/// latest value (if one was ever emitted) and then every later emission, in
/// order and without coalescing. Dropping the receiver unsubscribes.
///
/// A new subject holds no value, so subscribers see nothing until the first
/// emission.
///
/// # Examples
///
/// ```
/// use cachelito_query_core::Subject;
/// use futures::StreamExt;
///
/// # futures::executor::block_on(async {
/// let subject = Subject::new();
/// subject.next(1);
///
/// let mut rx = subject.subscribe();
/// subject.next(2);
///
/// assert_eq!(rx.next().await, Some(1));
/// assert_eq!(rx.next().await, Some(2));
/// assert_eq!(subject.observer_count(), 1);
///
/// drop(rx);
/// assert_eq!(subject.observer_count(), 0);
/// # });
/// ```
pub struct Subject<T> {
    state: Mutex<SubjectState<T>>,
}

struct SubjectState<T> {
    latest: Option<T>,
    observers: Vec<UnboundedSender<T>>,
}

impl<T: Clone> Subject<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SubjectState {
                latest: None,
                observers: Vec::new(),
            }),
        }
    }

    /// Registers a new observer, replaying the latest value into it.
    pub fn subscribe(&self) -> UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded();
        let mut state = self.state.lock();
        if let Some(latest) = &state.latest {
            // Cannot fail: the receiver is still in scope.
            let _ = tx.unbounded_send(latest.clone());
        }
        state.observers.push(tx);
        rx
    }

    /// Stores `value` as the latest and delivers it to every live observer.
    pub fn next(&self, value: T) {
        let mut state = self.state.lock();
        state
            .observers
            .retain(|tx| tx.unbounded_send(value.clone()).is_ok());
        state.latest = Some(value);
    }

    /// Number of observers whose receiver is still alive.
    pub fn observer_count(&self) -> usize {
        let mut state = self.state.lock();
        state.observers.retain(|tx| !tx.is_closed());
        state.observers.len()
    }

    pub fn has_observers(&self) -> bool {
        self.observer_count() > 0
    }

    /// The last emitted value.
    pub fn latest(&self) -> Option<T> {
        self.state.lock().latest.clone()
    }

    /// Forgets the latest value without notifying anyone.
    ///
    /// Live observers keep their subscription; later subscribers see nothing
    /// until the next emission.
    pub fn reset(&self) {
        self.state.lock().latest = None;
    }
}

impl<T: Clone> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}
