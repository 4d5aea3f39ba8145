//! Where background fetch drivers and deferred actions run.
//!
//! Cached nodes start their fetches eagerly: the fetch future is handed to a
//! [`Scheduler`] so it completes (and updates the cache) even if the caller
//! drops its own handle. Composition streams also use the scheduler to defer
//! slave refreshes to the next turn.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use tokio::runtime::Handle;
use tracing::warn;

/// A deferred, run-once action.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs background futures and deferred actions.
pub trait Scheduler: Send + Sync + fmt::Debug {
    /// Drives `future` to completion in the background.
    fn spawn(&self, future: BoxFuture<'static, ()>);

    /// Runs `task` later, after the current call stack has unwound.
    fn defer(&self, task: Task);
}

/// Scheduler backed by the ambient tokio runtime.
///
/// Outside a runtime, spawning is skipped with a warning (callers still hold
/// the shared fetch future and can drive it themselves) and deferred tasks
/// run inline.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn spawn(&self, future: BoxFuture<'static, ()>) {
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(future);
            }
            Err(_) => warn!("no tokio runtime; fetch will only be driven by its callers"),
        }
    }

    fn defer(&self, task: Task) {
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { task() });
            }
            Err(_) => task(),
        }
    }
}

/// Scheduler whose deferred tasks run only when asked to.
///
/// Meant for tests that need to observe the state between an emission and
/// its deferred follow-up. Futures are still spawned on tokio.
///
/// # Examples
///
/// ```
/// use cachelito_query::{ManualScheduler, Scheduler};
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
///
/// let scheduler = ManualScheduler::new();
/// let ran = Arc::new(AtomicBool::new(false));
/// let flag = Arc::clone(&ran);
/// scheduler.defer(Box::new(move || flag.store(true, Ordering::SeqCst)));
///
/// assert_eq!(scheduler.deferred_len(), 1);
/// assert!(!ran.load(Ordering::SeqCst));
///
/// assert_eq!(scheduler.run_deferred(), 1);
/// assert!(ran.load(Ordering::SeqCst));
/// ```
#[derive(Default)]
pub struct ManualScheduler {
    deferred: Mutex<VecDeque<Task>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs queued tasks until the queue is empty, including tasks queued
    /// while running. Returns how many ran.
    pub fn run_deferred(&self) -> usize {
        let mut ran = 0;
        loop {
            // Released before the task runs so tasks may defer more.
            let next = self.deferred.lock().pop_front();
            match next {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.lock().len()
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("deferred", &self.deferred_len())
            .finish()
    }
}

impl Scheduler for ManualScheduler {
    fn spawn(&self, future: BoxFuture<'static, ()>) {
        TokioScheduler.spawn(future);
    }

    fn defer(&self, task: Task) {
        self.deferred.lock().push_back(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_tokio_defer_runs_inline_without_runtime() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        TokioScheduler.defer(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_tokio_defer_runs_later_inside_runtime() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        TokioScheduler.defer(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_manual_runs_nested_deferrals() {
        let scheduler = Arc::new(ManualScheduler::new());
        let count = Arc::new(AtomicUsize::new(0));

        let inner_count = Arc::clone(&count);
        let inner_scheduler = Arc::clone(&scheduler);
        scheduler.defer(Box::new(move || {
            inner_count.fetch_add(1, Ordering::SeqCst);
            let c = Arc::clone(&inner_count);
            inner_scheduler.defer(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }));
        }));

        assert_eq!(scheduler.run_deferred(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.deferred_len(), 0);
    }
}
