//! # Observation Engine
//!
//! Derives a live event stream for any node of the fetch graph.
//!
//! ## Propagation Rules
//!
//! | node | stream |
//! |------|--------|
//! | cached | the node's own per-key events |
//! | product | combine-latest of every child, as a keyed map of child events |
//! | composition | derived from the master's events, switching to the slave's events once the master settles |
//!
//! For each master emission a composition:
//!
//! 1. forwards `{ loading: false, error }` if a child settled with an error and no data
//! 2. emits `{ loading: true }` if some child has no data yet
//! 3. emits `{ loading: true, data: <slave's cached value> }` if some child is refreshing
//! 4. forwards `{ loading: false, data: <slave's cached value>, error }` if a
//!    child's refresh failed but it kept its previous data; the slave is not
//!    fetched again
//! 5. otherwise derives the slave input, schedules a slave fetch for the next
//!    turn (skipped if by then no one observes that input) and switches to
//!    the slave's events for it
//!
//! [`QueryEngine::query`] additionally primes the cached leaves and drops
//! consecutive emissions that carry the same payloads. A composition's slave
//! is never primed: step 5 fetches it once the master settles.

use crate::cached::CachedNode;
use crate::combine::CombineLatest;
use crate::error::ShapeError;
use crate::event::NodeEvent;
use crate::fetch::FetchFuture;
use crate::node::{CompositionNode, Node};
use crate::scheduler::{Scheduler, TokioScheduler};
use cachelito_query_core::{CacheEvent, EventReceiver};
use futures::future::{self, FutureExt};
use futures::stream::{BoxStream, Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, trace};

/// Live events of an observed node.
pub type NodeStream<L> = BoxStream<'static, NodeEvent<L>>;

/// Entry point for observing and querying fetch graphs.
///
/// The engine's scheduler drives the fetch started by [`query`](Self::query);
/// cached nodes drive their own fetches and deferred work with theirs.
///
/// # Examples
///
/// ```
/// use cachelito_query::{CacheOptions, CachedNode, Fetch, Node, QueryEngine};
/// use futures::StreamExt;
/// use serde_json::{json, Value};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let user: Node<String> = CachedNode::new(
///     Fetch::new(|id: Value| async move { Ok(json!({ "id": id })) }),
///     CacheOptions::new(),
/// )
/// .into();
///
/// let engine = QueryEngine::new();
/// let mut events = engine.query(&user, &json!(1)).unwrap();
///
/// let loading = events.next().await.unwrap();
/// assert!(loading.is_loading());
///
/// let ready = events.next().await.unwrap();
/// assert_eq!(ready.data_value(), Some(json!({ "id": 1 })));
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct QueryEngine {
    scheduler: Arc<dyn Scheduler>,
}

impl Default for QueryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryEngine {
    pub fn new() -> Self {
        Self::with_scheduler(Arc::new(TokioScheduler))
    }

    pub fn with_scheduler(scheduler: Arc<dyn Scheduler>) -> Self {
        Self { scheduler }
    }

    /// Live events of `node` at `input`.
    ///
    /// Observing does not fetch: the stream stays silent until something
    /// fetches the observed keys (see [`query`](Self::query)).
    ///
    /// # Errors
    ///
    /// Returns a [`ShapeError`] if `input` does not fit the node.
    pub fn observe<L>(&self, node: &Node<L>, input: &Value) -> Result<NodeStream<L>, ShapeError>
    where
        L: Clone + Send + Sync + 'static,
    {
        node.check_input(input)?;
        Ok(observe_unchecked(node, input))
    }

    /// Observes `node` at `input`, fetches it, and yields only emissions that
    /// differ from the previous one.
    ///
    /// Every cached node reachable without crossing into a composition's
    /// slave is triggered right away. Slaves are fetched by the observation
    /// itself once their master settles, so each derived input is fetched
    /// once per query.
    ///
    /// Two consecutive emissions are the same when their loading flags match
    /// and they carry the same data and error allocations, recursively for
    /// product events.
    ///
    /// # Errors
    ///
    /// Returns a [`ShapeError`] if `input` does not fit the node.
    pub fn query<L>(&self, node: &Node<L>, input: &Value) -> Result<NodeStream<L>, ShapeError>
    where
        L: Clone + Send + Sync + 'static,
    {
        let events = self.observe(node, input)?;
        debug!(node = ?node, "query");
        let primed = future::join_all(prime(node, input));
        self.scheduler.spawn(primed.map(|_| ()).boxed());
        Ok(distinct(events))
    }
}

/// Starts the fetches a query of `node` needs up front.
fn prime<L>(node: &Node<L>, input: &Value) -> Vec<FetchFuture<L>>
where
    L: Clone + Send + Sync + 'static,
{
    match node {
        Node::Cached(node) => vec![node.fetch(input.clone())],
        Node::Product(node) => node
            .children()
            .iter()
            .flat_map(|(key, child)| prime(child, &input[key.as_str()]))
            .collect(),
        Node::Composition(node) => prime(&Node::Product(node.master().clone()), input),
    }
}

fn observe_unchecked<L>(node: &Node<L>, input: &Value) -> NodeStream<L>
where
    L: Clone + Send + Sync + 'static,
{
    match node {
        Node::Cached(node) => node.subscribe(input).map(NodeEvent::Cached).boxed(),
        Node::Product(node) => CombineLatest::new(
            node.children()
                .iter()
                .map(|(key, child)| (key.clone(), observe_unchecked(child, &input[key.as_str()])))
                .collect(),
        )
        .boxed(),
        Node::Composition(node) => {
            let master = observe_unchecked(&Node::Product(node.master().clone()), input);
            CompositionStream::new(node.clone(), input.clone(), master).boxed()
        }
    }
}

fn distinct<L>(events: NodeStream<L>) -> NodeStream<L>
where
    L: Send + Sync + 'static,
{
    let mut last: Option<NodeEvent<L>> = None;
    events
        .filter_map(move |event| {
            let repeated = last.as_ref().map_or(false, |previous| previous.same_as(&event));
            if repeated {
                trace!("dropping repeated event");
                return future::ready(None);
            }
            last = Some(event.clone());
            future::ready(Some(event))
        })
        .boxed()
}

/// A composition's events: master-derived states until the master settles,
/// then the slave's events for the derived input.
struct CompositionStream<L> {
    node: CompositionNode<L>,
    input: Value,
    master: NodeStream<L>,
    master_done: bool,
    slave: Option<EventReceiver<Value, L>>,
}

impl<L> CompositionStream<L>
where
    L: Clone + Send + Sync + 'static,
{
    fn new(node: CompositionNode<L>, input: Value, master: NodeStream<L>) -> Self {
        Self {
            node,
            input,
            master,
            master_done: false,
            slave: None,
        }
    }

    /// Reacts to a master emission. Returns the event to emit, or `None`
    /// after switching to the slave's events.
    fn on_master(&mut self, event: NodeEvent<L>) -> Option<NodeEvent<L>> {
        if let Some(error) = event.failure() {
            self.slave = None;
            return Some(CacheEvent::failed(error, None).into());
        }
        let Some(master_output) = event.data_value() else {
            self.slave = None;
            return Some(CacheEvent::loading(None).into());
        };

        let slave = self.node.slave();
        let derived = self.node.derive(&master_output, &self.input);
        if event.is_loading() {
            self.slave = None;
            return Some(CacheEvent::loading(slave.cached_value(&derived)).into());
        }
        if let Some(error) = event.error() {
            debug!(slave = slave.name(), "master refresh failed, keeping slave data");
            self.slave = None;
            return Some(CacheEvent::failed(error, slave.cached_value(&derived)).into());
        }

        debug!(slave = slave.name(), input = %derived, "master settled, following slave");
        schedule_refresh(slave, derived.clone());
        self.slave = Some(slave.subscribe(&derived));
        None
    }
}

/// Fetches `input` on the slave's next turn, if anyone still observes it then.
fn schedule_refresh<L>(slave: &CachedNode<L>, input: Value)
where
    L: Clone + Send + Sync + 'static,
{
    let target = slave.clone();
    slave.scheduler().defer(Box::new(move || {
        if target.has_observers(&input) {
            target.trigger(input);
        } else {
            trace!(slave = target.name(), "slave no longer observed, skipping fetch");
        }
    }));
}

impl<L> Stream for CompositionStream<L>
where
    L: Clone + Send + Sync + 'static,
{
    type Item = NodeEvent<L>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if !this.master_done {
                match this.master.poll_next_unpin(cx) {
                    Poll::Ready(Some(event)) => {
                        if let Some(derived) = this.on_master(event) {
                            return Poll::Ready(Some(derived));
                        }
                        continue;
                    }
                    Poll::Ready(None) => this.master_done = true,
                    Poll::Pending => {}
                }
            }

            if let Some(slave) = this.slave.as_mut() {
                match slave.poll_next_unpin(cx) {
                    Poll::Ready(Some(event)) => return Poll::Ready(Some(NodeEvent::Cached(event))),
                    Poll::Ready(None) => this.slave = None,
                    Poll::Pending => return Poll::Pending,
                }
            }

            return if this.master_done {
                Poll::Ready(None)
            } else {
                Poll::Pending
            };
        }
    }
}
