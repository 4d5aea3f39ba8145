use crate::node::Node;
use serde_json::Value;
use tracing::debug;

/// Evicts `input` from `node` and every cache below it.
///
/// Returns `true` if any evicted key is still observed, i.e. someone would
/// want it fetched again. For catalog and star nodes this includes the keys
/// of the evicted lists.
///
/// # Behavior per node
///
/// * **Cached** - evicts every cached list containing `input` (catalog and
///   star nodes), then the slot of `input` itself
/// * **Product** - invalidates every child at its entry of `input`; all
///   children are visited even after one reports observers
/// * **Composition** - invalidates the master only; the slave refreshes when
///   the master settles again
///
/// A product input that is not an object, or lacks a child's key, is
/// treated as `null` for the affected children.
///
/// # Examples
///
/// ```
/// use cachelito_query::{invalidate, CacheOptions, CachedNode, Fetch, Node};
/// use serde_json::{json, Value};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let node: Node<String> = CachedNode::new(
///     Fetch::new(|v: Value| async move { Ok(v) }),
///     CacheOptions::new(),
/// )
/// .into();
///
/// node.fetch(json!(1)).await.unwrap();
/// assert!(!invalidate(&node, &json!(1)));
/// # }
/// ```
pub fn invalidate<L>(node: &Node<L>, input: &Value) -> bool
where
    L: Clone + Send + Sync + 'static,
{
    match node {
        Node::Cached(node) => {
            let evicted = node.evict_singleton(input);
            let deleted = node.delete(input);
            let observed =
                node.has_observers(input) || evicted.iter().any(|key| node.has_key_observers(key));
            debug!(
                cache = node.name(),
                deleted,
                lists = evicted.len(),
                observed,
                "invalidated"
            );
            observed
        }
        Node::Product(node) => node.children().iter().fold(false, |observed, (key, child)| {
            let sub_input = input.get(key.as_str()).unwrap_or(&Value::Null);
            invalidate(child, sub_input) || observed
        }),
        Node::Composition(node) => invalidate(&Node::Product(node.master().clone()), input),
    }
}
