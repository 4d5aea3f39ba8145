//! # Fetch Graph Nodes
//!
//! A [`Node`] is one vertex of the fetch graph:
//!
//! - [`CachedNode`] - a raw fetch behind a per-key cache
//! - [`ProductNode`] - independent children fetched in parallel over a keyed input
//! - [`CompositionNode`] - a product master whose output feeds a cached slave
//!
//! Every node can be invoked as a fetch ([`Node::fetch`]), observed through
//! the [`QueryEngine`](crate::QueryEngine) and invalidated with
//! [`invalidate`](crate::invalidate).

use crate::algebra::{self, Ptoa};
use crate::cached::CachedNode;
use crate::error::{field, ShapeError};
use crate::fetch::{Fetch, FetchFuture};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Independent children combined over a keyed input.
///
/// The input is a JSON object with one entry per child; the fetched payload
/// is the object of the children's payloads.
pub struct ProductNode<L> {
    children: Arc<BTreeMap<String, Node<L>>>,
    fetch: Fetch<L>,
}

impl<L> Clone for ProductNode<L> {
    fn clone(&self) -> Self {
        Self {
            children: Arc::clone(&self.children),
            fetch: self.fetch.clone(),
        }
    }
}

impl<L> fmt::Debug for ProductNode<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.children.iter()).finish()
    }
}

impl<L> ProductNode<L>
where
    L: Clone + Send + Sync + 'static,
{
    /// Combines `children`, keyed by name.
    ///
    /// # Examples
    ///
    /// ```
    /// use cachelito_query::{CacheOptions, CachedNode, Fetch, ProductNode};
    /// use serde_json::{json, Value};
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let echo = CachedNode::new(Fetch::<String>::new(|v: Value| async move { Ok(v) }), CacheOptions::new());
    /// let pair = ProductNode::new([("left", echo.clone()), ("right", echo)]);
    ///
    /// let out = pair.fetch(json!({"left": 1, "right": 2})).await.unwrap();
    /// assert_eq!(*out, json!({"left": 1, "right": 2}));
    /// # }
    /// ```
    pub fn new<K, N, I>(children: I) -> Self
    where
        I: IntoIterator<Item = (K, N)>,
        K: Into<String>,
        N: Into<Node<L>>,
    {
        let children: BTreeMap<String, Node<L>> = children
            .into_iter()
            .map(|(key, child)| (key.into(), child.into()))
            .collect();
        let fetch = algebra::product(
            children
                .iter()
                .map(|(key, child)| (key.clone(), child.as_fetch()))
                .collect(),
        );
        Self {
            children: Arc::new(children),
            fetch,
        }
    }

    pub fn fetch(&self, input: Value) -> FetchFuture<L> {
        self.fetch.call(input)
    }
}

impl<L> ProductNode<L> {
    pub fn children(&self) -> &BTreeMap<String, Node<L>> {
        &self.children
    }
}

/// A product master whose output, mapped through `ptoa`, is the input of a
/// cached slave.
///
/// The composition has no cache of its own: its results live in the slave's
/// cache under the derived input, so distinct master states that derive the
/// same slave input share one slave fetch.
pub struct CompositionNode<L> {
    master: ProductNode<L>,
    ptoa: Ptoa,
    slave: CachedNode<L>,
    fetch: Fetch<L>,
}

impl<L> Clone for CompositionNode<L> {
    fn clone(&self) -> Self {
        Self {
            master: self.master.clone(),
            ptoa: Arc::clone(&self.ptoa),
            slave: self.slave.clone(),
            fetch: self.fetch.clone(),
        }
    }
}

impl<L> fmt::Debug for CompositionNode<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositionNode")
            .field("master", &self.master)
            .field("slave", &self.slave)
            .finish()
    }
}

impl<L> CompositionNode<L>
where
    L: Clone + Send + Sync + 'static,
{
    /// Chains `slave` after `master`.
    ///
    /// `ptoa` receives the master's payload (the object of its children's
    /// payloads) and the composition's own input, and returns the slave input.
    pub fn new<F>(master: ProductNode<L>, ptoa: F, slave: CachedNode<L>) -> Self
    where
        F: Fn(&Value, &Value) -> Value + Send + Sync + 'static,
    {
        let ptoa: Ptoa = Arc::new(ptoa);
        let slave_fetch = {
            let slave = slave.clone();
            Fetch::from_fn(move |input| slave.fetch(input))
        };
        let fetch = algebra::compose(master.fetch.clone(), Arc::clone(&ptoa), slave_fetch);
        Self {
            master,
            ptoa,
            slave,
            fetch,
        }
    }

    pub fn fetch(&self, input: Value) -> FetchFuture<L> {
        self.fetch.call(input)
    }
}

impl<L> CompositionNode<L> {
    pub fn master(&self) -> &ProductNode<L> {
        &self.master
    }

    pub fn slave(&self) -> &CachedNode<L> {
        &self.slave
    }

    /// Derives the slave input from a master payload and the original input.
    pub fn derive(&self, master_output: &Value, input: &Value) -> Value {
        (self.ptoa)(master_output, input)
    }
}

/// A vertex of the fetch graph.
///
/// # Examples
///
/// ```
/// use cachelito_query::{CacheOptions, CachedNode, CompositionNode, Fetch, Node, ProductNode};
/// use serde_json::{json, Value};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let user = CachedNode::new(
///     Fetch::<String>::new(|id: Value| async move { Ok(json!({ "id": id, "team": "core" })) }),
///     CacheOptions::new().name("user"),
/// );
/// let team = CachedNode::new(
///     Fetch::<String>::new(|name: Value| async move { Ok(json!({ "team": name, "size": 4 })) }),
///     CacheOptions::new().name("team"),
/// );
/// let users_team: Node<String> = CompositionNode::new(
///     ProductNode::new([("user", user)]),
///     |master: &Value, _input: &Value| master["user"]["team"].clone(),
///     team,
/// )
/// .into();
///
/// let out = users_team.fetch(json!({ "user": 7 })).await.unwrap();
/// assert_eq!(out["size"], 4);
/// # }
/// ```
pub enum Node<L> {
    Cached(CachedNode<L>),
    Product(ProductNode<L>),
    Composition(CompositionNode<L>),
}

impl<L> Clone for Node<L> {
    fn clone(&self) -> Self {
        match self {
            Node::Cached(node) => Node::Cached(node.clone()),
            Node::Product(node) => Node::Product(node.clone()),
            Node::Composition(node) => Node::Composition(node.clone()),
        }
    }
}

impl<L> fmt::Debug for Node<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Cached(node) => fmt::Debug::fmt(node, f),
            Node::Product(node) => fmt::Debug::fmt(node, f),
            Node::Composition(node) => fmt::Debug::fmt(node, f),
        }
    }
}

impl<L> Node<L>
where
    L: Clone + Send + Sync + 'static,
{
    /// Fetches `input`, coalescing with and populating every cache on the way.
    ///
    /// # Panics
    ///
    /// Panics with a [`ShapeError`] message if `input` does not have the shape
    /// the node needs; see [`check_input`](Self::check_input).
    pub fn fetch(&self, input: Value) -> FetchFuture<L> {
        match self {
            Node::Cached(node) => node.fetch(input),
            Node::Product(node) => node.fetch(input),
            Node::Composition(node) => node.fetch(input),
        }
    }

    /// Checks that `input` has the shape this node and its descendants need.
    ///
    /// A composition only checks its master: the slave input is derived at
    /// run time.
    pub fn check_input(&self, input: &Value) -> Result<(), ShapeError> {
        match self {
            Node::Cached(node) => node.check_input(input),
            Node::Product(node) => node
                .children
                .iter()
                .try_for_each(|(key, child)| child.check_input(field(input, key)?)),
            Node::Composition(node) => Node::Product(node.master.clone()).check_input(input),
        }
    }

    /// The node as a plain [`Fetch`].
    pub fn as_fetch(&self) -> Fetch<L> {
        match self {
            Node::Cached(node) => {
                let node = node.clone();
                Fetch::from_fn(move |input| node.fetch(input))
            }
            Node::Product(node) => node.fetch.clone(),
            Node::Composition(node) => node.fetch.clone(),
        }
    }
}

impl<L> From<CachedNode<L>> for Node<L> {
    fn from(node: CachedNode<L>) -> Self {
        Node::Cached(node)
    }
}

impl<L> From<ProductNode<L>> for Node<L> {
    fn from(node: ProductNode<L>) -> Self {
        Node::Product(node)
    }
}

impl<L> From<CompositionNode<L>> for Node<L> {
    fn from(node: CompositionNode<L>) -> Self {
        Node::Composition(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CacheOptions;
    use serde_json::json;

    fn echo(name: &str) -> CachedNode<String> {
        CachedNode::new(Fetch::new(|v: Value| async move { Ok(v) }), CacheOptions::new().name(name))
    }

    #[test]
    fn test_check_input_walks_nested_products() {
        let inner = ProductNode::new([("x", echo("x"))]);
        let outer: Node<String> = ProductNode::new([("inner", Node::from(inner)), ("y", echo("y").into())]).into();

        assert!(outer.check_input(&json!({"inner": {"x": 1}, "y": 2})).is_ok());
        assert_eq!(
            outer.check_input(&json!({"inner": {}, "y": 2})),
            Err(ShapeError::MissingKey("x".into()))
        );
        assert_eq!(
            outer.check_input(&json!([1])),
            Err(ShapeError::NotAnObject { found: "an array" })
        );
    }

    #[test]
    fn test_check_input_star_child() {
        let list: Node<String> = CachedNode::star(Fetch::new(|v: Value| async move { Ok(v) }), CacheOptions::new()).into();
        let node: Node<String> = ProductNode::new([("list", list)]).into();
        assert!(node.check_input(&json!({"list": [1, 2]})).is_ok());
        assert!(matches!(
            node.check_input(&json!({"list": 1})),
            Err(ShapeError::NotAnArray { .. })
        ));
    }

    #[tokio::test]
    async fn test_nested_product_fetch() {
        let inner = ProductNode::new([("x", echo("x"))]);
        let outer: Node<String> = ProductNode::new([("inner", Node::from(inner)), ("y", echo("y").into())]).into();
        let out = outer.fetch(json!({"inner": {"x": 1}, "y": 2})).await.unwrap();
        assert_eq!(*out, json!({"inner": {"x": 1}, "y": 2}));
    }

    #[tokio::test]
    async fn test_composition_derives_slave_input() {
        let node = CompositionNode::new(
            ProductNode::new([("a", echo("a")), ("b", echo("b"))]),
            |master: &Value, input: &Value| json!([master["a"], master["b"], input["a"]]),
            echo("slave"),
        );
        let out = node.fetch(json!({"a": 1, "b": 2})).await.unwrap();
        assert_eq!(*out, json!([1, 2, 1]));
        assert!(node.slave().cached_value(&json!([1, 2, 1])).is_some());
    }
}
