//! # Composition Algebra
//!
//! Pure combinators over [`Fetch`] functions. They only know about shape,
//! never about caching:
//!
//! - [`product`] - run independent fetches concurrently over a keyed input
//! - [`compose`] - feed a master fetch's output into a slave fetch
//! - [`star`] - lift one fetch across a variable-length list
//!
//! Graph nodes ([`ProductNode`](crate::ProductNode),
//! [`CompositionNode`](crate::CompositionNode) and the star-shaped
//! [`CachedNode`](crate::CachedNode)) are built on these.

use crate::error::{field, items};
use crate::fetch::{Fetch, FetchFuture};
use futures::future::{try_join_all, FutureExt, TryFutureExt};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Maps a master's output and the original input to the slave's input.
///
/// Must be pure and total over every output the master can produce.
pub type Ptoa = Arc<dyn Fn(&Value, &Value) -> Value + Send + Sync>;

/// Runs every fetch concurrently on its own entry of a keyed input.
///
/// The input must be a JSON object with one entry per fetch; the output is
/// the object of their payloads. The combined fetch fails with the first
/// child error. Sibling fetches are not cancelled by that failure: cached
/// children are driven to completion by their own scheduler.
///
/// # Panics
///
/// Invoking the returned fetch panics if the input is not an object or is
/// missing a key.
///
/// # Examples
///
/// ```
/// use cachelito_query::{algebra, Fetch};
/// use serde_json::{json, Value};
/// use std::collections::BTreeMap;
///
/// let inc: Fetch<()> = Fetch::new(|v: Value| async move { Ok(json!(v.as_i64().unwrap() + 1)) });
/// let both = algebra::product(BTreeMap::from([
///     ("a".to_string(), inc.clone()),
///     ("b".to_string(), inc),
/// ]));
///
/// # futures::executor::block_on(async {
/// let out = both.call(json!({"a": 1, "b": 10})).await.unwrap();
/// assert_eq!(*out, json!({"a": 2, "b": 11}));
/// # });
/// ```
pub fn product<L>(fetches: BTreeMap<String, Fetch<L>>) -> Fetch<L>
where
    L: Send + 'static,
{
    let fetches = Arc::new(fetches);
    Fetch::from_fn(move |input: Value| {
        let calls = fetches.iter().map(|(key, fetch)| {
            let sub_input = field(&input, key)
                .unwrap_or_else(|err| panic!("product fetch: {err}"))
                .clone();
            let key = key.clone();
            fetch.call(sub_input).map_ok(move |payload| (key, payload))
        });
        let calls: Vec<_> = calls.collect();
        async move {
            let payloads = try_join_all(calls).await?;
            let object: Map<String, Value> = payloads
                .into_iter()
                .map(|(key, payload)| (key, Value::clone(&payload)))
                .collect();
            Ok(Arc::new(Value::Object(object)))
        }
        .boxed()
    })
}

/// Runs `master`, derives the slave input with `ptoa`, then runs `slave`.
///
/// # Examples
///
/// ```
/// use cachelito_query::{algebra, Fetch};
/// use serde_json::{json, Value};
/// use std::sync::Arc;
///
/// let user: Fetch<()> = Fetch::new(|id: Value| async move { Ok(json!({"id": id, "team": 7})) });
/// let team: Fetch<()> = Fetch::new(|id: Value| async move { Ok(json!(format!("team-{id}"))) });
/// let users_team = algebra::compose(user, Arc::new(|user: &Value, _: &Value| user["team"].clone()), team);
///
/// # futures::executor::block_on(async {
/// assert_eq!(*users_team.call(json!(1)).await.unwrap(), json!("team-7"));
/// # });
/// ```
pub fn compose<L>(master: Fetch<L>, ptoa: Ptoa, slave: Fetch<L>) -> Fetch<L>
where
    L: Send + 'static,
{
    Fetch::from_fn(move |input: Value| {
        let master_call = master.call(input.clone());
        let ptoa = Arc::clone(&ptoa);
        let slave = slave.clone();
        async move {
            let master_output = master_call.await?;
            let slave_input = ptoa(&master_output, &input);
            slave.call(slave_input).await
        }
        .boxed()
    })
}

/// Lifts `fetch` across a list: `[a0, a1, ..]` to `[p0, p1, ..]`.
///
/// A product of `n` copies of `fetch` is built the first time a list of
/// length `n` is seen and reused afterwards.
///
/// # Panics
///
/// Invoking the returned fetch panics if the input is not an array.
///
/// # Examples
///
/// ```
/// use cachelito_query::{algebra, Fetch};
/// use serde_json::{json, Value};
///
/// let square: Fetch<()> = Fetch::new(|v: Value| async move {
///     let n = v.as_i64().unwrap();
///     Ok(json!(n * n))
/// });
/// let squares = algebra::star(square);
///
/// # futures::executor::block_on(async {
/// assert_eq!(*squares.call(json!([1, 2, 3])).await.unwrap(), json!([1, 4, 9]));
/// assert_eq!(*squares.call(json!([])).await.unwrap(), json!([]));
/// # });
/// ```
pub fn star<L>(fetch: Fetch<L>) -> Fetch<L>
where
    L: Send + 'static,
{
    let functions: Mutex<HashMap<usize, Fetch<L>>> = Mutex::new(HashMap::new());
    Fetch::from_fn(move |input: Value| {
        let elements = items(&input).unwrap_or_else(|err| panic!("star fetch: {err}"));
        let len = elements.len();
        let lifted = functions
            .lock()
            .entry(len)
            .or_insert_with(|| product((0..len).map(|i| (i.to_string(), fetch.clone())).collect()))
            .clone();
        let keyed: Map<String, Value> = elements
            .iter()
            .enumerate()
            .map(|(i, element)| (i.to_string(), element.clone()))
            .collect();
        let call: FetchFuture<L> = lifted.call(Value::Object(keyed));
        async move {
            let keyed_output = call.await?;
            let output = (0..len)
                .map(|i| keyed_output[i.to_string().as_str()].clone())
                .collect();
            Ok(Arc::new(Value::Array(output)))
        }
        .boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn echo() -> Fetch<String> {
        Fetch::new(|v: Value| async move { Ok(v) })
    }

    fn failing(message: &'static str) -> Fetch<String> {
        Fetch::new(move |_| async move { Err(message.to_string()) })
    }

    #[tokio::test]
    async fn test_product_first_error_wins() {
        let fetch = product(BTreeMap::from([
            ("ok".to_string(), echo()),
            ("bad".to_string(), failing("bad child")),
        ]));
        let result = fetch.call(json!({"ok": 1, "bad": 2})).await;
        assert_eq!(result.unwrap_err(), "bad child");
    }

    #[tokio::test]
    async fn test_empty_product() {
        let fetch: Fetch<String> = product(BTreeMap::new());
        assert_eq!(*fetch.call(json!({})).await.unwrap(), json!({}));
    }

    #[test]
    #[should_panic(expected = "product input is missing the `b` key")]
    fn test_product_missing_key_panics_at_call_time() {
        let fetch = product(BTreeMap::from([
            ("a".to_string(), echo()),
            ("b".to_string(), echo()),
        ]));
        let _ = fetch.call(json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_compose_uses_original_input() {
        let fetch = compose(
            echo(),
            Arc::new(|out: &Value, input: &Value| json!([out, input])),
            echo(),
        );
        assert_eq!(*fetch.call(json!(5)).await.unwrap(), json!([5, 5]));
    }

    #[tokio::test]
    async fn test_compose_skips_slave_on_master_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let slave: Fetch<String> = Fetch::new(move |v: Value| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(v) }
        });
        let fetch = compose(failing("master down"), Arc::new(|out: &Value, _: &Value| out.clone()), slave);
        assert_eq!(fetch.call(json!(1)).await.unwrap_err(), "master down");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_star_keeps_order_beyond_ten_elements() {
        let fetch = star(echo());
        let input: Vec<u32> = (0..12).collect();
        assert_eq!(*fetch.call(json!(input)).await.unwrap(), json!(input));
    }

    #[test]
    #[should_panic(expected = "list input must be an array")]
    fn test_star_rejects_non_array() {
        let _ = star(echo()).call(json!({"0": 1}));
    }
}
