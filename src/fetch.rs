use futures::future::{BoxFuture, FutureExt, TryFutureExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Result of a graph fetch. Payloads are shared, not copied, between the
/// cache, its events and every caller.
pub type FetchResult<L> = cachelito_query_core::FetchResult<Value, L>;

/// Future returned by invoking a [`Fetch`] or a [`Node`](crate::Node).
pub type FetchFuture<L> = BoxFuture<'static, FetchResult<L>>;

/// Asynchronous function from an input value to a payload or an error `L`.
///
/// Fetches are pure with respect to caching: caching is layered on top by
/// [`CachedNode`](crate::CachedNode). Retries, backoff and transport
/// concerns belong inside the fetch itself.
///
/// # Examples
///
/// ```
/// use cachelito_query::Fetch;
/// use serde_json::{json, Value};
///
/// let double: Fetch<String> = Fetch::new(|input: Value| async move {
///     let n = input.as_i64().ok_or_else(|| "not a number".to_string())?;
///     Ok(json!(n * 2))
/// });
///
/// # futures::executor::block_on(async {
/// let out = double.call(json!(21)).await.unwrap();
/// assert_eq!(*out, json!(42));
/// # });
/// ```
pub struct Fetch<L> {
    f: Arc<dyn Fn(Value) -> FetchFuture<L> + Send + Sync>,
}

impl<L> Clone for Fetch<L> {
    fn clone(&self) -> Self {
        Self {
            f: Arc::clone(&self.f),
        }
    }
}

impl<L> fmt::Debug for Fetch<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Fetch")
    }
}

impl<L: Send + 'static> Fetch<L> {
    /// Wraps an untyped async function.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, L>> + Send + 'static,
    {
        Self::from_fn(move |input| f(input).map_ok(Arc::new).boxed())
    }

    /// Wraps a function already producing boxed, shared-payload futures.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(Value) -> FetchFuture<L> + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }

    /// Wraps a typed async function.
    ///
    /// The input is decoded from JSON and the output encoded back with serde.
    /// Decoding and encoding failures surface as ordinary fetch failures.
    ///
    /// # Examples
    ///
    /// ```
    /// use cachelito_query::Fetch;
    /// use serde_json::json;
    ///
    /// #[derive(Debug, Clone)]
    /// struct ApiError(String);
    ///
    /// impl From<serde_json::Error> for ApiError {
    ///     fn from(err: serde_json::Error) -> Self {
    ///         ApiError(err.to_string())
    ///     }
    /// }
    ///
    /// let len: Fetch<ApiError> = Fetch::typed(|name: String| async move {
    ///     Ok::<_, ApiError>(name.len())
    /// });
    ///
    /// # futures::executor::block_on(async {
    /// assert_eq!(*len.call(json!("abc")).await.unwrap(), json!(3));
    /// assert!(len.call(json!(3)).await.is_err());
    /// # });
    /// ```
    pub fn typed<A, P, F, Fut>(f: F) -> Self
    where
        A: DeserializeOwned,
        P: Serialize,
        L: From<serde_json::Error>,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<P, L>> + Send + 'static,
    {
        Self::new(move |input: Value| {
            let call = serde_json::from_value::<A>(input).map(&f);
            async move {
                let output = call?.await?;
                Ok::<Value, L>(serde_json::to_value(output)?)
            }
        })
    }
}

impl<L> Fetch<L> {
    /// Invokes the fetch.
    pub fn call(&self, input: Value) -> FetchFuture<L> {
        (self.f)(input)
    }
}
