use serde_json::Value;
use std::sync::Arc;

/// Key-stringification function used to address cache slots.
pub type KeyFn<A> = Arc<dyn Fn(&A) -> String + Send + Sync>;

/// Types that can be turned into a cache slot key.
///
/// This is the default key function of a [`Cache`](crate::Cache). Inputs that
/// need a different addressing scheme pass an explicit [`KeyFn`] instead.
///
/// # Examples
///
/// ```
/// use cachelito_query_core::CacheableKey;
/// use serde_json::json;
///
/// assert_eq!(json!({"b": 2, "a": 1}).to_cache_key(), r#"{"a":1,"b":2}"#);
/// assert_eq!("user".to_cache_key(), "user");
/// ```
pub trait CacheableKey {
    fn to_cache_key(&self) -> String;
}

/// Compact JSON. Object keys are sorted, so equal values yield equal keys.
impl CacheableKey for Value {
    fn to_cache_key(&self) -> String {
        self.to_string()
    }
}

impl CacheableKey for String {
    fn to_cache_key(&self) -> String {
        self.clone()
    }
}

impl CacheableKey for str {
    fn to_cache_key(&self) -> String {
        self.to_string()
    }
}

macro_rules! impl_display_key {
    ($($t:ty),*) => {
        $(
            impl CacheableKey for $t {
                fn to_cache_key(&self) -> String {
                    self.to_string()
                }
            }
        )*
    };
}

impl_display_key!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize, bool, char);

/// Returns the [`CacheableKey`] based key function for `A`.
pub fn default_key_fn<A: CacheableKey + 'static>() -> KeyFn<A> {
    Arc::new(|input: &A| input.to_cache_key())
}
