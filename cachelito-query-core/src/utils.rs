use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current unix time in milliseconds.
///
/// A clock set before the unix epoch yields `0` instead of failing, and
/// callers compare ages with `saturating_sub` so a clock moving backwards
/// never underflows.
///
/// # Examples
///
/// ```
/// use cachelito_query_core::utils::now_millis;
///
/// let before = now_millis();
/// let after = now_millis();
/// assert!(after >= before);
/// ```
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

/// Parses a key produced by a list-shaped cache back into its child keys.
///
/// List caches key their slots by the JSON array of child keys, so singleton
/// eviction can look inside a key without access to the original input.
/// Keys that are not such an array yield `None`.
///
/// # Examples
///
/// ```
/// use cachelito_query_core::utils::split_list_key;
///
/// let keys = split_list_key(r#"["1","2"]"#).unwrap();
/// assert_eq!(keys, vec!["1".to_string(), "2".to_string()]);
/// assert!(split_list_key("42").is_none());
/// ```
pub fn split_list_key(key: &str) -> Option<Vec<String>> {
    serde_json::from_str(key).ok()
}

/// Joins child keys into the key of a list-shaped input.
///
/// # Examples
///
/// ```
/// use cachelito_query_core::utils::join_list_key;
///
/// let key = join_list_key(vec!["1".to_string(), "\"a\"".to_string()]);
/// assert_eq!(key, r#"["1","\"a\""]"#);
/// ```
pub fn join_list_key(child_keys: Vec<String>) -> String {
    serde_json::Value::from(child_keys).to_string()
}
