use cachelito_query_core::CacheEvent;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// One emission of an observed node.
///
/// Cached and composition nodes emit a single [`CacheEvent`]. Product nodes
/// emit the latest event of every child, keyed by child name; no aggregate
/// loading flag is computed for them.
pub enum NodeEvent<L> {
    Cached(CacheEvent<Value, L>),
    Product(BTreeMap<String, NodeEvent<L>>),
}

impl<L> NodeEvent<L> {
    /// Returns `true` if this event, or any nested child event, is loading.
    pub fn is_loading(&self) -> bool {
        match self {
            NodeEvent::Cached(event) => event.loading,
            NodeEvent::Product(children) => children.values().any(NodeEvent::is_loading),
        }
    }

    /// Returns `true` if this event, and every nested child event, carries data.
    pub fn has_data(&self) -> bool {
        match self {
            NodeEvent::Cached(event) => event.has_data(),
            NodeEvent::Product(children) => children.values().all(NodeEvent::has_data),
        }
    }

    /// The error of the first event that settled with an error and no data.
    pub fn failure(&self) -> Option<Arc<L>> {
        match self {
            NodeEvent::Cached(event) if event.is_settled() && !event.has_data() => event.error.clone(),
            NodeEvent::Cached(_) => None,
            NodeEvent::Product(children) => children.values().find_map(NodeEvent::failure),
        }
    }

    /// The error of the first event that carries one, with or without data.
    pub fn error(&self) -> Option<Arc<L>> {
        match self {
            NodeEvent::Cached(event) => event.error.clone(),
            NodeEvent::Product(children) => children.values().find_map(NodeEvent::error),
        }
    }

    /// The payload this event stands for: the data of a cached event, or the
    /// object of every child's payload for a product event.
    ///
    /// `None` unless [`has_data`](Self::has_data) holds.
    pub fn data_value(&self) -> Option<Value> {
        match self {
            NodeEvent::Cached(event) => event.data.as_deref().cloned(),
            NodeEvent::Product(children) => children
                .iter()
                .map(|(key, child)| child.data_value().map(|data| (key.clone(), data)))
                .collect::<Option<Map<String, Value>>>()
                .map(Value::Object),
        }
    }

    /// The single cache event of a cached or composition node.
    pub fn as_cached(&self) -> Option<&CacheEvent<Value, L>> {
        match self {
            NodeEvent::Cached(event) => Some(event),
            NodeEvent::Product(_) => None,
        }
    }

    pub fn into_cached(self) -> Option<CacheEvent<Value, L>> {
        match self {
            NodeEvent::Cached(event) => Some(event),
            NodeEvent::Product(_) => None,
        }
    }

    /// The child events of a product node.
    pub fn children(&self) -> Option<&BTreeMap<String, NodeEvent<L>>> {
        match self {
            NodeEvent::Product(children) => Some(children),
            NodeEvent::Cached(_) => None,
        }
    }

    /// Identity comparison used to drop redundant emissions.
    ///
    /// Cached events are compared with [`CacheEvent::same_as`]; product
    /// events are the same when they hold the same children and every child
    /// is the same.
    pub fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (NodeEvent::Cached(a), NodeEvent::Cached(b)) => a.same_as(b),
            (NodeEvent::Product(a), NodeEvent::Product(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|((ka, va), (kb, vb))| ka == kb && va.same_as(vb))
            }
            _ => false,
        }
    }
}

impl<L> Clone for NodeEvent<L> {
    fn clone(&self) -> Self {
        match self {
            NodeEvent::Cached(event) => NodeEvent::Cached(event.clone()),
            NodeEvent::Product(children) => NodeEvent::Product(children.clone()),
        }
    }
}

impl<L: PartialEq> PartialEq for NodeEvent<L> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (NodeEvent::Cached(a), NodeEvent::Cached(b)) => a == b,
            (NodeEvent::Product(a), NodeEvent::Product(b)) => a == b,
            _ => false,
        }
    }
}

impl<L: fmt::Debug> fmt::Debug for NodeEvent<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeEvent::Cached(event) => fmt::Debug::fmt(event, f),
            NodeEvent::Product(children) => f.debug_map().entries(children.iter()).finish(),
        }
    }
}

impl<L> From<CacheEvent<Value, L>> for NodeEvent<L> {
    fn from(event: CacheEvent<Value, L>) -> Self {
        NodeEvent::Cached(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn product(children: Vec<(&str, NodeEvent<String>)>) -> NodeEvent<String> {
        NodeEvent::Product(children.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    #[test]
    fn test_product_aggregates() {
        let one = Arc::new(json!(1));
        let event = product(vec![
            ("a", CacheEvent::ready(Arc::clone(&one)).into()),
            ("b", CacheEvent::loading(Some(Arc::new(json!(2)))).into()),
        ]);
        assert!(event.is_loading());
        assert!(event.has_data());
        assert_eq!(event.data_value(), Some(json!({"a": 1, "b": 2})));
        assert!(event.failure().is_none());
    }

    #[test]
    fn test_failure_needs_missing_data() {
        let error = Arc::new("down".to_string());
        let without_data: NodeEvent<String> = CacheEvent::failed(Arc::clone(&error), None).into();
        let with_data: NodeEvent<String> = CacheEvent::failed(error, Some(Arc::new(json!(1)))).into();

        assert_eq!(without_data.failure().as_deref().map(String::as_str), Some("down"));
        assert!(with_data.failure().is_none());
        assert!(without_data.data_value().is_none());
    }

    #[test]
    fn test_error_found_alongside_data() {
        let event = product(vec![
            ("a", CacheEvent::ready(Arc::new(json!(1))).into()),
            (
                "b",
                CacheEvent::failed(Arc::new("refresh failed".to_string()), Some(Arc::new(json!(2)))).into(),
            ),
        ]);
        assert!(event.failure().is_none());
        assert_eq!(event.error().as_deref().map(String::as_str), Some("refresh failed"));
        assert!(!event.is_loading());
    }

    #[test]
    fn test_same_as_recurses_into_products() {
        let data = Arc::new(json!({"big": [1, 2, 3]}));
        let a = product(vec![("x", CacheEvent::ready(Arc::clone(&data)).into())]);
        let b = product(vec![("x", CacheEvent::ready(Arc::clone(&data)).into())]);
        let c = product(vec![("x", CacheEvent::ready(Arc::new(json!({"big": [1, 2, 3]}))).into())]);

        assert!(a.same_as(&b));
        assert!(!a.same_as(&c));
        assert_eq!(a, c);
    }
}
