use crate::event::NodeEvent;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::collections::BTreeMap;
use std::pin::Pin;
use std::task::{Context, Poll};

struct Child<L> {
    key: String,
    events: BoxStream<'static, NodeEvent<L>>,
    latest: Option<NodeEvent<L>>,
    done: bool,
}

/// Combine-latest over keyed child streams.
///
/// Emits nothing until every child has emitted once; afterwards every child
/// emission yields the keyed map of each child's latest event. Children are
/// polled round-robin so one busy child cannot starve the others.
///
/// The stream ends when every child has ended, or as soon as a child ends
/// without ever emitting. With no children it ends immediately.
pub(crate) struct CombineLatest<L> {
    children: Vec<Child<L>>,
    next: usize,
}

impl<L> CombineLatest<L> {
    pub(crate) fn new(children: Vec<(String, BoxStream<'static, NodeEvent<L>>)>) -> Self {
        Self {
            children: children
                .into_iter()
                .map(|(key, events)| Child {
                    key,
                    events,
                    latest: None,
                    done: false,
                })
                .collect(),
            next: 0,
        }
    }

    fn snapshot(&self) -> NodeEvent<L> {
        NodeEvent::Product(
            self.children
                .iter()
                .filter_map(|child| Some((child.key.clone(), child.latest.clone()?)))
                .collect::<BTreeMap<_, _>>(),
        )
    }
}

impl<L> Stream for CombineLatest<L> {
    type Item = NodeEvent<L>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let count = this.children.len();
        if count == 0 {
            return Poll::Ready(None);
        }

        loop {
            let mut progressed = false;
            for offset in 0..count {
                let index = (this.next + offset) % count;
                let child = &mut this.children[index];
                if child.done {
                    continue;
                }
                match child.events.poll_next_unpin(cx) {
                    Poll::Ready(Some(event)) => {
                        child.latest = Some(event);
                        progressed = true;
                        if this.children.iter().all(|child| child.latest.is_some()) {
                            this.next = (index + 1) % count;
                            return Poll::Ready(Some(this.snapshot()));
                        }
                    }
                    Poll::Ready(None) => {
                        child.done = true;
                        if child.latest.is_none() {
                            return Poll::Ready(None);
                        }
                        progressed = true;
                    }
                    Poll::Pending => {}
                }
            }
            if this.children.iter().all(|child| child.done) {
                return Poll::Ready(None);
            }
            if !progressed {
                return Poll::Pending;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachelito_query_core::CacheEvent;
    use futures::stream;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn ready(value: Value) -> NodeEvent<String> {
        CacheEvent::ready(Arc::new(value)).into()
    }

    fn child(key: &str, events: Vec<NodeEvent<String>>) -> (String, BoxStream<'static, NodeEvent<String>>) {
        (key.to_string(), stream::iter(events).boxed())
    }

    #[tokio::test]
    async fn test_waits_for_every_child() {
        let combined = CombineLatest::new(vec![
            child("a", vec![ready(json!(1)), ready(json!(2))]),
            child("b", vec![ready(json!(10))]),
        ]);
        let emitted: Vec<_> = combined.map(|event| event.data_value()).collect().await;

        assert_eq!(
            emitted,
            vec![
                Some(json!({"a": 1, "b": 10})),
                Some(json!({"a": 2, "b": 10})),
            ]
        );
    }

    #[tokio::test]
    async fn test_child_ending_empty_ends_stream() {
        let combined = CombineLatest::new(vec![
            child("a", vec![ready(json!(1))]),
            child("b", vec![]),
        ]);
        assert_eq!(combined.count().await, 0);
    }

    #[tokio::test]
    async fn test_no_children_ends_immediately() {
        let combined: CombineLatest<String> = CombineLatest::new(Vec::new());
        assert_eq!(combined.count().await, 0);
    }
}
