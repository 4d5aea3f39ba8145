//! Integration tests for cached fetch nodes: coalescing, freshness and failures

use cachelito_query::{
    invalidate, refetch, CacheEvent, CacheOptions, CachedNode, Fetch, Freshness, Node, NodeEvent,
    NodeStream, QueryEngine,
};
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

async fn next_event(events: &mut NodeStream<String>) -> NodeEvent<String> {
    timeout(Duration::from_secs(2), events.next())
        .await
        .expect("timed out waiting for an event")
        .expect("stream ended")
}

/// A fetch answering `{ input, call }` after `delay`, counting its calls.
fn counted(calls: &Arc<AtomicUsize>, delay: Duration) -> Fetch<String> {
    let calls = Arc::clone(calls);
    Fetch::new(move |input: Value| {
        let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            sleep(delay).await;
            Ok(json!({ "input": input, "call": call }))
        }
    })
}

#[tokio::test]
async fn test_concurrent_calls_are_coalesced() {
    let calls = Arc::new(AtomicUsize::new(0));
    let node = CachedNode::new(counted(&calls, Duration::from_millis(20)), CacheOptions::new());

    let (a, b, c) = tokio::join!(
        node.fetch(json!(1)),
        node.fetch(json!(1)),
        node.fetch(json!(1))
    );

    // One raw call, one shared payload
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let a = a.unwrap();
    assert!(Arc::ptr_eq(&a, &b.unwrap()));
    assert!(Arc::ptr_eq(&a, &c.unwrap()));
}

#[tokio::test]
async fn test_available_key_is_idempotent() {
    let calls = Arc::new(AtomicUsize::new(0));
    let node = CachedNode::new(counted(&calls, Duration::ZERO), CacheOptions::new());
    let mut events = node.subscribe(&json!("k"));

    let first = node.fetch(json!("k")).await.unwrap();
    let second = node.fetch(json!("k")).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // A cache hit emits nothing
    assert_eq!(events.next().await, Some(CacheEvent::loading(None)));
    assert_eq!(events.next().await, Some(CacheEvent::ready(first)));
    assert!(events.try_next().is_err());
}

#[tokio::test]
async fn test_invalidate_then_fetch_refetches() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cached = CachedNode::new(counted(&calls, Duration::ZERO), CacheOptions::new());
    let node: Node<String> = cached.clone().into();

    node.fetch(json!(1)).await.unwrap();
    // Nobody observes key 1
    assert!(!invalidate(&node, &json!(1)));
    assert!(cached.cached_value(&json!(1)).is_none());

    let again = node.fetch(json!(1)).await.unwrap();
    assert_eq!(again["call"], 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_invalidate_reports_observers() {
    let calls = Arc::new(AtomicUsize::new(0));
    let cached = CachedNode::new(counted(&calls, Duration::ZERO), CacheOptions::new());
    let node: Node<String> = cached.clone().into();

    let events = cached.subscribe(&json!(1));
    node.fetch(json!(1)).await.unwrap();
    assert!(invalidate(&node, &json!(1)));

    drop(events);
    assert!(!invalidate(&node, &json!(1)));
}

#[tokio::test]
async fn test_expire_strategy_refreshes_with_stale_data() {
    let calls = Arc::new(AtomicUsize::new(0));
    let strategy: Freshness = "expire:50".parse().unwrap();
    let node: Node<String> = CachedNode::new(
        counted(&calls, Duration::from_millis(5)),
        CacheOptions::new().strategy(strategy),
    )
    .into();

    let engine = QueryEngine::new();
    let mut events = engine.query(&node, &json!(1)).unwrap();

    let loading = next_event(&mut events).await.into_cached().unwrap();
    assert!(loading.loading);
    assert!(loading.data.is_none());

    let ready = next_event(&mut events).await.into_cached().unwrap();
    assert!(!ready.loading);
    assert_eq!(ready.data.as_ref().unwrap()["call"], 1);

    // Still fresh: served from the cache
    node.fetch(json!(1)).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    sleep(Duration::from_millis(60)).await;
    node.fetch(json!(1)).await.unwrap();

    // Expired: refreshing shows the stale data first
    let refreshing = next_event(&mut events).await.into_cached().unwrap();
    assert!(refreshing.loading);
    assert_eq!(refreshing.data.as_ref().unwrap()["call"], 1);

    let refreshed = next_event(&mut events).await.into_cached().unwrap();
    assert!(!refreshed.loading);
    assert_eq!(refreshed.data.as_ref().unwrap()["call"], 2);
}

#[tokio::test]
async fn test_failure_keeps_previous_data_and_retries() {
    let calls = Arc::new(AtomicUsize::new(0));
    let failing = Arc::new(AtomicBool::new(false));
    let fetch = {
        let calls = Arc::clone(&calls);
        let failing = Arc::clone(&failing);
        Fetch::new(move |_input: Value| {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            let fail = failing.load(Ordering::SeqCst);
            async move {
                if fail {
                    Err(format!("call {call} failed"))
                } else {
                    Ok(json!(call))
                }
            }
        })
    };
    let node = CachedNode::new(fetch, CacheOptions::new().strategy(refetch()));

    let first = node.fetch(json!("k")).await.unwrap();
    assert_eq!(*first, json!(1));

    failing.store(true, Ordering::SeqCst);
    let error = node.fetch(json!("k")).await.unwrap_err();
    assert_eq!(error, "call 2 failed");

    // Settled with the error, last good data kept
    let latest = node.latest(&json!("k")).unwrap();
    assert!(!latest.loading);
    assert_eq!(latest.error.as_deref().map(String::as_str), Some("call 2 failed"));
    assert!(Arc::ptr_eq(latest.data.as_ref().unwrap(), &first));
    assert!(Arc::ptr_eq(&node.cached_value(&json!("k")).unwrap(), &first));

    failing.store(false, Ordering::SeqCst);
    let retried = node.fetch(json!("k")).await.unwrap();
    assert_eq!(*retried, json!(3));
}

#[tokio::test]
async fn test_first_failure_is_not_cached() {
    let calls = Arc::new(AtomicUsize::new(0));
    let fetch = {
        let calls = Arc::clone(&calls);
        Fetch::new(move |_input: Value| {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if call == 1 {
                    Err("offline".to_string())
                } else {
                    Ok(json!("online"))
                }
            }
        })
    };
    // Available strategy: a cached failure would stick forever
    let node = CachedNode::new(fetch, CacheOptions::new());

    assert!(node.fetch(json!(1)).await.is_err());
    assert_eq!(*node.fetch(json!(1)).await.unwrap(), json!("online"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_stale_completion_is_ignored() {
    let calls = Arc::new(AtomicUsize::new(0));
    let fetch = {
        let calls = Arc::clone(&calls);
        Fetch::new(move |_input: Value| {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            // The first fetch answers last
            let delay = if call == 1 { 80 } else { 10 };
            async move {
                sleep(Duration::from_millis(delay)).await;
                Ok(json!(call))
            }
        })
    };
    let cached = CachedNode::new(fetch, CacheOptions::new());
    let node: Node<String> = cached.clone().into();

    cached.trigger(json!(1));
    invalidate(&node, &json!(1));
    cached.trigger(json!(1));

    sleep(Duration::from_millis(120)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cached.cached_value(&json!(1)).as_deref(), Some(&json!(2)));
    assert_eq!(
        cached.latest(&json!(1)).and_then(|event| event.data).as_deref(),
        Some(&json!(2))
    );

    #[cfg(feature = "stats")]
    assert_eq!(cached.stats().stale(), 1);
}

#[tokio::test]
async fn test_fetch_settles_after_caller_drops_it() {
    let calls = Arc::new(AtomicUsize::new(0));
    let node = CachedNode::new(counted(&calls, Duration::from_millis(10)), CacheOptions::new());

    drop(node.fetch(json!(1)));
    sleep(Duration::from_millis(40)).await;

    assert!(node.cached_value(&json!(1)).is_some());
    node.fetch(json!(1)).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[cfg(feature = "stats")]
#[tokio::test]
async fn test_stats_track_decisions() {
    let calls = Arc::new(AtomicUsize::new(0));
    let node = CachedNode::new(counted(&calls, Duration::from_millis(10)), CacheOptions::new());

    let (a, b) = tokio::join!(node.fetch(json!(1)), node.fetch(json!(1)));
    a.unwrap();
    b.unwrap();
    node.fetch(json!(1)).await.unwrap();

    let stats = node.stats();
    assert_eq!(stats.misses(), 1);
    assert_eq!(stats.coalesced(), 1);
    assert_eq!(stats.hits(), 1);
    assert_eq!(stats.total_accesses(), 3);
}
