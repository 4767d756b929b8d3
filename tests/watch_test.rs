//! Watch 订阅集成测试

mod common;

use common::{at, client, next_event, next_update, record};
use flare_registry_client::{
    ConnectionStatus, DiscoverOptions, Freshness, InMemoryRegistry, WatchEvent,
};
use futures::StreamExt;
use std::sync::Arc;
use tokio::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_updates_arrive_in_order_without_duplicates() {
    let registry = Arc::new(InMemoryRegistry::new());
    registry.store(record("orders", "http://a", "us-east-1", 1));
    let client = client(registry.clone());

    let mut handle = client.watch("orders").await.unwrap();
    assert_eq!(next_update(&mut handle).await.updated_at, at(1));

    registry.publish(record("orders", "http://a", "us-east-1", 2));
    registry.publish(record("orders", "http://a", "us-east-1", 3));
    // 迟到的旧记录
    registry.publish(record("orders", "http://a", "us-east-1", 2));
    registry.publish(record("orders", "http://a", "us-east-1", 4));

    let mut seen = Vec::new();
    for _ in 0..3 {
        match next_event(&mut handle).await {
            WatchEvent::Update(record) => seen.push(record.updated_at),
            WatchEvent::Error(e) => panic!("unexpected error event: {}", e),
        }
    }
    assert_eq!(seen, vec![at(2), at(3), at(4)]);
    assert_eq!(handle.status(), ConnectionStatus::Live);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_reconciles_missed_state() {
    let registry = Arc::new(InMemoryRegistry::new());
    registry.store(record("orders", "http://a", "us-east-1", 1));
    let client = client(registry.clone());

    let mut handle = client.watch("orders").await.unwrap();
    assert_eq!(next_update(&mut handle).await.updated_at, at(1));
    registry.publish(record("orders", "http://a", "us-east-1", 2));
    assert_eq!(next_update(&mut handle).await.updated_at, at(2));

    // 断线期间发生的变更只能通过重连后的拉取获得
    registry.store(record("orders", "http://a", "us-east-1", 3));
    registry.disconnect_watchers("orders");

    assert!(matches!(next_event(&mut handle).await, WatchEvent::Error(_)));
    assert_eq!(next_update(&mut handle).await.updated_at, at(3));

    registry.publish(record("orders", "http://a", "us-east-1", 4));
    assert_eq!(next_update(&mut handle).await.updated_at, at(4));
    assert_eq!(registry.watch_opens(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_reconcile_is_retried_until_caught_up() {
    let registry = Arc::new(InMemoryRegistry::new());
    registry.store(record("orders", "http://a", "us-east-1", 1));
    let client = client(registry.clone());

    let mut handle = client.watch("orders").await.unwrap();
    assert_eq!(next_update(&mut handle).await.updated_at, at(1));

    // 断线期间的变更，且重连后的第一次对账拉取超时
    registry.store(record("orders", "http://a", "us-east-1", 3));
    registry.set_fetch_delay(Duration::from_secs(6));
    registry.disconnect_watchers("orders");

    let mut errors = 0;
    let update = loop {
        let event = tokio::time::timeout(Duration::from_secs(60), handle.next())
            .await
            .expect("timed out waiting for watch event")
            .expect("watch stream ended");
        match event {
            WatchEvent::Error(_) => {
                errors += 1;
                // 断线错误 + 对账失败错误之后恢复注册中心
                if errors == 2 {
                    registry.set_fetch_delay(Duration::ZERO);
                }
            }
            WatchEvent::Update(record) => break record,
        }
    };
    assert_eq!(update.updated_at, at(3));
    assert!(errors >= 2);
    assert!(registry.watch_opens() >= 3);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_without_changes_emits_no_update() {
    let registry = Arc::new(InMemoryRegistry::new());
    registry.store(record("orders", "http://a", "us-east-1", 1));
    let client = client(registry.clone());

    let mut handle = client.watch("orders").await.unwrap();
    assert_eq!(next_update(&mut handle).await.updated_at, at(1));

    registry.fail_watch_opens(2);
    registry.disconnect_watchers("orders");

    // 第一个更新必须是断线之后发布的记录，而不是重连拉取到的旧状态
    let mut errors = 0;
    loop {
        match next_event(&mut handle).await {
            WatchEvent::Error(_) => {
                errors += 1;
                if errors == 3 {
                    registry.publish(record("orders", "http://a", "us-east-1", 2));
                }
            }
            WatchEvent::Update(record) => {
                assert_eq!(record.updated_at, at(2));
                break;
            }
        }
    }
    assert!(errors >= 3);
}

#[tokio::test(start_paused = true)]
async fn test_handles_share_one_connection() {
    let registry = Arc::new(InMemoryRegistry::new());
    registry.store(record("orders", "http://a", "us-east-1", 1));
    let client = client(registry.clone());

    let mut first = client.watch("orders").await.unwrap();
    let mut second = client.watch("orders").await.unwrap();
    assert_ne!(first.id(), second.id());
    assert_eq!(next_update(&mut first).await.updated_at, at(1));
    assert_eq!(next_update(&mut second).await.updated_at, at(1));
    assert_eq!(registry.watch_opens(), 1);
    assert_eq!(client.active_watches(), 1);

    first.close();
    assert_eq!(client.active_watches(), 1);

    registry.publish(record("orders", "http://a", "us-east-1", 2));
    assert_eq!(next_update(&mut second).await.updated_at, at(2));

    drop(second);
    assert_eq!(client.active_watches(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_close_is_idempotent_and_final() {
    let registry = Arc::new(InMemoryRegistry::new());
    registry.store(record("orders", "http://a", "us-east-1", 1));
    let client = client(registry.clone());

    let mut handle = client.watch("orders").await.unwrap();
    next_update(&mut handle).await;

    handle.close();
    handle.close();
    registry.publish(record("orders", "http://a", "us-east-1", 2));

    assert!(handle.is_closed());
    assert_eq!(handle.status(), ConnectionStatus::Closed);
    assert!(handle.next().await.is_none());
    assert_eq!(client.active_watches(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_watch_updates_feed_the_cache() {
    let registry = Arc::new(InMemoryRegistry::new());
    registry.store(record("orders", "http://a", "us-east-1", 1));
    let client = client(registry.clone());

    let mut handle = client.watch("orders").await.unwrap();
    next_update(&mut handle).await;
    registry.publish(record("orders", "http://b", "us-east-1", 2));
    assert_eq!(next_update(&mut handle).await.url, "http://b");

    let resolution = client.discover("orders", DiscoverOptions::new()).await.unwrap();
    assert_eq!(resolution.freshness, Freshness::Cached);
    assert_eq!(resolution.url(), "http://b");
    assert_eq!(registry.fetch_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_ends_watch_streams() {
    let registry = Arc::new(InMemoryRegistry::new());
    registry.store(record("orders", "http://a", "us-east-1", 1));
    let client = client(registry.clone());

    let mut handle = client.watch("orders").await.unwrap();
    next_update(&mut handle).await;

    client.shutdown();
    assert_eq!(client.active_watches(), 0);
    let ended = tokio::time::timeout(Duration::from_secs(5), handle.next()).await;
    assert!(matches!(ended, Ok(None)));
}
