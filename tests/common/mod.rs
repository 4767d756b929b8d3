//! 集成测试公共工具

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use flare_registry_client::{
    ClientConfig, DiscoveryClient, FixedRetryPolicy, InMemoryRegistry, ServiceRecord, WatchEvent,
    WatchHandle,
};
use futures::StreamExt;
use std::sync::Arc;
use tokio::time::Duration;

/// 测试用配置：重试 2 次，连续失败 3 次熔断，冷却 10 秒
pub fn test_config() -> ClientConfig {
    ClientConfig::new("test-key")
        .with_retries(2)
        .with_cache_ttl(Duration::from_secs(30))
        .with_breaker(3, Duration::from_secs(10), Duration::from_secs(60))
}

pub fn client_with(registry: Arc<InMemoryRegistry>, config: ClientConfig) -> DiscoveryClient {
    DiscoveryClient::builder(config)
        .transport(registry)
        .retry_policy(FixedRetryPolicy::new(2, Duration::from_millis(10)))
        .build()
        .expect("client should build")
}

pub fn client(registry: Arc<InMemoryRegistry>) -> DiscoveryClient {
    client_with(registry, test_config())
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn record(name: &str, url: &str, region: &str, secs: i64) -> ServiceRecord {
    ServiceRecord::new(name, url, at(secs)).with_region(region)
}

/// 等待下一个事件（最多 5 秒虚拟时间）
pub async fn next_event(handle: &mut WatchHandle) -> WatchEvent {
    tokio::time::timeout(Duration::from_secs(5), handle.next())
        .await
        .expect("timed out waiting for watch event")
        .expect("watch stream ended")
}

/// 跳过错误事件，等待下一个更新
pub async fn next_update(handle: &mut WatchHandle) -> ServiceRecord {
    loop {
        match next_event(handle).await {
            WatchEvent::Update(record) => return record,
            WatchEvent::Error(_) => continue,
        }
    }
}
