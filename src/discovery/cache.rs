//! 解析缓存
//!
//! 按服务名缓存完整的副本集合，并保证同一服务名同时最多只有一个在途拉取（single-flight）。
//! 标签过滤和区域选择都在缓存的副本集合上进行，因此每个服务名只对应一个缓存条目。

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use lru::LruCache;
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::clock::Clock;
use crate::discovery::record::ServiceRecord;
use crate::error::Result;

type InflightFetch = Shared<BoxFuture<'static, Result<Vec<ServiceRecord>>>>;

/// 缓存条目
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub records: Vec<ServiceRecord>,
    pub fetched_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.fetched_at) < self.ttl
    }
}

/// 解析缓存（克隆开销很小，内部共享状态）
#[derive(Clone)]
pub struct ResolutionCache {
    entries: Arc<Mutex<LruCache<String, CacheEntry>>>,
    inflight: Arc<tokio::sync::Mutex<HashMap<String, InflightFetch>>>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl ResolutionCache {
    pub fn new(capacity: usize, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Arc::new(Mutex::new(LruCache::new(capacity))),
            inflight: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
            clock,
            ttl,
        }
    }

    fn entries(&self) -> MutexGuard<'_, LruCache<String, CacheEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// 获取仍在有效期内的副本集合
    pub fn get_fresh(&self, name: &str) -> Option<Vec<ServiceRecord>> {
        let now = self.clock.now();
        let mut entries = self.entries();
        entries
            .get(name)
            .filter(|entry| entry.is_fresh(now))
            .map(|entry| entry.records.clone())
    }

    /// 获取副本集合，不论是否过期
    pub fn get_any(&self, name: &str) -> Option<Vec<ServiceRecord>> {
        self.entries().get(name).map(|entry| entry.records.clone())
    }

    pub fn entry(&self, name: &str) -> Option<CacheEntry> {
        self.entries().peek(name).cloned()
    }

    /// 写入一次完整拉取的结果并刷新有效期
    ///
    /// 以 url 为副本身份合并：缓存中已有更新的副本时保留缓存中的版本（例如 watch 先到达）。
    /// 返回合并后的副本集合。
    pub fn store_snapshot(&self, name: &str, records: Vec<ServiceRecord>) -> Vec<ServiceRecord> {
        let now = self.clock.now();
        let mut entries = self.entries();
        let merged = match entries.peek(name) {
            Some(existing) => records
                .into_iter()
                .map(|incoming| {
                    match existing.records.iter().find(|r| r.url == incoming.url) {
                        Some(current) if current.is_newer_than(&incoming) => current.clone(),
                        _ => incoming,
                    }
                })
                .collect(),
            None => records,
        };
        entries.put(
            name.to_string(),
            CacheEntry {
                records: merged.clone(),
                fetched_at: now,
                ttl: self.ttl,
            },
        );
        merged
    }

    /// 应用一条推送更新
    ///
    /// 返回 `false` 表示该记录不比缓存中同一副本更新，已被丢弃。
    /// 没有缓存条目时不创建条目，新鲜度只由完整拉取决定。
    pub fn apply_update(&self, record: &ServiceRecord) -> bool {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(&record.name) else {
            return true;
        };
        match entry.records.iter_mut().find(|r| r.url == record.url) {
            Some(current) => {
                if !record.is_newer_than(current) {
                    return false;
                }
                *current = record.clone();
            }
            None => entry.records.push(record.clone()),
        }
        true
    }

    /// 应用健康探测结果到该服务名下的所有副本
    pub fn apply_health(&self, name: &str, healthy: bool) {
        if let Some(entry) = self.entries().get_mut(name) {
            for record in entry.records.iter_mut() {
                record.healthy = healthy;
            }
        }
    }

    pub fn invalidate(&self, name: &str) {
        if self.entries().pop(name).is_some() {
            debug!(service = %name, "Cache entry invalidated");
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 拉取并写入缓存，同一服务名的并发调用共享同一次拉取
    ///
    /// 成功结果在所有等待者被唤醒之前就已写入缓存
    pub async fn fetch_shared<F, Fut>(&self, name: &str, fetch: F) -> Result<Vec<ServiceRecord>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<ServiceRecord>>> + Send + 'static,
    {
        let shared = {
            let mut inflight = self.inflight.lock().await;
            if let Some(records) = self.get_fresh(name) {
                return Ok(records);
            }
            match inflight.get(name) {
                Some(existing) => existing.clone(),
                None => {
                    let cache = self.clone();
                    let key = name.to_string();
                    let fut = fetch();
                    let shared = async move {
                        let records = fut.await?;
                        Ok(cache.store_snapshot(&key, records))
                    }
                    .boxed()
                    .shared();
                    inflight.insert(name.to_string(), shared.clone());
                    shared
                }
            }
        };

        let result = shared.clone().await;

        let mut inflight = self.inflight.lock().await;
        if inflight
            .get(name)
            .is_some_and(|current| Shared::ptr_eq(current, &shared))
        {
            inflight.remove(name);
        }
        result
    }
}
