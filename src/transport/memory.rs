//! 内存注册中心
//!
//! `RegistryTransport` 的内存实现，支持 TTL 过期、推送通道和故障注入，
//! 所有时间判断基于 `tokio::time`，可以在 `start_paused` 的测试中用虚拟时间驱动。

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;

use super::{RegistryTransport, TransportError, WatchStream};
use crate::discovery::ServiceRecord;
use crate::health::HealthReport;
use crate::registry::Registration;

const WATCH_CHANNEL_CAPACITY: usize = 64;

type WatchSender = mpsc::Sender<Result<ServiceRecord, TransportError>>;

struct StoredRecord {
    record: ServiceRecord,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct State {
    services: HashMap<String, Vec<StoredRecord>>,
    health: HashMap<String, bool>,
    watchers: HashMap<String, Vec<WatchSender>>,
    unavailable: bool,
    fail_next: usize,
    fail_watch_opens: usize,
    fetch_delay: Duration,
    last_stamp: Option<DateTime<Utc>>,
}

impl State {
    /// 分配严格递增的更新时间
    fn next_stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_stamp {
            Some(last) if now <= last => last + ChronoDuration::milliseconds(1),
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }

    fn purge_expired(&mut self, name: &str) {
        let now = Instant::now();
        let emptied = match self.services.get_mut(name) {
            Some(records) => {
                records.retain(|r| r.expires_at.is_none_or(|at| now < at));
                records.is_empty()
            }
            None => false,
        };
        if emptied {
            self.services.remove(name);
        }
    }

    fn check_failure(&mut self) -> Result<(), TransportError> {
        if self.unavailable {
            return Err(TransportError::Connection("registry unavailable".into()));
        }
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(TransportError::Status(503));
        }
        Ok(())
    }

    fn put(&mut self, record: ServiceRecord, expires_at: Option<Instant>) {
        let records = self.services.entry(record.name.clone()).or_default();
        match records.iter_mut().find(|r| r.record.url == record.url) {
            Some(existing) => {
                existing.record = record;
                existing.expires_at = expires_at;
            }
            None => records.push(StoredRecord { record, expires_at }),
        }
    }

    fn notify(&mut self, record: &ServiceRecord) {
        if let Some(senders) = self.watchers.get_mut(&record.name) {
            senders.retain(|tx| tx.try_send(Ok(record.clone())).is_ok() || !tx.is_closed());
        }
    }
}

/// 内存注册中心
#[derive(Default)]
pub struct InMemoryRegistry {
    state: Mutex<State>,
    fetch_calls: AtomicUsize,
    upsert_calls: AtomicUsize,
    remove_calls: AtomicUsize,
    health_calls: AtomicUsize,
    watch_opens: AtomicUsize,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 直接写入记录（不过期、不推送）
    pub fn store(&self, record: ServiceRecord) {
        self.state().put(record, None);
    }

    /// 写入记录并推送给所有 watch 连接
    pub fn publish(&self, record: ServiceRecord) {
        let mut state = self.state();
        state.put(record.clone(), None);
        state.notify(&record);
    }

    /// 向 watch 连接推送一条原始结果（不写入存储）
    pub fn push_watch_event(&self, name: &str, event: Result<ServiceRecord, TransportError>) {
        if let Some(senders) = self.state().watchers.get(name) {
            for tx in senders {
                let _ = tx.try_send(event.clone());
            }
        }
    }

    /// 断开该服务名的全部 watch 连接
    pub fn disconnect_watchers(&self, name: &str) {
        self.state().watchers.remove(name);
    }

    /// 当前存储的记录（已过期的除外）
    pub fn records(&self, name: &str) -> Vec<ServiceRecord> {
        let mut state = self.state();
        state.purge_expired(name);
        state
            .services
            .get(name)
            .map(|records| records.iter().map(|r| r.record.clone()).collect())
            .unwrap_or_default()
    }

    /// 设置健康状态，同时更新已存储记录的 `healthy` 字段
    pub fn set_health(&self, name: &str, healthy: bool) {
        let mut state = self.state();
        state.health.insert(name.to_string(), healthy);
        if let Some(records) = state.services.get_mut(name) {
            for stored in records.iter_mut() {
                stored.record.healthy = healthy;
            }
        }
    }

    /// 模拟注册中心整体不可用
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    /// 接下来的 n 次请求返回 503
    pub fn fail_next(&self, n: usize) {
        self.state().fail_next = n;
    }

    /// 接下来的 n 次 watch 连接失败
    pub fn fail_watch_opens(&self, n: usize) {
        self.state().fail_watch_opens = n;
    }

    /// 为每次 fetch 增加延迟
    pub fn set_fetch_delay(&self, delay: Duration) {
        self.state().fetch_delay = delay;
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    pub fn remove_calls(&self) -> usize {
        self.remove_calls.load(Ordering::SeqCst)
    }

    pub fn health_calls(&self) -> usize {
        self.health_calls.load(Ordering::SeqCst)
    }

    pub fn watch_opens(&self) -> usize {
        self.watch_opens.load(Ordering::SeqCst)
    }

    /// 所有请求的总数
    pub fn total_calls(&self) -> usize {
        self.fetch_calls()
            + self.upsert_calls()
            + self.remove_calls()
            + self.health_calls()
            + self.watch_opens()
    }
}

#[async_trait]
impl RegistryTransport for InMemoryRegistry {
    async fn fetch(&self, name: &str) -> Result<Vec<ServiceRecord>, TransportError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.state().fetch_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        state.check_failure()?;
        state.purge_expired(name);
        match state.services.get(name) {
            Some(records) if !records.is_empty() => {
                Ok(records.iter().map(|r| r.record.clone()).collect())
            }
            _ => Err(TransportError::NotFound),
        }
    }

    async fn upsert(&self, registration: &Registration) -> Result<(), TransportError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        state.check_failure()?;

        let healthy = state
            .health
            .get(&registration.name)
            .copied()
            .unwrap_or(true);
        let record = ServiceRecord {
            name: registration.name.clone(),
            url: registration.url.clone(),
            region: registration.region.clone(),
            version: registration.version.clone(),
            healthy,
            tags: registration.tags.clone(),
            updated_at: state.next_stamp(),
        };
        state.put(record.clone(), Some(Instant::now() + registration.ttl()));
        state.notify(&record);
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), TransportError> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        state.check_failure()?;
        state.services.remove(name);
        state.health.remove(name);
        Ok(())
    }

    async fn health(&self, name: &str) -> Result<HealthReport, TransportError> {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        state.check_failure()?;
        state.purge_expired(name);

        let records = state.services.get(name).ok_or(TransportError::NotFound)?;
        let healthy = match state.health.get(name) {
            Some(healthy) => *healthy,
            None => records.iter().any(|r| r.record.healthy),
        };
        Ok(HealthReport {
            healthy,
            latency_ms: 1,
            checked_at: Utc::now(),
        })
    }

    async fn open_watch(&self, name: &str) -> Result<WatchStream, TransportError> {
        self.watch_opens.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        state.check_failure()?;
        if state.fail_watch_opens > 0 {
            state.fail_watch_opens -= 1;
            return Err(TransportError::Connection("watch refused".into()));
        }

        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        state.watchers.entry(name.to_string()).or_default().push(tx);
        Ok(ReceiverStream::new(rx).boxed())
    }
}
