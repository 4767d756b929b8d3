//! Watch 订阅管理
//!
//! 同一服务名的所有 `WatchHandle` 共享一条推送连接。连接断开时先发出 `Error` 事件，
//! 然后按重试策略退避重连，重连成功后重新拉取一次完整状态，只有越过高水位的记录才会被发出。

use async_broadcast::{InactiveReceiver, Receiver, Sender};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::gateway::RegistryGateway;
use crate::discovery::cache::ResolutionCache;
use crate::discovery::record::ServiceRecord;
use crate::error::{DiscoveryError, Result};
use crate::transport::TransportError;

/// 推送连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Live,
    Reconnecting,
    Closed,
}

/// Watch 事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// 服务记录更新，同一句柄上 `updated_at` 严格递增
    Update(ServiceRecord),
    /// 非终止错误，订阅会继续重连
    Error(DiscoveryError),
}

struct Subscription {
    name: String,
    sender: Sender<WatchEvent>,
    // 保持通道在没有活跃接收者时不被关闭
    _keepalive: InactiveReceiver<WatchEvent>,
    // 最近一次发出的记录，新句柄加入时作为初始事件
    latest: tokio::sync::Mutex<Option<ServiceRecord>>,
    status: watch::Sender<ConnectionStatus>,
    cancel: CancellationToken,
}

impl Subscription {
    /// 发出更新；记录不比已发出的记录新时返回 `false`
    async fn publish_update(&self, record: ServiceRecord) -> bool {
        let mut latest = self.latest.lock().await;
        if latest
            .as_ref()
            .is_some_and(|seen| !record.is_newer_than(seen))
        {
            return false;
        }
        *latest = Some(record.clone());
        let _ = self.sender.broadcast(WatchEvent::Update(record)).await;
        true
    }

    async fn publish_error(&self, error: DiscoveryError) {
        let _latest = self.latest.lock().await;
        let _ = self.sender.broadcast(WatchEvent::Error(error)).await;
    }

    async fn high_water(&self) -> Option<DateTime<Utc>> {
        self.latest.lock().await.as_ref().map(|r| r.updated_at)
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
    }
}

struct SubscriptionSlot {
    subscription: Arc<Subscription>,
    handles: usize,
}

type SubscriptionMap = Arc<Mutex<HashMap<String, SubscriptionSlot>>>;

fn lock(map: &SubscriptionMap) -> MutexGuard<'_, HashMap<String, SubscriptionSlot>> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Watch 订阅管理器
#[derive(Clone)]
pub(crate) struct WatchManager {
    subscriptions: SubscriptionMap,
    gateway: RegistryGateway,
    cache: ResolutionCache,
    root: CancellationToken,
    buffer: usize,
}

impl WatchManager {
    pub(crate) fn new(
        gateway: RegistryGateway,
        cache: ResolutionCache,
        root: CancellationToken,
        buffer: usize,
    ) -> Self {
        Self {
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            gateway,
            cache,
            root,
            buffer: buffer.max(1),
        }
    }

    pub(crate) async fn subscribe(&self, name: &str) -> Result<WatchHandle> {
        let subscription = {
            let mut subscriptions = lock(&self.subscriptions);
            if self.root.is_cancelled() {
                return Err(DiscoveryError::Shutdown);
            }
            match subscriptions.get_mut(name) {
                Some(slot) => {
                    slot.handles += 1;
                    slot.subscription.clone()
                }
                None => {
                    let subscription = self.spawn_subscription(name);
                    subscriptions.insert(
                        name.to_string(),
                        SubscriptionSlot {
                            subscription: subscription.clone(),
                            handles: 1,
                        },
                    );
                    subscription
                }
            }
        };

        // 在 latest 锁内创建接收者，初始事件与后续广播之间不会遗漏也不会重复
        let (receiver, initial) = {
            let latest = subscription.latest.lock().await;
            (subscription.sender.new_receiver(), latest.clone())
        };

        let handle = WatchHandle {
            id: Uuid::new_v4(),
            name: name.to_string(),
            receiver: Some(Box::pin(receiver)),
            pending: initial.map(WatchEvent::Update),
            last_seen: None,
            status: subscription.status.subscribe(),
            subscriptions: Some(self.subscriptions.clone()),
        };
        debug!(service = %name, watch_id = %handle.id, "Watch handle opened");
        Ok(handle)
    }

    fn spawn_subscription(&self, name: &str) -> Arc<Subscription> {
        let (mut sender, receiver) = async_broadcast::broadcast(self.buffer);
        sender.set_overflow(true);
        sender.set_await_active(false);
        let (status, _) = watch::channel(ConnectionStatus::Connecting);

        let subscription = Arc::new(Subscription {
            name: name.to_string(),
            sender,
            _keepalive: receiver.deactivate(),
            latest: tokio::sync::Mutex::new(None),
            status,
            cancel: self.root.child_token(),
        });

        info!(service = %name, "👀 Watch subscription started");
        tokio::spawn(run_subscription(
            subscription.clone(),
            self.gateway.clone(),
            self.cache.clone(),
        ));
        subscription
    }

    /// 当前活跃的订阅数量（按服务名），已停止的订阅不计入
    pub(crate) fn active(&self) -> usize {
        lock(&self.subscriptions)
            .values()
            .filter(|slot| !slot.subscription.cancel.is_cancelled())
            .count()
    }
}

fn release(subscriptions: &SubscriptionMap, name: &str) {
    let mut map = lock(subscriptions);
    let Some(slot) = map.get_mut(name) else {
        return;
    };
    slot.handles = slot.handles.saturating_sub(1);
    if slot.handles == 0
        && let Some(slot) = map.remove(name)
    {
        slot.subscription.cancel.cancel();
        info!(service = %name, "Watch subscription released");
    }
}

/// 推送连接中断的原因
enum Interruption {
    Stream(TransportError),
    Reconcile(DiscoveryError),
}

async fn run_subscription(
    subscription: Arc<Subscription>,
    gateway: RegistryGateway,
    cache: ResolutionCache,
) {
    let name = subscription.name.clone();
    let cancel = subscription.cancel.clone();
    let mut failures: usize = 0;

    'connection: loop {
        subscription.set_status(if failures == 0 {
            ConnectionStatus::Connecting
        } else {
            ConnectionStatus::Reconnecting
        });

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => break 'connection,
            opened = tokio::time::timeout(
                gateway.attempt_timeout(),
                gateway.transport().open_watch(&name),
            ) => opened.unwrap_or(Err(TransportError::Timeout)),
        };

        let interruption = match opened {
            Ok(mut stream) => {
                let reconciled = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break 'connection,
                    reconciled = reconcile(&subscription, &gateway, &cache) => reconciled,
                };

                // 对账失败时断线期间的变更仍未补齐，丢弃连接并重连
                match reconciled {
                    Err(error) => Interruption::Reconcile(error),
                    Ok(()) => {
                        subscription.set_status(ConnectionStatus::Live);
                        failures = 0;
                        info!(service = %name, "Watch stream live");

                        loop {
                            let item = tokio::select! {
                                biased;
                                _ = cancel.cancelled() => break 'connection,
                                item = stream.next() => item,
                            };
                            match item {
                                Some(Ok(record)) => {
                                    if record.name != name {
                                        continue;
                                    }
                                    let high_water = subscription.high_water().await;
                                    if high_water.is_some_and(|seen| record.updated_at <= seen) {
                                        continue;
                                    }
                                    cache.apply_update(&record);
                                    subscription.publish_update(record).await;
                                }
                                Some(Err(TransportError::Decode(reason))) => {
                                    warn!(
                                        service = %name,
                                        %reason,
                                        "Dropping malformed watch event"
                                    );
                                    let error = DiscoveryError::unavailable(&name, 1, reason);
                                    subscription.publish_error(error).await;
                                }
                                Some(Err(error)) => break Interruption::Stream(error),
                                None => break Interruption::Stream(TransportError::StreamClosed),
                            }
                        }
                    }
                }
            }
            Err(error) => Interruption::Stream(error),
        };

        failures += 1;
        let (error, floor) = match interruption {
            Interruption::Stream(error) => (
                DiscoveryError::unavailable(&name, failures as u32, error.to_string()),
                Duration::ZERO,
            ),
            Interruption::Reconcile(error) => {
                let floor = match &error {
                    DiscoveryError::CircuitOpen { retry_after, .. } => *retry_after,
                    _ => Duration::ZERO,
                };
                (error, floor)
            }
        };
        warn!(
            service = %name,
            error = %error,
            failures,
            "Watch stream disconnected"
        );
        subscription.publish_error(error).await;
        subscription.set_status(ConnectionStatus::Reconnecting);

        let delay = gateway.policy().backoff_duration(failures).max(floor);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break 'connection,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    subscription.set_status(ConnectionStatus::Closed);
    subscription.sender.close();
    info!(service = %name, "🛑 Watch subscription stopped");
}

/// 连接建立后的对账：拉取完整状态写入缓存，并在越过高水位时发出最新记录
///
/// 服务不存在也算对账成功；其余错误交给调用方按断线处理
async fn reconcile(
    subscription: &Subscription,
    gateway: &RegistryGateway,
    cache: &ResolutionCache,
) -> Result<()> {
    let name = &subscription.name;
    match gateway.fetch(name).await {
        Ok(records) => {
            let merged = cache.store_snapshot(name, records);
            if let Some(record) = merged.into_iter().max_by_key(|r| r.updated_at)
                && subscription.publish_update(record).await
            {
                debug!(service = %name, "Watch reconciled with newer state");
            }
            Ok(())
        }
        Err(error) if error.is_not_found() => {
            cache.invalidate(name);
            Ok(())
        }
        Err(error) => Err(error),
    }
}

/// Watch 句柄
///
/// 实现 `futures::Stream`，产出 [`WatchEvent`]。`close` 之后不会再产出任何事件；
/// 句柄被 drop 时会自动关闭。
pub struct WatchHandle {
    id: Uuid,
    name: String,
    receiver: Option<Pin<Box<Receiver<WatchEvent>>>>,
    pending: Option<WatchEvent>,
    last_seen: Option<DateTime<Utc>>,
    status: watch::Receiver<ConnectionStatus>,
    subscriptions: Option<SubscriptionMap>,
}

impl WatchHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn service_name(&self) -> &str {
        &self.name
    }

    /// 共享连接的当前状态；句柄关闭后恒为 `Closed`
    pub fn status(&self) -> ConnectionStatus {
        if self.subscriptions.is_none() {
            return ConnectionStatus::Closed;
        }
        *self.status.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.subscriptions.is_none()
    }

    /// 关闭句柄（幂等）
    pub fn close(&mut self) {
        let Some(subscriptions) = self.subscriptions.take() else {
            return;
        };
        self.receiver = None;
        self.pending = None;
        release(&subscriptions, &self.name);
        debug!(service = %self.name, watch_id = %self.id, "Watch handle closed");
    }

    fn accept(&mut self, event: &WatchEvent) -> bool {
        match event {
            WatchEvent::Update(record) => {
                if self.last_seen.is_some_and(|seen| record.updated_at <= seen) {
                    return false;
                }
                self.last_seen = Some(record.updated_at);
                true
            }
            WatchEvent::Error(_) => true,
        }
    }
}

impl Stream for WatchHandle {
    type Item = WatchEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(event) = this.pending.take()
            && this.accept(&event)
        {
            return Poll::Ready(Some(event));
        }

        loop {
            let Some(receiver) = this.receiver.as_mut() else {
                return Poll::Ready(None);
            };
            match receiver.as_mut().poll_next(cx) {
                Poll::Ready(Some(event)) => {
                    if this.accept(&event) {
                        return Poll::Ready(Some(event));
                    }
                }
                Poll::Ready(None) => {
                    this.receiver = None;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}
