//! 服务发现客户端
//!
//! `DiscoveryClient` 是对外的统一入口：服务发现、注册、注销、watch 和健康探测。
//! 客户端可以廉价克隆并在任务间共享；最后一个克隆被 drop 或调用 `shutdown` 时，
//! 所有续期循环和 watch 任务都会停止。

pub(crate) mod gateway;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::breaker::{CircuitBreaker, CircuitState};
use crate::clock::{Clock, TokioClock};
use crate::config::ClientConfig;
use crate::discovery::{
    DiscoverOptions, Freshness, RegionSelector, Resolution, ResolutionCache, ServiceRecord,
    WatchHandle, WatchManager,
};
use crate::error::{DiscoveryError, Result};
use crate::health::{HealthReport, HealthService, HealthStatus};
use crate::registry::{Registration, RegistrationManager, RegistrationStatus};
use crate::retry::RetryPolicy;
use crate::transport::{HttpTransport, RegistryTransport};
use gateway::RegistryGateway;

/// 客户端构建器
pub struct DiscoveryClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn RegistryTransport>>,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    clock: Option<Arc<dyn Clock>>,
}

impl DiscoveryClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            retry_policy: None,
            clock: None,
        }
    }

    /// 指定传输层（默认使用 `HttpTransport`）
    pub fn transport(mut self, transport: Arc<dyn RegistryTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// 指定重试策略（默认为带抖动的指数退避）
    pub fn retry_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.retry_policy = Some(Arc::new(policy));
        self
    }

    /// 指定时钟（默认跟随 tokio 时间）
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<DiscoveryClient> {
        self.config.validate()?;

        let transport: Arc<dyn RegistryTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&self.config)?),
        };
        let policy: Arc<dyn RetryPolicy> = match self.retry_policy {
            Some(policy) => policy,
            None => Arc::new(self.config.retry_policy()),
        };
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(TokioClock),
        };

        let root = CancellationToken::new();
        let breaker = CircuitBreaker::new(self.config.breaker_config(), clock.clone());
        let gateway = RegistryGateway::new(
            transport,
            breaker.clone(),
            policy,
            self.config.timeout(),
            self.config.idempotent_upsert,
        );
        let cache = ResolutionCache::new(
            self.config.cache_capacity,
            self.config.cache_ttl(),
            clock,
        );
        let watches = WatchManager::new(
            gateway.clone(),
            cache.clone(),
            root.clone(),
            self.config.watch_buffer,
        );
        let registrations = RegistrationManager::new(gateway.clone(), cache.clone(), root.clone());

        info!(
            registry_url = %self.config.registry_url,
            region = ?self.config.region,
            "Discovery client created"
        );

        Ok(DiscoveryClient {
            inner: Arc::new(ClientInner {
                selector: RegionSelector::new(self.config.region.clone()),
                config: self.config,
                gateway,
                breaker,
                cache,
                watches,
                registrations,
                health: HealthService::new(),
                root,
            }),
        })
    }
}

struct ClientInner {
    config: ClientConfig,
    gateway: RegistryGateway,
    breaker: CircuitBreaker,
    cache: ResolutionCache,
    selector: RegionSelector,
    watches: WatchManager,
    registrations: RegistrationManager,
    health: HealthService,
    root: CancellationToken,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

/// 服务发现客户端
#[derive(Clone)]
pub struct DiscoveryClient {
    inner: Arc<ClientInner>,
}

impl DiscoveryClient {
    pub fn builder(config: ClientConfig) -> DiscoveryClientBuilder {
        DiscoveryClientBuilder::new(config)
    }

    /// 使用默认 HTTP 传输层创建客户端
    pub fn new(config: ClientConfig) -> Result<Self> {
        DiscoveryClientBuilder::new(config).build()
    }

    /// 从环境变量创建客户端
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    fn ensure_running(&self) -> Result<()> {
        if self.inner.root.is_cancelled() {
            Err(DiscoveryError::Shutdown)
        } else {
            Ok(())
        }
    }

    /// 解析服务名
    ///
    /// 新鲜缓存直接返回；否则通过 single-flight 拉取，注册中心不可用时退回过期缓存（降级）
    pub async fn discover(&self, name: &str, options: DiscoverOptions) -> Result<Resolution> {
        self.ensure_running()?;
        if name.is_empty() {
            return Err(DiscoveryError::validation("service name must not be empty"));
        }

        let cache = &self.inner.cache;
        if let Some(records) = cache.get_fresh(name) {
            debug!(service = %name, "Cache hit");
            return self.resolve(name, &records, &options, Freshness::Cached, false);
        }

        let gateway = self.inner.gateway.clone();
        let key = name.to_string();
        let fetched = cache
            .fetch_shared(name, move || async move { gateway.fetch(&key).await })
            .await;

        match fetched {
            Ok(records) => self.resolve(name, &records, &options, Freshness::Refreshed, false),
            Err(e) if e.is_not_found() => {
                cache.invalidate(name);
                Err(e)
            }
            Err(e) => match cache.get_any(name) {
                Some(records) => {
                    warn!(service = %name, error = %e, "Serving stale cache entry");
                    self.resolve(name, &records, &options, Freshness::Stale, true)
                }
                None => Err(e),
            },
        }
    }

    fn resolve(
        &self,
        name: &str,
        records: &[ServiceRecord],
        options: &DiscoverOptions,
        freshness: Freshness,
        stale: bool,
    ) -> Result<Resolution> {
        let candidates: Vec<ServiceRecord> = records
            .iter()
            .filter(|r| r.matches_tags(&options.tags))
            .cloned()
            .collect();
        let selection = self
            .inner
            .selector
            .select(&candidates, options.region.as_deref())
            .ok_or_else(|| DiscoveryError::not_found(name))?;

        Ok(Resolution {
            record: selection.record.clone(),
            degraded: stale || selection.degraded,
            freshness,
        })
    }

    /// 注册服务并按 `ttl/3` 周期续期
    pub async fn register(&self, registration: Registration) -> Result<()> {
        self.ensure_running()?;
        self.inner.registrations.register(registration).await
    }

    /// 注销服务（幂等，本地始终成功）
    pub async fn deregister(&self, name: &str) -> Result<()> {
        self.inner.registrations.deregister(name).await
    }

    /// 订阅服务更新
    pub async fn watch(&self, name: &str) -> Result<WatchHandle> {
        self.ensure_running()?;
        self.inner.watches.subscribe(name).await
    }

    /// 探测服务健康状态，并同步到缓存中的记录
    pub async fn health(&self, name: &str) -> Result<HealthReport> {
        self.ensure_running()?;
        let report = self.inner.gateway.health(name).await?;
        self.inner.health.record(name, report.clone()).await;
        self.inner.cache.apply_health(name, report.healthy);
        debug!(
            service = %name,
            healthy = report.healthy,
            latency_ms = report.latency_ms,
            "Health probed"
        );
        Ok(report)
    }

    /// 最近一次健康探测的状态
    pub async fn health_status(&self, name: &str) -> HealthStatus {
        self.inner.health.get_status(name).await
    }

    pub fn registration_status(&self, name: &str) -> Option<RegistrationStatus> {
        self.inner.registrations.status(name)
    }

    pub fn circuit_state(&self, name: &str) -> CircuitState {
        self.inner.breaker.state(name)
    }

    pub fn cached_services(&self) -> usize {
        self.inner.cache.len()
    }

    pub fn active_watches(&self) -> usize {
        self.inner.watches.active()
    }

    /// 关闭客户端：停止所有续期循环和 watch 任务
    ///
    /// 已注册的服务不会被主动注销，注册中心会在 TTL 到期后删除
    pub fn shutdown(&self) {
        if self.inner.root.is_cancelled() {
            return;
        }
        self.inner.root.cancel();
        self.inner.registrations.stop_all();
        info!("🛑 Discovery client shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.root.is_cancelled()
    }
}

impl std::fmt::Debug for DiscoveryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryClient")
            .field("config", &self.inner.config)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}
