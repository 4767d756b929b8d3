//! 注册中心网关
//!
//! 所有到注册中心的请求（watch 的推送流除外）都经过这里：
//! 熔断判断 → 单次超时 → 结果上报熔断器 → 按重试策略退避。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::breaker::CircuitBreaker;
use crate::discovery::ServiceRecord;
use crate::error::{DiscoveryError, Result};
use crate::health::HealthReport;
use crate::registry::Registration;
use crate::retry::RetryPolicy;
use crate::transport::{RegistryTransport, TransportError};

#[derive(Clone)]
pub(crate) struct RegistryGateway {
    transport: Arc<dyn RegistryTransport>,
    breaker: CircuitBreaker,
    policy: Arc<dyn RetryPolicy>,
    attempt_timeout: Duration,
    idempotent_upsert: bool,
}

impl RegistryGateway {
    pub(crate) fn new(
        transport: Arc<dyn RegistryTransport>,
        breaker: CircuitBreaker,
        policy: Arc<dyn RetryPolicy>,
        attempt_timeout: Duration,
        idempotent_upsert: bool,
    ) -> Self {
        Self {
            transport,
            breaker,
            policy,
            attempt_timeout,
            idempotent_upsert,
        }
    }

    pub(crate) fn transport(&self) -> &Arc<dyn RegistryTransport> {
        &self.transport
    }

    pub(crate) fn policy(&self) -> &Arc<dyn RetryPolicy> {
        &self.policy
    }

    pub(crate) fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    pub(crate) async fn fetch(&self, name: &str) -> Result<Vec<ServiceRecord>> {
        let transport = self.transport.clone();
        self.call(name, "fetch", true, move || {
            let transport = transport.clone();
            let name = name.to_string();
            async move { transport.fetch(&name).await }
        })
        .await
    }

    pub(crate) async fn upsert(&self, registration: &Registration) -> Result<()> {
        let transport = self.transport.clone();
        self.call(&registration.name, "upsert", self.idempotent_upsert, move || {
            let transport = transport.clone();
            let registration = registration.clone();
            async move { transport.upsert(&registration).await }
        })
        .await
    }

    /// 续期总是幂等的，无论注册是否允许重试
    pub(crate) async fn renew(&self, registration: &Registration) -> Result<()> {
        let transport = self.transport.clone();
        self.call(&registration.name, "renew", true, move || {
            let transport = transport.clone();
            let registration = registration.clone();
            async move { transport.renew(&registration).await }
        })
        .await
    }

    pub(crate) async fn remove(&self, name: &str) -> Result<()> {
        let transport = self.transport.clone();
        self.call(name, "remove", true, move || {
            let transport = transport.clone();
            let name = name.to_string();
            async move { transport.remove(&name).await }
        })
        .await
    }

    pub(crate) async fn health(&self, name: &str) -> Result<HealthReport> {
        let transport = self.transport.clone();
        self.call(name, "health", true, move || {
            let transport = transport.clone();
            let name = name.to_string();
            async move { transport.health(&name).await }
        })
        .await
    }

    /// 带熔断与重试的调用循环
    ///
    /// - `NotFound` 是注册中心的权威回答，计为成功且不重试
    /// - 熔断打开时立即返回，不消耗重试次数
    async fn call<T, F, Fut>(
        &self,
        name: &str,
        operation: &'static str,
        retryable: bool,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, TransportError>>,
    {
        let mut attempts: u32 = 0;
        loop {
            let permit = self.breaker.try_acquire(name)?;
            let outcome = match tokio::time::timeout(self.attempt_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout),
            };

            let error = match outcome {
                Ok(value) => {
                    permit.success();
                    return Ok(value);
                }
                Err(TransportError::NotFound) => {
                    permit.success();
                    return Err(DiscoveryError::not_found(name));
                }
                Err(error) => {
                    permit.failure();
                    error
                }
            };

            attempts += 1;
            if !retryable || !self.policy.should_retry(attempts as usize, &error) {
                warn!(
                    service = %name,
                    operation,
                    attempts,
                    error = %error,
                    "Registry call failed"
                );
                return Err(DiscoveryError::unavailable(name, attempts, error.to_string()));
            }

            let delay = self.policy.backoff_duration(attempts as usize);
            debug!(
                service = %name,
                operation,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying registry call"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
