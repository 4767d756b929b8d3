//! 注册续期管理
//!
//! 每个已注册的服务名对应一个后台续期循环，每隔 `ttl/3` 重新提交注册载荷。
//! 续期失败只记录日志并更新状态，不会在本地注销服务。

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::gateway::RegistryGateway;
use crate::discovery::ResolutionCache;
use crate::error::{DiscoveryError, Result};
use crate::registry::Registration;

/// 注册续期状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationStatus {
    pub registered_at: DateTime<Utc>,
    pub last_renewal: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

struct RenewalTask {
    cancel: CancellationToken,
    status: watch::Receiver<RegistrationStatus>,
}

/// 注册管理器
#[derive(Clone)]
pub struct RegistrationManager {
    gateway: RegistryGateway,
    cache: ResolutionCache,
    root: CancellationToken,
    tasks: Arc<Mutex<HashMap<String, RenewalTask>>>,
}

impl RegistrationManager {
    pub(crate) fn new(
        gateway: RegistryGateway,
        cache: ResolutionCache,
        root: CancellationToken,
    ) -> Self {
        Self {
            gateway,
            cache,
            root,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<String, RenewalTask>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 注册服务并启动续期
    ///
    /// 同名服务重复注册时会替换原有的续期循环
    pub async fn register(&self, registration: Registration) -> Result<()> {
        registration.validate()?;
        if self.root.is_cancelled() {
            return Err(DiscoveryError::Shutdown);
        }

        self.gateway.upsert(&registration).await?;
        // 注册后下一次 discover 应看到新地址
        self.cache.invalidate(&registration.name);

        let name = registration.name.clone();
        let cancel = self.root.child_token();
        let (status_tx, status_rx) = watch::channel(RegistrationStatus {
            registered_at: Utc::now(),
            last_renewal: None,
            consecutive_failures: 0,
            last_error: None,
        });

        let previous = self.tasks().insert(
            name.clone(),
            RenewalTask {
                cancel: cancel.clone(),
                status: status_rx,
            },
        );
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }

        info!(
            service = %name,
            url = %registration.url,
            ttl_secs = registration.ttl,
            "✅ Service registered"
        );

        tokio::spawn(renewal_loop(
            self.gateway.clone(),
            registration,
            cancel,
            status_tx,
        ));
        Ok(())
    }

    /// 注销服务
    ///
    /// 停止续期并尽力删除远端注册；远端删除失败只记录日志，本地始终成功
    pub async fn deregister(&self, name: &str) -> Result<()> {
        if let Some(task) = self.tasks().remove(name) {
            task.cancel.cancel();
        }
        self.cache.invalidate(name);

        match self.gateway.remove(name).await {
            Ok(()) | Err(DiscoveryError::ServiceNotFound { .. }) => {
                info!(service = %name, "Service deregistered");
            }
            Err(e) => {
                warn!(service = %name, error = %e, "Best-effort deregistration failed");
            }
        }
        Ok(())
    }

    pub fn status(&self, name: &str) -> Option<RegistrationStatus> {
        self.tasks()
            .get(name)
            .map(|task| task.status.borrow().clone())
    }

    pub fn registered(&self) -> Vec<String> {
        self.tasks().keys().cloned().collect()
    }

    /// 停止全部续期循环
    pub(crate) fn stop_all(&self) {
        for (_, task) in self.tasks().drain() {
            task.cancel.cancel();
        }
    }
}

async fn renewal_loop(
    gateway: RegistryGateway,
    registration: Registration,
    cancel: CancellationToken,
    status: watch::Sender<RegistrationStatus>,
) {
    let period = registration.renewal_interval();
    let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    result = gateway.renew(&registration) => result,
                };
                match result {
                    Ok(()) => {
                        debug!(service = %registration.name, "💓 Registration renewed");
                        status.send_modify(|s| {
                            s.last_renewal = Some(Utc::now());
                            s.consecutive_failures = 0;
                            s.last_error = None;
                        });
                    }
                    Err(e) => {
                        warn!(
                            service = %registration.name,
                            error = %e,
                            "❌ Failed to renew registration"
                        );
                        status.send_modify(|s| {
                            s.consecutive_failures = s.consecutive_failures.saturating_add(1);
                            s.last_error = Some(e.to_string());
                        });
                    }
                }
            }
        }
    }

    info!(service = %registration.name, "🛑 Renewal loop stopped");
}
