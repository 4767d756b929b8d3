//! 熔断器
//!
//! 每个服务名一个三态状态机：
//! ```text
//! Closed   → Open     : 连续失败次数达到阈值
//! Open     → HalfOpen : 冷却时间结束
//! HalfOpen → Closed   : 唯一的探测请求成功
//! HalfOpen → Open     : 探测失败，冷却时间翻倍（不超过上限）
//! ```
//! 熔断打开期间调用直接返回 `CircuitOpen`，不会产生任何网络请求。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::{DiscoveryError, Result};

/// 熔断器配置
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// 连续失败多少次后打开
    pub failure_threshold: u32,
    /// 首次打开后的冷却时间
    pub cooldown: Duration,
    /// 探测反复失败时冷却时间的上限
    pub max_cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            max_cooldown: Duration::from_secs(300),
        }
    }
}

/// 熔断状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

/// 单个服务名的熔断状态快照
#[derive(Debug, Clone)]
pub struct CircuitState {
    pub status: CircuitStatus,
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
    pub next_probe_at: Option<Instant>,
    failed_probes: u32,
    probe_in_flight: bool,
}

impl Default for CircuitState {
    fn default() -> Self {
        Self {
            status: CircuitStatus::Closed,
            consecutive_failures: 0,
            opened_at: None,
            next_probe_at: None,
            failed_probes: 0,
            probe_in_flight: false,
        }
    }
}

struct Inner {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    states: Mutex<HashMap<String, CircuitState>>,
}

/// 按服务名隔离的熔断器
///
/// 状态转换在锁内完成，同一服务名的转换是串行的
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                clock,
                states: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn states(&self) -> MutexGuard<'_, HashMap<String, CircuitState>> {
        self.inner
            .states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 申请一次调用许可
    ///
    /// 熔断打开或半开状态下已有探测在进行时返回 `CircuitOpen`
    pub fn try_acquire(&self, name: &str) -> Result<CircuitPermit> {
        let now = self.inner.clock.now();
        let mut states = self.states();
        let state = states.entry(name.to_string()).or_default();

        match state.status {
            CircuitStatus::Closed => Ok(self.permit(name, false)),
            CircuitStatus::Open => {
                let next_probe_at = state.next_probe_at.unwrap_or(now);
                if now >= next_probe_at {
                    state.status = CircuitStatus::HalfOpen;
                    state.probe_in_flight = true;
                    info!(service = %name, "Circuit half-open, allowing probe");
                    Ok(self.permit(name, true))
                } else {
                    Err(DiscoveryError::CircuitOpen {
                        name: name.to_string(),
                        retry_after: next_probe_at - now,
                    })
                }
            }
            CircuitStatus::HalfOpen => {
                if state.probe_in_flight {
                    Err(DiscoveryError::CircuitOpen {
                        name: name.to_string(),
                        retry_after: Duration::ZERO,
                    })
                } else {
                    state.probe_in_flight = true;
                    Ok(self.permit(name, true))
                }
            }
        }
    }

    fn permit(&self, name: &str, probe: bool) -> CircuitPermit {
        CircuitPermit {
            breaker: self.clone(),
            name: name.to_string(),
            probe,
            resolved: false,
        }
    }

    fn on_success(&self, name: &str) {
        let mut states = self.states();
        let state = states.entry(name.to_string()).or_default();
        if state.status != CircuitStatus::Closed {
            info!(service = %name, "Circuit closed after successful probe");
        }
        *state = CircuitState::default();
    }

    fn on_failure(&self, name: &str, probe: bool) {
        let now = self.inner.clock.now();
        let config = &self.inner.config;
        let mut states = self.states();
        let state = states.entry(name.to_string()).or_default();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);

        match state.status {
            CircuitStatus::Closed => {
                if state.consecutive_failures >= config.failure_threshold {
                    open(state, now, config.cooldown);
                    warn!(
                        service = %name,
                        failures = state.consecutive_failures,
                        cooldown_ms = config.cooldown.as_millis() as u64,
                        "Circuit opened"
                    );
                }
            }
            CircuitStatus::HalfOpen if probe => {
                state.failed_probes = state.failed_probes.saturating_add(1);
                let cooldown = self.cooldown_for(state.failed_probes);
                open(state, now, cooldown);
                warn!(
                    service = %name,
                    failed_probes = state.failed_probes,
                    cooldown_ms = cooldown.as_millis() as u64,
                    "Circuit probe failed, reopening"
                );
            }
            _ => {}
        }
    }

    fn cooldown_for(&self, failed_probes: u32) -> Duration {
        let config = &self.inner.config;
        config
            .cooldown
            .saturating_mul(1u32 << failed_probes.min(16))
            .min(config.max_cooldown)
    }

    /// 获取服务名的熔断状态快照
    pub fn state(&self, name: &str) -> CircuitState {
        self.states().get(name).cloned().unwrap_or_default()
    }

    /// 手动重置
    pub fn reset(&self, name: &str) {
        self.states().remove(name);
    }
}

fn open(state: &mut CircuitState, now: Instant, cooldown: Duration) {
    state.status = CircuitStatus::Open;
    state.opened_at = Some(now);
    state.next_probe_at = Some(now + cooldown);
    state.probe_in_flight = false;
}

/// 调用许可
///
/// 调用结束后必须通过 `success` 或 `failure` 上报结果；
/// 半开状态下的探测许可如果被直接丢弃（调用被取消），按失败处理。
pub struct CircuitPermit {
    breaker: CircuitBreaker,
    name: String,
    probe: bool,
    resolved: bool,
}

impl CircuitPermit {
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.on_success(&self.name);
    }

    pub fn failure(mut self) {
        self.resolved = true;
        self.breaker.on_failure(&self.name, self.probe);
    }
}

impl Drop for CircuitPermit {
    fn drop(&mut self) {
        if !self.resolved && self.probe {
            self.breaker.on_failure(&self.name, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn breaker(clock: Arc<ManualClock>) -> CircuitBreaker {
        CircuitBreaker::new(
            CircuitBreakerConfig {
                failure_threshold: 3,
                cooldown: Duration::from_secs(10),
                max_cooldown: Duration::from_secs(25),
            },
            clock,
        )
    }

    fn fail(breaker: &CircuitBreaker, name: &str) {
        breaker.try_acquire(name).unwrap().failure();
    }

    #[test]
    fn test_opens_after_threshold() {
        let clock = Arc::new(ManualClock::new());
        let breaker = breaker(clock.clone());

        fail(&breaker, "orders");
        fail(&breaker, "orders");
        assert_eq!(breaker.state("orders").status, CircuitStatus::Closed);
        fail(&breaker, "orders");
        assert_eq!(breaker.state("orders").status, CircuitStatus::Open);

        let err = breaker.try_acquire("orders").err().unwrap();
        assert!(err.is_circuit_open());
        // 其他服务名不受影响
        assert!(breaker.try_acquire("billing").is_ok());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let clock = Arc::new(ManualClock::new());
        let breaker = breaker(clock);

        fail(&breaker, "orders");
        fail(&breaker, "orders");
        breaker.try_acquire("orders").unwrap().success();
        fail(&breaker, "orders");
        assert_eq!(breaker.state("orders").status, CircuitStatus::Closed);
        assert_eq!(breaker.state("orders").consecutive_failures, 1);
    }

    #[test]
    fn test_half_open_allows_single_probe() {
        let clock = Arc::new(ManualClock::new());
        let breaker = breaker(clock.clone());
        for _ in 0..3 {
            fail(&breaker, "orders");
        }

        clock.advance(Duration::from_secs(10));
        let probe = breaker.try_acquire("orders").unwrap();
        assert!(probe.is_probe());
        assert_eq!(breaker.state("orders").status, CircuitStatus::HalfOpen);
        assert!(breaker.try_acquire("orders").is_err());

        probe.success();
        assert_eq!(breaker.state("orders").status, CircuitStatus::Closed);
        assert_eq!(breaker.state("orders").consecutive_failures, 0);
    }

    #[test]
    fn test_failed_probes_grow_cooldown_up_to_max() {
        let clock = Arc::new(ManualClock::new());
        let breaker = breaker(clock.clone());
        for _ in 0..3 {
            fail(&breaker, "orders");
        }

        clock.advance(Duration::from_secs(10));
        breaker.try_acquire("orders").unwrap().failure();
        // 冷却时间翻倍为 20s
        clock.advance(Duration::from_secs(19));
        assert!(breaker.try_acquire("orders").is_err());
        clock.advance(Duration::from_secs(1));
        breaker.try_acquire("orders").unwrap().failure();

        // 40s 被限制为 25s
        let state = breaker.state("orders");
        let window = state.next_probe_at.unwrap() - state.opened_at.unwrap();
        assert_eq!(window, Duration::from_secs(25));
    }

    #[test]
    fn test_abandoned_probe_reopens() {
        let clock = Arc::new(ManualClock::new());
        let breaker = breaker(clock.clone());
        for _ in 0..3 {
            fail(&breaker, "orders");
        }
        clock.advance(Duration::from_secs(10));
        drop(breaker.try_acquire("orders").unwrap());
        assert_eq!(breaker.state("orders").status, CircuitStatus::Open);
    }
}
