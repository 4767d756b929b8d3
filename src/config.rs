//! 客户端配置
//!
//! 配置可以来自环境变量、TOML 文件或直接构造，显式调用 `with_*` 的值优先。
//!
//! # 环境变量
//! - `REGISTRY_API_KEY`：注册中心凭证（必填）
//! - `REGISTRY_URL`：注册中心地址（默认 `http://localhost:8500`）
//! - `REGISTRY_REGION`：首选区域
//! - `REGISTRY_TIMEOUT_MS`：单次请求超时（默认 5000）
//! - `REGISTRY_RETRIES`：首次失败后的最大重试次数（默认 3）

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::breaker::CircuitBreakerConfig;
use crate::error::{DiscoveryError, Result};
use crate::retry::ExponentialBackoffPolicy;

/// 客户端配置
#[derive(Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_registry_url")]
    pub registry_url: String,

    #[serde(default)]
    pub region: Option<String>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_retries")]
    pub retries: u32,

    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,

    #[serde(default = "default_breaker_cooldown_ms")]
    pub breaker_cooldown_ms: u64,

    #[serde(default = "default_breaker_max_cooldown_ms")]
    pub breaker_max_cooldown_ms: u64,

    #[serde(default = "default_watch_buffer")]
    pub watch_buffer: usize,

    /// 注册中心的 PUT 是否为幂等 upsert（决定 register 是否重试）
    #[serde(default = "default_true")]
    pub idempotent_upsert: bool,
}

fn default_registry_url() -> String {
    "http://localhost:8500".to_string()
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_retries() -> u32 {
    3
}

fn default_cache_ttl_ms() -> u64 {
    30_000
}

fn default_cache_capacity() -> usize {
    1024
}

fn default_backoff_base_ms() -> u64 {
    100
}

fn default_backoff_max_ms() -> u64 {
    5000
}

fn default_breaker_threshold() -> u32 {
    5
}

fn default_breaker_cooldown_ms() -> u64 {
    30_000
}

fn default_breaker_max_cooldown_ms() -> u64 {
    300_000
}

fn default_watch_buffer() -> usize {
    64
}

fn default_true() -> bool {
    true
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            registry_url: default_registry_url(),
            region: None,
            timeout_ms: default_timeout_ms(),
            retries: default_retries(),
            cache_ttl_ms: default_cache_ttl_ms(),
            cache_capacity: default_cache_capacity(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            breaker_threshold: default_breaker_threshold(),
            breaker_cooldown_ms: default_breaker_cooldown_ms(),
            breaker_max_cooldown_ms: default_breaker_max_cooldown_ms(),
            watch_buffer: default_watch_buffer(),
            idempotent_upsert: true,
        }
    }
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// 从环境变量加载
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(api_key) = lookup("REGISTRY_API_KEY") {
            config.api_key = api_key;
        }
        if let Some(url) = lookup("REGISTRY_URL").filter(|v| !v.is_empty()) {
            config.registry_url = url;
        }
        config.region = lookup("REGISTRY_REGION").filter(|v| !v.is_empty());
        if let Some(timeout_ms) = parse_var(&lookup, "REGISTRY_TIMEOUT_MS")? {
            config.timeout_ms = timeout_ms;
        }
        if let Some(retries) = parse_var(&lookup, "REGISTRY_RETRIES")? {
            config.retries = retries;
        }
        Ok(config)
    }

    /// 从 TOML 文件加载
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn with_registry_url(mut self, url: impl Into<String>) -> Self {
        self.registry_url = url.into();
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_ms = ttl.as_millis() as u64;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base_ms = base.as_millis() as u64;
        self.backoff_max_ms = max.as_millis() as u64;
        self
    }

    pub fn with_breaker(
        mut self,
        threshold: u32,
        cooldown: Duration,
        max_cooldown: Duration,
    ) -> Self {
        self.breaker_threshold = threshold;
        self.breaker_cooldown_ms = cooldown.as_millis() as u64;
        self.breaker_max_cooldown_ms = max_cooldown.as_millis() as u64;
        self
    }

    pub fn with_watch_buffer(mut self, buffer: usize) -> Self {
        self.watch_buffer = buffer;
        self
    }

    pub fn with_idempotent_upsert(mut self, idempotent: bool) -> Self {
        self.idempotent_upsert = idempotent;
        self
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(DiscoveryError::Config("api_key is required".into()));
        }
        let url = Url::parse(&self.registry_url).map_err(|e| {
            DiscoveryError::Config(format!(
                "registry_url '{}' is not absolute: {}",
                self.registry_url, e
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DiscoveryError::Config(format!(
                "registry_url '{}' must use http or https",
                self.registry_url
            )));
        }
        if self.timeout_ms == 0 {
            return Err(DiscoveryError::Config("timeout must be positive".into()));
        }
        if self.breaker_threshold == 0 {
            return Err(DiscoveryError::Config("breaker_threshold must be positive".into()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.breaker_threshold,
            cooldown: Duration::from_millis(self.breaker_cooldown_ms),
            max_cooldown: Duration::from_millis(self.breaker_max_cooldown_ms),
        }
    }

    /// 默认重试策略
    pub fn retry_policy(&self) -> ExponentialBackoffPolicy {
        ExponentialBackoffPolicy::new(
            self.retries as usize,
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_max_ms),
        )
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    match lookup(key).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| DiscoveryError::Config(format!("{} has invalid value '{}'", key, raw))),
        None => Ok(None),
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &"<redacted>")
            .field("registry_url", &self.registry_url)
            .field("region", &self.region)
            .field("timeout_ms", &self.timeout_ms)
            .field("retries", &self.retries)
            .field("cache_ttl_ms", &self.cache_ttl_ms)
            .field("cache_capacity", &self.cache_capacity)
            .field("breaker_threshold", &self.breaker_threshold)
            .field("watch_buffer", &self.watch_buffer)
            .field("idempotent_upsert", &self.idempotent_upsert)
            .finish_non_exhaustive()
    }
}
