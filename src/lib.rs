//! Flare Registry Client
//!
//! 面向中心化服务注册中心的客户端库：按服务名解析端点、注册并续期自身、
//! 订阅推送更新，并在注册中心不稳定时通过缓存、重试、熔断和区域故障转移保持可用。
//!
//! ```no_run
//! use flare_registry_client::{ClientConfig, DiscoverOptions, DiscoveryClient};
//!
//! # async fn run() -> flare_registry_client::Result<()> {
//! let client = DiscoveryClient::new(ClientConfig::from_env()?)?;
//! let resolution = client.discover("orders", DiscoverOptions::new()).await?;
//! println!("orders -> {}", resolution.url());
//! # Ok(())
//! # }
//! ```

pub mod breaker;
pub mod client;
pub mod clock;
pub mod config;
pub mod discovery;
pub mod error;
pub mod health;
pub mod logging;
pub mod registry;
pub mod retry;
pub mod transport;

// Re-exports
pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, CircuitStatus};
pub use client::{DiscoveryClient, DiscoveryClientBuilder};
pub use clock::{Clock, ManualClock, TokioClock};
pub use config::ClientConfig;
pub use discovery::{
    ConnectionStatus, DiscoverOptions, Freshness, RegionSelector, Resolution, ServiceRecord,
    WatchEvent, WatchHandle,
};
pub use error::{DiscoveryError, ErrorCategory, ErrorCode, Result};
pub use health::{HealthReport, HealthService, HealthStatus};
pub use logging::{LogFormat, init_logging};
pub use registry::{Registration, RegistrationStatus};
pub use retry::{ExponentialBackoffPolicy, FixedRetryPolicy, Jitter, RetryPolicy};
pub use transport::{HttpTransport, InMemoryRegistry, RegistryTransport, TransportError};
