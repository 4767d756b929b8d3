//! 注册中心传输层抽象
//!
//! 传输层只负责单次请求/响应或打开单条长连接事件流，不包含任何重试和缓存逻辑。
//! 通过 `RegistryTransport` trait 可以替换为内存实现，单元测试不会产生真实网络 IO。

pub mod http;
pub mod memory;
pub(crate) mod sse;

pub use http::HttpTransport;
pub use memory::InMemoryRegistry;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::discovery::ServiceRecord;
use crate::health::HealthReport;
use crate::registry::Registration;

/// 推送通道上的事件流
pub type WatchStream = BoxStream<'static, Result<ServiceRecord, TransportError>>;

/// 传输层错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// 注册中心明确返回不存在（404）
    #[error("resource not found")]
    NotFound,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("request timed out")]
    Timeout,

    #[error("unexpected status code {0}")]
    Status(u16),

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("event stream closed by peer")]
    StreamClosed,
}

impl TransportError {
    /// 判断是否为瞬时错误（值得重试）
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Connection(_)
            | TransportError::Timeout
            | TransportError::StreamClosed => true,
            TransportError::Status(code) => *code >= 500 || *code == 429,
            TransportError::NotFound | TransportError::Decode(_) => false,
        }
    }
}

/// 注册中心传输层 trait
///
/// 注意：由于需要动态分发（dyn），使用 async-trait
#[async_trait]
pub trait RegistryTransport: Send + Sync {
    /// 拉取服务名下的全部副本
    ///
    /// 名称不存在时返回 `TransportError::NotFound`
    async fn fetch(&self, name: &str) -> Result<Vec<ServiceRecord>, TransportError>;

    /// 按服务名 upsert 注册信息
    async fn upsert(&self, registration: &Registration) -> Result<(), TransportError>;

    /// 删除注册信息（幂等）
    async fn remove(&self, name: &str) -> Result<(), TransportError>;

    /// 查询服务健康状态
    async fn health(&self, name: &str) -> Result<HealthReport, TransportError>;

    /// 打开该服务名的推送通道
    async fn open_watch(&self, name: &str) -> Result<WatchStream, TransportError>;

    /// 续期注册（用于保持 TTL）
    ///
    /// 默认实现是重新 upsert 同一份载荷
    async fn renew(&self, registration: &Registration) -> Result<(), TransportError> {
        self.upsert(registration).await
    }
}
