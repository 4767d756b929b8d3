//! 注册中心客户端错误处理模块
//!
//! 提供统一的错误类型和错误代码分类。
//! 瞬时的传输错误由重试层吸收，只有最终结果才会以 `DiscoveryError` 的形式返回给调用方。

pub mod code;
pub mod conversions;

pub use code::{ErrorCategory, ErrorCode};

use std::time::Duration;
use thiserror::Error;

/// 服务发现统一错误类型
///
/// 需要 `Clone`：single-flight 场景下同一个结果会分发给所有等待者。
/// 任何变体都不携带凭证信息。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    /// 注册中心明确表示不存在匹配的记录（不重试）
    #[error("service not found: {name}")]
    ServiceNotFound { name: String },

    /// 重试耗尽后注册中心仍不可达
    #[error("registry unavailable for '{name}' after {attempts} attempt(s): {reason}")]
    RegistryUnavailable {
        name: String,
        attempts: u32,
        reason: String,
    },

    /// 该服务名的熔断器处于打开状态，快速失败
    #[error("circuit open for '{name}', next probe in {retry_after:?}")]
    CircuitOpen { name: String, retry_after: Duration },

    /// 注册载荷不合法（不会发送到网络）
    #[error("validation failed: {0}")]
    Validation(String),

    /// 配置错误
    #[error("configuration error: {0}")]
    Config(String),

    /// 客户端已关闭
    #[error("discovery client has been shut down")]
    Shutdown,
}

impl DiscoveryError {
    /// 创建服务不存在错误
    pub fn not_found(name: impl Into<String>) -> Self {
        DiscoveryError::ServiceNotFound { name: name.into() }
    }

    /// 创建注册中心不可用错误
    pub fn unavailable(name: impl Into<String>, attempts: u32, reason: impl Into<String>) -> Self {
        DiscoveryError::RegistryUnavailable {
            name: name.into(),
            attempts,
            reason: reason.into(),
        }
    }

    /// 创建校验错误
    pub fn validation(reason: impl Into<String>) -> Self {
        DiscoveryError::Validation(reason.into())
    }

    /// 获取错误代码
    pub fn code(&self) -> ErrorCode {
        match self {
            DiscoveryError::ServiceNotFound { .. } => ErrorCode::ServiceNotFound,
            DiscoveryError::RegistryUnavailable { .. } => ErrorCode::RegistryUnavailable,
            DiscoveryError::CircuitOpen { .. } => ErrorCode::CircuitOpen,
            DiscoveryError::Validation(_) => ErrorCode::ValidationFailed,
            DiscoveryError::Config(_) => ErrorCode::ConfigurationError,
            DiscoveryError::Shutdown => ErrorCode::ClientShutdown,
        }
    }

    /// 判断调用方是否可以稍后重试
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DiscoveryError::ServiceNotFound { .. })
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, DiscoveryError::CircuitOpen { .. })
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, DiscoveryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_and_messages() {
        let err = DiscoveryError::unavailable("orders", 3, "connection refused");
        assert_eq!(err.code(), ErrorCode::RegistryUnavailable);
        assert!(err.is_retryable());
        assert_eq!(
            err.to_string(),
            "registry unavailable for 'orders' after 3 attempt(s): connection refused"
        );

        let err = DiscoveryError::not_found("orders");
        assert!(err.is_not_found());
        assert!(!err.is_retryable());

        let err = DiscoveryError::CircuitOpen {
            name: "orders".into(),
            retry_after: Duration::from_secs(5),
        };
        assert!(err.is_circuit_open());
        assert_eq!(err.code().category(), ErrorCategory::Protection);
    }
}
