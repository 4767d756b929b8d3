//! 错误代码和错误类别定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 错误代码枚举
///
/// 错误代码按类别分组，每个类别占用1000个代码范围：
/// - 1000-1999: 查找相关错误
/// - 2000-2999: 注册中心可用性错误
/// - 3000-3999: 熔断保护错误
/// - 4000-4999: 参数校验错误
/// - 9000-9999: 生命周期错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum ErrorCode {
    // ============================================================
    // 查找相关错误 (1000-1999)
    // ============================================================
    ServiceNotFound = 1000,

    // ============================================================
    // 注册中心可用性错误 (2000-2999)
    // ============================================================
    RegistryUnavailable = 2000,

    // ============================================================
    // 熔断保护错误 (3000-3999)
    // ============================================================
    CircuitOpen = 3000,

    // ============================================================
    // 参数校验错误 (4000-4999)
    // ============================================================
    ValidationFailed = 4000,
    ConfigurationError = 4001,

    // ============================================================
    // 生命周期错误 (9000-9999)
    // ============================================================
    ClientShutdown = 9000,
}

impl ErrorCode {
    /// 获取数值代码
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// 获取字符串代码
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ServiceNotFound => "SERVICE_NOT_FOUND",
            ErrorCode::RegistryUnavailable => "REGISTRY_UNAVAILABLE",
            ErrorCode::CircuitOpen => "CIRCUIT_OPEN",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::ClientShutdown => "CLIENT_SHUTDOWN",
        }
    }

    /// 获取错误代码的类别
    pub fn category(&self) -> ErrorCategory {
        match self.as_u32() {
            1000..=1999 => ErrorCategory::Lookup,
            2000..=2999 => ErrorCategory::Availability,
            3000..=3999 => ErrorCategory::Protection,
            4000..=4999 => ErrorCategory::Validation,
            _ => ErrorCategory::Lifecycle,
        }
    }

    /// 判断调用方是否可以稍后重试
    ///
    /// 熔断打开同样可以稍后重试，但调用方应当等待冷却时间结束
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::RegistryUnavailable | ErrorCode::CircuitOpen)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Lookup,
    Availability,
    Protection,
    Validation,
    Lifecycle,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Lookup => write!(f, "LOOKUP"),
            ErrorCategory::Availability => write!(f, "AVAILABILITY"),
            ErrorCategory::Protection => write!(f, "PROTECTION"),
            ErrorCategory::Validation => write!(f, "VALIDATION"),
            ErrorCategory::Lifecycle => write!(f, "LIFECYCLE"),
        }
    }
}
