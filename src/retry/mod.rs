//! 重试策略模块
//!
//! 策略对象只负责回答"是否重试"和"等待多久"，真正的重试循环在注册中心网关中执行，
//! 因此可以注入任意实现并在测试中独立验证。

pub mod exponential;
pub mod fixed;

pub use exponential::{ExponentialBackoffPolicy, Jitter};
pub use fixed::FixedRetryPolicy;

use std::fmt;
use std::time::Duration;

use crate::transport::TransportError;

/// 重试策略 trait
///
/// `attempt` 为已经失败的次数（从 1 开始）
pub trait RetryPolicy: Send + Sync + fmt::Debug {
    fn should_retry(&self, attempt: usize, error: &TransportError) -> bool;
    fn backoff_duration(&self, attempt: usize) -> Duration;
    fn max_retries(&self) -> usize;
}
