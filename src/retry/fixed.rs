use super::RetryPolicy;
use crate::transport::TransportError;
use std::time::Duration;

/// 固定延迟重试策略
#[derive(Debug, Clone)]
pub struct FixedRetryPolicy {
    max_retries: usize,
    delay: Duration,
}

impl FixedRetryPolicy {
    pub fn new(max_retries: usize, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// 不重试
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }
}

impl RetryPolicy for FixedRetryPolicy {
    fn should_retry(&self, attempt: usize, error: &TransportError) -> bool {
        if attempt > self.max_retries {
            return false;
        }

        // 只对瞬时错误进行重试
        error.is_transient()
    }

    fn backoff_duration(&self, _attempt: usize) -> Duration {
        self.delay
    }

    fn max_retries(&self) -> usize {
        self.max_retries
    }
}
