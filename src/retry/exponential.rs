use super::RetryPolicy;
use crate::transport::TransportError;
use rand::Rng;
use std::time::Duration;

/// 抖动方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    /// 不加抖动（测试中使用，保证延迟可预期）
    None,
    /// 乘以 [0.5, 1.5] 区间内的均匀随机因子，避免大量客户端同步重试
    #[default]
    Uniform,
}

/// 指数退避重试策略
///
/// 第 k 次重试的延迟 = `min(max_delay, base_delay * 2^(k-1)) * jitter`
#[derive(Debug, Clone)]
pub struct ExponentialBackoffPolicy {
    max_retries: usize,
    base_delay: Duration,
    max_delay: Duration,
    jitter: Jitter,
}

impl ExponentialBackoffPolicy {
    pub fn new(max_retries: usize, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            jitter: Jitter::Uniform,
        }
    }

    /// 设置抖动方式
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// 未加抖动的延迟上限
    fn capped_delay(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20) as u32;
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

impl RetryPolicy for ExponentialBackoffPolicy {
    fn should_retry(&self, attempt: usize, error: &TransportError) -> bool {
        if attempt > self.max_retries {
            return false;
        }

        // 只对瞬时错误进行重试
        error.is_transient()
    }

    fn backoff_duration(&self, attempt: usize) -> Duration {
        let delay = self.capped_delay(attempt);
        match self.jitter {
            Jitter::None => delay,
            Jitter::Uniform => {
                let factor = rand::thread_rng().gen_range(0.5..=1.5);
                delay.mul_f64(factor)
            }
        }
    }

    fn max_retries(&self) -> usize {
        self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_until_cap() {
        let policy =
            ExponentialBackoffPolicy::new(10, Duration::from_millis(100), Duration::from_secs(1))
                .with_jitter(Jitter::None);
        assert_eq!(policy.backoff_duration(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_duration(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_duration(4), Duration::from_millis(800));
        assert_eq!(policy.backoff_duration(5), Duration::from_secs(1));
        assert_eq!(policy.backoff_duration(60), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy =
            ExponentialBackoffPolicy::new(3, Duration::from_millis(100), Duration::from_secs(5));
        for _ in 0..200 {
            let delay = policy.backoff_duration(2);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(300));
        }
    }

    #[test]
    fn test_only_transient_errors_retried() {
        let policy =
            ExponentialBackoffPolicy::new(3, Duration::from_millis(10), Duration::from_secs(1));
        assert!(policy.should_retry(1, &TransportError::Status(503)));
        assert!(!policy.should_retry(1, &TransportError::NotFound));
        assert!(!policy.should_retry(4, &TransportError::Timeout));
    }
}
