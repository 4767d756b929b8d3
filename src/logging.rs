//! 日志初始化

use tracing_subscriber::EnvFilter;

/// 日志输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// 安装全局 tracing 订阅者
///
/// `RUST_LOG` 优先，未设置时使用 `default_directive`（如 `"flare_registry_client=info"`）。
/// 已经安装过订阅者时返回 `false`，不会 panic。
pub fn init_logging(default_directive: &str) -> bool {
    init_logging_with_format(default_directive, LogFormat::Pretty)
}

pub fn init_logging_with_format(default_directive: &str, format: LogFormat) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    match format {
        LogFormat::Pretty => builder.try_init().is_ok(),
        LogFormat::Json => builder.json().try_init().is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_logging("debug");
        assert!(!init_logging("debug"));
    }
}
