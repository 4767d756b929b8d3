//! 错误类型转换实现

use super::DiscoveryError;
use std::io;

impl From<io::Error> for DiscoveryError {
    fn from(err: io::Error) -> Self {
        DiscoveryError::Config(format!("IO 错误: {}", err))
    }
}

impl From<toml::de::Error> for DiscoveryError {
    fn from(err: toml::de::Error) -> Self {
        DiscoveryError::Config(format!("TOML 解析错误: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_io_error_maps_to_config() {
        let err: DiscoveryError = io::Error::new(io::ErrorKind::NotFound, "missing").into();
        assert_eq!(err.code(), ErrorCode::ConfigurationError);
        assert!(err.to_string().contains("missing"));
    }
}
