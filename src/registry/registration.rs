//! 注册载荷定义与校验

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::error::{DiscoveryError, Result};

/// 服务注册载荷
///
/// 发送到注册中心前必须通过 [`Registration::validate`]，不合法的载荷不会产生任何网络请求。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    /// 服务名
    pub name: String,

    /// 端点地址（绝对 http/https URL）
    pub url: String,

    /// 健康检查路径（以 `/` 开头）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_path: Option<String>,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub region: String,

    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// 存活时间（秒），超过该时间未续期的注册会被注册中心删除
    pub ttl: u64,
}

impl Registration {
    pub fn new(name: impl Into<String>, url: impl Into<String>, ttl: Duration) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            health_path: None,
            version: String::new(),
            region: String::new(),
            tags: BTreeSet::new(),
            ttl: ttl.as_secs(),
        }
    }

    pub fn with_health_path(mut self, path: impl Into<String>) -> Self {
        self.health_path = Some(path.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl)
    }

    /// 续期间隔：TTL 的三分之一，保证一次续期失败后仍有机会在过期前恢复
    pub fn renewal_interval(&self) -> Duration {
        (self.ttl() / 3).max(Duration::from_millis(100))
    }

    /// 校验注册载荷
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DiscoveryError::validation("service name must not be empty"));
        }
        if self.name.contains('/') {
            return Err(DiscoveryError::validation(format!(
                "service name '{}' must not contain '/'",
                self.name
            )));
        }

        let url = Url::parse(&self.url).map_err(|e| {
            DiscoveryError::validation(format!("invalid url '{}': {}", self.url, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DiscoveryError::validation(format!(
                "url '{}' must use http or https",
                self.url
            )));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(DiscoveryError::validation(format!(
                "url '{}' has no host",
                self.url
            )));
        }

        if self.ttl == 0 {
            return Err(DiscoveryError::validation("ttl must be positive"));
        }

        if let Some(path) = &self.health_path
            && !path.starts_with('/')
        {
            return Err(DiscoveryError::validation(format!(
                "health path '{}' must start with '/'",
                path
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration() -> Registration {
        Registration::new("orders", "http://10.0.0.5:8080", Duration::from_secs(30))
            .with_health_path("/healthz")
    }

    #[test]
    fn test_valid_registration() {
        assert!(registration().validate().is_ok());
        assert_eq!(registration().renewal_interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_rejects_bad_payloads() {
        let cases = vec![
            Registration {
                name: "".into(),
                ..registration()
            },
            Registration {
                name: "a/b".into(),
                ..registration()
            },
            Registration {
                url: "not a url".into(),
                ..registration()
            },
            Registration {
                url: "ftp://host/x".into(),
                ..registration()
            },
            Registration {
                ttl: 0,
                ..registration()
            },
            Registration {
                health_path: Some("healthz".into()),
                ..registration()
            },
        ];
        for case in cases {
            let err = case.validate().unwrap_err();
            assert!(matches!(err, DiscoveryError::Validation(_)), "{:?}", case);
        }
    }

    #[test]
    fn test_serializes_camel_case() {
        let json = serde_json::to_value(registration()).unwrap();
        assert_eq!(json["healthPath"], "/healthz");
        assert_eq!(json["ttl"], 30);
    }
}
