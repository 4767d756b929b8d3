//! 服务记录定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// 服务记录
///
/// 某个服务端点在某一时刻的不可变快照。同一服务名下的记录按 `updated_at` 排序，
/// 时间戳由注册中心分配，客户端永远不会用更旧的记录覆盖更新的记录。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRecord {
    /// 服务名（查找键）
    pub name: String,

    /// 端点地址（绝对 URL），同时作为副本的身份标识
    pub url: String,

    /// 区域（如 "us-east-1"）
    #[serde(default)]
    pub region: String,

    /// 版本（不透明字符串）
    #[serde(default)]
    pub version: String,

    /// 是否健康
    #[serde(default = "default_healthy")]
    pub healthy: bool,

    /// 标签
    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// 注册中心分配的更新时间
    pub updated_at: DateTime<Utc>,
}

fn default_healthy() -> bool {
    true
}

impl ServiceRecord {
    /// 创建新的服务记录
    pub fn new(name: impl Into<String>, url: impl Into<String>, updated_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            region: String::new(),
            version: String::new(),
            healthy: true,
            tags: BTreeSet::new(),
            updated_at,
        }
    }

    /// 设置区域
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// 设置版本
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// 添加标签
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// 设置健康状态
    pub fn with_health(mut self, healthy: bool) -> Self {
        self.healthy = healthy;
        self
    }

    /// 检查是否包含全部请求的标签
    pub fn matches_tags(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.tags)
    }

    /// 检查是否位于指定区域
    pub fn in_region(&self, region: &str) -> bool {
        self.region == region
    }

    /// 是否比另一条记录更新
    pub fn is_newer_than(&self, other: &ServiceRecord) -> bool {
        self.updated_at > other.updated_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_matches_tags_requires_every_tag() {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let record = ServiceRecord::new("orders", "http://10.0.0.1:9001", at)
            .with_tag("grpc")
            .with_tag("v2");

        let mut wanted = BTreeSet::new();
        assert!(record.matches_tags(&wanted));
        wanted.insert("grpc".to_string());
        assert!(record.matches_tags(&wanted));
        wanted.insert("canary".to_string());
        assert!(!record.matches_tags(&wanted));
    }

    #[test]
    fn test_deserialize_registry_shape() {
        let json = r#"{
            "name": "orders",
            "url": "http://localhost:9001",
            "region": "us-west-2",
            "version": "1.4.0",
            "healthy": false,
            "tags": ["grpc"],
            "updatedAt": "2024-05-01T10:00:00Z"
        }"#;
        let record: ServiceRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.region, "us-west-2");
        assert!(!record.healthy);
        assert!(record.tags.contains("grpc"));
    }
}
