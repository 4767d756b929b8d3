//! 服务发现选项与结果

use std::collections::BTreeSet;

use crate::discovery::record::ServiceRecord;

/// 单次 discover 调用的选项
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoverOptions {
    /// 标签过滤器（记录必须包含全部标签）
    pub tags: BTreeSet<String>,

    /// 覆盖客户端配置的首选区域
    pub region: Option<String>,
}

impl DiscoverOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加标签过滤
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// 设置首选区域
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }
}

/// 结果的新鲜度来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// 命中新鲜缓存，没有网络调用
    Cached,
    /// 刚从注册中心拉取
    Refreshed,
    /// 注册中心不可用，返回过期缓存
    Stale,
}

/// discover 的返回结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// 选中的服务记录
    pub record: ServiceRecord,

    /// 是否为降级读取（过期缓存，或所有副本都不健康）
    pub degraded: bool,

    /// 结果来源
    pub freshness: Freshness,
}

impl Resolution {
    pub fn url(&self) -> &str {
        &self.record.url
    }
}
