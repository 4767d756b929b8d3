//! 区域故障转移选择器
//!
//! 从同一服务名的多个副本中选出一个返回给调用方：
//! 1. 首选区域内的健康副本
//! 2. 任意区域的健康副本（按 `updated_at` 取最新）
//! 3. 最新的副本，不论健康状态，标记为降级
//!
//! 选择结果不单独缓存，每次缓存刷新或 watch 更新后都会在新的记录集上重新计算。

use crate::discovery::record::ServiceRecord;

/// 选择结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection<'a> {
    pub record: &'a ServiceRecord,
    /// 没有健康副本可用
    pub degraded: bool,
}

/// 区域选择器
#[derive(Debug, Clone, Default)]
pub struct RegionSelector {
    preferred_region: Option<String>,
}

impl RegionSelector {
    /// 创建新的选择器
    pub fn new(preferred_region: Option<String>) -> Self {
        Self {
            preferred_region: preferred_region.filter(|r| !r.is_empty()),
        }
    }

    pub fn preferred_region(&self) -> Option<&str> {
        self.preferred_region.as_deref()
    }

    /// 选择副本
    ///
    /// `region_override` 优先于构造时的首选区域
    pub fn select<'a>(
        &self,
        records: &'a [ServiceRecord],
        region_override: Option<&str>,
    ) -> Option<Selection<'a>> {
        let preferred = region_override.or(self.preferred_region.as_deref());

        if let Some(region) = preferred {
            let local = newest(records.iter().filter(|r| r.healthy && r.in_region(region)));
            if let Some(record) = local {
                return Some(Selection {
                    record,
                    degraded: false,
                });
            }
        }

        if let Some(record) = newest(records.iter().filter(|r| r.healthy)) {
            return Some(Selection {
                record,
                degraded: false,
            });
        }

        newest(records.iter()).map(|record| Selection {
            record,
            degraded: true,
        })
    }
}

fn newest<'a>(records: impl Iterator<Item = &'a ServiceRecord>) -> Option<&'a ServiceRecord> {
    records.max_by_key(|r| r.updated_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(url: &str, region: &str, healthy: bool, secs: i64) -> ServiceRecord {
        ServiceRecord::new("orders", url, Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap())
            .with_region(region)
            .with_health(healthy)
    }

    #[test]
    fn test_prefers_healthy_local_region() {
        let records = vec![
            record("http://east", "us-east-1", true, 10),
            record("http://west", "us-west-2", true, 1),
        ];
        let selector = RegionSelector::new(Some("us-west-2".into()));
        let selection = selector.select(&records, None).unwrap();
        assert_eq!(selection.record.url, "http://west");
        assert!(!selection.degraded);
    }

    #[test]
    fn test_falls_back_to_newest_healthy() {
        let records = vec![
            record("http://east-a", "us-east-1", true, 1),
            record("http://east-b", "us-east-1", true, 5),
            record("http://west", "us-west-2", false, 9),
        ];
        let selector = RegionSelector::new(Some("us-west-2".into()));
        let selection = selector.select(&records, None).unwrap();
        assert_eq!(selection.record.url, "http://east-b");
        assert!(!selection.degraded);
    }

    #[test]
    fn test_all_unhealthy_is_degraded() {
        let records = vec![
            record("http://a", "us-east-1", false, 3),
            record("http://b", "us-west-2", false, 7),
        ];
        let selector = RegionSelector::new(None);
        let selection = selector.select(&records, None).unwrap();
        assert_eq!(selection.record.url, "http://b");
        assert!(selection.degraded);
    }

    #[test]
    fn test_region_override() {
        let records = vec![
            record("http://east", "us-east-1", true, 1),
            record("http://west", "us-west-2", true, 2),
        ];
        let selector = RegionSelector::new(Some("us-west-2".into()));
        let selection = selector.select(&records, Some("us-east-1")).unwrap();
        assert_eq!(selection.record.url, "http://east");
    }

    #[test]
    fn test_empty() {
        assert!(RegionSelector::default().select(&[], None).is_none());
    }
}
