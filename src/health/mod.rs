//! 健康探测模块

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// 注册中心返回的健康检查结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub healthy: bool,
    #[serde(default)]
    pub latency_ms: u64,
    pub checked_at: DateTime<Utc>,
}

/// 健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Unknown,
    Serving,
    NotServing,
}

impl From<&HealthReport> for HealthStatus {
    fn from(report: &HealthReport) -> Self {
        if report.healthy {
            HealthStatus::Serving
        } else {
            HealthStatus::NotServing
        }
    }
}

/// 最近一次探测结果的记录表
#[derive(Clone)]
pub struct HealthService {
    reports: Arc<RwLock<HashMap<String, HealthReport>>>,
}

impl HealthService {
    pub fn new() -> Self {
        Self {
            reports: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 记录探测结果，忽略比已有结果更旧的报告
    pub async fn record(&self, service: impl Into<String>, report: HealthReport) {
        let mut reports = self.reports.write().await;
        let service = service.into();
        match reports.get(&service) {
            Some(existing) if existing.checked_at > report.checked_at => {}
            _ => {
                reports.insert(service, report);
            }
        }
    }

    pub async fn get_status(&self, service: &str) -> HealthStatus {
        let reports = self.reports.read().await;
        reports
            .get(service)
            .map(HealthStatus::from)
            .unwrap_or(HealthStatus::Unknown)
    }

    pub async fn last_report(&self, service: &str) -> Option<HealthReport> {
        let reports = self.reports.read().await;
        reports.get(service).cloned()
    }

    pub async fn forget(&self, service: &str) {
        let mut reports = self.reports.write().await;
        reports.remove(service);
    }
}

impl Default for HealthService {
    fn default() -> Self {
        Self::new()
    }
}
