//! 引擎级统计聚合
//!
//! 与插件自身的统计相互独立：这里记录的是经过引擎调度的调用。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use collector_domain::PluginHealthStatus;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginAggregate {
    pub plugin_type: String,
    pub executions: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub total_time_ms: u64,
    pub min_time_ms: Option<u64>,
    pub max_time_ms: Option<u64>,
}

impl PluginAggregate {
    pub fn success_rate(&self) -> f64 {
        if self.executions == 0 {
            100.0
        } else {
            self.success_count as f64 / self.executions as f64 * 100.0
        }
    }

    pub fn avg_time_ms(&self) -> f64 {
        if self.executions == 0 {
            0.0
        } else {
            self.total_time_ms as f64 / self.executions as f64
        }
    }
}

/// 引擎统计快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatistics {
    pub total_collections: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub success_rate: f64,
    pub active_collections: u64,
    pub per_plugin: Vec<PluginAggregate>,
    pub generated_at: DateTime<Utc>,
}

/// 健康检查汇总
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineHealthReport {
    pub healthy: bool,
    pub issues: Vec<String>,
    pub plugin_health: Vec<PluginHealthStatus>,
    pub checked_at: DateTime<Utc>,
}

/// 性能排名条目，按成功率降序、平均耗时升序
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginPerformance {
    pub plugin_type: String,
    pub success_rate: f64,
    pub avg_time_ms: f64,
    pub executions: u64,
}

/// 引擎统计计数器
#[derive(Default)]
pub struct EngineStats {
    total: AtomicU64,
    success: AtomicU64,
    failure: AtomicU64,
    active: AtomicU64,
    per_plugin: Mutex<HashMap<String, PluginAggregate>>,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collection_started(&self) {
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record(&self, plugin_type: &str, success: bool, elapsed_ms: u64) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
        if success {
            self.success.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failure.fetch_add(1, Ordering::SeqCst);
        }

        let mut per_plugin = self.per_plugin.lock().unwrap_or_else(|e| e.into_inner());
        let entry = per_plugin
            .entry(plugin_type.to_string())
            .or_insert_with(|| PluginAggregate {
                plugin_type: plugin_type.to_string(),
                ..Default::default()
            });
        entry.executions += 1;
        if success {
            entry.success_count += 1;
        } else {
            entry.failure_count += 1;
        }
        entry.total_time_ms += elapsed_ms;
        entry.min_time_ms = Some(match entry.min_time_ms {
            Some(min) => min.min(elapsed_ms),
            None => elapsed_ms,
        });
        entry.max_time_ms = Some(match entry.max_time_ms {
            Some(max) => max.max(elapsed_ms),
            None => elapsed_ms,
        });
    }

    pub fn active_collections(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> EngineStatistics {
        let total = self.total.load(Ordering::SeqCst);
        let success = self.success.load(Ordering::SeqCst);
        let per_plugin = self
            .per_plugin
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        EngineStatistics {
            total_collections: total,
            success_count: success,
            failure_count: self.failure.load(Ordering::SeqCst),
            success_rate: if total == 0 {
                100.0
            } else {
                success as f64 / total as f64 * 100.0
            },
            active_collections: self.active.load(Ordering::SeqCst),
            per_plugin,
            generated_at: Utc::now(),
        }
    }

    /// 按成功率降序、平均耗时升序排名
    pub fn performance_ranking(&self) -> Vec<PluginPerformance> {
        let mut ranking: Vec<PluginPerformance> = self
            .per_plugin
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|agg| PluginPerformance {
                plugin_type: agg.plugin_type.clone(),
                success_rate: agg.success_rate(),
                avg_time_ms: agg.avg_time_ms(),
                executions: agg.executions,
            })
            .collect();
        ranking.sort_by(|a, b| {
            b.success_rate
                .partial_cmp(&a.success_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    a.avg_time_ms
                        .partial_cmp(&b.avg_time_ms)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        });
        ranking
    }
}
