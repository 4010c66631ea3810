//! 插件内部的调用统计记录
//!
//! 每个插件持有一个记录器，统计只来源于该插件自身的调用历史。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::Utc;

use collector_domain::{PluginHealthStatus, PluginLifecycleState, PluginStatistics};

#[derive(Default)]
struct StatsInner {
    total: u64,
    success: u64,
    failure: u64,
    total_response_ms: u64,
    min_response_ms: Option<u64>,
    max_response_ms: Option<u64>,
    last_collection_time: Option<chrono::DateTime<Utc>>,
}

/// 采集调用计数器，线程安全
pub struct StatsRecorder {
    plugin_type: String,
    initialized: AtomicBool,
    inner: Mutex<StatsInner>,
}

impl StatsRecorder {
    pub fn new(plugin_type: impl Into<String>) -> Self {
        Self {
            plugin_type: plugin_type.into(),
            initialized: AtomicBool::new(false),
            inner: Mutex::new(StatsInner::default()),
        }
    }

    pub fn mark_initialized(&self, value: bool) {
        self.initialized.store(value, Ordering::SeqCst);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn record(&self, success: bool, response_time_ms: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.total += 1;
        if success {
            inner.success += 1;
        } else {
            inner.failure += 1;
        }
        inner.total_response_ms += response_time_ms;
        inner.min_response_ms = Some(match inner.min_response_ms {
            Some(min) => min.min(response_time_ms),
            None => response_time_ms,
        });
        inner.max_response_ms = Some(match inner.max_response_ms {
            Some(max) => max.max(response_time_ms),
            None => response_time_ms,
        });
        inner.last_collection_time = Some(Utc::now());
    }

    pub fn snapshot(&self) -> PluginStatistics {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        PluginStatistics {
            plugin_type: self.plugin_type.clone(),
            total_collections: inner.total,
            success_count: inner.success,
            failure_count: inner.failure,
            avg_response_time_ms: if inner.total == 0 {
                0.0
            } else {
                inner.total_response_ms as f64 / inner.total as f64
            },
            min_response_time_ms: inner.min_response_ms,
            max_response_time_ms: inner.max_response_ms,
            last_collection_time: inner.last_collection_time,
        }
    }

    /// 未初始化即不健康；有足够样本后成功率低于50%也视为不健康
    pub fn health_status(&self) -> PluginHealthStatus {
        let stats = self.snapshot();
        let initialized = self.is_initialized();
        let degraded = stats.total_collections >= 10 && stats.success_rate() < 50.0;
        let (healthy, state, message) = if !initialized {
            (
                false,
                PluginLifecycleState::Uninitialized,
                "插件未初始化".to_string(),
            )
        } else if degraded {
            (
                false,
                PluginLifecycleState::Ready,
                format!("成功率过低: {:.1}%", stats.success_rate()),
            )
        } else {
            (true, PluginLifecycleState::Ready, "正常".to_string())
        };
        PluginHealthStatus {
            plugin_type: self.plugin_type.clone(),
            healthy,
            state,
            message,
            checked_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let recorder = StatsRecorder::new("http-collector");
        recorder.record(true, 100);
        recorder.record(false, 300);
        let stats = recorder.snapshot();
        assert_eq!(stats.total_collections, 2);
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.failure_count, 1);
        assert_eq!(stats.avg_response_time_ms, 200.0);
        assert_eq!(stats.min_response_time_ms, Some(100));
        assert_eq!(stats.max_response_time_ms, Some(300));
        assert_eq!(stats.success_rate(), 50.0);
    }

    #[test]
    fn test_health_uninitialized() {
        let recorder = StatsRecorder::new("http-collector");
        let health = recorder.health_status();
        assert!(!health.healthy);
        assert_eq!(health.state, PluginLifecycleState::Uninitialized);
    }

    #[test]
    fn test_health_degraded_after_failures() {
        let recorder = StatsRecorder::new("snmp-collector");
        recorder.mark_initialized(true);
        for _ in 0..10 {
            recorder.record(false, 50);
        }
        let health = recorder.health_status();
        assert!(!health.healthy);
        assert!(health.message.contains("成功率"));
    }
}
