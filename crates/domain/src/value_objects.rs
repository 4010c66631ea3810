use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 插件生命周期状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PluginLifecycleState {
    #[serde(rename = "UNINITIALIZED")]
    Uninitialized,
    #[serde(rename = "READY")]
    Ready,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "STOPPED")]
    Stopped,
    #[serde(rename = "FAILED")]
    Failed,
}

impl PluginLifecycleState {
    /// READY与RUNNING状态可以接受采集调度
    pub fn is_dispatchable(&self) -> bool {
        matches!(self, Self::Ready | Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "UNINITIALIZED",
            Self::Ready => "READY",
            Self::Running => "RUNNING",
            Self::Stopped => "STOPPED",
            Self::Failed => "FAILED",
        }
    }
}

/// 单个插件的调用统计，只由该插件自身的调用历史推导
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PluginStatistics {
    pub plugin_type: String,
    pub total_collections: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub avg_response_time_ms: f64,
    pub min_response_time_ms: Option<u64>,
    pub max_response_time_ms: Option<u64>,
    pub last_collection_time: Option<DateTime<Utc>>,
}

impl PluginStatistics {
    pub fn success_rate(&self) -> f64 {
        if self.total_collections == 0 {
            // 没有调用历史时视为100%
            100.0
        } else {
            self.success_count as f64 / self.total_collections as f64 * 100.0
        }
    }
}

/// 插件健康状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginHealthStatus {
    pub plugin_type: String,
    pub healthy: bool,
    pub state: PluginLifecycleState,
    pub message: String,
    pub checked_at: DateTime<Utc>,
}

/// 连接测试结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionTestResult {
    pub success: bool,
    pub message: String,
    pub latency_ms: Option<u64>,
}

impl ConnectionTestResult {
    pub fn ok(message: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            success: true,
            message: message.into(),
            latency_ms: Some(latency_ms),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            latency_ms: None,
        }
    }
}

/// 指标探测返回的可用指标
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailableMetric {
    pub name: String,
    pub metric_type: String,
    pub description: Option<String>,
    /// 建议写入MetricConfig的参数
    pub suggested_parameters: serde_json::Map<String, Value>,
}

/// 配置校验错误级别，HIGH级别阻止任务创建
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ValidationSeverity {
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "MEDIUM")]
    Medium,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
    pub severity: ValidationSeverity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigValidationWarning {
    pub field: String,
    pub message: String,
    pub suggested_value: Option<Value>,
}

/// 指标配置校验结果
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigValidationResult {
    pub valid: bool,
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationWarning>,
}

impl ConfigValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(
        &mut self,
        field: impl Into<String>,
        message: impl Into<String>,
        severity: ValidationSeverity,
    ) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
            severity,
        });
        self.valid = false;
    }

    pub fn add_warning(
        &mut self,
        field: impl Into<String>,
        message: impl Into<String>,
        suggested_value: Option<Value>,
    ) {
        self.warnings.push(ConfigValidationWarning {
            field: field.into(),
            message: message.into(),
            suggested_value,
        });
    }

    pub fn has_blocking_errors(&self) -> bool {
        self.errors
            .iter()
            .any(|e| e.severity == ValidationSeverity::High)
    }
}
