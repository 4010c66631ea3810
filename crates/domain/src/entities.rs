use chrono::{DateTime, NaiveDate, Utc};
use collector_errors::CollectError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// 设备类型
///
/// code用于默认指标生成（camera/sensor/controller等），
/// protocols是插件选择的依据。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceType {
    pub code: String,
    pub name: String,
    pub protocols: Vec<String>,
}

impl DeviceType {
    pub fn new(code: impl Into<String>, name: impl Into<String>, protocols: Vec<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            protocols,
        }
    }

    pub fn supports_protocol(&self, protocol: &str) -> bool {
        self.protocols.iter().any(|p| p.eq_ignore_ascii_case(protocol))
    }
}

/// 采集目标设备
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub location: Option<String>,
    pub device_type: DeviceType,
    /// 优先使用的插件类型，未配置时由引擎按协议匹配
    pub preferred_plugin_type: Option<String>,
}

impl Device {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
        device_type: DeviceType,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
            port,
            location: None,
            device_type,
            preferred_plugin_type: None,
        }
    }
}

/// 指标值的声明类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MetricDataType {
    #[serde(rename = "GAUGE")]
    Gauge,
    #[serde(rename = "COUNTER")]
    Counter,
    #[serde(rename = "BOOLEAN")]
    Boolean,
    #[serde(rename = "STRING")]
    String,
}

/// 单个指标的采集配置，一次采集调用期间不可变
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricConfig {
    pub name: String,
    /// 插件内的解析方式，如 json_path / system_info
    pub metric_type: String,
    /// 协议相关参数
    pub parameters: Map<String, Value>,
    pub unit: Option<String>,
    pub data_type: MetricDataType,
    pub timeout_ms: u64,
    pub interval_secs: u64,
    /// 1为最高优先级
    pub priority: u8,
    pub enabled: bool,
}

impl MetricConfig {
    pub fn new(name: impl Into<String>, metric_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metric_type: metric_type.into(),
            parameters: Map::new(),
            unit: None,
            data_type: MetricDataType::Gauge,
            timeout_ms: 5000,
            interval_secs: 300,
            priority: 2,
            enabled: true,
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(|v| v.as_str())
    }

    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.parameters.get(key).and_then(|v| v.as_u64())
    }
}

/// 一次采集调用的上下文，随调用创建，从不持久化
#[derive(Debug, Clone)]
pub struct CollectionContext {
    pub session_id: String,
    pub task_id: Option<String>,
    /// 凭据解析服务返回的明文参数
    pub credentials: Map<String, Value>,
    pub test_only: bool,
}

impl CollectionContext {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            task_id: None,
            credentials: Map::new(),
            test_only: false,
        }
    }

    pub fn for_task(task_id: impl Into<String>) -> Self {
        Self {
            task_id: Some(task_id.into()),
            ..Self::new()
        }
    }

    pub fn test_context() -> Self {
        Self {
            test_only: true,
            ..Self::new()
        }
    }

    pub fn with_credentials(mut self, credentials: Map<String, Value>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn credential_str(&self, key: &str) -> Option<&str> {
        self.credentials.get(key).and_then(|v| v.as_str())
    }
}

impl Default for CollectionContext {
    fn default() -> Self {
        Self::new()
    }
}

/// 一次(设备,指标,尝试)的采集结果
///
/// 采集调用从不抛出异常，失败同样以结果对象返回。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionResult {
    pub success: bool,
    pub metrics: Map<String, Value>,
    pub error_code: Option<CollectError>,
    pub error_message: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// 0-100的质量评分
    pub quality_score: u8,
    pub plugin_type: String,
    pub device_id: String,
    pub metric_name: String,
    pub session_id: String,
}

impl CollectionResult {
    pub fn success(
        plugin_type: impl Into<String>,
        device_id: impl Into<String>,
        metric_name: impl Into<String>,
        session_id: impl Into<String>,
        start_time: DateTime<Utc>,
        metrics: Map<String, Value>,
        quality_score: u8,
    ) -> Self {
        Self {
            success: true,
            metrics,
            error_code: None,
            error_message: None,
            start_time,
            end_time: Utc::now(),
            quality_score,
            plugin_type: plugin_type.into(),
            device_id: device_id.into(),
            metric_name: metric_name.into(),
            session_id: session_id.into(),
        }
    }

    pub fn failure(
        plugin_type: impl Into<String>,
        device_id: impl Into<String>,
        metric_name: impl Into<String>,
        session_id: impl Into<String>,
        start_time: DateTime<Utc>,
        error_code: CollectError,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            metrics: Map::new(),
            error_code: Some(error_code),
            error_message: Some(error_message.into()),
            start_time,
            end_time: Utc::now(),
            quality_score: 0,
            plugin_type: plugin_type.into(),
            device_id: device_id.into(),
            metric_name: metric_name.into(),
            session_id: session_id.into(),
        }
    }

    pub fn response_time_ms(&self) -> i64 {
        (self.end_time - self.start_time).num_milliseconds()
    }
}

/// 调度类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ScheduleType {
    #[serde(rename = "SIMPLE")]
    Simple,
    #[serde(rename = "CRON")]
    Cron,
    #[serde(rename = "EVENT")]
    Event,
}

/// 任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskStatus {
    #[serde(rename = "ENABLED")]
    Enabled,
    #[serde(rename = "PAUSED")]
    Paused,
    #[serde(rename = "DISABLED")]
    Disabled,
}

/// 设备×指标级别的重试策略，不作用于整个任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub enable_retry: bool,
    pub retry_times: u32,
    pub retry_interval_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enable_retry: false,
            retry_times: 3,
            retry_interval_ms: 1000,
        }
    }
}

/// 采集任务定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionTask {
    pub id: String,
    /// 全局唯一
    pub name: String,
    pub description: Option<String>,
    pub schedule_type: ScheduleType,
    /// 原样存储的调度参数（frequency/interval 或 cron表达式等）
    pub schedule_config: Map<String, Value>,
    pub device_ids: Vec<String>,
    pub metric_configs: Vec<MetricConfig>,
    pub status: TaskStatus,
    pub deleted: bool,
    pub retry_policy: RetryPolicy,
    pub timeout_ms: u64,
    pub max_concurrency: usize,
    pub execution_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub avg_execution_time_ms: f64,
    pub last_execution_time: Option<DateTime<Utc>>,
    pub next_execution_time: Option<DateTime<Utc>>,
    pub max_executions: Option<u64>,
    pub expire_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CollectionTask {
    pub fn new(
        name: impl Into<String>,
        schedule_type: ScheduleType,
        schedule_config: Map<String, Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: None,
            schedule_type,
            schedule_config,
            device_ids: Vec::new(),
            metric_configs: Vec::new(),
            status: TaskStatus::Enabled,
            deleted: false,
            retry_policy: RetryPolicy::default(),
            timeout_ms: 30_000,
            max_concurrency: 4,
            execution_count: 0,
            success_count: 0,
            failure_count: 0,
            avg_execution_time_ms: 0.0,
            last_execution_time: None,
            next_execution_time: None,
            max_executions: None,
            expire_time: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.deleted && matches!(self.status, TaskStatus::Enabled)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_time.is_some_and(|t| t < now)
    }

    pub fn reached_max_executions(&self) -> bool {
        self.max_executions
            .is_some_and(|max| self.execution_count >= max)
    }

    /// 记录一次执行，均值采用累计平均而非 (旧值+新值)/2
    pub fn record_execution(&mut self, success: bool, execution_time_ms: u64, now: DateTime<Utc>) {
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        let n = self.execution_count.max(1) as f64;
        self.avg_execution_time_ms += (execution_time_ms as f64 - self.avg_execution_time_ms) / n;
        self.last_execution_time = Some(now);
        self.updated_at = now;
    }

    pub fn enabled_metrics(&self) -> impl Iterator<Item = &MetricConfig> {
        self.metric_configs.iter().filter(|m| m.enabled)
    }

    pub fn entity_description(&self) -> String {
        format!(
            "采集任务 '{}' (ID: {}, 调度: {:?})",
            self.name, self.id, self.schedule_type
        )
    }
}

/// 执行日志状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExecutionStatus {
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
}

/// 执行日志，只追加，按时间清理
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionLog {
    pub id: String,
    pub task_id: String,
    pub execution_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub success: bool,
    pub error_code: Option<CollectError>,
    pub error_message: Option<String>,
    pub response_time_ms: Option<i64>,
    pub data_count: u64,
    /// 每个指标成功/失败次数的JSON序列化
    pub result_summary: Option<String>,
}

impl CollectionLog {
    pub fn start(task_id: impl Into<String>, execution_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            execution_id: execution_id.into(),
            start_time: Utc::now(),
            end_time: None,
            status: ExecutionStatus::Running,
            success: false,
            error_code: None,
            error_message: None,
            response_time_ms: None,
            data_count: 0,
            result_summary: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self.status, ExecutionStatus::Running)
    }
}

/// 按任务按自然日的执行统计
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatistics {
    pub task_id: String,
    pub stat_date: NaiveDate,
    pub execution_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub total_execution_time_ms: u64,
    pub avg_execution_time_ms: f64,
    pub success_rate: f64,
}

impl TaskStatistics {
    pub fn new(task_id: impl Into<String>, stat_date: NaiveDate) -> Self {
        Self {
            task_id: task_id.into(),
            stat_date,
            execution_count: 0,
            success_count: 0,
            failure_count: 0,
            total_execution_time_ms: 0,
            avg_execution_time_ms: 0.0,
            success_rate: 0.0,
        }
    }

    pub fn record(&mut self, success: bool, execution_time_ms: u64) {
        self.execution_count += 1;
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.total_execution_time_ms += execution_time_ms;
        self.avg_execution_time_ms =
            self.total_execution_time_ms as f64 / self.execution_count as f64;
        self.success_rate = self.success_count as f64 / self.execution_count as f64 * 100.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_record_execution_cumulative_average() {
        let mut task = CollectionTask::new("t", ScheduleType::Simple, Map::new());
        let now = Utc::now();
        task.execution_count = 1;
        task.record_execution(true, 100, now);
        assert_eq!(task.avg_execution_time_ms, 100.0);
        task.execution_count = 2;
        task.record_execution(true, 200, now);
        assert_eq!(task.avg_execution_time_ms, 150.0);
        task.execution_count = 3;
        task.record_execution(false, 300, now);
        assert_eq!(task.avg_execution_time_ms, 200.0);
        assert_eq!(task.success_count, 2);
        assert_eq!(task.failure_count, 1);
    }

    #[test]
    fn test_task_expiry_and_max_executions() {
        let mut task = CollectionTask::new("t", ScheduleType::Simple, Map::new());
        let now = Utc::now();
        assert!(!task.is_expired(now));
        task.expire_time = Some(now - chrono::Duration::seconds(1));
        assert!(task.is_expired(now));

        task.max_executions = Some(2);
        task.execution_count = 1;
        assert!(!task.reached_max_executions());
        task.execution_count = 2;
        assert!(task.reached_max_executions());
    }

    #[test]
    fn test_statistics_rollup() {
        let mut stats = TaskStatistics::new("t1", Utc::now().date_naive());
        stats.record(true, 100);
        stats.record(false, 300);
        assert_eq!(stats.execution_count, 2);
        assert_eq!(stats.avg_execution_time_ms, 200.0);
        assert_eq!(stats.success_rate, 50.0);
    }

    #[test]
    fn test_schedule_type_serialization() {
        assert_eq!(
            serde_json::to_string(&ScheduleType::Simple).unwrap(),
            "\"SIMPLE\""
        );
        assert_eq!(
            serde_json::to_string(&ExecutionStatus::Failed).unwrap(),
            "\"FAILED\""
        );
    }

    #[test]
    fn test_device_type_protocol_match() {
        let dt = DeviceType::new("camera", "网络摄像机", vec!["HTTP".into(), "ONVIF".into()]);
        assert!(dt.supports_protocol("http"));
        assert!(!dt.supports_protocol("snmp"));
    }
}
