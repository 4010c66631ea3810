//! 采集任务服务（执行编排）
//!
//! 任务的CRUD、状态流转和一次完整执行的编排：
//! 取设备 → 解析凭据 → 逐个(设备,指标)调用引擎（带重试）→
//! 写执行日志 → 更新任务计数 → 累加当日统计。
//! 同一任务的执行通过任务级互斥锁串行化。

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use async_trait::async_trait;

use collector_domain::{
    CollectionContext, CollectionLog, CollectionTask, CredentialResolver, Device, DeviceDirectory,
    ExecutionStatus, LogRepository, MetricConfig, RetryPolicy, ScheduleType, StatisticsRepository,
    TaskRepository, TaskStatistics, TaskStatus,
};
use collector_engine::CollectorEngine;
use collector_errors::{CollectError, CollectorError, CollectorResult};

use crate::default_metrics::default_metrics_for;
use crate::schedule::validate_schedule_config;
use crate::scheduler::{TaskRunner, TaskScheduler};

/// 创建任务的输入
#[derive(Debug, Clone)]
pub struct NewTask {
    pub name: String,
    pub description: Option<String>,
    pub schedule_type: ScheduleType,
    pub schedule_config: Map<String, Value>,
    pub device_ids: Vec<String>,
    /// 为空时按设备类型生成默认指标集
    pub metric_configs: Vec<MetricConfig>,
    pub retry_policy: RetryPolicy,
    pub timeout_ms: u64,
    pub max_concurrency: usize,
    pub max_executions: Option<u64>,
    pub expire_time: Option<DateTime<Utc>>,
}

impl NewTask {
    pub fn new(
        name: impl Into<String>,
        schedule_type: ScheduleType,
        schedule_config: Map<String, Value>,
    ) -> Self {
        Self {
            name: name.into(),
            description: None,
            schedule_type,
            schedule_config,
            device_ids: Vec::new(),
            metric_configs: Vec::new(),
            retry_policy: RetryPolicy::default(),
            timeout_ms: 30_000,
            max_concurrency: 4,
            max_executions: None,
            expire_time: None,
        }
    }
}

/// 批量创建的结果，互相独立，单个失败不影响其它
#[derive(Debug, Default)]
pub struct BatchCreateResult {
    pub created: Vec<CollectionTask>,
    /// (任务名, 失败原因)
    pub failures: Vec<(String, String)>,
}

#[derive(Serialize, Deserialize)]
struct MetricOutcome {
    success: u64,
    failure: u64,
}

/// 采集任务服务
pub struct CollectionTaskService {
    tasks: Arc<dyn TaskRepository>,
    logs: Arc<dyn LogRepository>,
    statistics: Arc<dyn StatisticsRepository>,
    devices: Arc<dyn DeviceDirectory>,
    credentials: Arc<dyn CredentialResolver>,
    engine: Arc<CollectorEngine>,
    /// 装配阶段注入，未注入时任务照常保存只是不被排定
    scheduler: OnceLock<Arc<TaskScheduler>>,
    /// 任务级互斥锁，同一任务不并发执行
    run_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CollectionTaskService {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        logs: Arc<dyn LogRepository>,
        statistics: Arc<dyn StatisticsRepository>,
        devices: Arc<dyn DeviceDirectory>,
        credentials: Arc<dyn CredentialResolver>,
        engine: Arc<CollectorEngine>,
    ) -> Self {
        Self {
            tasks,
            logs,
            statistics,
            devices,
            credentials,
            engine,
            scheduler: OnceLock::new(),
            run_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_scheduler(&self, scheduler: Arc<TaskScheduler>) {
        if self.scheduler.set(scheduler).is_err() {
            warn!("调度器已注入，忽略重复设置");
        }
    }

    async fn schedule_if_wired(&self, task: &CollectionTask) {
        if let Some(scheduler) = self.scheduler.get() {
            if let Err(e) = scheduler.schedule_task(task).await {
                warn!(task_id = %task.id, error = %e, "排定任务失败");
            }
        }
    }

    async fn unschedule_if_wired(&self, task_id: &str) {
        if let Some(scheduler) = self.scheduler.get() {
            scheduler.unschedule(task_id).await;
        }
    }

    // ---- 任务CRUD ----

    /// 创建任务。名称全局唯一，指标为空时按设备类型生成默认集
    pub async fn create_task(&self, input: NewTask) -> CollectorResult<CollectionTask> {
        self.validate_input(&input, None).await?;

        let mut task = CollectionTask::new(
            input.name,
            input.schedule_type,
            input.schedule_config,
        );
        task.description = input.description;
        task.device_ids = input.device_ids;
        task.retry_policy = input.retry_policy;
        task.timeout_ms = input.timeout_ms;
        task.max_concurrency = input.max_concurrency;
        task.max_executions = input.max_executions;
        task.expire_time = input.expire_time;
        task.metric_configs = if input.metric_configs.is_empty() {
            self.generate_default_metrics(&task.device_ids).await?
        } else {
            input.metric_configs
        };

        let created = self.tasks.create(&task).await?;
        info!(task_id = %created.id, name = %created.name, "创建采集任务");
        self.schedule_if_wired(&created).await;
        Ok(created)
    }

    /// 批量创建，逐个提交，失败的条目不影响其它
    pub async fn batch_create(&self, inputs: Vec<NewTask>) -> BatchCreateResult {
        let mut result = BatchCreateResult::default();
        for input in inputs {
            let name = input.name.clone();
            match self.create_task(input).await {
                Ok(task) => result.created.push(task),
                Err(e) => result.failures.push((name, e.to_string())),
            }
        }
        result
    }

    pub async fn update_task(&self, task: CollectionTask) -> CollectorResult<CollectionTask> {
        let existing = self
            .tasks
            .find_by_id(&task.id)
            .await?
            .ok_or_else(|| CollectorError::task_not_found(&task.id))?;
        if task.name != existing.name {
            if let Some(other) = self.tasks.find_by_name(&task.name).await? {
                if other.id != task.id {
                    return Err(CollectorError::DuplicateTaskName { name: task.name });
                }
            }
        }
        validate_schedule_config(task.schedule_type, &task.schedule_config)?;
        self.validate_metrics(&task.metric_configs).await?;

        let mut task = task;
        task.updated_at = Utc::now();
        let updated = self.tasks.update(&task).await?;
        if updated.is_enabled() {
            self.schedule_if_wired(&updated).await;
        } else {
            self.unschedule_if_wired(&updated.id).await;
        }
        Ok(updated)
    }

    /// 软删除并移出调度
    pub async fn delete_task(&self, task_id: &str) -> CollectorResult<()> {
        if !self.tasks.delete(task_id).await? {
            return Err(CollectorError::task_not_found(task_id));
        }
        self.unschedule_if_wired(task_id).await;
        info!(task_id, "删除采集任务");
        Ok(())
    }

    pub async fn get_task(&self, task_id: &str) -> CollectorResult<CollectionTask> {
        self.tasks
            .find_by_id(task_id)
            .await?
            .ok_or_else(|| CollectorError::task_not_found(task_id))
    }

    pub async fn list_tasks(&self) -> CollectorResult<Vec<CollectionTask>> {
        self.tasks.find_all().await
    }

    // ---- 状态流转 ----

    async fn set_status(&self, task_id: &str, status: TaskStatus) -> CollectorResult<CollectionTask> {
        let mut task = self.get_task(task_id).await?;
        task.status = status;
        task.updated_at = Utc::now();
        let updated = self.tasks.update(&task).await?;
        info!(task_id, status = ?status, "任务状态变更");
        Ok(updated)
    }

    pub async fn enable_task(&self, task_id: &str) -> CollectorResult<()> {
        let task = self.set_status(task_id, TaskStatus::Enabled).await?;
        self.schedule_if_wired(&task).await;
        Ok(())
    }

    pub async fn disable_task(&self, task_id: &str) -> CollectorResult<()> {
        self.set_status(task_id, TaskStatus::Disabled).await?;
        self.unschedule_if_wired(task_id).await;
        Ok(())
    }

    pub async fn pause_task(&self, task_id: &str) -> CollectorResult<()> {
        self.set_status(task_id, TaskStatus::Paused).await?;
        self.unschedule_if_wired(task_id).await;
        Ok(())
    }

    pub async fn resume_task(&self, task_id: &str) -> CollectorResult<()> {
        self.enable_task(task_id).await
    }

    // ---- 执行 ----

    /// 调度触发的执行，只接受启用状态的任务
    pub async fn execute_task(&self, task_id: &str) -> CollectorResult<String> {
        let task = self.get_task(task_id).await?;
        if !task.is_enabled() {
            return Err(CollectorError::validation_error(format!(
                "任务未启用，无法调度执行: {}",
                task.name
            )));
        }
        self.run_collection(task).await
    }

    /// 手动触发，允许暂停中的任务，禁用的不行
    pub async fn execute_task_manually(&self, task_id: &str) -> CollectorResult<String> {
        let task = self.get_task(task_id).await?;
        if task.status == TaskStatus::Disabled {
            return Err(CollectorError::validation_error(format!(
                "任务已禁用，无法手动执行: {}",
                task.name
            )));
        }
        self.run_collection(task).await
    }

    async fn run_lock(&self, task_id: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.run_locks
                .lock()
                .await
                .entry(task_id.to_string())
                .or_default(),
        )
    }

    /// 一次完整执行。业务失败不向外抛，都落在日志和计数里
    async fn run_collection(&self, task: CollectionTask) -> CollectorResult<String> {
        let lock = self.run_lock(&task.id).await;
        let _guard = lock.lock().await;

        let execution_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let mut log = CollectionLog::start(&task.id, &execution_id);
        self.logs.append(&log).await?;

        // 先递增执行计数，保证均值计算与计数一致
        let mut task = task;
        task.execution_count += 1;
        task = self.tasks.update(&task).await?;

        info!(
            task_id = %task.id,
            execution_id = %execution_id,
            devices = task.device_ids.len(),
            "开始执行采集任务"
        );

        let outcome = self.collect_all(&task, &execution_id).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let now = Utc::now();

        let (success, data_count, summary, error) = match outcome {
            Ok((counts, data_count)) => {
                let success = counts.values().any(|o| o.success > 0);
                let summary = serde_json::to_string(&counts)?;
                (success, data_count, Some(summary), None)
            }
            Err(e) => {
                error!(task_id = %task.id, execution_id = %execution_id, error = %e, "任务执行失败");
                (false, 0, None, Some(e.to_string()))
            }
        };

        log.end_time = Some(now);
        log.response_time_ms = Some(elapsed_ms as i64);
        log.success = success;
        log.data_count = data_count;
        log.result_summary = summary;
        if let Some(message) = error {
            log.status = ExecutionStatus::Failed;
            log.error_code = Some(CollectError::ExecutionError);
            log.error_message = Some(message);
        } else {
            log.status = ExecutionStatus::Completed;
        }
        self.logs.update(&log).await?;

        task.record_execution(success, elapsed_ms, now);
        self.tasks.update(&task).await?;
        self.record_daily_statistics(&task.id, success, elapsed_ms).await;

        Ok(execution_id)
    }

    /// 设备×指标全量采集，返回每个指标的成败计数和成功数据点总数
    async fn collect_all(
        &self,
        task: &CollectionTask,
        execution_id: &str,
    ) -> CollectorResult<(HashMap<String, MetricOutcome>, u64)> {
        let found = self.devices.find_by_ids(&task.device_ids).await?;
        let by_id: HashMap<&str, &Device> = found.iter().map(|d| (d.id.as_str(), d)).collect();

        let mut counts: HashMap<String, MetricOutcome> = HashMap::new();
        let mut data_count = 0u64;

        for device_id in &task.device_ids {
            let Some(device) = by_id.get(device_id.as_str()) else {
                warn!(task_id = %task.id, device_id, "设备不存在，跳过");
                continue;
            };
            let credentials = self.resolve_credentials(device).await;

            for metric in task.enabled_metrics() {
                let context = CollectionContext {
                    session_id: execution_id.to_string(),
                    task_id: Some(task.id.clone()),
                    credentials: credentials.clone(),
                    test_only: false,
                };
                let result = self
                    .collect_with_retry(device, metric, &context, &task.retry_policy)
                    .await;

                let entry = counts
                    .entry(metric.name.clone())
                    .or_insert(MetricOutcome { success: 0, failure: 0 });
                if result.success {
                    entry.success += 1;
                    data_count += result.metrics.len() as u64;
                } else {
                    entry.failure += 1;
                }
            }
        }
        Ok((counts, data_count))
    }

    /// 按重试策略执行单次采集，失败就重试直到次数用尽
    async fn collect_with_retry(
        &self,
        device: &Device,
        metric: &MetricConfig,
        context: &CollectionContext,
        policy: &RetryPolicy,
    ) -> collector_domain::CollectionResult {
        let mut result = self.engine.execute_collection(device, metric, context).await;
        if !policy.enable_retry {
            return result;
        }
        for attempt in 1..=policy.retry_times {
            if result.success {
                break;
            }
            warn!(
                device_id = %device.id,
                metric = %metric.name,
                attempt,
                error = ?result.error_code,
                retryable = result.error_code.map(|c| c.is_retryable()).unwrap_or(false),
                "采集失败，重试"
            );
            tokio::time::sleep(std::time::Duration::from_millis(policy.retry_interval_ms)).await;
            result = self.engine.execute_collection(device, metric, context).await;
        }
        result
    }

    /// 合并设备类型声明的所有协议下的凭据
    async fn resolve_credentials(&self, device: &Device) -> Map<String, Value> {
        let mut merged = Map::new();
        for protocol in &device.device_type.protocols {
            match self.credentials.resolve(&device.id, protocol).await {
                Ok(entries) => merged.extend(entries),
                Err(e) => {
                    warn!(device_id = %device.id, protocol, error = %e, "凭据解析失败");
                }
            }
        }
        merged
    }

    async fn record_daily_statistics(&self, task_id: &str, success: bool, elapsed_ms: u64) {
        let today = Utc::now().date_naive();
        let mut stats = match self.statistics.find(task_id, today).await {
            Ok(Some(stats)) => stats,
            Ok(None) => TaskStatistics::new(task_id, today),
            Err(e) => {
                warn!(task_id, error = %e, "读取当日统计失败");
                return;
            }
        };
        stats.record(success, elapsed_ms);
        if let Err(e) = self.statistics.upsert(&stats).await {
            warn!(task_id, error = %e, "写入当日统计失败");
        }
    }

    // ---- 查询与维护 ----

    pub async fn task_logs(&self, task_id: &str) -> CollectorResult<Vec<CollectionLog>> {
        self.logs.find_by_task_id(task_id).await
    }

    pub async fn task_statistics(&self, task_id: &str) -> CollectorResult<Vec<TaskStatistics>> {
        self.statistics.find_by_task_id(task_id).await
    }

    /// 清理早于保留期的执行日志，返回清理条数
    pub async fn cleanup_logs(&self, retention_days: i64) -> CollectorResult<u64> {
        let cutoff = Utc::now() - Duration::days(retention_days);
        let purged = self.logs.purge_older_than(cutoff).await?;
        if purged > 0 {
            info!(purged, retention_days, "清理历史执行日志");
        }
        Ok(purged)
    }

    // ---- 校验 ----

    async fn validate_input(&self, input: &NewTask, exclude_id: Option<&str>) -> CollectorResult<()> {
        if input.name.trim().is_empty() {
            return Err(CollectorError::validation_error("任务名称不能为空"));
        }
        if input.device_ids.is_empty() {
            return Err(CollectorError::validation_error("任务至少需要一个设备"));
        }
        if let Some(existing) = self.tasks.find_by_name(&input.name).await? {
            if exclude_id != Some(existing.id.as_str()) {
                return Err(CollectorError::DuplicateTaskName {
                    name: input.name.clone(),
                });
            }
        }
        validate_schedule_config(input.schedule_type, &input.schedule_config)?;
        self.validate_metrics(&input.metric_configs).await?;
        Ok(())
    }

    /// 用声明支持该指标类型的插件校验指标配置，HIGH级错误阻断
    async fn validate_metrics(&self, metrics: &[MetricConfig]) -> CollectorResult<()> {
        let plugins = self.engine.registry().all_plugins().await;
        for metric in metrics {
            for plugin in &plugins {
                if !plugin
                    .supported_metric_types()
                    .iter()
                    .any(|t| t == &metric.metric_type)
                {
                    continue;
                }
                let validation = plugin.validate_config(metric);
                if validation.has_blocking_errors() {
                    let details: Vec<String> = validation
                        .errors
                        .iter()
                        .map(|e| format!("{}: {}", e.field, e.message))
                        .collect();
                    return Err(CollectorError::validation_error(format!(
                        "指标 {} 配置无效: {}",
                        metric.name,
                        details.join("; ")
                    )));
                }
            }
        }
        Ok(())
    }

    /// 按任务设备的类型生成默认指标，同名去重
    async fn generate_default_metrics(
        &self,
        device_ids: &[String],
    ) -> CollectorResult<Vec<MetricConfig>> {
        let devices = self.devices.find_by_ids(device_ids).await?;
        let mut metrics: Vec<MetricConfig> = Vec::new();
        for device in &devices {
            for metric in default_metrics_for(&device.device_type.code) {
                if !metrics.iter().any(|m| m.name == metric.name) {
                    metrics.push(metric);
                }
            }
        }
        if metrics.is_empty() {
            return Err(CollectorError::validation_error(
                "无法生成默认指标：任务设备均不存在",
            ));
        }
        Ok(metrics)
    }
}

#[async_trait]
impl TaskRunner for CollectionTaskService {
    async fn run_task(&self, task_id: &str) -> CollectorResult<String> {
        self.execute_task(task_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collector_domain::{
        AvailableMetric, CollectionResult, ConfigValidationResult, ConnectionTestResult,
        DeviceType, PluginHealthStatus, PluginLifecycleState, PluginStatistics,
        ValidationSeverity,
    };
    use collector_engine::{LifecycleManager, PluginRegistry};
    use collector_infrastructure::{
        InMemoryDeviceDirectory, InMemoryLogRepository, InMemoryStatisticsRepository,
        InMemoryTaskRepository, StaticCredentialResolver,
    };
    use collector_plugins::CollectorPlugin;
    use serde_json::json;

    use std::sync::atomic::{AtomicU64, Ordering};

    /// 指标名以fail开头时返回失败结果，fail_auth给出认证错误码
    struct StubPlugin {
        calls: Arc<AtomicU64>,
    }

    #[async_trait]
    impl CollectorPlugin for StubPlugin {
        fn plugin_type(&self) -> &str {
            "stub-http"
        }
        fn name(&self) -> &str {
            "stub"
        }
        fn version(&self) -> &str {
            "0.0.0"
        }
        fn description(&self) -> &str {
            ""
        }
        fn supported_protocols(&self) -> Vec<String> {
            vec!["HTTP".to_string()]
        }
        fn supported_metric_types(&self) -> Vec<String> {
            vec!["health_check".to_string(), "json_path".to_string()]
        }
        async fn initialize(&self, _config: &Map<String, Value>) -> CollectorResult<()> {
            Ok(())
        }
        async fn destroy(&self) -> CollectorResult<()> {
            Ok(())
        }
        async fn collect(
            &self,
            device: &Device,
            metric: &MetricConfig,
            context: &CollectionContext,
        ) -> CollectionResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if metric.name.starts_with("fail") {
                let code = if metric.name == "fail_auth" {
                    CollectError::Auth
                } else {
                    CollectError::Server
                };
                return CollectionResult::failure(
                    self.plugin_type(),
                    &device.id,
                    &metric.name,
                    &context.session_id,
                    Utc::now(),
                    code,
                    "stub failure",
                );
            }
            let mut metrics = Map::new();
            metrics.insert("value".to_string(), json!(1));
            CollectionResult::success(
                self.plugin_type(),
                &device.id,
                &metric.name,
                &context.session_id,
                Utc::now(),
                metrics,
                100,
            )
        }
        async fn test_connection(
            &self,
            _device: &Device,
            _context: &CollectionContext,
        ) -> ConnectionTestResult {
            ConnectionTestResult::ok("ok", 1)
        }
        async fn discover_metrics(
            &self,
            _device: &Device,
            _context: &CollectionContext,
        ) -> Vec<AvailableMetric> {
            Vec::new()
        }
        fn validate_config(&self, metric: &MetricConfig) -> ConfigValidationResult {
            let mut result = ConfigValidationResult::ok();
            if metric.metric_type == "json_path" && metric.param_str("json_path").is_none() {
                result.add_error("json_path", "缺少json_path参数", ValidationSeverity::High);
            }
            result
        }
        fn config_template(&self) -> Value {
            json!({})
        }
        fn statistics(&self) -> PluginStatistics {
            PluginStatistics::default()
        }
        fn health_status(&self) -> PluginHealthStatus {
            PluginHealthStatus {
                plugin_type: "stub-http".to_string(),
                healthy: true,
                state: PluginLifecycleState::Ready,
                message: String::new(),
                checked_at: Utc::now(),
            }
        }
    }

    struct Harness {
        service: Arc<CollectionTaskService>,
        tasks: Arc<InMemoryTaskRepository>,
        logs: Arc<InMemoryLogRepository>,
        devices: Arc<InMemoryDeviceDirectory>,
        collect_calls: Arc<AtomicU64>,
    }

    async fn harness() -> Harness {
        let collect_calls = Arc::new(AtomicU64::new(0));
        let registry = Arc::new(PluginRegistry::new());
        registry
            .register(Arc::new(StubPlugin {
                calls: Arc::clone(&collect_calls),
            }))
            .await
            .unwrap();
        let lifecycle = Arc::new(LifecycleManager::new(Arc::clone(&registry)));
        lifecycle
            .initialize_plugin("stub-http", Map::new())
            .await
            .unwrap();
        let engine = Arc::new(CollectorEngine::new(registry, lifecycle));

        let tasks = Arc::new(InMemoryTaskRepository::new());
        let logs = Arc::new(InMemoryLogRepository::new());
        let devices = Arc::new(InMemoryDeviceDirectory::new());
        let service = Arc::new(CollectionTaskService::new(
            Arc::clone(&tasks) as Arc<dyn TaskRepository>,
            Arc::clone(&logs) as Arc<dyn LogRepository>,
            Arc::new(InMemoryStatisticsRepository::new()),
            Arc::clone(&devices) as Arc<dyn DeviceDirectory>,
            Arc::new(StaticCredentialResolver::new()),
            engine,
        ));
        Harness {
            service,
            tasks,
            logs,
            devices,
            collect_calls,
        }
    }

    fn camera(id: &str) -> Device {
        Device::new(
            id,
            format!("摄像机{id}"),
            "10.0.0.1",
            80,
            DeviceType::new("camera", "网络摄像机", vec!["HTTP".into()]),
        )
    }

    fn simple_input(name: &str, device_ids: &[&str]) -> NewTask {
        let mut config = Map::new();
        config.insert("frequency".to_string(), json!(300));
        let mut input = NewTask::new(name, ScheduleType::Simple, config);
        input.device_ids = device_ids.iter().map(|s| s.to_string()).collect();
        input.metric_configs = vec![MetricConfig::new("device_status", "health_check")];
        input
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_name() {
        let h = harness().await;
        h.devices.insert(camera("d1")).await;
        h.service
            .create_task(simple_input("任务A", &["d1"]))
            .await
            .unwrap();
        let result = h.service.create_task(simple_input("任务A", &["d1"])).await;
        assert!(matches!(
            result,
            Err(CollectorError::DuplicateTaskName { .. })
        ));
    }

    #[tokio::test]
    async fn test_create_generates_default_metrics() {
        let h = harness().await;
        h.devices.insert(camera("d1")).await;
        let mut input = simple_input("任务A", &["d1"]);
        input.metric_configs = Vec::new();
        let task = h.service.create_task(input).await.unwrap();
        assert_eq!(task.metric_configs.len(), 5);
        assert!(task
            .metric_configs
            .iter()
            .any(|m| m.name == "video_stream_status"));
    }

    #[tokio::test]
    async fn test_create_blocks_on_high_validation_error() {
        let h = harness().await;
        h.devices.insert(camera("d1")).await;
        let mut input = simple_input("任务A", &["d1"]);
        // json_path类型缺少必要参数
        input.metric_configs = vec![MetricConfig::new("temperature", "json_path")];
        let result = h.service.create_task(input).await;
        assert!(matches!(result, Err(CollectorError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_execute_counts_every_device_metric_pair() {
        let h = harness().await;
        h.devices.insert(camera("d1")).await;
        h.devices.insert(camera("d2")).await;

        let mut input = simple_input("任务A", &["d1", "d2"]);
        input.metric_configs = vec![
            MetricConfig::new("device_status", "health_check"),
            MetricConfig::new("fail_metric", "health_check"),
        ];
        let task = h.service.create_task(input).await.unwrap();

        let execution_id = h.service.execute_task(&task.id).await.unwrap();

        let log = h
            .logs
            .find_by_execution_id(&execution_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(log.status, ExecutionStatus::Completed);
        assert!(log.success);
        assert_eq!(log.data_count, 2);

        // 2设备×2指标，成败合计等于调用次数
        let summary: HashMap<String, MetricOutcome> =
            serde_json::from_str(log.result_summary.as_deref().unwrap()).unwrap();
        let total: u64 = summary.values().map(|o| o.success + o.failure).sum();
        assert_eq!(total, 4);
        assert_eq!(summary["device_status"].success, 2);
        assert_eq!(summary["fail_metric"].failure, 2);

        let stored = h.tasks.find_by_id(&task.id).await.unwrap().unwrap();
        assert_eq!(stored.execution_count, 1);
        assert_eq!(stored.success_count, 1);

        let stats = h.service.task_statistics(&task.id).await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].execution_count, 1);
    }

    #[tokio::test]
    async fn test_retry_covers_every_failure_code() {
        let h = harness().await;
        h.devices.insert(camera("d1")).await;

        let mut input = simple_input("任务A", &["d1"]);
        input.metric_configs = vec![MetricConfig::new("fail_auth", "health_check")];
        input.retry_policy = RetryPolicy {
            enable_retry: true,
            retry_times: 2,
            retry_interval_ms: 1,
        };
        let task = h.service.create_task(input).await.unwrap();

        h.service.execute_task(&task.id).await.unwrap();

        // 认证失败同样按策略重试：1次原始调用 + 2次重试
        assert_eq!(h.collect_calls.load(Ordering::SeqCst), 3);
        let log = &h.service.task_logs(&task.id).await.unwrap()[0];
        assert!(!log.success);
    }

    #[tokio::test]
    async fn test_execute_skips_missing_device() {
        let h = harness().await;
        h.devices.insert(camera("d1")).await;
        let task = h
            .service
            .create_task(simple_input("任务A", &["d1", "ghost"]))
            .await
            .unwrap();

        let execution_id = h.service.execute_task(&task.id).await.unwrap();
        let log = h
            .logs
            .find_by_execution_id(&execution_id)
            .await
            .unwrap()
            .unwrap();
        // 只有存在的设备被采集
        let summary: HashMap<String, MetricOutcome> =
            serde_json::from_str(log.result_summary.as_deref().unwrap()).unwrap();
        assert_eq!(summary["device_status"].success, 1);
    }

    #[tokio::test]
    async fn test_manual_execute_respects_status() {
        let h = harness().await;
        h.devices.insert(camera("d1")).await;
        let task = h
            .service
            .create_task(simple_input("任务A", &["d1"]))
            .await
            .unwrap();

        h.service.pause_task(&task.id).await.unwrap();
        // 暂停的任务不接受调度执行，但可手动执行
        assert!(h.service.execute_task(&task.id).await.is_err());
        assert!(h.service.execute_task_manually(&task.id).await.is_ok());

        h.service.disable_task(&task.id).await.unwrap();
        assert!(h.service.execute_task_manually(&task.id).await.is_err());

        h.service.resume_task(&task.id).await.unwrap();
        assert!(h.service.execute_task(&task.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_batch_create_failures_are_isolated() {
        let h = harness().await;
        h.devices.insert(camera("d1")).await;
        h.service
            .create_task(simple_input("已存在", &["d1"]))
            .await
            .unwrap();

        let result = h
            .service
            .batch_create(vec![
                simple_input("新任务", &["d1"]),
                simple_input("已存在", &["d1"]),
                simple_input("另一个", &["d1"]),
            ])
            .await;

        assert_eq!(result.created.len(), 2);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].0, "已存在");
        // 失败条目没有留下半成品
        assert_eq!(h.tasks.find_all().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_delete_task_is_soft() {
        let h = harness().await;
        h.devices.insert(camera("d1")).await;
        let task = h
            .service
            .create_task(simple_input("任务A", &["d1"]))
            .await
            .unwrap();
        h.service.delete_task(&task.id).await.unwrap();
        assert!(h.service.get_task(&task.id).await.is_err());
        assert!(matches!(
            h.service.delete_task(&task.id).await,
            Err(CollectorError::TaskNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_cleanup_logs_keeps_recent() {
        let h = harness().await;
        let mut old = CollectionLog::start("t1", "e-old");
        old.start_time = Utc::now() - Duration::days(60);
        h.logs.append(&old).await.unwrap();
        h.logs.append(&CollectionLog::start("t1", "e-new")).await.unwrap();

        assert_eq!(h.service.cleanup_logs(30).await.unwrap(), 1);
        assert_eq!(h.logs.len().await, 1);
    }
}
