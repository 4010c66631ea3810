//! 采集引擎（调度层）
//!
//! 为设备挑选就绪的插件并发起单次/批量/异步采集。
//! 插件异常一律降级为失败结果，调用方永远拿到CollectionResult。

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::StreamExt;
use tracing::{debug, error, warn};

use collector_domain::{CollectionContext, CollectionResult, Device, MetricConfig};
use collector_errors::CollectError;
use collector_plugins::CollectorPlugin;

use crate::lifecycle::LifecycleManager;
use crate::registry::PluginRegistry;
use crate::stats::{EngineHealthReport, EngineStats, EngineStatistics, PluginPerformance};

/// 无插件可用时结果中的插件类型占位
const NO_PLUGIN: &str = "none";
/// 健康检查中在途采集数量的告警阈值
const ACTIVE_COLLECTIONS_LIMIT: u64 = 100;
/// 健康检查中成功率的告警阈值
const SUCCESS_RATE_LIMIT: f64 = 80.0;

/// 采集引擎
#[derive(Clone)]
pub struct CollectorEngine {
    registry: Arc<PluginRegistry>,
    lifecycle: Arc<LifecycleManager>,
    stats: Arc<EngineStats>,
}

impl CollectorEngine {
    pub fn new(registry: Arc<PluginRegistry>, lifecycle: Arc<LifecycleManager>) -> Self {
        Self {
            registry,
            lifecycle,
            stats: Arc::new(EngineStats::new()),
        }
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    /// 插件选择：优先设备指定的插件类型，其次第一个支持该设备类型且就绪的插件
    pub async fn select_plugin(&self, device: &Device) -> Option<Arc<dyn CollectorPlugin>> {
        if let Some(preferred) = &device.preferred_plugin_type {
            if let Some(plugin) = self.registry.get(preferred).await {
                if plugin.supports(&device.device_type) && self.lifecycle.is_ready(preferred).await
                {
                    return Some(plugin);
                }
                warn!(
                    device_id = %device.id,
                    plugin = %preferred,
                    "设备指定的插件不可用，回退按协议匹配"
                );
            }
        }
        for plugin in self.registry.enabled_plugins().await {
            if plugin.supports(&device.device_type)
                && self.lifecycle.is_ready(plugin.plugin_type()).await
            {
                return Some(plugin);
            }
        }
        None
    }

    fn no_plugin_result(
        device: &Device,
        metric: &MetricConfig,
        context: &CollectionContext,
    ) -> CollectionResult {
        CollectionResult::failure(
            NO_PLUGIN,
            &device.id,
            &metric.name,
            &context.session_id,
            Utc::now(),
            CollectError::NoPluginFound,
            format!(
                "没有支持设备类型 {} 的就绪插件",
                device.device_type.code
            ),
        )
    }

    /// 单次采集。插件panic降级为EXECUTION_ERROR失败结果，从不向上抛出
    pub async fn execute_collection(
        &self,
        device: &Device,
        metric: &MetricConfig,
        context: &CollectionContext,
    ) -> CollectionResult {
        let Some(plugin) = self.select_plugin(device).await else {
            debug!(
                device_id = %device.id,
                device_type = %device.device_type.code,
                "无可用采集插件"
            );
            return Self::no_plugin_result(device, metric, context);
        };

        let plugin_type = plugin.plugin_type().to_string();
        let started = Instant::now();
        self.stats.collection_started();

        let task_device = device.clone();
        let task_metric = metric.clone();
        let task_context = context.clone();
        let handle = tokio::spawn(async move {
            plugin
                .collect(&task_device, &task_metric, &task_context)
                .await
        });

        let result = match handle.await {
            Ok(result) => result,
            Err(join_error) => {
                error!(
                    device_id = %device.id,
                    metric = %metric.name,
                    plugin = %plugin_type,
                    error = %join_error,
                    "插件采集过程异常"
                );
                CollectionResult::failure(
                    &plugin_type,
                    &device.id,
                    &metric.name,
                    &context.session_id,
                    Utc::now(),
                    CollectError::ExecutionError,
                    format!("插件内部错误: {join_error}"),
                )
            }
        };

        self.stats
            .record(&plugin_type, result.success, started.elapsed().as_millis() as u64);
        result
    }

    /// 异步采集：立即返回会话ID，结果在后台产生并记录
    pub fn execute_collection_async(
        &self,
        device: Device,
        metric: MetricConfig,
        context: CollectionContext,
    ) -> String {
        let session_id = context.session_id.clone();
        let engine = self.clone();
        tokio::spawn(async move {
            let result = engine.execute_collection(&device, &metric, &context).await;
            debug!(
                session_id = %context.session_id,
                device_id = %device.id,
                metric = %metric.name,
                success = result.success,
                "异步采集完成"
            );
        });
        session_id
    }

    /// 批量采集：同一设备的多个指标共享会话，
    /// 插件声明支持并发时按建议并发度并行
    pub async fn execute_batch_collection(
        &self,
        device: &Device,
        metrics: &[MetricConfig],
        context: &CollectionContext,
    ) -> Vec<CollectionResult> {
        let Some(plugin) = self.select_plugin(device).await else {
            return metrics
                .iter()
                .map(|metric| Self::no_plugin_result(device, metric, context))
                .collect();
        };
        let plugin_type = plugin.plugin_type().to_string();
        let started = Instant::now();

        let results = if plugin.supports_concurrent_collection() && metrics.len() > 1 {
            let concurrency = plugin.recommended_concurrency().max(1);
            futures::stream::iter(metrics.iter().cloned().map(|metric| {
                let plugin = Arc::clone(&plugin);
                let device = device.clone();
                let context = context.clone();
                async move { plugin.collect(&device, &metric, &context).await }
            }))
            .buffered(concurrency)
            .collect::<Vec<_>>()
            .await
        } else {
            plugin.collect_batch(device, metrics, context).await
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        for result in &results {
            self.stats.collection_started();
            self.stats.record(
                &plugin_type,
                result.success,
                elapsed_ms / results.len().max(1) as u64,
            );
        }
        results
    }

    pub fn statistics(&self) -> EngineStatistics {
        self.stats.snapshot()
    }

    pub fn performance_ranking(&self) -> Vec<PluginPerformance> {
        self.stats.performance_ranking()
    }

    /// 聚合每个插件的健康状态，并检查引擎级的异常指标
    pub async fn perform_health_check(&self) -> EngineHealthReport {
        let mut issues = Vec::new();
        let mut plugin_health = Vec::new();

        for plugin in self.registry.all_plugins().await {
            let health = plugin.health_status();
            if !health.healthy {
                issues.push(format!(
                    "插件 {} 不健康: {}",
                    health.plugin_type, health.message
                ));
            }
            plugin_health.push(health);
        }

        let active = self.stats.active_collections();
        if active > ACTIVE_COLLECTIONS_LIMIT {
            issues.push(format!("在途采集过多: {active}"));
        }
        let snapshot = self.stats.snapshot();
        if snapshot.total_collections > 0 && snapshot.success_rate < SUCCESS_RATE_LIMIT {
            issues.push(format!("整体成功率过低: {:.1}%", snapshot.success_rate));
        }

        EngineHealthReport {
            healthy: issues.is_empty(),
            issues,
            plugin_health,
            checked_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use collector_domain::{
        AvailableMetric, ConfigValidationResult, ConnectionTestResult, DeviceType,
        PluginHealthStatus, PluginLifecycleState, PluginStatistics,
    };
    use collector_errors::CollectorResult;
    use serde_json::{Map, Value};

    /// 可配置行为的测试插件
    struct StubPlugin {
        plugin_type: String,
        protocols: Vec<String>,
        panics: bool,
        concurrent: bool,
    }

    impl StubPlugin {
        fn http(plugin_type: &str) -> Self {
            Self {
                plugin_type: plugin_type.to_string(),
                protocols: vec!["HTTP".to_string()],
                panics: false,
                concurrent: false,
            }
        }
    }

    #[async_trait]
    impl CollectorPlugin for StubPlugin {
        fn plugin_type(&self) -> &str {
            &self.plugin_type
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
            self.protocols.clone()
        }
        fn supported_metric_types(&self) -> Vec<String> {
            vec!["health_check".to_string()]
        }
        fn supports_concurrent_collection(&self) -> bool {
            self.concurrent
        }
        fn recommended_concurrency(&self) -> usize {
            2
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
            if self.panics {
                panic!("stub panic");
            }
            CollectionResult::success(
                &self.plugin_type,
                &device.id,
                &metric.name,
                &context.session_id,
                Utc::now(),
                Map::new(),
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
        fn validate_config(&self, _metric: &MetricConfig) -> ConfigValidationResult {
            ConfigValidationResult::ok()
        }
        fn config_template(&self) -> Value {
            serde_json::json!({})
        }
        fn statistics(&self) -> PluginStatistics {
            PluginStatistics::default()
        }
        fn health_status(&self) -> PluginHealthStatus {
            PluginHealthStatus {
                plugin_type: self.plugin_type.clone(),
                healthy: true,
                state: PluginLifecycleState::Ready,
                message: String::new(),
                checked_at: Utc::now(),
            }
        }
    }

    fn http_device() -> Device {
        Device::new(
            "d1",
            "dev",
            "127.0.0.1",
            80,
            DeviceType::new("camera", "camera", vec!["HTTP".into()]),
        )
    }

    async fn engine_with(plugins: Vec<StubPlugin>) -> CollectorEngine {
        let registry = Arc::new(PluginRegistry::new());
        let lifecycle = Arc::new(LifecycleManager::new(Arc::clone(&registry)));
        for plugin in plugins {
            let plugin_type = plugin.plugin_type.clone();
            registry.register(Arc::new(plugin)).await.unwrap();
            lifecycle
                .initialize_plugin(&plugin_type, Map::new())
                .await
                .unwrap();
        }
        CollectorEngine::new(registry, lifecycle)
    }

    #[tokio::test]
    async fn test_no_plugin_returns_standard_failure() {
        let engine = engine_with(vec![]).await;
        let device = http_device();
        let metric = MetricConfig::new("m", "health_check");
        let result = engine
            .execute_collection(&device, &metric, &CollectionContext::new())
            .await;
        assert!(!result.success);
        assert_eq!(result.error_code, Some(CollectError::NoPluginFound));
        assert_eq!(result.plugin_type, "none");
    }

    #[tokio::test]
    async fn test_not_ready_plugin_is_skipped() {
        let registry = Arc::new(PluginRegistry::new());
        let lifecycle = Arc::new(LifecycleManager::new(Arc::clone(&registry)));
        // 注册但不初始化
        registry
            .register(Arc::new(StubPlugin::http("stub-http")))
            .await
            .unwrap();
        let engine = CollectorEngine::new(registry, lifecycle);

        let result = engine
            .execute_collection(
                &http_device(),
                &MetricConfig::new("m", "health_check"),
                &CollectionContext::new(),
            )
            .await;
        assert_eq!(result.error_code, Some(CollectError::NoPluginFound));
    }

    #[tokio::test]
    async fn test_preferred_plugin_wins() {
        let engine = engine_with(vec![
            StubPlugin::http("stub-a"),
            StubPlugin::http("stub-b"),
        ])
        .await;
        let mut device = http_device();
        device.preferred_plugin_type = Some("stub-b".to_string());
        let result = engine
            .execute_collection(
                &device,
                &MetricConfig::new("m", "health_check"),
                &CollectionContext::new(),
            )
            .await;
        assert!(result.success);
        assert_eq!(result.plugin_type, "stub-b");
    }

    #[tokio::test]
    async fn test_panic_degrades_to_failure() {
        let mut plugin = StubPlugin::http("stub-panic");
        plugin.panics = true;
        let engine = engine_with(vec![plugin]).await;
        let result = engine
            .execute_collection(
                &http_device(),
                &MetricConfig::new("m", "health_check"),
                &CollectionContext::new(),
            )
            .await;
        assert!(!result.success);
        assert_eq!(result.error_code, Some(CollectError::ExecutionError));
        assert_eq!(engine.statistics().failure_count, 1);
    }

    #[tokio::test]
    async fn test_batch_shares_session() {
        let mut plugin = StubPlugin::http("stub-http");
        plugin.concurrent = true;
        let engine = engine_with(vec![plugin]).await;
        let metrics = vec![
            MetricConfig::new("m1", "health_check"),
            MetricConfig::new("m2", "health_check"),
            MetricConfig::new("m3", "health_check"),
        ];
        let context = CollectionContext::new();
        let results = engine
            .execute_batch_collection(&http_device(), &metrics, &context)
            .await;
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.session_id == context.session_id));
        assert_eq!(engine.statistics().total_collections, 3);
    }

    #[tokio::test]
    async fn test_async_returns_session_id() {
        let engine = engine_with(vec![StubPlugin::http("stub-http")]).await;
        let context = CollectionContext::new();
        let expected = context.session_id.clone();
        let session_id = engine.execute_collection_async(
            http_device(),
            MetricConfig::new("m", "health_check"),
            context,
        );
        assert_eq!(session_id, expected);
    }

    #[tokio::test]
    async fn test_health_check_aggregates() {
        let engine = engine_with(vec![StubPlugin::http("stub-http")]).await;
        let report = engine.perform_health_check().await;
        assert!(report.healthy);
        assert_eq!(report.plugin_health.len(), 1);
    }
}
