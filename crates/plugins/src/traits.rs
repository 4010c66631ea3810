//! 采集插件抽象
//!
//! 每个插件负责一种线路协议的采集实现。collect从不返回Err，
//! 所有失败都编码在CollectionResult中。

use async_trait::async_trait;
use serde_json::{Map, Value};

use collector_domain::{
    AvailableMetric, CollectionContext, CollectionResult, ConfigValidationResult,
    ConnectionTestResult, Device, DeviceType, MetricConfig, PluginHealthStatus, PluginStatistics,
};
use collector_errors::CollectorResult;

/// 协议采集插件接口
#[async_trait]
pub trait CollectorPlugin: Send + Sync {
    /// 插件类型标识，注册表中全局唯一
    fn plugin_type(&self) -> &str;
    fn name(&self) -> &str;
    fn version(&self) -> &str;
    fn description(&self) -> &str;
    fn supported_protocols(&self) -> Vec<String>;
    fn supported_metric_types(&self) -> Vec<String>;

    /// 设备类型的协议列表与插件支持的协议有交集即可采集
    fn supports(&self, device_type: &DeviceType) -> bool {
        self.supported_protocols()
            .iter()
            .any(|p| device_type.supports_protocol(p))
    }

    fn supports_protocol(&self, protocol: &str) -> bool {
        self.supported_protocols()
            .iter()
            .any(|p| p.eq_ignore_ascii_case(protocol))
    }

    /// 批量采集时是否允许并发执行
    fn supports_concurrent_collection(&self) -> bool {
        false
    }

    /// 并发采集时的建议并发度
    fn recommended_concurrency(&self) -> usize {
        1
    }

    /// 一次性初始化，失败对该插件是致命的：
    /// 在重新初始化成功之前插件被排除在调度之外
    async fn initialize(&self, config: &Map<String, Value>) -> CollectorResult<()>;

    /// 释放插件持有的连接等资源
    async fn destroy(&self) -> CollectorResult<()>;

    async fn collect(
        &self,
        device: &Device,
        metric: &MetricConfig,
        context: &CollectionContext,
    ) -> CollectionResult;

    /// 默认实现为顺序采集，插件可覆盖
    async fn collect_batch(
        &self,
        device: &Device,
        metrics: &[MetricConfig],
        context: &CollectionContext,
    ) -> Vec<CollectionResult> {
        let mut results = Vec::with_capacity(metrics.len());
        for metric in metrics {
            results.push(self.collect(device, metric, context).await);
        }
        results
    }

    async fn test_connection(
        &self,
        device: &Device,
        context: &CollectionContext,
    ) -> ConnectionTestResult;

    /// 尽力探测设备上可用的指标
    async fn discover_metrics(
        &self,
        device: &Device,
        context: &CollectionContext,
    ) -> Vec<AvailableMetric>;

    fn validate_config(&self, metric: &MetricConfig) -> ConfigValidationResult;

    /// 该插件指标配置的参数模板
    fn config_template(&self) -> Value;

    fn statistics(&self) -> PluginStatistics;

    fn health_status(&self) -> PluginHealthStatus;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyPlugin;

    #[async_trait]
    impl CollectorPlugin for DummyPlugin {
        fn plugin_type(&self) -> &str {
            "dummy"
        }
        fn name(&self) -> &str {
            "dummy"
        }
        fn version(&self) -> &str {
            "0.0.1"
        }
        fn description(&self) -> &str {
            ""
        }
        fn supported_protocols(&self) -> Vec<String> {
            vec!["HTTP".to_string()]
        }
        fn supported_metric_types(&self) -> Vec<String> {
            vec!["health_check".to_string()]
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
            CollectionResult::success(
                self.plugin_type(),
                &device.id,
                &metric.name,
                &context.session_id,
                chrono::Utc::now(),
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
                plugin_type: "dummy".to_string(),
                healthy: true,
                state: collector_domain::PluginLifecycleState::Ready,
                message: String::new(),
                checked_at: chrono::Utc::now(),
            }
        }
    }

    #[test]
    fn test_supports_matches_protocol_intersection() {
        let plugin = DummyPlugin;
        let http_type = DeviceType::new("camera", "camera", vec!["HTTP".into()]);
        let snmp_type = DeviceType::new("switch", "switch", vec!["SNMP".into()]);
        assert!(plugin.supports(&http_type));
        assert!(!plugin.supports(&snmp_type));
        assert!(plugin.supports_protocol("http"));
    }

    #[tokio::test]
    async fn test_default_batch_is_sequential() {
        let plugin = DummyPlugin;
        let device = Device::new(
            "d1",
            "dev",
            "127.0.0.1",
            80,
            DeviceType::new("camera", "camera", vec!["HTTP".into()]),
        );
        let metrics = vec![
            MetricConfig::new("m1", "health_check"),
            MetricConfig::new("m2", "health_check"),
        ];
        let ctx = CollectionContext::new();
        let results = plugin.collect_batch(&device, &metrics, &ctx).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success));
    }
}
