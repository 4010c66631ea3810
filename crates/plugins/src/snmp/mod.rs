//! SNMP采集插件
//!
//! 通过UDP对设备发起GET请求，常用OID预置在oids模块中。
//! 会话按 (地址,端口,版本,community) 缓存复用。

pub mod codec;
pub mod oids;
pub mod session;

use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use collector_domain::{
    AvailableMetric, CollectionContext, CollectionResult, ConfigValidationResult,
    ConnectionTestResult, Device, MetricConfig, MetricDataType, PluginHealthStatus,
    PluginStatistics, ValidationSeverity,
};
use collector_errors::{CollectError, CollectorResult};

use crate::stats::StatsRecorder;
use crate::traits::CollectorPlugin;
use codec::SnmpValue;
use session::{SessionCache, SessionConfig, SnmpVersion};

pub const PLUGIN_TYPE: &str = "snmp-collector";

const DEFAULT_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_RETRIES: u32 = 2;
const OID_PATTERN: &str = r"^1(\.\d+)+$";

#[derive(Debug, Clone, Copy)]
struct SnmpDefaults {
    timeout_ms: u64,
    retries: u32,
}

/// SNMP采集插件
pub struct SnmpCollectorPlugin {
    cache: SessionCache,
    defaults: std::sync::RwLock<SnmpDefaults>,
    stats: StatsRecorder,
}

impl SnmpCollectorPlugin {
    pub fn new() -> Self {
        Self {
            cache: SessionCache::new(),
            defaults: std::sync::RwLock::new(SnmpDefaults {
                timeout_ms: DEFAULT_TIMEOUT_MS,
                retries: DEFAULT_RETRIES,
            }),
            stats: StatsRecorder::new(PLUGIN_TYPE),
        }
    }

    fn defaults(&self) -> SnmpDefaults {
        *self.defaults.read().unwrap_or_else(|e| e.into_inner())
    }

    /// 会话参数取自凭据，community与版本允许指标参数覆盖
    fn session_config(
        &self,
        device: &Device,
        metric: &MetricConfig,
        context: &CollectionContext,
    ) -> Result<SessionConfig, session::SnmpError> {
        let version_str = metric
            .param_str("version")
            .or_else(|| context.credential_str("version"))
            .unwrap_or("2c");
        let version = SnmpVersion::parse(version_str)?;
        let community = metric
            .param_str("community")
            .or_else(|| context.credential_str("community"))
            .unwrap_or("public")
            .to_string();
        let defaults = self.defaults();
        let timeout_ms = if metric.timeout_ms > 0 {
            metric.timeout_ms
        } else {
            defaults.timeout_ms
        };
        Ok(SessionConfig {
            address: device.address.clone(),
            port: if device.port > 0 { device.port } else { 161 },
            version,
            community,
            timeout_ms,
            retries: defaults.retries,
        })
    }

    /// 按指标类型展开要请求的 (指标键, OID) 列表
    fn plan_oids(metric: &MetricConfig) -> Result<Vec<(String, String)>, String> {
        match metric.metric_type.as_str() {
            "system_info" => Ok(oids::SYSTEM_OIDS
                .iter()
                .map(|(name, oid)| (name.to_string(), oid.to_string()))
                .collect()),
            "interface_status" => {
                let index = metric.param_u64("interface_index").unwrap_or(1);
                let mut plan = vec![("ifNumber".to_string(), oids::IF_NUMBER.to_string())];
                for (name, base) in oids::INTERFACE_COLUMN_OIDS {
                    plan.push((name.to_string(), format!("{base}.{index}")));
                }
                Ok(plan)
            }
            "cpu_usage" => Ok(vec![
                ("ssCpuIdle".to_string(), oids::UCD_CPU_IDLE.to_string()),
                ("ciscoCpuBusy".to_string(), oids::CISCO_CPU_BUSY.to_string()),
            ]),
            "memory_usage" => Ok(vec![
                (
                    "memTotalReal".to_string(),
                    oids::UCD_MEM_TOTAL_REAL.to_string(),
                ),
                (
                    "memAvailReal".to_string(),
                    oids::UCD_MEM_AVAIL_REAL.to_string(),
                ),
            ]),
            "storage_usage" => {
                let index = metric.param_u64("storage_index").unwrap_or(1);
                Ok(vec![
                    (
                        "hrStorageAllocationUnits".to_string(),
                        format!("{}.{index}", oids::HR_STORAGE_ALLOCATION_UNITS),
                    ),
                    (
                        "hrStorageSize".to_string(),
                        format!("{}.{index}", oids::HR_STORAGE_SIZE),
                    ),
                    (
                        "hrStorageUsed".to_string(),
                        format!("{}.{index}", oids::HR_STORAGE_USED),
                    ),
                ])
            }
            "custom_oids" => match metric.parameters.get("oids") {
                Some(Value::Array(list)) => {
                    let mut plan = Vec::new();
                    for item in list {
                        let oid = item.as_str().ok_or("oids数组元素必须是字符串")?;
                        plan.push((oid.to_string(), oid.to_string()));
                    }
                    Ok(plan)
                }
                Some(Value::Object(map)) => Ok(map
                    .iter()
                    .filter_map(|(name, oid)| {
                        oid.as_str().map(|o| (name.clone(), o.to_string()))
                    })
                    .collect()),
                _ => Err("custom_oids类型缺少oids参数".to_string()),
            },
            other => Err(format!("不支持的指标类型: {other}")),
        }
    }

    /// 把原始varbind值按指标语义转换为输出指标
    fn build_metrics(
        metric: &MetricConfig,
        plan: &[(String, String)],
        values: &[(String, SnmpValue)],
    ) -> (Map<String, Value>, usize) {
        let mut raw: Map<String, Value> = Map::new();
        let mut null_count = 0usize;

        // 仅custom_oids遵循声明的数据类型，预置指标类型按自然类型转换
        let honor_data_type = metric.metric_type == "custom_oids";
        for (index, (key, _oid)) in plan.iter().enumerate() {
            let value = values.get(index).map(|(_, v)| v);
            match value {
                Some(v) if !v.is_null() => {
                    let converted = if honor_data_type {
                        convert_value(v, metric.data_type)
                    } else {
                        natural_value(v)
                    };
                    raw.insert(key.clone(), converted);
                }
                _ => {
                    null_count += 1;
                }
            }
        }

        let mut metrics = Map::new();
        match metric.metric_type.as_str() {
            "system_info" => {
                for (key, value) in &raw {
                    if key == "sysUpTime" {
                        // TimeTicks为百分之一秒
                        if let Some(ticks) = value.as_u64() {
                            metrics.insert("sysUpTimeSeconds".to_string(), json!(ticks / 100));
                        }
                        metrics.insert(key.clone(), value.clone());
                    } else {
                        metrics.insert(key.clone(), value.clone());
                    }
                }
            }
            "cpu_usage" => {
                if let Some(idle) = raw.get("ssCpuIdle").and_then(|v| v.as_f64()) {
                    metrics.insert(
                        metric.name.clone(),
                        json!(((100.0 - idle) * 100.0).round() / 100.0),
                    );
                } else if let Some(busy) = raw.get("ciscoCpuBusy").and_then(|v| v.as_f64()) {
                    metrics.insert(metric.name.clone(), json!(busy));
                }
            }
            "memory_usage" => {
                let total = raw.get("memTotalReal").and_then(|v| v.as_f64());
                let avail = raw.get("memAvailReal").and_then(|v| v.as_f64());
                if let (Some(total), Some(avail)) = (total, avail) {
                    if total > 0.0 {
                        let usage = (total - avail) / total * 100.0;
                        metrics.insert(metric.name.clone(), json!((usage * 100.0).round() / 100.0));
                        metrics.insert("memTotalKb".to_string(), json!(total));
                        metrics.insert("memAvailKb".to_string(), json!(avail));
                    }
                }
            }
            "storage_usage" => {
                let units = raw
                    .get("hrStorageAllocationUnits")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(1.0);
                let size = raw.get("hrStorageSize").and_then(|v| v.as_f64());
                let used = raw.get("hrStorageUsed").and_then(|v| v.as_f64());
                if let (Some(size), Some(used)) = (size, used) {
                    if size > 0.0 {
                        let usage = used / size * 100.0;
                        metrics.insert(metric.name.clone(), json!((usage * 100.0).round() / 100.0));
                        metrics.insert("storageTotalBytes".to_string(), json!(size * units));
                        metrics.insert("storageUsedBytes".to_string(), json!(used * units));
                    }
                }
            }
            _ => {
                metrics = raw;
            }
        }

        (metrics, null_count)
    }
}

impl Default for SnmpCollectorPlugin {
    fn default() -> Self {
        Self::new()
    }
}

/// 数值保持数值，字符串类按显示文本输出
fn natural_value(value: &SnmpValue) -> Value {
    match value {
        SnmpValue::Integer(v) => json!(v),
        SnmpValue::Counter32(v) => json!(v),
        SnmpValue::Gauge32(v) => json!(v),
        SnmpValue::TimeTicks(v) => json!(v),
        SnmpValue::Counter64(v) => json!(v),
        other => json!(other.as_display_string().unwrap_or_default()),
    }
}

/// 按声明的数据类型转换varbind值
fn convert_value(value: &SnmpValue, data_type: MetricDataType) -> Value {
    match data_type {
        MetricDataType::Boolean => match value.as_i64() {
            Some(v) => json!(v != 0),
            None => json!(value.as_display_string().unwrap_or_default()),
        },
        MetricDataType::String => json!(value.as_display_string().unwrap_or_default()),
        MetricDataType::Gauge | MetricDataType::Counter => match value.as_u64() {
            Some(v) => json!(v),
            None => match value.as_i64() {
                Some(v) => json!(v),
                None => json!(value.as_display_string().unwrap_or_default()),
            },
        },
    }
}

/// 质量评分 = 100 − 50×空值占比，全部为空记0分
pub fn quality_score(requested: usize, null_count: usize) -> u8 {
    if requested == 0 || null_count >= requested {
        return 0;
    }
    let ratio = null_count as f64 / requested as f64;
    (100.0 - 50.0 * ratio).round() as u8
}

#[async_trait]
impl CollectorPlugin for SnmpCollectorPlugin {
    fn plugin_type(&self) -> &str {
        PLUGIN_TYPE
    }

    fn name(&self) -> &str {
        "SNMP采集插件"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn description(&self) -> &str {
        "通过SNMP协议采集网络设备指标"
    }

    fn supported_protocols(&self) -> Vec<String> {
        vec!["SNMP".to_string()]
    }

    fn supported_metric_types(&self) -> Vec<String> {
        vec![
            "system_info".to_string(),
            "interface_status".to_string(),
            "cpu_usage".to_string(),
            "memory_usage".to_string(),
            "storage_usage".to_string(),
            "custom_oids".to_string(),
        ]
    }

    async fn initialize(&self, config: &Map<String, Value>) -> CollectorResult<()> {
        let timeout_ms = config
            .get("default_timeout_ms")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_TIMEOUT_MS);
        let retries = config
            .get("retries")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_RETRIES as u64) as u32;
        *self.defaults.write().unwrap_or_else(|e| e.into_inner()) = SnmpDefaults {
            timeout_ms,
            retries,
        };
        self.stats.mark_initialized(true);
        debug!(plugin = PLUGIN_TYPE, timeout_ms, retries, "SNMP插件初始化完成");
        Ok(())
    }

    async fn destroy(&self) -> CollectorResult<()> {
        self.cache.close_all().await;
        self.stats.mark_initialized(false);
        Ok(())
    }

    async fn collect(
        &self,
        device: &Device,
        metric: &MetricConfig,
        context: &CollectionContext,
    ) -> CollectionResult {
        let start_time = Utc::now();
        let started = Instant::now();

        let fail = |code, msg: String| {
            CollectionResult::failure(
                PLUGIN_TYPE,
                &device.id,
                &metric.name,
                &context.session_id,
                start_time,
                code,
                msg,
            )
        };

        if !self.stats.is_initialized() {
            return fail(CollectError::ExecutionError, "插件未初始化".to_string());
        }

        // v3需要USM认证加密，线路层未实现，直接给出结构化失败
        let version_hint = metric
            .param_str("version")
            .or_else(|| context.credential_str("version"))
            .unwrap_or("2c");
        if matches!(version_hint.trim().to_lowercase().as_str(), "3" | "v3") {
            return fail(
                CollectError::Auth,
                "SNMP v3暂不支持，请使用v1/v2c".to_string(),
            );
        }

        let config = match self.session_config(device, metric, context) {
            Ok(config) => config,
            Err(e) => {
                self.stats.record(false, 0);
                return fail(e.to_collect_error(), e.to_string());
            }
        };

        let plan = match Self::plan_oids(metric) {
            Ok(plan) => plan,
            Err(message) => {
                self.stats.record(false, 0);
                return fail(CollectError::Parse, message);
            }
        };
        let oid_list: Vec<String> = plan.iter().map(|(_, oid)| oid.clone()).collect();

        let session = match self.cache.get_or_create(config).await {
            Ok(session) => session,
            Err(e) => {
                self.stats.record(false, started.elapsed().as_millis() as u64);
                return fail(e.to_collect_error(), e.to_string());
            }
        };

        let values = match session.get(&oid_list).await {
            Ok(values) => values,
            Err(e) => {
                warn!(
                    device_id = %device.id,
                    metric = %metric.name,
                    error = %e,
                    "SNMP采集失败"
                );
                self.stats.record(false, started.elapsed().as_millis() as u64);
                return fail(e.to_collect_error(), e.to_string());
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let (metrics, null_count) = Self::build_metrics(metric, &plan, &values);

        if metrics.is_empty() {
            self.stats.record(false, elapsed_ms);
            return fail(
                CollectError::NotFound,
                "请求的OID均未返回有效值".to_string(),
            );
        }

        let score = quality_score(plan.len(), null_count);
        self.stats.record(true, elapsed_ms);
        CollectionResult::success(
            PLUGIN_TYPE,
            &device.id,
            &metric.name,
            &context.session_id,
            start_time,
            metrics,
            score,
        )
    }

    async fn test_connection(
        &self,
        device: &Device,
        context: &CollectionContext,
    ) -> ConnectionTestResult {
        let metric = MetricConfig::new("connection_test", "system_info");
        let config = match self.session_config(device, &metric, context) {
            Ok(config) => config,
            Err(e) => return ConnectionTestResult::failed(e.to_string()),
        };
        let started = Instant::now();
        let session = match self.cache.get_or_create(config).await {
            Ok(session) => session,
            Err(e) => return ConnectionTestResult::failed(format!("连接失败: {e}")),
        };
        match session.get(&[oids::SYS_DESCR.to_string()]).await {
            Ok(_) => ConnectionTestResult::ok(
                "SNMP连接正常",
                started.elapsed().as_millis() as u64,
            ),
            Err(e) => ConnectionTestResult::failed(format!("连接失败: {e}")),
        }
    }

    async fn discover_metrics(
        &self,
        device: &Device,
        context: &CollectionContext,
    ) -> Vec<AvailableMetric> {
        let mut discovered = Vec::new();
        let probe = MetricConfig::new("probe", "system_info");
        let Ok(config) = self.session_config(device, &probe, context) else {
            return discovered;
        };
        let Ok(session) = self.cache.get_or_create(config).await else {
            return discovered;
        };
        let system: Vec<String> = oids::SYSTEM_OIDS
            .iter()
            .map(|(_, oid)| oid.to_string())
            .collect();
        if let Ok(values) = session.get(&system).await {
            let answered = values.iter().filter(|(_, v)| !v.is_null()).count();
            if answered > 0 {
                for metric_type in ["system_info", "cpu_usage", "memory_usage"] {
                    discovered.push(AvailableMetric {
                        name: metric_type.to_string(),
                        metric_type: metric_type.to_string(),
                        description: Some("设备响应SNMP系统组查询".to_string()),
                        suggested_parameters: Map::new(),
                    });
                }
            }
        }
        debug!(
            device_id = %device.id,
            count = discovered.len(),
            "SNMP指标探测完成"
        );
        discovered
    }

    fn validate_config(&self, metric: &MetricConfig) -> ConfigValidationResult {
        let mut result = ConfigValidationResult::ok();

        if !self.supported_metric_types().contains(&metric.metric_type) {
            result.add_error(
                "metric_type",
                format!("不支持的指标类型: {}", metric.metric_type),
                ValidationSeverity::High,
            );
            return result;
        }

        if metric.metric_type == "custom_oids" {
            match metric.parameters.get("oids") {
                None => {
                    result.add_error("oids", "缺少oids参数", ValidationSeverity::High);
                }
                Some(value) => {
                    let oid_re = Regex::new(OID_PATTERN).expect("内置OID正则");
                    let oid_strings: Vec<String> = match value {
                        Value::Array(list) => list
                            .iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect(),
                        Value::Object(map) => map
                            .values()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect(),
                        _ => Vec::new(),
                    };
                    if oid_strings.is_empty() {
                        result.add_error(
                            "oids",
                            "oids参数必须是OID数组或名称到OID的映射",
                            ValidationSeverity::High,
                        );
                    }
                    for oid in oid_strings {
                        if !oid_re.is_match(&oid) {
                            result.add_error(
                                "oids",
                                format!("无效的OID: {oid}"),
                                ValidationSeverity::High,
                            );
                        }
                    }
                }
            }
        }

        if let Some(version) = metric.param_str("version") {
            if matches!(version.trim().to_lowercase().as_str(), "3" | "v3") {
                result.add_error(
                    "version",
                    "SNMP v3暂不支持",
                    ValidationSeverity::High,
                );
            } else if SnmpVersion::parse(version).is_err() {
                result.add_error(
                    "version",
                    format!("无效的SNMP版本: {version}"),
                    ValidationSeverity::High,
                );
            }
        }

        if metric.timeout_ms < 1000 {
            result.add_warning(
                "timeout_ms",
                "SNMP查询建议至少1秒超时",
                Some(json!(DEFAULT_TIMEOUT_MS)),
            );
        }

        result
    }

    fn config_template(&self) -> Value {
        json!({
            "plugin_type": PLUGIN_TYPE,
            "parameters": {
                "version": { "type": "string", "default": "2c", "enum": ["1", "2c"] },
                "community": { "type": "string", "default": "public" },
                "interface_index": { "type": "integer", "default": 1, "description": "interface_status类型使用" },
                "storage_index": { "type": "integer", "default": 1, "description": "storage_usage类型使用" },
                "oids": { "type": "array|object", "description": "custom_oids类型必填" }
            },
            "credentials": {
                "community": { "type": "string" },
                "version": { "type": "string" }
            }
        })
    }

    fn statistics(&self) -> PluginStatistics {
        self.stats.snapshot()
    }

    fn health_status(&self) -> PluginHealthStatus {
        self.stats.health_status()
    }
}
