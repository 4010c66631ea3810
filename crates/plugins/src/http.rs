//! HTTP/HTTPS采集插件
//!
//! 按指标类型解析响应体（健康检查、JSON路径、XML路径、正则提取、
//! 完整API响应、自定义端点），并根据状态码/耗时/响应体计算质量评分。

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use collector_domain::{
    AvailableMetric, CollectionContext, CollectionResult, ConfigValidationResult,
    ConnectionTestResult, Device, MetricConfig, PluginHealthStatus, PluginStatistics,
    ValidationSeverity,
};
use collector_errors::{CollectError, CollectorError, CollectorResult};

use crate::stats::StatsRecorder;
use crate::traits::CollectorPlugin;

pub const PLUGIN_TYPE: &str = "http-collector";

const DEFAULT_TIMEOUT_MS: u64 = 5000;
const DISCOVERY_ENDPOINTS: &[&str] = &[
    "/health",
    "/status",
    "/api/health",
    "/metrics",
    "/api/v1/status",
];
const HEALTHY_BODY_VALUES: &[&str] = &["UP", "OK", "HEALTHY"];

/// HTTP采集插件
pub struct HttpCollectorPlugin {
    client: std::sync::RwLock<Option<reqwest::Client>>,
    stats: StatsRecorder,
}

impl HttpCollectorPlugin {
    pub fn new() -> Self {
        Self {
            client: std::sync::RwLock::new(None),
            stats: StatsRecorder::new(PLUGIN_TYPE),
        }
    }

    fn client(&self) -> Option<reqwest::Client> {
        self.client.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// 由设备地址、端口与指标参数拼装请求URL，url参数可整体覆盖
    fn build_url(&self, device: &Device, metric: &MetricConfig) -> String {
        if let Some(url) = metric.param_str("url") {
            return url.to_string();
        }
        let use_https = metric
            .parameters
            .get("use_https")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let scheme = if use_https { "https" } else { "http" };
        let path = metric.param_str("path").unwrap_or("/");
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        let mut url = format!("{}://{}:{}{}", scheme, device.address, device.port, path);
        if let Some(query) = metric.param_str("query") {
            if !query.is_empty() {
                url.push('?');
                url.push_str(query);
            }
        }
        url
    }

    /// 按凭据中的auth_type附加认证信息
    fn apply_auth(
        &self,
        builder: reqwest::RequestBuilder,
        metric: &MetricConfig,
        context: &CollectionContext,
    ) -> reqwest::RequestBuilder {
        match context.credential_str("auth_type").unwrap_or("none") {
            "basic" => {
                let username = context.credential_str("username").unwrap_or_default();
                let password = context.credential_str("password");
                builder.basic_auth(username, password)
            }
            "bearer" => match context.credential_str("token") {
                Some(token) => builder.bearer_auth(token),
                None => builder,
            },
            "apikey" => match context.credential_str("api_key") {
                Some(key) => {
                    let header = metric.param_str("api_key_header").unwrap_or("X-API-Key");
                    builder.header(header, key)
                }
                None => builder,
            },
            _ => builder,
        }
    }

    fn map_request_error(err: &reqwest::Error) -> (CollectError, String) {
        if err.is_timeout() {
            (CollectError::Timeout, format!("请求超时: {err}"))
        } else if err.is_connect() {
            (CollectError::Connection, format!("连接失败: {err}"))
        } else {
            (CollectError::Unknown, format!("请求失败: {err}"))
        }
    }

    fn map_status_error(status: u16) -> (CollectError, String) {
        match status {
            401 | 403 => (CollectError::Auth, format!("认证失败: HTTP {status}")),
            404 => (CollectError::NotFound, format!("资源不存在: HTTP {status}")),
            500..=599 => (CollectError::Server, format!("服务端错误: HTTP {status}")),
            _ => (CollectError::Unknown, format!("异常状态码: HTTP {status}")),
        }
    }

    /// 按指标类型解析响应体，返回写入结果的指标键值
    fn parse_body(
        &self,
        metric: &MetricConfig,
        status: u16,
        body: &str,
        elapsed_ms: u64,
    ) -> Result<Map<String, Value>, String> {
        let mut metrics = Map::new();
        match metric.metric_type.as_str() {
            "health_check" => {
                let status_ok = (200..300).contains(&status);
                let body_ok = match serde_json::from_str::<Value>(body) {
                    Ok(parsed) => parsed
                        .get("status")
                        .and_then(|v| v.as_str())
                        .map(|s| HEALTHY_BODY_VALUES.contains(&s.to_uppercase().as_str()))
                        .unwrap_or(true),
                    // 健康检查不要求响应体是JSON
                    Err(_) => true,
                };
                metrics.insert("isHealthy".to_string(), json!(status_ok && body_ok));
            }
            "json_path" => {
                let path = metric
                    .param_str("json_path")
                    .or_else(|| metric.param_str("extract_path"))
                    .ok_or_else(|| "缺少json_path参数".to_string())?;
                let parsed: Value = serde_json::from_str(body)
                    .map_err(|e| format!("响应体不是合法JSON: {e}"))?;
                let value = extract_json_path(&parsed, path)
                    .ok_or_else(|| format!("JSON路径无匹配: {path}"))?;
                metrics.insert(metric.name.clone(), value);
            }
            "xml_path" => {
                let path = metric
                    .param_str("xml_path")
                    .ok_or_else(|| "缺少xml_path参数".to_string())?;
                let value = extract_xml_path(body, path)
                    .ok_or_else(|| format!("XML路径无匹配: {path}"))?;
                metrics.insert(metric.name.clone(), json!(value));
            }
            "regex_extract" => {
                let pattern = metric
                    .param_str("pattern")
                    .ok_or_else(|| "缺少pattern参数".to_string())?;
                let re = regex::Regex::new(pattern).map_err(|e| format!("无效的正则: {e}"))?;
                let captures = re
                    .captures(body)
                    .ok_or_else(|| format!("正则无匹配: {pattern}"))?;
                let value = captures
                    .get(1)
                    .map(|m| m.as_str())
                    .ok_or_else(|| "正则缺少捕获组".to_string())?;
                metrics.insert(metric.name.clone(), json!(value));
            }
            "api_response" => {
                let parsed: Value = serde_json::from_str(body)
                    .map_err(|e| format!("响应体不是合法JSON: {e}"))?;
                match parsed {
                    Value::Object(fields) => {
                        for (key, value) in fields {
                            metrics.insert(key, value);
                        }
                    }
                    other => {
                        metrics.insert(metric.name.clone(), other);
                    }
                }
            }
            "custom_endpoint" => {
                metrics.insert("bodySize".to_string(), json!(body.len()));
            }
            other => {
                return Err(format!("不支持的指标类型: {other}"));
            }
        }
        metrics.insert("statusCode".to_string(), json!(status));
        metrics.insert("responseTime".to_string(), json!(elapsed_ms));
        Ok(metrics)
    }
}

impl Default for HttpCollectorPlugin {
    fn default() -> Self {
        Self::new()
    }
}

/// 质量评分：基准100，按状态码、耗时、响应体扣分，下限0
pub fn quality_score(status: u16, elapsed_ms: u64, body_empty: bool, parse_error: bool) -> u8 {
    let mut score: i32 = 100;
    match status {
        300..=399 => score -= 10,
        400..=499 => score -= 30,
        500..=599 => score -= 50,
        _ => {}
    }
    if elapsed_ms > 10_000 {
        score -= 30;
    } else if elapsed_ms > 5_000 {
        score -= 20;
    } else if elapsed_ms > 2_000 {
        score -= 10;
    }
    if body_empty {
        score -= 20;
    }
    if parse_error {
        score -= 25;
    }
    score.max(0) as u8
}

/// 简化的JSON路径提取，支持 $.a.b[0].c 形式
pub fn extract_json_path(root: &Value, path: &str) -> Option<Value> {
    let path = path.strip_prefix("$.").or_else(|| path.strip_prefix('$')).unwrap_or(path);
    let mut current = root;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        let (key, indexes) = match segment.find('[') {
            Some(pos) => (&segment[..pos], &segment[pos..]),
            None => (segment, ""),
        };
        if !key.is_empty() {
            current = current.get(key)?;
        }
        for index_part in indexes.split('[').filter(|s| !s.is_empty()) {
            let index: usize = index_part.strip_suffix(']')?.parse().ok()?;
            current = current.get(index)?;
        }
    }
    Some(current.clone())
}

/// 简化的XML路径提取，按 a/b/c 逐层取标签文本
pub fn extract_xml_path(body: &str, path: &str) -> Option<String> {
    let mut current = body.to_string();
    for tag in path.split('/').filter(|s| !s.is_empty()) {
        let escaped = regex::escape(tag);
        let pattern = format!(r"(?s)<{escaped}(?:\s[^>]*)?>(.*?)</{escaped}>");
        let re = regex::Regex::new(&pattern).ok()?;
        current = re.captures(&current)?.get(1)?.as_str().to_string();
    }
    let text = current.trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[async_trait]
impl CollectorPlugin for HttpCollectorPlugin {
    fn plugin_type(&self) -> &str {
        PLUGIN_TYPE
    }

    fn name(&self) -> &str {
        "HTTP采集插件"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn description(&self) -> &str {
        "通过HTTP/HTTPS接口采集设备指标"
    }

    fn supported_protocols(&self) -> Vec<String> {
        vec!["HTTP".to_string(), "HTTPS".to_string()]
    }

    fn supported_metric_types(&self) -> Vec<String> {
        vec![
            "health_check".to_string(),
            "json_path".to_string(),
            "xml_path".to_string(),
            "regex_extract".to_string(),
            "api_response".to_string(),
            "custom_endpoint".to_string(),
        ]
    }

    fn supports_concurrent_collection(&self) -> bool {
        true
    }

    fn recommended_concurrency(&self) -> usize {
        4
    }

    async fn initialize(&self, config: &Map<String, Value>) -> CollectorResult<()> {
        let timeout_ms = config
            .get("default_timeout_ms")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_TIMEOUT_MS);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| CollectorError::plugin_init_failed(PLUGIN_TYPE, e.to_string()))?;
        *self.client.write().unwrap_or_else(|e| e.into_inner()) = Some(client);
        self.stats.mark_initialized(true);
        debug!(plugin = PLUGIN_TYPE, timeout_ms, "HTTP插件初始化完成");
        Ok(())
    }

    async fn destroy(&self) -> CollectorResult<()> {
        *self.client.write().unwrap_or_else(|e| e.into_inner()) = None;
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

        let Some(client) = self.client() else {
            return fail(CollectError::ExecutionError, "插件未初始化".to_string());
        };

        let url = self.build_url(device, metric);
        let method = metric.param_str("method").unwrap_or("GET").to_uppercase();

        let mut builder = match method.as_str() {
            "GET" => client.get(&url),
            "POST" => client.post(&url),
            "PUT" => client.put(&url),
            "DELETE" => client.delete(&url),
            "HEAD" => client.head(&url),
            other => {
                let result = fail(
                    CollectError::Unsupported,
                    format!("不支持的HTTP方法: {other}"),
                );
                self.stats.record(false, 0);
                return result;
            }
        };

        builder = builder.timeout(Duration::from_millis(metric.timeout_ms));
        if let Some(Value::Object(headers)) = metric.parameters.get("headers") {
            for (key, value) in headers {
                if let Some(v) = value.as_str() {
                    builder = builder.header(key, v);
                }
            }
        }
        if let Some(body) = metric.param_str("body") {
            builder = builder.body(body.to_string());
        }
        builder = self.apply_auth(builder, metric, context);

        debug!(
            device_id = %device.id,
            metric = %metric.name,
            %method,
            %url,
            "发起HTTP采集请求"
        );

        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) => {
                let (code, msg) = Self::map_request_error(&err);
                self.stats.record(false, started.elapsed().as_millis() as u64);
                return fail(code, msg);
            }
        };

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let elapsed_ms = started.elapsed().as_millis() as u64;

        // 健康检查指标的失败状态码本身就是采集结论，不算采集失败
        if !(200..400).contains(&status) && metric.metric_type != "health_check" {
            let (code, msg) = Self::map_status_error(status);
            self.stats.record(false, elapsed_ms);
            return fail(code, msg);
        }

        match self.parse_body(metric, status, &body, elapsed_ms) {
            Ok(metrics) => {
                let score = quality_score(status, elapsed_ms, body.is_empty(), false);
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
            Err(message) => {
                warn!(
                    device_id = %device.id,
                    metric = %metric.name,
                    %message,
                    "HTTP响应解析失败"
                );
                self.stats.record(false, elapsed_ms);
                fail(CollectError::Parse, message)
            }
        }
    }

    async fn test_connection(
        &self,
        device: &Device,
        _context: &CollectionContext,
    ) -> ConnectionTestResult {
        let Some(client) = self.client() else {
            return ConnectionTestResult::failed("插件未初始化");
        };
        let url = format!("http://{}:{}/", device.address, device.port);
        let started = Instant::now();
        match client
            .get(&url)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .send()
            .await
        {
            Ok(response) => ConnectionTestResult::ok(
                format!("连接成功: HTTP {}", response.status().as_u16()),
                started.elapsed().as_millis() as u64,
            ),
            Err(err) => ConnectionTestResult::failed(format!("连接失败: {err}")),
        }
    }

    async fn discover_metrics(
        &self,
        device: &Device,
        _context: &CollectionContext,
    ) -> Vec<AvailableMetric> {
        let mut discovered = Vec::new();
        let Some(client) = self.client() else {
            return discovered;
        };
        for endpoint in DISCOVERY_ENDPOINTS {
            let url = format!("http://{}:{}{}", device.address, device.port, endpoint);
            let response = client
                .get(&url)
                .timeout(Duration::from_millis(2000))
                .send()
                .await;
            if let Ok(response) = response {
                if response.status().is_success() {
                    let mut params = Map::new();
                    params.insert("path".to_string(), json!(endpoint));
                    params.insert("method".to_string(), json!("GET"));
                    discovered.push(AvailableMetric {
                        name: endpoint.trim_start_matches('/').replace('/', "_"),
                        metric_type: if endpoint.contains("health") || endpoint.contains("status") {
                            "health_check".to_string()
                        } else {
                            "api_response".to_string()
                        },
                        description: Some(format!("探测到可用端点 {endpoint}")),
                        suggested_parameters: params,
                    });
                }
            }
        }
        debug!(
            device_id = %device.id,
            count = discovered.len(),
            "HTTP指标探测完成"
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
        }

        if let Some(method) = metric.param_str("method") {
            let method = method.to_uppercase();
            if !["GET", "POST", "PUT", "DELETE", "HEAD"].contains(&method.as_str()) {
                result.add_error(
                    "method",
                    format!("无效的HTTP方法: {method}"),
                    ValidationSeverity::High,
                );
            }
        }

        if metric.param_str("url").is_none() && metric.param_str("path").is_none() {
            result.add_error(
                "path",
                "缺少path或url参数",
                ValidationSeverity::High,
            );
        }

        match metric.metric_type.as_str() {
            "json_path" if metric.param_str("json_path").is_none() => {
                result.add_error("json_path", "缺少json_path参数", ValidationSeverity::High);
            }
            "regex_extract" => match metric.param_str("pattern") {
                None => {
                    result.add_error("pattern", "缺少pattern参数", ValidationSeverity::High);
                }
                Some(pattern) => {
                    if regex::Regex::new(pattern).is_err() {
                        result.add_error(
                            "pattern",
                            format!("无效的正则表达式: {pattern}"),
                            ValidationSeverity::High,
                        );
                    }
                }
            },
            "xml_path" if metric.param_str("xml_path").is_none() => {
                result.add_error("xml_path", "缺少xml_path参数", ValidationSeverity::High);
            }
            _ => {}
        }

        if metric.timeout_ms < 1000 {
            result.add_warning(
                "timeout_ms",
                "超时小于1秒，网络抖动时容易误报失败",
                Some(json!(DEFAULT_TIMEOUT_MS)),
            );
        }
        if metric.interval_secs < 10 {
            result.add_warning(
                "interval_secs",
                "采集间隔过短，可能给目标设备造成压力",
                Some(json!(60)),
            );
        }

        result
    }

    fn config_template(&self) -> Value {
        json!({
            "plugin_type": PLUGIN_TYPE,
            "parameters": {
                "path": { "type": "string", "required": true, "description": "请求路径" },
                "method": { "type": "string", "default": "GET", "enum": ["GET", "POST", "PUT", "DELETE", "HEAD"] },
                "query": { "type": "string", "required": false },
                "headers": { "type": "object", "required": false },
                "body": { "type": "string", "required": false },
                "use_https": { "type": "boolean", "default": false },
                "json_path": { "type": "string", "description": "json_path类型必填，如 $.data.value" },
                "xml_path": { "type": "string", "description": "xml_path类型必填，如 root/device/status" },
                "pattern": { "type": "string", "description": "regex_extract类型必填，取第一个捕获组" },
                "api_key_header": { "type": "string", "default": "X-API-Key" }
            },
            "credentials": {
                "auth_type": { "enum": ["none", "basic", "bearer", "apikey"] },
                "username": {}, "password": {}, "token": {}, "api_key": {}
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
