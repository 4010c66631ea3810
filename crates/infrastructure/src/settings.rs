//! 应用配置加载
//!
//! 配置来源按优先级：环境变量(COLLECTOR__前缀) > TOML文件 > 默认值。
//! 例如 COLLECTOR__SCHEDULER__TICK_INTERVAL_SECS=1 覆盖调度器扫描间隔。

use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::info;

use collector_errors::{CollectorError, CollectorResult};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    /// pretty或json
    pub format: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub health_check_interval_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            health_check_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub tick_interval_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SnmpSettings {
    pub timeout_ms: u64,
    pub retries: u32,
}

impl Default for SnmpSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            retries: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetentionSettings {
    pub log_retention_days: i64,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            log_retention_days: 30,
        }
    }
}

/// 采集器应用配置
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub log: LogSettings,
    pub engine: EngineSettings,
    pub scheduler: SchedulerSettings,
    pub snmp: SnmpSettings,
    pub retention: RetentionSettings,
}

impl AppConfig {
    /// 加载配置，文件可选，环境变量始终生效
    pub fn load(path: Option<&Path>) -> CollectorResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "加载配置文件");
            builder = builder.add_source(
                File::from(path).format(FileFormat::Toml).required(true),
            );
        }
        builder
            .add_source(Environment::with_prefix("COLLECTOR").separator("__"))
            .build()
            .map_err(|e| CollectorError::config_error(e.to_string()))?
            .try_deserialize()
            .map_err(|e| CollectorError::config_error(e.to_string()))
    }

    /// SNMP插件的初始化参数表，键名与插件initialize读取的一致
    pub fn snmp_init_config(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(
            "default_timeout_ms".to_string(),
            Value::from(self.snmp.timeout_ms),
        );
        map.insert("retries".to_string(), Value::from(self.snmp.retries));
        map
    }
}
