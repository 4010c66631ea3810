use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 单次采集调用的结构化错误码
///
/// 采集结果不抛出异常，所有失败通过结果对象中的错误码表达，
/// 由各个插件在产生错误的位置直接给出分类。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CollectError {
    #[serde(rename = "TIMEOUT")]
    Timeout,
    #[serde(rename = "CONNECTION")]
    Connection,
    #[serde(rename = "AUTH")]
    Auth,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "SERVER")]
    Server,
    #[serde(rename = "PARSE")]
    Parse,
    #[serde(rename = "UNSUPPORTED")]
    Unsupported,
    #[serde(rename = "NO_PLUGIN_FOUND")]
    NoPluginFound,
    #[serde(rename = "EXECUTION_ERROR")]
    ExecutionError,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl CollectError {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectError::Timeout => "TIMEOUT",
            CollectError::Connection => "CONNECTION",
            CollectError::Auth => "AUTH",
            CollectError::NotFound => "NOT_FOUND",
            CollectError::Server => "SERVER",
            CollectError::Parse => "PARSE",
            CollectError::Unsupported => "UNSUPPORTED",
            CollectError::NoPluginFound => "NO_PLUGIN_FOUND",
            CollectError::ExecutionError => "EXECUTION_ERROR",
            CollectError::Unknown => "UNKNOWN",
        }
    }

    /// 该错误码对应的失败是否值得重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CollectError::Timeout | CollectError::Connection | CollectError::Server
        )
    }
}

impl std::fmt::Display for CollectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 服务层错误
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("采集任务未找到: {id}")]
    TaskNotFound { id: String },
    #[error("任务名称已存在: {name}")]
    DuplicateTaskName { name: String },
    #[error("设备未找到: {id}")]
    DeviceNotFound { id: String },
    #[error("插件未找到: {plugin_type}")]
    PluginNotFound { plugin_type: String },
    #[error("插件已注册: {plugin_type}")]
    PluginAlreadyRegistered { plugin_type: String },
    #[error("插件初始化失败: {plugin_type} - {message}")]
    PluginInitFailed {
        plugin_type: String,
        message: String,
    },
    #[error("插件状态不允许该操作: {plugin_type} 当前状态 {state}")]
    InvalidPluginState {
        plugin_type: String,
        state: String,
    },
    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },
    #[error("无效的调度配置: {0}")]
    InvalidSchedule(String),
    #[error("数据验证失败: {0}")]
    ValidationError(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("调度器未运行")]
    SchedulerNotRunning,
    #[error("操作超时: {0}")]
    Timeout(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type CollectorResult<T> = Result<T, CollectorError>;

impl CollectorError {
    pub fn task_not_found<S: Into<String>>(id: S) -> Self {
        Self::TaskNotFound { id: id.into() }
    }
    pub fn device_not_found<S: Into<String>>(id: S) -> Self {
        Self::DeviceNotFound { id: id.into() }
    }
    pub fn plugin_not_found<S: Into<String>>(plugin_type: S) -> Self {
        Self::PluginNotFound {
            plugin_type: plugin_type.into(),
        }
    }
    pub fn plugin_init_failed<S: Into<String>, M: Into<String>>(plugin_type: S, message: M) -> Self {
        Self::PluginInitFailed {
            plugin_type: plugin_type.into(),
            message: message.into(),
        }
    }
    pub fn invalid_schedule<S: Into<String>>(msg: S) -> Self {
        Self::InvalidSchedule(msg.into())
    }
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::ValidationError(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CollectorError::Internal(_)
                | CollectorError::Configuration(_)
                | CollectorError::PluginInitFailed { .. }
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, CollectorError::Timeout(_))
    }

    pub fn user_message(&self) -> &str {
        match self {
            CollectorError::TaskNotFound { .. } => "请求的采集任务不存在",
            CollectorError::DeviceNotFound { .. } => "请求的设备不存在",
            CollectorError::DuplicateTaskName { .. } => "任务名称已被占用",
            CollectorError::PluginNotFound { .. } => "请求的采集插件不存在",
            CollectorError::InvalidCron { .. } => "CRON表达式格式有误",
            CollectorError::InvalidSchedule(_) => "调度配置有误",
            CollectorError::ValidationError(_) => "输入数据验证失败",
            CollectorError::Timeout(_) => "操作超时，请稍后重试",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<serde_json::Error> for CollectorError {
    fn from(err: serde_json::Error) -> Self {
        CollectorError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for CollectorError {
    fn from(err: anyhow::Error) -> Self {
        CollectorError::Internal(err.to_string())
    }
}
