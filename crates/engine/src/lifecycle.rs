//! 插件生命周期管理
//!
//! 状态机: UNINITIALIZED → READY → RUNNING；RUNNING → STOPPED；
//! 初始化失败或健康检查连续失败 → FAILED。
//! is_ready是采集引擎调度前的门禁。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use collector_domain::PluginLifecycleState;
use collector_errors::{CollectorError, CollectorResult};

use crate::registry::PluginRegistry;

/// 健康检查连续失败该次数后标记FAILED
const HEALTH_FAILURE_THRESHOLD: u32 = 3;

#[derive(Debug, Clone)]
struct PluginState {
    state: PluginLifecycleState,
    consecutive_health_failures: u32,
    last_error: Option<String>,
    updated_at: DateTime<Utc>,
}

impl Default for PluginState {
    fn default() -> Self {
        Self {
            state: PluginLifecycleState::Uninitialized,
            consecutive_health_failures: 0,
            last_error: None,
            updated_at: Utc::now(),
        }
    }
}

/// 对外的生命周期视图
#[derive(Debug, Clone)]
pub struct PluginLifecycleInfo {
    pub plugin_type: String,
    pub state: PluginLifecycleState,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// 插件生命周期管理器
pub struct LifecycleManager {
    registry: Arc<PluginRegistry>,
    states: RwLock<HashMap<String, PluginState>>,
    /// 保存初始化配置供reload使用
    init_configs: RwLock<HashMap<String, Map<String, Value>>>,
}

impl LifecycleManager {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self {
            registry,
            states: RwLock::new(HashMap::new()),
            init_configs: RwLock::new(HashMap::new()),
        }
    }

    async fn set_state(&self, plugin_type: &str, state: PluginLifecycleState, error: Option<String>) {
        let mut states = self.states.write().await;
        let entry = states.entry(plugin_type.to_string()).or_default();
        entry.state = state;
        entry.last_error = error;
        entry.updated_at = Utc::now();
        if state != PluginLifecycleState::Failed {
            entry.consecutive_health_failures = 0;
        }
    }

    pub async fn state(&self, plugin_type: &str) -> PluginLifecycleState {
        self.states
            .read()
            .await
            .get(plugin_type)
            .map(|s| s.state)
            .unwrap_or(PluginLifecycleState::Uninitialized)
    }

    /// 采集引擎调度前的门禁：启用且处于READY/RUNNING
    pub async fn is_ready(&self, plugin_type: &str) -> bool {
        self.registry.is_enabled(plugin_type).await
            && self.state(plugin_type).await.is_dispatchable()
    }

    /// 初始化插件，失败即FAILED并排除在调度之外
    pub async fn initialize_plugin(
        &self,
        plugin_type: &str,
        config: Map<String, Value>,
    ) -> CollectorResult<()> {
        let plugin = self
            .registry
            .get(plugin_type)
            .await
            .ok_or_else(|| CollectorError::plugin_not_found(plugin_type))?;

        self.init_configs
            .write()
            .await
            .insert(plugin_type.to_string(), config.clone());

        match plugin.initialize(&config).await {
            Ok(()) => {
                info!(plugin = %plugin_type, "插件初始化成功");
                self.set_state(plugin_type, PluginLifecycleState::Ready, None)
                    .await;
                Ok(())
            }
            Err(e) => {
                error!(plugin = %plugin_type, error = %e, "插件初始化失败");
                self.set_state(plugin_type, PluginLifecycleState::Failed, Some(e.to_string()))
                    .await;
                Err(CollectorError::plugin_init_failed(plugin_type, e.to_string()))
            }
        }
    }

    /// READY/STOPPED → RUNNING
    pub async fn start(&self, plugin_type: &str) -> CollectorResult<()> {
        let current = self.state(plugin_type).await;
        match current {
            PluginLifecycleState::Ready | PluginLifecycleState::Stopped => {
                self.set_state(plugin_type, PluginLifecycleState::Running, None)
                    .await;
                info!(plugin = %plugin_type, "插件已启动");
                Ok(())
            }
            other => Err(CollectorError::InvalidPluginState {
                plugin_type: plugin_type.to_string(),
                state: other.as_str().to_string(),
            }),
        }
    }

    /// RUNNING → STOPPED
    pub async fn stop(&self, plugin_type: &str) -> CollectorResult<()> {
        let current = self.state(plugin_type).await;
        match current {
            PluginLifecycleState::Running => {
                self.set_state(plugin_type, PluginLifecycleState::Stopped, None)
                    .await;
                info!(plugin = %plugin_type, "插件已停止");
                Ok(())
            }
            other => Err(CollectorError::InvalidPluginState {
                plugin_type: plugin_type.to_string(),
                state: other.as_str().to_string(),
            }),
        }
    }

    /// restart = stop + start
    pub async fn restart(&self, plugin_type: &str) -> CollectorResult<()> {
        if self.state(plugin_type).await == PluginLifecycleState::Running {
            self.stop(plugin_type).await?;
        }
        self.start(plugin_type).await
    }

    /// 用保存的配置重新初始化，不改变注册表成员
    pub async fn reload(&self, plugin_type: &str) -> CollectorResult<()> {
        let plugin = self
            .registry
            .get(plugin_type)
            .await
            .ok_or_else(|| CollectorError::plugin_not_found(plugin_type))?;
        let config = self
            .init_configs
            .read()
            .await
            .get(plugin_type)
            .cloned()
            .unwrap_or_default();

        if let Err(e) = plugin.destroy().await {
            warn!(plugin = %plugin_type, error = %e, "reload时destroy失败");
        }
        self.initialize_plugin(plugin_type, config).await
    }

    /// 单轮健康检查，连续失败达到阈值的插件转入FAILED
    pub async fn run_health_checks(&self) {
        for plugin in self.registry.enabled_plugins().await {
            let plugin_type = plugin.plugin_type().to_string();
            let current = self.state(&plugin_type).await;
            if !current.is_dispatchable() {
                continue;
            }
            let health = plugin.health_status();
            let mut states = self.states.write().await;
            let entry = states.entry(plugin_type.clone()).or_default();
            if health.healthy {
                entry.consecutive_health_failures = 0;
            } else {
                entry.consecutive_health_failures += 1;
                warn!(
                    plugin = %plugin_type,
                    failures = entry.consecutive_health_failures,
                    message = %health.message,
                    "插件健康检查失败"
                );
                if entry.consecutive_health_failures >= HEALTH_FAILURE_THRESHOLD {
                    error!(plugin = %plugin_type, "健康检查连续失败，插件转入FAILED");
                    entry.state = PluginLifecycleState::Failed;
                    entry.last_error = Some(health.message.clone());
                    entry.updated_at = Utc::now();
                }
            }
        }
    }

    /// 后台健康检查循环
    pub fn spawn_health_loop(
        self: Arc<Self>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                self.run_health_checks().await;
            }
        })
    }

    pub async fn lifecycle_info(&self) -> Vec<PluginLifecycleInfo> {
        let states = self.states.read().await;
        let mut info: Vec<PluginLifecycleInfo> = states
            .iter()
            .map(|(plugin_type, s)| PluginLifecycleInfo {
                plugin_type: plugin_type.clone(),
                state: s.state,
                last_error: s.last_error.clone(),
                updated_at: s.updated_at,
            })
            .collect();
        info.sort_by(|a, b| a.plugin_type.cmp(&b.plugin_type));
        info
    }
}
