//! 插件注册表
//!
//! 协议到插件的查找表。重复的plugin_type会被拒绝注册。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use collector_errors::{CollectorError, CollectorResult};
use collector_plugins::CollectorPlugin;

struct Registration {
    plugin: Arc<dyn CollectorPlugin>,
    enabled: bool,
    registered_at: DateTime<Utc>,
}

/// 注册表对外的插件状态条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginStatusEntry {
    pub plugin_type: String,
    pub name: String,
    pub version: String,
    pub enabled: bool,
    pub registered_at: DateTime<Utc>,
}

/// 插件注册表
#[derive(Default)]
pub struct PluginRegistry {
    plugins: RwLock<HashMap<String, Registration>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册插件，plugin_type重复时返回错误
    pub async fn register(&self, plugin: Arc<dyn CollectorPlugin>) -> CollectorResult<()> {
        let plugin_type = plugin.plugin_type().to_string();
        let mut plugins = self.plugins.write().await;
        if plugins.contains_key(&plugin_type) {
            return Err(CollectorError::PluginAlreadyRegistered { plugin_type });
        }
        info!(plugin = %plugin_type, name = plugin.name(), "注册采集插件");
        plugins.insert(
            plugin_type,
            Registration {
                plugin,
                enabled: true,
                registered_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// 取消注册，返回插件以便调用方执行destroy
    pub async fn unregister(&self, plugin_type: &str) -> CollectorResult<Arc<dyn CollectorPlugin>> {
        let mut plugins = self.plugins.write().await;
        match plugins.remove(plugin_type) {
            Some(registration) => {
                info!(plugin = %plugin_type, "取消注册采集插件");
                Ok(registration.plugin)
            }
            None => Err(CollectorError::plugin_not_found(plugin_type)),
        }
    }

    pub async fn set_enabled(&self, plugin_type: &str, enabled: bool) -> CollectorResult<()> {
        let mut plugins = self.plugins.write().await;
        match plugins.get_mut(plugin_type) {
            Some(registration) => {
                registration.enabled = enabled;
                info!(plugin = %plugin_type, enabled, "更新插件启用状态");
                Ok(())
            }
            None => Err(CollectorError::plugin_not_found(plugin_type)),
        }
    }

    pub async fn is_enabled(&self, plugin_type: &str) -> bool {
        self.plugins
            .read()
            .await
            .get(plugin_type)
            .map(|r| r.enabled)
            .unwrap_or(false)
    }

    pub async fn get(&self, plugin_type: &str) -> Option<Arc<dyn CollectorPlugin>> {
        self.plugins
            .read()
            .await
            .get(plugin_type)
            .map(|r| Arc::clone(&r.plugin))
    }

    /// 返回所有声明支持该协议且处于启用状态的插件
    pub async fn find_by_protocol(&self, protocol: &str) -> Vec<Arc<dyn CollectorPlugin>> {
        self.plugins
            .read()
            .await
            .values()
            .filter(|r| r.enabled && r.plugin.supports_protocol(protocol))
            .map(|r| Arc::clone(&r.plugin))
            .collect()
    }

    /// 所有启用的插件
    pub async fn enabled_plugins(&self) -> Vec<Arc<dyn CollectorPlugin>> {
        self.plugins
            .read()
            .await
            .values()
            .filter(|r| r.enabled)
            .map(|r| Arc::clone(&r.plugin))
            .collect()
    }

    pub async fn all_plugins(&self) -> Vec<Arc<dyn CollectorPlugin>> {
        self.plugins
            .read()
            .await
            .values()
            .map(|r| Arc::clone(&r.plugin))
            .collect()
    }

    pub async fn status_list(&self) -> Vec<PluginStatusEntry> {
        self.plugins
            .read()
            .await
            .values()
            .map(|r| PluginStatusEntry {
                plugin_type: r.plugin.plugin_type().to_string(),
                name: r.plugin.name().to_string(),
                version: r.plugin.version().to_string(),
                enabled: r.enabled,
                registered_at: r.registered_at,
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.plugins.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.plugins.read().await.is_empty()
    }
}
