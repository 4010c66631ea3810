//! 应用装配
//!
//! 插件注册与初始化、引擎、任务服务和调度器的接线都在这里完成，
//! 各组件自身不感知装配方式。

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Map;
use tokio::sync::broadcast;
use tracing::{info, warn};

use collector_dispatcher::{CollectionTaskService, TaskScheduler};
use collector_engine::{CollectorEngine, LifecycleManager, PluginRegistry};
use collector_infrastructure::{
    AppConfig, InMemoryDeviceDirectory, InMemoryLogRepository, InMemoryStatisticsRepository,
    InMemoryTaskRepository, StaticCredentialResolver,
};
use collector_plugins::{HttpCollectorPlugin, SnmpCollectorPlugin};

/// 日志与过期任务的维护周期
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(3600);

pub struct Application {
    config: AppConfig,
    registry: Arc<PluginRegistry>,
    lifecycle: Arc<LifecycleManager>,
    scheduler: Arc<TaskScheduler>,
    service: Arc<CollectionTaskService>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        // 插件注册与初始化
        let registry = Arc::new(PluginRegistry::new());
        registry
            .register(Arc::new(HttpCollectorPlugin::new()))
            .await
            .context("注册HTTP采集插件失败")?;
        registry
            .register(Arc::new(SnmpCollectorPlugin::new()))
            .await
            .context("注册SNMP采集插件失败")?;

        let lifecycle = Arc::new(LifecycleManager::new(Arc::clone(&registry)));
        lifecycle
            .initialize_plugin("http-collector", Map::new())
            .await
            .context("初始化HTTP采集插件失败")?;
        lifecycle
            .initialize_plugin("snmp-collector", config.snmp_init_config())
            .await
            .context("初始化SNMP采集插件失败")?;
        lifecycle.start("http-collector").await?;
        lifecycle.start("snmp-collector").await?;

        let engine = Arc::new(CollectorEngine::new(
            Arc::clone(&registry),
            Arc::clone(&lifecycle),
        ));

        // 进程内仓储与凭据表
        let tasks = Arc::new(InMemoryTaskRepository::new());
        let service = Arc::new(CollectionTaskService::new(
            Arc::clone(&tasks) as Arc<dyn collector_domain::TaskRepository>,
            Arc::new(InMemoryLogRepository::new()),
            Arc::new(InMemoryStatisticsRepository::new()),
            Arc::new(InMemoryDeviceDirectory::new()),
            Arc::new(StaticCredentialResolver::new()),
            engine,
        ));

        // 调度器与任务服务互相接线
        let scheduler = Arc::new(TaskScheduler::new(
            tasks,
            Duration::from_secs(config.scheduler.tick_interval_secs),
        ));
        scheduler.set_runner(Arc::clone(&service) as Arc<dyn collector_dispatcher::TaskRunner>);
        service.set_scheduler(Arc::clone(&scheduler));

        Ok(Self {
            config,
            registry,
            lifecycle,
            scheduler,
            service,
        })
    }

    pub fn service(&self) -> &Arc<CollectionTaskService> {
        &self.service
    }

    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        Arc::clone(&self.scheduler).start().await?;

        let health_handle = Arc::clone(&self.lifecycle).spawn_health_loop(Duration::from_secs(
            self.config.engine.health_check_interval_secs,
        ));

        // 定期清理历史日志和过期任务
        let maintenance_handle = {
            let service = Arc::clone(&self.service);
            let scheduler = Arc::clone(&self.scheduler);
            let retention_days = self.config.retention.log_retention_days;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(MAINTENANCE_INTERVAL);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    if let Err(e) = service.cleanup_logs(retention_days).await {
                        warn!(error = %e, "日志清理失败");
                    }
                    if let Err(e) = scheduler.cleanup_expired_tasks().await {
                        warn!(error = %e, "过期任务清理失败");
                    }
                }
            })
        };

        info!("采集引擎就绪");
        let _ = shutdown_rx.recv().await;

        // 关闭顺序：先停调度，再销毁插件
        self.scheduler.stop().await;
        health_handle.abort();
        maintenance_handle.abort();

        for plugin in self.registry.all_plugins().await {
            let plugin_type = plugin.plugin_type().to_string();
            if let Err(e) = self.lifecycle.stop(&plugin_type).await {
                warn!(plugin = %plugin_type, error = %e, "停止插件失败");
            }
            if let Err(e) = plugin.destroy().await {
                warn!(plugin = %plugin_type, error = %e, "销毁插件失败");
            }
        }
        info!("采集引擎已停止");
        Ok(())
    }
}
