//! 全链路集成测试：真实HTTP端点 → 插件 → 引擎 → 任务服务 → 调度器

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Map};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use collector_dispatcher::{CollectionTaskService, NewTask, TaskRunner, TaskScheduler};
use collector_domain::{
    Device, DeviceDirectory, DeviceType, ExecutionStatus, LogRepository, MetricConfig,
    ScheduleType, TaskRepository,
};
use collector_engine::{CollectorEngine, LifecycleManager, PluginRegistry};
use collector_infrastructure::{
    InMemoryDeviceDirectory, InMemoryLogRepository, InMemoryStatisticsRepository,
    InMemoryTaskRepository, StaticCredentialResolver,
};
use collector_plugins::HttpCollectorPlugin;

/// 起一个只会回答健康检查的HTTP端点，返回端口
async fn spawn_health_endpoint() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let body = "{\"status\":\"UP\"}";
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    port
}

struct Stack {
    tasks: Arc<InMemoryTaskRepository>,
    logs: Arc<InMemoryLogRepository>,
    service: Arc<CollectionTaskService>,
    scheduler: Arc<TaskScheduler>,
}

async fn build_stack(device_port: u16) -> Stack {
    let registry = Arc::new(PluginRegistry::new());
    registry
        .register(Arc::new(HttpCollectorPlugin::new()))
        .await
        .unwrap();
    let lifecycle = Arc::new(LifecycleManager::new(Arc::clone(&registry)));
    lifecycle
        .initialize_plugin("http-collector", Map::new())
        .await
        .unwrap();
    lifecycle.start("http-collector").await.unwrap();
    let engine = Arc::new(CollectorEngine::new(registry, lifecycle));

    let devices = Arc::new(InMemoryDeviceDirectory::new());
    devices
        .insert(Device::new(
            "d1",
            "测试摄像机",
            "127.0.0.1",
            device_port,
            DeviceType::new("camera", "网络摄像机", vec!["HTTP".into()]),
        ))
        .await;

    let tasks = Arc::new(InMemoryTaskRepository::new());
    let logs = Arc::new(InMemoryLogRepository::new());
    let service = Arc::new(CollectionTaskService::new(
        Arc::clone(&tasks) as Arc<dyn TaskRepository>,
        Arc::clone(&logs) as Arc<dyn LogRepository>,
        Arc::new(InMemoryStatisticsRepository::new()),
        Arc::clone(&devices) as Arc<dyn DeviceDirectory>,
        Arc::new(StaticCredentialResolver::new()),
        engine,
    ));
    let scheduler = Arc::new(TaskScheduler::new(
        Arc::clone(&tasks) as Arc<dyn TaskRepository>,
        Duration::from_secs(1),
    ));
    scheduler.set_runner(Arc::clone(&service) as Arc<dyn TaskRunner>);
    service.set_scheduler(Arc::clone(&scheduler));

    Stack {
        tasks,
        logs,
        service,
        scheduler,
    }
}

fn health_task(name: &str) -> NewTask {
    let mut config = Map::new();
    config.insert("frequency".to_string(), json!(1));
    let mut input = NewTask::new(name, ScheduleType::Simple, config);
    input.device_ids = vec!["d1".to_string()];
    input.metric_configs = vec![
        MetricConfig::new("device_status", "health_check")
            .with_parameter("path", json!("/health")),
    ];
    input
}

#[tokio::test]
async fn test_manual_execution_against_live_endpoint() {
    let port = spawn_health_endpoint().await;
    let stack = build_stack(port).await;

    let task = stack.service.create_task(health_task("健康检查")).await.unwrap();
    let execution_id = stack.service.execute_task_manually(&task.id).await.unwrap();

    let log = stack
        .logs
        .find_by_execution_id(&execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(log.status, ExecutionStatus::Completed);
    assert!(log.success);
    assert!(log.data_count >= 1);

    let stored = stack.tasks.find_by_id(&task.id).await.unwrap().unwrap();
    assert_eq!(stored.execution_count, 1);
    assert_eq!(stored.success_count, 1);
}

#[tokio::test]
async fn test_scheduler_fires_and_requeues_task() {
    let port = spawn_health_endpoint().await;
    let stack = build_stack(port).await;

    // 创建即排定（服务已接线调度器）
    let task = stack.service.create_task(health_task("周期采集")).await.unwrap();
    assert_eq!(stack.scheduler.statistics().await.unwrap().queued_tasks, 1);

    // 手动拨动时钟触发一轮扫描
    Arc::clone(&stack.scheduler)
        .tick(Utc::now() + chrono::Duration::seconds(2))
        .await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    let stats = stack.scheduler.statistics().await.unwrap();
    assert_eq!(stats.fired_count, 1);
    assert_eq!(stats.queued_tasks, 1);

    let stored = stack.tasks.find_by_id(&task.id).await.unwrap().unwrap();
    assert_eq!(stored.execution_count, 1);
    assert!(stored.next_execution_time.is_some());

    let logs = stack.logs.find_by_task_id(&task.id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert!(logs[0].success);
}
