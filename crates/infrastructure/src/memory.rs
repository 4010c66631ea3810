//! 仓储的进程内实现
//!
//! 全部基于tokio读写锁保护的HashMap，语义与仓储抽象的约定一致：
//! 任务删除是软删除，日志清理按开始时间，统计按(任务,自然日)覆盖写入。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;

use collector_domain::{
    CollectionLog, CollectionTask, Device, DeviceDirectory, LogRepository, StatisticsRepository,
    TaskRepository, TaskStatistics,
};
use collector_errors::{CollectorError, CollectorResult};

/// 采集任务仓储的内存实现
#[derive(Default)]
pub struct InMemoryTaskRepository {
    tasks: RwLock<HashMap<String, CollectionTask>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn create(&self, task: &CollectionTask) -> CollectorResult<CollectionTask> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(CollectorError::Internal(format!(
                "任务ID冲突: {}",
                task.id
            )));
        }
        tasks.insert(task.id.clone(), task.clone());
        Ok(task.clone())
    }

    async fn find_by_id(&self, id: &str) -> CollectorResult<Option<CollectionTask>> {
        Ok(self
            .tasks
            .read()
            .await
            .get(id)
            .filter(|t| !t.deleted)
            .cloned())
    }

    async fn find_by_name(&self, name: &str) -> CollectorResult<Option<CollectionTask>> {
        Ok(self
            .tasks
            .read()
            .await
            .values()
            .find(|t| !t.deleted && t.name == name)
            .cloned())
    }

    async fn find_all(&self) -> CollectorResult<Vec<CollectionTask>> {
        let mut all: Vec<CollectionTask> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| !t.deleted)
            .cloned()
            .collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }

    async fn update(&self, task: &CollectionTask) -> CollectorResult<CollectionTask> {
        let mut tasks = self.tasks.write().await;
        if !tasks.contains_key(&task.id) {
            return Err(CollectorError::task_not_found(&task.id));
        }
        tasks.insert(task.id.clone(), task.clone());
        Ok(task.clone())
    }

    async fn set_next_execution_time(
        &self,
        id: &str,
        next: Option<DateTime<Utc>>,
    ) -> CollectorResult<()> {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(id) {
            Some(task) if !task.deleted => {
                task.next_execution_time = next;
                task.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(CollectorError::task_not_found(id)),
        }
    }

    async fn delete(&self, id: &str) -> CollectorResult<bool> {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(id) {
            Some(task) if !task.deleted => {
                task.deleted = true;
                task.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// 执行日志仓储的内存实现
#[derive(Default)]
pub struct InMemoryLogRepository {
    logs: RwLock<Vec<CollectionLog>>,
}

impl InMemoryLogRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.logs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.logs.read().await.is_empty()
    }
}

#[async_trait]
impl LogRepository for InMemoryLogRepository {
    async fn append(&self, log: &CollectionLog) -> CollectorResult<CollectionLog> {
        self.logs.write().await.push(log.clone());
        Ok(log.clone())
    }

    async fn update(&self, log: &CollectionLog) -> CollectorResult<CollectionLog> {
        let mut logs = self.logs.write().await;
        match logs.iter_mut().find(|l| l.id == log.id) {
            Some(existing) => {
                *existing = log.clone();
                Ok(log.clone())
            }
            None => Err(CollectorError::Internal(format!(
                "执行日志不存在: {}",
                log.id
            ))),
        }
    }

    async fn find_by_task_id(&self, task_id: &str) -> CollectorResult<Vec<CollectionLog>> {
        let mut found: Vec<CollectionLog> = self
            .logs
            .read()
            .await
            .iter()
            .filter(|l| l.task_id == task_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(found)
    }

    async fn find_by_execution_id(
        &self,
        execution_id: &str,
    ) -> CollectorResult<Option<CollectionLog>> {
        Ok(self
            .logs
            .read()
            .await
            .iter()
            .find(|l| l.execution_id == execution_id)
            .cloned())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> CollectorResult<u64> {
        let mut logs = self.logs.write().await;
        let before = logs.len();
        logs.retain(|l| l.start_time >= cutoff);
        Ok((before - logs.len()) as u64)
    }
}

/// 每日任务统计仓储的内存实现
#[derive(Default)]
pub struct InMemoryStatisticsRepository {
    stats: RwLock<HashMap<(String, NaiveDate), TaskStatistics>>,
}

impl InMemoryStatisticsRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatisticsRepository for InMemoryStatisticsRepository {
    async fn find(
        &self,
        task_id: &str,
        stat_date: NaiveDate,
    ) -> CollectorResult<Option<TaskStatistics>> {
        Ok(self
            .stats
            .read()
            .await
            .get(&(task_id.to_string(), stat_date))
            .cloned())
    }

    async fn upsert(&self, stats: &TaskStatistics) -> CollectorResult<TaskStatistics> {
        self.stats
            .write()
            .await
            .insert((stats.task_id.clone(), stats.stat_date), stats.clone());
        Ok(stats.clone())
    }

    async fn find_by_task_id(&self, task_id: &str) -> CollectorResult<Vec<TaskStatistics>> {
        let mut found: Vec<TaskStatistics> = self
            .stats
            .read()
            .await
            .values()
            .filter(|s| s.task_id == task_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.stat_date.cmp(&b.stat_date));
        Ok(found)
    }
}

/// 设备目录的内存实现，由部署方在启动时灌入设备清单
#[derive(Default)]
pub struct InMemoryDeviceDirectory {
    devices: RwLock<HashMap<String, Device>>,
}

impl InMemoryDeviceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, device: Device) {
        self.devices.write().await.insert(device.id.clone(), device);
    }

    pub async fn remove(&self, id: &str) -> Option<Device> {
        self.devices.write().await.remove(id)
    }
}

#[async_trait]
impl DeviceDirectory for InMemoryDeviceDirectory {
    async fn find_by_id(&self, id: &str) -> CollectorResult<Option<Device>> {
        Ok(self.devices.read().await.get(id).cloned())
    }

    async fn find_by_ids(&self, ids: &[String]) -> CollectorResult<Vec<Device>> {
        let devices = self.devices.read().await;
        Ok(ids.iter().filter_map(|id| devices.get(id).cloned()).collect())
    }
}
