//! 领域仓储抽象
//!
//! 定义数据访问的抽象接口，遵循依赖倒置原则

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value};

use crate::entities::{CollectionLog, CollectionTask, Device, TaskStatistics};
use collector_errors::CollectorResult;

/// 采集任务仓储抽象
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create(&self, task: &CollectionTask) -> CollectorResult<CollectionTask>;
    async fn find_by_id(&self, id: &str) -> CollectorResult<Option<CollectionTask>>;
    async fn find_by_name(&self, name: &str) -> CollectorResult<Option<CollectionTask>>;
    /// 不包含软删除的任务
    async fn find_all(&self) -> CollectorResult<Vec<CollectionTask>>;
    async fn update(&self, task: &CollectionTask) -> CollectorResult<CollectionTask>;
    /// 只写下次执行时间和更新时间，不触碰执行计数等其它字段
    async fn set_next_execution_time(
        &self,
        id: &str,
        next: Option<DateTime<Utc>>,
    ) -> CollectorResult<()>;
    /// 软删除，返回是否存在
    async fn delete(&self, id: &str) -> CollectorResult<bool>;
}

/// 执行日志仓储抽象
#[async_trait]
pub trait LogRepository: Send + Sync {
    async fn append(&self, log: &CollectionLog) -> CollectorResult<CollectionLog>;
    async fn update(&self, log: &CollectionLog) -> CollectorResult<CollectionLog>;
    async fn find_by_task_id(&self, task_id: &str) -> CollectorResult<Vec<CollectionLog>>;
    async fn find_by_execution_id(
        &self,
        execution_id: &str,
    ) -> CollectorResult<Option<CollectionLog>>;
    /// 删除开始时间早于cutoff的日志，返回删除条数
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> CollectorResult<u64>;
}

/// 每日任务统计仓储抽象
#[async_trait]
pub trait StatisticsRepository: Send + Sync {
    async fn find(
        &self,
        task_id: &str,
        stat_date: NaiveDate,
    ) -> CollectorResult<Option<TaskStatistics>>;
    async fn upsert(&self, stats: &TaskStatistics) -> CollectorResult<TaskStatistics>;
    async fn find_by_task_id(&self, task_id: &str) -> CollectorResult<Vec<TaskStatistics>>;
}

/// 设备目录：由设备管理服务提供的只读视图
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn find_by_id(&self, id: &str) -> CollectorResult<Option<Device>>;
    async fn find_by_ids(&self, ids: &[String]) -> CollectorResult<Vec<Device>>;
}

/// 凭据解析服务：返回某设备在某协议下的明文凭据参数，
/// 采集引擎自身从不存储或解密凭据
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, device_id: &str, protocol: &str) -> CollectorResult<Map<String, Value>>;
}
