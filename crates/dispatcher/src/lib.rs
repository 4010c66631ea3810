//! 任务调度与执行编排
//!
//! 调度器只负责"什么时候跑哪个任务"，具体怎么跑由TaskRunner实现
//! （由采集任务服务提供），两者通过trait解耦。

pub mod cron_utils;
pub mod default_metrics;
pub mod schedule;
pub mod scheduler;
pub mod service;

pub use cron_utils::CronScheduler;
pub use default_metrics::default_metrics_for;
pub use schedule::compute_next_execution_time;
pub use scheduler::{SchedulerState, SchedulerStatistics, TaskRunner, TaskScheduler};
pub use service::{BatchCreateResult, CollectionTaskService, NewTask};
