//! CRON表达式的唯一出入口
//!
//! cron库的类型不向外泄漏，调度器和任务校验都通过这里。
//! 使用六段表达式（秒 分 时 日 月 星期），与cron库一致。

use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;

use collector_errors::{CollectorError, CollectorResult};

/// CRON表达式解析和时间计算
pub struct CronScheduler {
    schedule: Schedule,
}

impl CronScheduler {
    pub fn new(cron_expr: &str) -> CollectorResult<Self> {
        let schedule = Schedule::from_str(cron_expr).map_err(|e| CollectorError::InvalidCron {
            expr: cron_expr.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self { schedule })
    }

    /// 严格晚于from的下一次执行时间
    pub fn next_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    /// 从指定时间开始的多个执行时间，用于任务预览
    pub fn upcoming_times(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&from).take(count).collect()
    }

    /// 距下次执行还有多久
    pub fn time_until_next_execution(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.next_execution_time(now).map(|next| next - now)
    }

    /// 只校验不构造
    pub fn validate_cron_expression(cron_expr: &str) -> CollectorResult<()> {
        Schedule::from_str(cron_expr).map_err(|e| CollectorError::InvalidCron {
            expr: cron_expr.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }
}
