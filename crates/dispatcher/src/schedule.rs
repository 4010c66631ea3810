//! 下次执行时间计算
//!
//! SIMPLE: 固定间隔，支持 frequency/interval 秒数或 interval_unit+interval_value；
//! CRON: 六段表达式，取严格晚于from的下一次；
//! EVENT: 没有时间驱动的下一次，返回None。

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};

use collector_domain::ScheduleType;
use collector_errors::{CollectorError, CollectorResult};

use crate::cron_utils::CronScheduler;

fn unit_multiplier(unit: &str) -> CollectorResult<u64> {
    match unit.to_lowercase().as_str() {
        "seconds" | "second" => Ok(1),
        "minutes" | "minute" => Ok(60),
        "hours" | "hour" => Ok(3600),
        "days" | "day" => Ok(86_400),
        other => Err(CollectorError::invalid_schedule(format!(
            "未知的时间单位: {other}"
        ))),
    }
}

fn positive_u64(config: &Map<String, Value>, key: &str) -> CollectorResult<u64> {
    let value = config
        .get(key)
        .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .ok_or_else(|| CollectorError::invalid_schedule(format!("{key}必须是正整数")))?;
    if value == 0 {
        return Err(CollectorError::invalid_schedule(format!("{key}不能为0")));
    }
    Ok(value)
}

/// 从调度配置解析SIMPLE间隔秒数
pub fn simple_interval_secs(config: &Map<String, Value>) -> CollectorResult<u64> {
    // 标准写法: frequency为单位名, interval为数值
    if let Some(frequency) = config.get("frequency") {
        if let Some(unit) = frequency.as_str() {
            return Ok(positive_u64(config, "interval")? * unit_multiplier(unit)?);
        }
        // 兼容写法: frequency直接给秒数
        return positive_u64(config, "frequency");
    }

    // interval_unit + interval_value 写法
    if let Some(unit) = config.get("interval_unit").and_then(|v| v.as_str()) {
        return Ok(positive_u64(config, "interval_value")? * unit_multiplier(unit)?);
    }

    // 只有interval时按秒数处理
    if config.contains_key("interval") {
        return positive_u64(config, "interval");
    }

    Err(CollectorError::invalid_schedule(
        "SIMPLE调度缺少frequency+interval或interval_unit+interval_value",
    ))
}

/// 从调度配置取CRON表达式
pub fn cron_expression(config: &Map<String, Value>) -> CollectorResult<&str> {
    for key in ["cron_expression", "expression", "cron"] {
        if let Some(expr) = config.get(key).and_then(|v| v.as_str()) {
            return Ok(expr);
        }
    }
    Err(CollectorError::invalid_schedule("CRON调度缺少cron_expression"))
}

/// 计算下次执行时间。EVENT任务返回Ok(None)
pub fn compute_next_execution_time(
    schedule_type: ScheduleType,
    config: &Map<String, Value>,
    from: DateTime<Utc>,
) -> CollectorResult<Option<DateTime<Utc>>> {
    match schedule_type {
        ScheduleType::Simple => {
            let secs = simple_interval_secs(config)?;
            Ok(Some(from + Duration::seconds(secs as i64)))
        }
        ScheduleType::Cron => {
            let cron = CronScheduler::new(cron_expression(config)?)?;
            Ok(cron.next_execution_time(from))
        }
        ScheduleType::Event => Ok(None),
    }
}

/// 创建/更新任务时校验调度配置
pub fn validate_schedule_config(
    schedule_type: ScheduleType,
    config: &Map<String, Value>,
) -> CollectorResult<()> {
    match schedule_type {
        ScheduleType::Simple => simple_interval_secs(config).map(|_| ()),
        ScheduleType::Cron => CronScheduler::validate_cron_expression(cron_expression(config)?),
        ScheduleType::Event => {
            if config.get("event_name").and_then(|v| v.as_str()).is_none() {
                return Err(CollectorError::invalid_schedule("EVENT调度缺少event_name"));
            }
            Ok(())
        }
    }
}
