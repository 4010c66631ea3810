//! 按设备类型生成默认指标集
//!
//! 创建任务时未显式配置指标的设备类型走这里，
//! 部署方可在任务创建后再逐项调整。

use collector_domain::{MetricConfig, MetricDataType};

fn metric(
    name: &str,
    metric_type: &str,
    data_type: MetricDataType,
    unit: Option<&str>,
    interval_secs: u64,
    priority: u8,
) -> MetricConfig {
    let mut m = MetricConfig::new(name, metric_type);
    m.data_type = data_type;
    m.unit = unit.map(str::to_string);
    m.interval_secs = interval_secs;
    m.priority = priority;
    m
}

/// 设备类型code到默认指标集的映射，未识别的类型给通用集
pub fn default_metrics_for(device_type_code: &str) -> Vec<MetricConfig> {
    match device_type_code.to_lowercase().as_str() {
        "camera" | "ipcamera" => vec![
            metric("device_status", "health_check", MetricDataType::Boolean, None, 60, 1),
            metric("cpu_usage", "cpu_usage", MetricDataType::Gauge, Some("%"), 300, 2),
            metric("memory_usage", "memory_usage", MetricDataType::Gauge, Some("%"), 300, 2),
            metric("storage_usage", "storage_usage", MetricDataType::Gauge, Some("%"), 600, 3),
            metric("video_stream_status", "health_check", MetricDataType::Boolean, None, 120, 1),
        ],
        "sensor" => vec![
            metric("device_status", "health_check", MetricDataType::Boolean, None, 60, 1),
            metric("battery_level", "json_path", MetricDataType::Gauge, Some("%"), 3600, 2),
            metric("signal_strength", "json_path", MetricDataType::Gauge, Some("dBm"), 300, 2),
            metric("temperature", "json_path", MetricDataType::Gauge, Some("°C"), 60, 1),
            metric("humidity", "json_path", MetricDataType::Gauge, Some("%RH"), 60, 2),
        ],
        "controller" => vec![
            metric("device_status", "health_check", MetricDataType::Boolean, None, 60, 1),
            metric("cpu_usage", "cpu_usage", MetricDataType::Gauge, Some("%"), 300, 2),
            metric("memory_usage", "memory_usage", MetricDataType::Gauge, Some("%"), 300, 2),
            metric("access_events", "json_path", MetricDataType::Counter, None, 60, 1),
        ],
        _ => vec![
            metric("device_status", "health_check", MetricDataType::Boolean, None, 60, 1),
            metric("network_status", "health_check", MetricDataType::Boolean, None, 120, 2),
            metric("response_time", "health_check", MetricDataType::Gauge, Some("ms"), 300, 2),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_metrics() {
        let metrics = default_metrics_for("Camera");
        assert_eq!(metrics.len(), 5);
        assert!(metrics.iter().any(|m| m.name == "video_stream_status"));
        let status = metrics.iter().find(|m| m.name == "device_status").unwrap();
        assert_eq!(status.data_type, MetricDataType::Boolean);
        assert_eq!(status.interval_secs, 60);
        assert_eq!(status.priority, 1);
    }

    #[test]
    fn test_sensor_metrics_include_environment() {
        let metrics = default_metrics_for("sensor");
        let temp = metrics.iter().find(|m| m.name == "temperature").unwrap();
        assert_eq!(temp.unit.as_deref(), Some("°C"));
        assert!(metrics.iter().any(|m| m.name == "battery_level"));
    }

    #[test]
    fn test_controller_counter_metric() {
        let metrics = default_metrics_for("controller");
        let events = metrics.iter().find(|m| m.name == "access_events").unwrap();
        assert_eq!(events.data_type, MetricDataType::Counter);
    }

    #[test]
    fn test_unknown_type_gets_generic_set() {
        let metrics = default_metrics_for("toaster");
        assert_eq!(metrics.len(), 3);
        assert!(metrics.iter().any(|m| m.name == "network_status"));
        assert!(metrics.iter().all(|m| m.enabled));
    }
}
