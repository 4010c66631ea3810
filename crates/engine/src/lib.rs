pub mod engine;
pub mod lifecycle;
pub mod registry;
pub mod stats;

pub use engine::CollectorEngine;
pub use lifecycle::LifecycleManager;
pub use registry::PluginRegistry;
pub use stats::{EngineHealthReport, EngineStatistics, PluginPerformance};
