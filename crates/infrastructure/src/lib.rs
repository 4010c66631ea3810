//! 基础设施层：仓储的内存实现、静态凭据解析与应用配置加载。
//!
//! 领域层只依赖仓储抽象，这里提供进程内的默认实现，
//! 便于单机部署和测试。替换为数据库实现时领域层无需改动。

pub mod credentials;
pub mod memory;
pub mod settings;

pub use credentials::StaticCredentialResolver;
pub use memory::{
    InMemoryDeviceDirectory, InMemoryLogRepository, InMemoryStatisticsRepository,
    InMemoryTaskRepository,
};
pub use settings::AppConfig;
