//! 静态凭据解析
//!
//! 凭据由部署方在启动时注入，按(设备, 协议)查找。
//! 采集引擎拿到的是已解密的明文参数，这里从不落盘。

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use collector_domain::CredentialResolver;
use collector_errors::CollectorResult;

/// 进程内的凭据表
#[derive(Default)]
pub struct StaticCredentialResolver {
    entries: RwLock<HashMap<(String, String), Map<String, Value>>>,
}

impl StaticCredentialResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(
        &self,
        device_id: impl Into<String>,
        protocol: &str,
        credentials: Map<String, Value>,
    ) {
        self.entries
            .write()
            .await
            .insert((device_id.into(), protocol.to_lowercase()), credentials);
    }
}

#[async_trait]
impl CredentialResolver for StaticCredentialResolver {
    /// 未配置凭据时返回空表，匿名访问由插件自行决定
    async fn resolve(
        &self,
        device_id: &str,
        protocol: &str,
    ) -> CollectorResult<Map<String, Value>> {
        Ok(self
            .entries
            .read()
            .await
            .get(&(device_id.to_string(), protocol.to_lowercase()))
            .cloned()
            .unwrap_or_default())
    }
}
