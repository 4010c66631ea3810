//! SNMP会话与按键缓存
//!
//! 多个任务可能同时采集同一设备，缓存的get-or-create必须原子，
//! 整个创建过程都在缓存锁内完成。

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use super::codec::{self, SnmpValue};
use collector_errors::CollectError;

#[derive(Debug, Error)]
pub enum SnmpError {
    #[error("SNMP请求超时")]
    Timeout,
    #[error("网络错误: {0}")]
    Io(String),
    #[error("报文解码失败: {0}")]
    Decode(String),
    #[error("设备返回错误状态: {status} (index {index})")]
    ErrorStatus { status: i64, index: i64 },
    #[error("无效的OID: {0}")]
    InvalidOid(String),
    #[error("不支持的SNMP版本: {0}")]
    UnsupportedVersion(String),
}

impl SnmpError {
    pub fn to_collect_error(&self) -> CollectError {
        match self {
            SnmpError::Timeout => CollectError::Timeout,
            SnmpError::Io(_) => CollectError::Connection,
            SnmpError::Decode(_) => CollectError::Parse,
            SnmpError::ErrorStatus { .. } => CollectError::Server,
            SnmpError::InvalidOid(_) => CollectError::Parse,
            SnmpError::UnsupportedVersion(_) => CollectError::Auth,
        }
    }
}

/// 线路层支持的SNMP版本
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnmpVersion {
    V1,
    V2c,
}

impl SnmpVersion {
    pub fn parse(value: &str) -> Result<Self, SnmpError> {
        match value.trim().to_lowercase().as_str() {
            "1" | "v1" => Ok(SnmpVersion::V1),
            "2" | "2c" | "v2" | "v2c" => Ok(SnmpVersion::V2c),
            other => Err(SnmpError::UnsupportedVersion(other.to_string())),
        }
    }

    fn wire_value(&self) -> i64 {
        match self {
            SnmpVersion::V1 => 0,
            SnmpVersion::V2c => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SnmpVersion::V1 => "1",
            SnmpVersion::V2c => "2c",
        }
    }
}

/// 会话参数
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub address: String,
    pub port: u16,
    pub version: SnmpVersion,
    pub community: String,
    pub timeout_ms: u64,
    pub retries: u32,
}

impl SessionConfig {
    /// 缓存键: snmp_{地址}_{端口}_{版本}_{community}
    pub fn cache_key(&self) -> String {
        format!(
            "snmp_{}_{}_{}_{}",
            self.address,
            self.port,
            self.version.as_str(),
            self.community
        )
    }
}

/// 单个设备的SNMP会话，socket已connect到目标
pub struct SnmpSession {
    config: SessionConfig,
    socket: UdpSocket,
    request_id: AtomicI32,
}

impl SnmpSession {
    pub async fn connect(config: SessionConfig) -> Result<Self, SnmpError> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| SnmpError::Io(e.to_string()))?;
        socket
            .connect((config.address.as_str(), config.port))
            .await
            .map_err(|e| SnmpError::Io(e.to_string()))?;
        Ok(Self {
            config,
            socket,
            request_id: AtomicI32::new(1),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// 对一组OID发起GET，按请求顺序返回(oid, value)
    pub async fn get(&self, oids: &[String]) -> Result<Vec<(String, SnmpValue)>, SnmpError> {
        let parsed: Result<Vec<Vec<u32>>, _> = oids
            .iter()
            .map(|oid| codec::parse_oid(oid).map_err(|_| SnmpError::InvalidOid(oid.clone())))
            .collect();
        let parsed = parsed?;

        let mut last_err = SnmpError::Timeout;
        for attempt in 0..=self.config.retries {
            let request_id = self.request_id.fetch_add(1, Ordering::SeqCst);
            let packet = codec::encode_get_request(
                self.config.version.wire_value(),
                &self.config.community,
                request_id,
                &parsed,
            );
            if let Err(e) = self.socket.send(&packet).await {
                last_err = SnmpError::Io(e.to_string());
                continue;
            }

            match self.receive(request_id).await {
                Ok(varbinds) => return Ok(varbinds),
                Err(e) => {
                    debug!(
                        target = %self.config.cache_key(),
                        attempt,
                        error = %e,
                        "SNMP请求失败，准备重试"
                    );
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    async fn receive(&self, request_id: i32) -> Result<Vec<(String, SnmpValue)>, SnmpError> {
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let deadline = tokio::time::Instant::now() + timeout;
        let mut buf = vec![0u8; 65_536];
        loop {
            let received = tokio::time::timeout_at(deadline, self.socket.recv(&mut buf))
                .await
                .map_err(|_| SnmpError::Timeout)?
                .map_err(|e| SnmpError::Io(e.to_string()))?;
            let response = match codec::decode_response(&buf[..received]) {
                Ok(response) => response,
                Err(e) => return Err(SnmpError::Decode(e.to_string())),
            };
            // 共享socket上可能收到其他请求的响应，跳过继续等待
            if response.request_id != request_id {
                continue;
            }
            if response.error_status != 0 {
                return Err(SnmpError::ErrorStatus {
                    status: response.error_status,
                    index: response.error_index,
                });
            }
            return Ok(response.varbinds);
        }
    }
}

/// 按键共享的会话缓存
#[derive(Default)]
pub struct SessionCache {
    sessions: tokio::sync::Mutex<HashMap<String, Arc<SnmpSession>>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 原子get-or-create：创建在锁内完成，同键并发请求只建一个会话
    pub async fn get_or_create(
        &self,
        config: SessionConfig,
    ) -> Result<Arc<SnmpSession>, SnmpError> {
        let key = config.cache_key();
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(&key) {
            return Ok(Arc::clone(session));
        }
        let session = Arc::new(SnmpSession::connect(config).await?);
        debug!(%key, "创建SNMP会话");
        sessions.insert(key, Arc::clone(&session));
        Ok(session)
    }

    pub async fn close_all(&self) {
        let mut sessions = self.sessions.lock().await;
        let count = sessions.len();
        sessions.clear();
        if count > 0 {
            warn!(count, "关闭全部SNMP会话");
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(port: u16) -> SessionConfig {
        SessionConfig {
            address: "127.0.0.1".to_string(),
            port,
            version: SnmpVersion::V2c,
            community: "public".to_string(),
            timeout_ms: 200,
            retries: 0,
        }
    }

    #[test]
    fn test_version_parse() {
        assert_eq!(SnmpVersion::parse("1").unwrap(), SnmpVersion::V1);
        assert_eq!(SnmpVersion::parse("2c").unwrap(), SnmpVersion::V2c);
        assert_eq!(SnmpVersion::parse("V2C").unwrap(), SnmpVersion::V2c);
        assert!(SnmpVersion::parse("3").is_err());
    }

    #[test]
    fn test_cache_key_format() {
        let key = config(1161).cache_key();
        assert_eq!(key, "snmp_127.0.0.1_1161_2c_public");
    }

    #[tokio::test]
    async fn test_cache_reuses_session_per_key() {
        let cache = SessionCache::new();
        let first = cache.get_or_create(config(1161)).await.unwrap();
        let second = cache.get_or_create(config(1161)).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len().await, 1);

        let other = cache.get_or_create(config(1162)).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(cache.len().await, 2);

        cache.close_all().await;
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_get_times_out_without_agent() {
        let session = SnmpSession::connect(config(1)).await.unwrap();
        let result = session.get(&["1.3.6.1.2.1.1.5.0".to_string()]).await;
        assert!(matches!(
            result,
            Err(SnmpError::Timeout) | Err(SnmpError::Io(_))
        ));
    }
}
