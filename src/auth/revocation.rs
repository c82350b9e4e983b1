//! Token 吊销状态存储
//!
//! 记录按 (UserID, PlatformID) 维度保存，值是 `token → 状态` 的映射。
//! 网关只读不写，写入由登录 / 登出流程完成，过期依赖存储自身的 TTL。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::RwLock;
use tracing::debug;

use super::platform_name;
use crate::error::{GatewayError, Result};

const TOKEN_STATUS_PREFIX: &str = "UID_PID_TOKEN_STATUS:";

/// Token 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    Normal,
    Kicked,
    Unknown(i64),
}

impl TokenStatus {
    pub const NORMAL_CODE: i64 = 0;
    pub const KICKED_CODE: i64 = 2;

    pub fn from_code(code: i64) -> Self {
        match code {
            Self::NORMAL_CODE => TokenStatus::Normal,
            Self::KICKED_CODE => TokenStatus::Kicked,
            other => TokenStatus::Unknown(other),
        }
    }
}

/// 吊销状态存储接口
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// 读取某个用户某个平台下的全部 Token 及其状态
    async fn tokens(&self, user_id: &str, platform_id: i32) -> Result<HashMap<String, TokenStatus>>;
}

/// 存储键：`UID_PID_TOKEN_STATUS:{userID}:{platformName}`
pub fn token_status_key(user_id: &str, platform_id: i32) -> String {
    format!(
        "{}{}:{}",
        TOKEN_STATUS_PREFIX,
        user_id,
        platform_name(platform_id)
    )
}

/// Redis 实现
pub struct RedisRevocationStore {
    conn: ConnectionManager,
}

impl RedisRevocationStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// 通过 URL 建立连接，超过 `timeout` 视为失败
    pub async fn connect(url: &str, timeout: std::time::Duration) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| anyhow::anyhow!("redis connect timed out after {}ms", timeout.as_millis()))??;
        Ok(Self::new(conn))
    }
}

#[async_trait]
impl RevocationStore for RedisRevocationStore {
    async fn tokens(&self, user_id: &str, platform_id: i32) -> Result<HashMap<String, TokenStatus>> {
        let key = token_status_key(user_id, platform_id);
        let mut conn = self.conn.clone();
        let raw: HashMap<String, String> = conn.hgetall(&key).await.map_err(|e| {
            GatewayError::ServiceUnavailable(format!("revocation store read failed: {e}"))
        })?;

        debug!(key = %key, entries = raw.len(), "Loaded token status");
        Ok(raw
            .into_iter()
            .map(|(token, value)| {
                let status = value
                    .trim()
                    .parse::<i64>()
                    .map(TokenStatus::from_code)
                    .unwrap_or(TokenStatus::Unknown(-1));
                (token, status)
            })
            .collect())
    }
}

/// 内存实现（开发 / 测试）
#[derive(Default, Clone)]
pub struct MemoryRevocationStore {
    records: Arc<RwLock<HashMap<String, HashMap<String, TokenStatus>>>>,
}

impl MemoryRevocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, user_id: &str, platform_id: i32, token: &str, status: TokenStatus) {
        self.records
            .write()
            .await
            .entry(token_status_key(user_id, platform_id))
            .or_default()
            .insert(token.to_string(), status);
    }
}

#[async_trait]
impl RevocationStore for MemoryRevocationStore {
    async fn tokens(&self, user_id: &str, platform_id: i32) -> Result<HashMap<String, TokenStatus>> {
        Ok(self
            .records
            .read()
            .await
            .get(&token_status_key(user_id, platform_id))
            .cloned()
            .unwrap_or_default())
    }
}
