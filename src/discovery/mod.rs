//! 服务发现模块
//!
//! 网关通过 [`DiscoveryBackend`] 获取后端服务的成员变化，再交给
//! [`directory::EndpointDirectory`] 维护每个服务名下的连接集合。
//!
//! ## 后端策略
//!
//! - [`etcd::EtcdDiscovery`]：基于 etcd 的租约注册 + 前缀 watch
//! - [`kubernetes::KubernetesDiscovery`]：把地址解析交给平台自身的服务名解析
//!
//! 两种策略在启动时由 `[discovery].backend` 选择，上层调用方无法区分当前使用的是哪一种。
//!
//! ```rust,ignore
//! let backend = build_backend(&config.discovery).await?;
//! backend.create_root_nodes(&config.rpc_register_name.all()).await?;
//! directory.watch_service(&backend, "MessageGateway").await?;
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tracing::info;

use crate::config::{DiscoveryConfig, DiscoveryStrategy};

pub mod directory;
pub mod etcd;
pub mod kubernetes;

pub use directory::{
    Connector, Endpoint, EndpointDirectory, EndpointStats, RefreshOutcome, ServiceEndpoints,
};
pub use etcd::EtcdDiscovery;
pub use kubernetes::KubernetesDiscovery;

/// 服务发现错误
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// 无法连接注册中心
    #[error("failed to connect discovery backend: {0}")]
    Connect(String),

    /// 注册中心读写失败
    #[error("discovery backend error: {0}")]
    Backend(String),

    /// 与某个实例建连失败
    #[error("failed to dial {address}: {reason}")]
    Dial { address: String, reason: String },

    /// 地址格式非法
    #[error("invalid endpoint address: {0}")]
    InvalidAddress(String),
}

impl From<etcd_client::Error> for DiscoveryError {
    fn from(err: etcd_client::Error) -> Self {
        DiscoveryError::Backend(err.to_string())
    }
}

/// 服务发现后端能力接口
#[async_trait]
pub trait DiscoveryBackend: Send + Sync {
    /// 当前使用的后端策略
    fn strategy(&self) -> DiscoveryStrategy;

    /// 将本进程注册为 `service` 的一个实例（幂等）
    async fn register(&self, service: &str, address: &str) -> Result<(), DiscoveryError>;

    /// 注销本进程的注册信息
    async fn unregister(&self) -> Result<(), DiscoveryError>;

    /// 为一组服务名创建根节点
    async fn create_root_nodes(&self, services: &[String]) -> Result<(), DiscoveryError>;

    /// 订阅某个服务的成员快照
    ///
    /// 返回的通道只保留最新快照，旧快照不会排在新快照后面。
    async fn watch(&self, service: &str) -> Result<watch::Receiver<Vec<String>>, DiscoveryError>;

    /// 发布共享配置
    async fn publish_shared_config(&self, key: &str, blob: Vec<u8>) -> Result<(), DiscoveryError>;

    /// 读取共享配置，不存在时返回 `None`
    async fn fetch_shared_config(&self, key: &str) -> Result<Option<Vec<u8>>, DiscoveryError>;

    /// 停止后台任务
    async fn close(&self);
}

/// 根据配置构建服务发现后端
pub async fn build_backend(config: &DiscoveryConfig) -> Result<Arc<dyn DiscoveryBackend>> {
    let backend: Arc<dyn DiscoveryBackend> = match config.backend {
        DiscoveryStrategy::Etcd => Arc::new(
            EtcdDiscovery::connect(&config.etcd)
                .await
                .context("Failed to connect to etcd")?,
        ),
        DiscoveryStrategy::Kubernetes => {
            Arc::new(KubernetesDiscovery::new(config.kubernetes.clone()))
        }
    };

    info!(backend = ?config.backend, "Discovery backend initialized");
    Ok(backend)
}

/// 规范化快照：去除空白、去重，保持首次出现的顺序
pub(crate) fn normalize_snapshot<I, S>(addrs: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for addr in addrs {
        let addr = addr.as_ref().trim();
        if addr.is_empty() || out.iter().any(|a| a == addr) {
            continue;
        }
        out.push(addr.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_snapshot() {
        let snapshot = normalize_snapshot(["10.0.0.2:10140", " 10.0.0.1:10140", "10.0.0.2:10140", ""]);
        assert_eq!(snapshot, vec!["10.0.0.2:10140", "10.0.0.1:10140"]);
    }

    #[tokio::test]
    async fn test_build_kubernetes_backend() {
        let config = DiscoveryConfig {
            backend: DiscoveryStrategy::Kubernetes,
            ..Default::default()
        };
        let backend = build_backend(&config).await.unwrap();
        assert_eq!(backend.strategy(), DiscoveryStrategy::Kubernetes);
    }
}
