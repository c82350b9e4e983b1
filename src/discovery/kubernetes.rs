//! Kubernetes 平台服务发现
//!
//! 地址解析完全交给集群 DNS：每个服务只有一个固定目标
//! `{scheme}://{service}.{namespace}.svc:{port}`，负载均衡由平台完成。
//! 注册由平台的 Service / Endpoints 对象承担，这里只记录自身信息。

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{RwLock, watch};
use tracing::{debug, info};

use super::{DiscoveryBackend, DiscoveryError};
use crate::config::{DiscoveryStrategy, KubernetesConfig};

/// Kubernetes 服务发现后端
pub struct KubernetesDiscovery {
    config: KubernetesConfig,
    self_target: RwLock<Option<(String, String)>>,
    shared_config: RwLock<HashMap<String, Vec<u8>>>,
}

impl KubernetesDiscovery {
    pub fn new(config: KubernetesConfig) -> Self {
        Self {
            config,
            self_target: RwLock::new(None),
            shared_config: RwLock::new(HashMap::new()),
        }
    }

    /// 服务在集群内的 DNS 目标
    pub fn target(&self, service: &str) -> String {
        format!(
            "{}://{}.{}.svc:{}",
            self.config.scheme,
            dns_label(service),
            self.config.namespace,
            self.config.port
        )
    }
}

/// Kubernetes 服务名只允许小写字母、数字和 `-`
fn dns_label(service: &str) -> String {
    let mut out = String::with_capacity(service.len() + 4);
    for (idx, ch) in service.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if idx > 0 {
                out.push('-');
            }
            out.push(ch.to_ascii_lowercase());
        } else if ch.is_ascii_alphanumeric() || ch == '-' {
            out.push(ch);
        } else {
            out.push('-');
        }
    }
    out
}

#[async_trait]
impl DiscoveryBackend for KubernetesDiscovery {
    fn strategy(&self) -> DiscoveryStrategy {
        DiscoveryStrategy::Kubernetes
    }

    async fn register(&self, service: &str, address: &str) -> Result<(), DiscoveryError> {
        *self.self_target.write().await = Some((service.to_string(), address.to_string()));
        debug!(service_name = %service, address = %address, "Registration delegated to platform");
        Ok(())
    }

    async fn unregister(&self) -> Result<(), DiscoveryError> {
        self.self_target.write().await.take();
        Ok(())
    }

    async fn create_root_nodes(&self, _services: &[String]) -> Result<(), DiscoveryError> {
        Ok(())
    }

    async fn watch(&self, service: &str) -> Result<watch::Receiver<Vec<String>>, DiscoveryError> {
        let target = self.target(service);
        info!(service_name = %service, target = %target, "Resolving service through cluster DNS");
        // 发送端随即释放，接收方只会看到这一份快照
        let (_tx, rx) = watch::channel(vec![target]);
        Ok(rx)
    }

    async fn publish_shared_config(&self, key: &str, blob: Vec<u8>) -> Result<(), DiscoveryError> {
        self.shared_config.write().await.insert(key.to_string(), blob);
        Ok(())
    }

    async fn fetch_shared_config(&self, key: &str) -> Result<Option<Vec<u8>>, DiscoveryError> {
        Ok(self.shared_config.read().await.get(key).cloned())
    }

    async fn close(&self) {}
}
