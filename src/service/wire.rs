//! Wire 风格的依赖注入模块
//!
//! 按依赖顺序构建网关运行所需的全部组件

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::api::{AppState, create_router, routes};
use crate::auth::{RedisRevocationStore, SessionValidator, TokenVerifier};
use crate::config::{DiscoveryStrategy, GatewayConfig};
use crate::discovery::{DiscoveryBackend, EndpointDirectory, build_backend};
use crate::presence::{DirectoryShardSource, PresenceAggregator};
use crate::rpc::{DirectoryInvoker, GrpcConnector};

/// 应用上下文 - 包含所有已初始化的组件
pub struct ApplicationContext {
    pub config: Arc<GatewayConfig>,
    pub backend: Arc<dyn DiscoveryBackend>,
    pub directory: Arc<EndpointDirectory<GrpcConnector>>,
    pub router: axum::Router,
}

/// 网关需要订阅的服务名（已按配置映射，去重）
pub fn watched_services(config: &GatewayConfig) -> Vec<String> {
    let names = &config.rpc_register_name;
    let mut services: BTreeSet<String> = routes::routed_services()
        .into_iter()
        .map(|logical| names.resolve(logical))
        .collect();
    services.insert(names.message_gateway.clone());
    services.into_iter().collect()
}

/// 构建应用上下文
///
/// 1. 连接服务发现，创建根节点并发布共享配置
/// 2. 创建端点目录并订阅所有被路由的服务
/// 3. 创建会话校验、在线状态聚合、RPC 转发
/// 4. 组装 HTTP 路由
pub async fn initialize(config: Arc<GatewayConfig>) -> Result<ApplicationContext> {
    // 1. 服务发现
    let backend = build_backend(&config.discovery).await?;
    backend
        .create_root_nodes(&config.rpc_register_name.all())
        .await
        .context("Failed to create rpc root nodes")?;

    let blob = config.encode()?;
    backend
        .publish_shared_config(&config.discovery.common_config_key, blob)
        .await
        .context("Failed to publish shared config")?;
    info!(key = %config.discovery.common_config_key, "Shared config published");

    // 2. 端点目录
    let lazy = config.discovery.backend == DiscoveryStrategy::Kubernetes;
    let connector = GrpcConnector::new(config.rpc.dial_timeout()).lazy(lazy);
    let directory = Arc::new(EndpointDirectory::new(connector, config.rpc.retry_interval()));

    for service in watched_services(&config) {
        if let Err(e) = directory.watch_service(&backend, &service).await {
            // watcher 会在后台重新订阅，恢复前请求返回 ServiceUnavailable
            warn!(service_name = %service, error = %e, "Failed to watch service, will retry later");
        }
    }

    // 3. 会话校验
    let store = RedisRevocationStore::connect(&config.redis.url, config.redis.timeout())
        .await
        .context("Failed to connect revocation store")?;
    let validator = SessionValidator::new(
        TokenVerifier::new(config.token.secret.as_bytes()),
        Arc::new(store),
        config.token.validate_timeout(),
    );

    // 4. 在线状态聚合
    let shards = DirectoryShardSource::new(
        Arc::clone(&directory),
        config.rpc_register_name.message_gateway.clone(),
        config.rpc.call_timeout(),
    );
    let presence = PresenceAggregator::new(Arc::new(shards), config.presence.shard_timeout());

    // 5. RPC 转发
    let invoker = DirectoryInvoker::new(Arc::clone(&directory), config.rpc.call_timeout());

    let state = AppState {
        invoker: Arc::new(invoker),
        validator: Arc::new(validator),
        presence: Arc::new(presence),
        stats: directory.clone(),
        names: Arc::new(config.rpc_register_name.clone()),
        request_timeout: config.api.request_timeout(),
    };
    let router = create_router(state);

    info!(
        backend = ?config.discovery.backend,
        services = directory.service_names().len(),
        "Application context initialized"
    );

    Ok(ApplicationContext {
        config,
        backend,
        directory,
        router,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service_names;

    #[test]
    fn test_watched_services_include_message_gateway() {
        let config = GatewayConfig::default();
        let services = watched_services(&config);

        assert!(services.contains(&config.rpc_register_name.message_gateway));
        assert!(services.contains(&config.rpc_register_name.user));
        assert!(!services.iter().any(|s| s == service_names::API));

        let mut deduped = services.clone();
        deduped.dedup();
        assert_eq!(deduped.len(), services.len());
    }
}
