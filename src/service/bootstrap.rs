//! 应用启动器 - 负责依赖注入和服务启动

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use super::wire;
use crate::config::GatewayConfig;
use crate::service_names;

/// 应用启动器
pub struct ApplicationBootstrap;

impl ApplicationBootstrap {
    /// 运行应用的主入口点
    pub async fn run(config: GatewayConfig) -> Result<()> {
        let config = Arc::new(config);

        info!("Parsing server address...");
        let address: SocketAddr = config
            .api
            .listen_addr()
            .parse()
            .with_context(|| format!("invalid api listen address: {}", config.api.listen_addr()))?;

        // 使用 Wire 风格的依赖注入构建应用上下文
        let context = wire::initialize(Arc::clone(&config)).await?;
        info!("ApplicationBootstrap created successfully");

        Self::run_with_context(context, address).await
    }

    /// 运行服务（带应用上下文）
    async fn run_with_context(context: wire::ApplicationContext, address: SocketAddr) -> Result<()> {
        let wire::ApplicationContext {
            config,
            backend,
            directory,
            router,
        } = context;

        let listener = TcpListener::bind(address)
            .await
            .with_context(|| format!("failed to bind {address}"))?;
        info!(address = %address, "API gateway is listening");

        if let Some(advertise) = config.api.advertise_addr.as_deref() {
            match backend.register(service_names::API, advertise).await {
                Ok(()) => info!(address = %advertise, "Service registered: {}", service_names::API),
                Err(e) => error!(error = %e, "Service registration failed"),
            }
        }

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        // 停止 watcher 并撤销注册租约
        directory.shutdown();
        backend.close().await;
        info!("API gateway stopped");

        served.context("HTTP server error")
    }
}

/// 等待 Ctrl+C 或 SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("shutdown signal received (Ctrl+C)"),
        _ = terminate => info!("shutdown signal received (SIGTERM)"),
    }
}
