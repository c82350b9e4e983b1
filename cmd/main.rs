//! Flare API 网关
//!
//! HTTP/JSON 接入：会话校验、请求转发到后端 gRPC 服务、在线状态聚合。
//!
//! 配置路径按以下顺序确定：命令行第一个参数、`FLARE_CONFIG` 环境变量、
//! 默认的 `config/` 目录或 `config.toml`。

use anyhow::Result;
use flare_api_gateway::tracing::init_tracing_from_config;
use flare_api_gateway::{ApplicationBootstrap, load_config};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("FLARE_CONFIG").ok())
        .filter(|p| !p.trim().is_empty());

    let config = load_config(config_path.as_deref())?;
    init_tracing_from_config(Some(&config.logging));

    info!(
        listen = %config.api.listen_addr(),
        backend = ?config.discovery.backend,
        "Starting Flare API Gateway"
    );

    ApplicationBootstrap::run(config).await
}
