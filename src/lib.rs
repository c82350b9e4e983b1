//! Flare API Gateway 公共库
//!
//! IM 边缘网关：HTTP/JSON 请求经会话校验后转发到后端 gRPC 服务，
//! 在线状态查询则并发扇出到全部消息网关实例再合并结果。

pub mod api;
pub mod auth;
pub mod config;
pub mod discovery;
pub mod error;
pub mod presence;
pub mod rpc;
pub mod service;
pub mod service_names;
pub mod tracing;

pub use api::{AppState, create_router};
pub use config::{ConfigManager, GatewayConfig, load_config, parse_config};
pub use error::{ErrorCode, GatewayError, Result};
pub use service::ApplicationBootstrap;
