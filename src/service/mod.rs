//! # 网关服务层
//!
//! 提供网关的应用启动和依赖注入

pub mod bootstrap;
mod wire;

pub use bootstrap::ApplicationBootstrap;
pub use wire::{ApplicationContext, initialize, watched_services};
