//! 配置管理器 - 负责处理不同环境下的配置覆盖
//!
//! 该模块提供了配置管理功能，包括：
//! - 加载 `FLARE_ENV` 对应的环境特定配置
//! - 应用 `FLARE_*` 环境变量覆盖

use std::env;
use std::path::Path;

use anyhow::{Context, Result};
use toml::Value;
use tracing::debug;

use super::{DiscoveryStrategy, GatewayConfig, env_non_empty, load_toml_value, merge_value};

/// 配置管理器
pub struct ConfigManager;

impl ConfigManager {
    /// 获取当前环境名称
    ///
    /// 从环境变量 FLARE_ENV 获取当前环境名称，
    /// 如果未设置则默认为 "development"
    pub fn get_environment() -> String {
        env::var("FLARE_ENV").unwrap_or_else(|_| "development".to_string())
    }

    /// 根据环境加载特定配置
    ///
    /// 加载 config/environments/{environment}.toml 文件中的配置，
    /// 并深度合并到基础配置中
    pub fn load_environment_config(base: &mut Value) -> Result<()> {
        let env = Self::get_environment();
        let env_config_path = format!("config/environments/{}.toml", env);
        let path = Path::new(&env_config_path);

        if path.exists() {
            let overlay = load_toml_value(path)?;
            merge_value(base, overlay);
            debug!(environment = %env, path = %env_config_path, "Environment config merged");
        }

        Ok(())
    }

    /// 应用环境变量覆盖
    ///
    /// 列表类变量以逗号分隔，元素两侧空白会被去掉
    pub fn apply_env_overrides(cfg: &mut GatewayConfig) -> Result<()> {
        if let Some(ip) = env_non_empty("FLARE_API_LISTEN_IP") {
            cfg.api.listen_ip = ip;
        }
        if let Some(port) = env_non_empty("FLARE_API_PORT") {
            cfg.api.port = port
                .trim()
                .parse()
                .with_context(|| format!("invalid FLARE_API_PORT: {port}"))?;
        }
        if let Some(addr) = env_non_empty("FLARE_API_ADVERTISE_ADDR") {
            cfg.api.advertise_addr = Some(addr);
        }
        if let Some(backend) = env_non_empty("FLARE_DISCOVERY_BACKEND") {
            cfg.discovery.backend = backend.parse::<DiscoveryStrategy>()?;
        }
        if let Some(endpoints) = env_non_empty("FLARE_ETCD_ENDPOINTS") {
            cfg.discovery.etcd.endpoints = split_list(&endpoints);
        }
        if let Some(ns) = env_non_empty("FLARE_K8S_NAMESPACE") {
            cfg.discovery.kubernetes.namespace = ns;
        }
        if let Some(url) = env_non_empty("FLARE_REDIS_URL") {
            cfg.redis.url = url;
        }
        if let Some(secret) = env_non_empty("FLARE_TOKEN_SECRET") {
            cfg.token.secret = secret;
        }
        if let Some(level) = env_non_empty("FLARE_LOG_LEVEL") {
            cfg.logging.level = level;
        }
        Ok(())
    }
}

/// 逗号分隔的列表
pub(crate) fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
