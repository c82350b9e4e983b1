//! Flare API Gateway 配置模块
//!
//! 该模块提供网关的配置管理功能，包括：
//! - 配置文件 / 配置目录加载和合并
//! - 环境特定配置覆盖
//! - 服务发现、RPC、Token、Redis、在线状态聚合等配置定义

use std::env;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use toml::Value;
use tracing::warn;

use crate::service_names;

mod manager;
pub use manager::ConfigManager;

/// HTTP 接入配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// 监听地址
    pub listen_ip: String,
    /// 监听端口
    pub port: u16,
    /// 单个请求的整体超时（毫秒）
    pub request_timeout_ms: u64,
    /// 注册到服务发现的对外地址（`ip:port`），为空时不注册
    pub advertise_addr: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_ip: "0.0.0.0".to_string(),
            port: 10002,
            request_timeout_ms: 10_000,
            advertise_addr: None,
        }
    }
}

impl ApiConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_ip, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// 服务发现后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryStrategy {
    /// 基于 etcd 的强一致注册中心（租约 + watch）
    #[default]
    Etcd,
    /// 交给编排平台自身的服务名解析
    #[serde(alias = "k8s")]
    Kubernetes,
}

impl std::str::FromStr for DiscoveryStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "etcd" => Ok(DiscoveryStrategy::Etcd),
            "k8s" | "kubernetes" => Ok(DiscoveryStrategy::Kubernetes),
            other => Err(anyhow!("Unsupported discovery backend: {}", other)),
        }
    }
}

/// etcd 注册中心配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EtcdConfig {
    /// etcd 地址列表
    pub endpoints: Vec<String>,
    /// 根命名空间
    pub namespace: String,
    /// 注册租约 TTL（秒）
    pub lease_ttl_secs: i64,
    /// 用户名
    pub username: Option<String>,
    /// 密码
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// 建连超时（毫秒）
    pub dial_timeout_ms: u64,
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["http://127.0.0.1:2379".to_string()],
            namespace: "flare".to_string(),
            lease_ttl_secs: 10,
            username: None,
            password: None,
            dial_timeout_ms: 5_000,
        }
    }
}

/// Kubernetes 平台服务发现配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KubernetesConfig {
    /// 服务所在命名空间
    pub namespace: String,
    /// 后端服务统一的 gRPC 端口
    pub port: u16,
    /// 访问协议
    pub scheme: String,
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            port: 80,
            scheme: "http".to_string(),
        }
    }
}

/// 服务发现配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// 后端类型
    pub backend: DiscoveryStrategy,
    /// 共享配置在注册中心中的键
    pub common_config_key: String,
    pub etcd: EtcdConfig,
    pub kubernetes: KubernetesConfig,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            backend: DiscoveryStrategy::default(),
            common_config_key: "flare-common-config".to_string(),
            etcd: EtcdConfig::default(),
            kubernetes: KubernetesConfig::default(),
        }
    }
}

/// 出站 RPC 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// 单实例建连超时（毫秒）
    pub dial_timeout_ms: u64,
    /// 单次调用超时（毫秒）
    pub call_timeout_ms: u64,
    /// 建连失败实例的重试间隔（秒）
    pub retry_interval_secs: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            dial_timeout_ms: 3_000,
            call_timeout_ms: 5_000,
            retry_interval_secs: 5,
        }
    }
}

impl RpcConfig {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs.max(1))
    }
}

/// 后端服务在注册中心中的名称
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcRegisterNameConfig {
    pub user: String,
    pub friend: String,
    pub msg: String,
    pub push: String,
    pub message_gateway: String,
    pub group: String,
    pub auth: String,
    pub conversation: String,
    pub third: String,
}

impl Default for RpcRegisterNameConfig {
    fn default() -> Self {
        Self {
            user: service_names::get_service_name(service_names::USER),
            friend: service_names::get_service_name(service_names::FRIEND),
            msg: service_names::get_service_name(service_names::MSG),
            push: service_names::get_service_name(service_names::PUSH),
            message_gateway: service_names::get_service_name(service_names::MESSAGE_GATEWAY),
            group: service_names::get_service_name(service_names::GROUP),
            auth: service_names::get_service_name(service_names::AUTH),
            conversation: service_names::get_service_name(service_names::CONVERSATION),
            third: service_names::get_service_name(service_names::THIRD),
        }
    }
}

impl RpcRegisterNameConfig {
    /// 所有服务名（用于创建根节点）
    pub fn all(&self) -> Vec<String> {
        service_names::DEFAULT_RPC_GROUPS
            .iter()
            .map(|group| self.resolve(group))
            .collect()
    }

    /// 将逻辑服务常量映射为配置中的实际服务名
    pub fn resolve(&self, logical: &str) -> String {
        match logical {
            service_names::USER => self.user.clone(),
            service_names::FRIEND => self.friend.clone(),
            service_names::MSG => self.msg.clone(),
            service_names::PUSH => self.push.clone(),
            service_names::MESSAGE_GATEWAY => self.message_gateway.clone(),
            service_names::GROUP => self.group.clone(),
            service_names::AUTH => self.auth.clone(),
            service_names::CONVERSATION => self.conversation.clone(),
            service_names::THIRD => self.third.clone(),
            other => other.to_string(),
        }
    }
}

/// Token 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// 签名密钥
    #[serde(skip_serializing)]
    pub secret: String,
    /// 吊销状态查询超时（毫秒）
    pub validate_timeout_ms: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            secret: "flare-im".to_string(),
            validate_timeout_ms: 1_000,
        }
    }
}

impl TokenConfig {
    pub fn validate_timeout(&self) -> Duration {
        Duration::from_millis(self.validate_timeout_ms)
    }
}

/// Redis 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis 连接 URL
    #[serde(skip_serializing)]
    pub url: String,
    /// 命令超时（毫秒）
    pub timeout_ms: u64,
}

impl RedisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
            timeout_ms: 1_000,
        }
    }
}

/// 在线状态聚合配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// 单个分片查询超时（毫秒）
    pub shard_timeout_ms: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            shard_timeout_ms: 2_000,
        }
    }
}

impl PresenceConfig {
    pub fn shard_timeout(&self) -> Duration {
        Duration::from_millis(self.shard_timeout_ms)
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: String,
    /// 是否输出 target
    pub with_target: bool,
    /// 是否输出线程 ID
    pub with_thread_ids: bool,
    /// 是否输出文件名
    pub with_file: bool,
    /// 是否输出行号
    pub with_line_number: bool,
    /// 是否输出 JSON 格式
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_target: true,
            with_thread_ids: false,
            with_file: false,
            with_line_number: false,
            json: false,
        }
    }
}

/// 网关配置主结构体
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    pub api: ApiConfig,
    pub discovery: DiscoveryConfig,
    pub rpc: RpcConfig,
    pub rpc_register_name: RpcRegisterNameConfig,
    pub token: TokenConfig,
    pub redis: RedisConfig,
    pub presence: PresenceConfig,
    pub logging: LoggingConfig,
}

impl GatewayConfig {
    /// 编码为共享配置 blob（敏感字段不参与序列化）
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("failed to encode gateway config")
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.token.secret.is_empty() {
            return Err(anyhow!("token.secret must not be empty"));
        }
        if self.discovery.backend == DiscoveryStrategy::Etcd
            && self.discovery.etcd.endpoints.is_empty()
        {
            return Err(anyhow!("discovery.etcd.endpoints must not be empty"));
        }
        if self.discovery.etcd.lease_ttl_secs <= 0 {
            return Err(anyhow!("discovery.etcd.lease_ttl_secs must be positive"));
        }
        Ok(())
    }
}

/// 加载配置
///
/// 未指定路径时依次尝试 `config/` 目录和 `config.toml`，全部失败则使用默认配置。
/// 随后叠加 `FLARE_ENV` 指定的环境配置和 `FLARE_*` 环境变量。
pub fn load_config(path: Option<&str>) -> Result<GatewayConfig> {
    let mut merged = match path {
        Some(p) => load_config_value(Path::new(p))?,
        None => {
            let candidates = [PathBuf::from("config"), PathBuf::from("config.toml")];
            load_with_fallback(&candidates)
        }
    };

    ConfigManager::load_environment_config(&mut merged)?;

    let mut cfg: GatewayConfig = merged
        .try_into()
        .context("invalid gateway configuration")?;
    ConfigManager::apply_env_overrides(&mut cfg)?;
    cfg.validate()?;
    Ok(cfg)
}

/// 从 TOML 字符串解析配置（不叠加环境）
pub fn parse_config(content: &str) -> Result<GatewayConfig> {
    let cfg: GatewayConfig = toml::from_str(content).context("invalid config format")?;
    Ok(cfg)
}

/// 使用备选方案加载配置
fn load_with_fallback(candidates: &[PathBuf]) -> Value {
    for path in candidates {
        match load_config_value(path) {
            Ok(value) => return value,
            Err(err) => {
                warn!("failed to load config from {}: {err}", path.display());
            }
        }
    }

    warn!("no configuration source succeeded, falling back to defaults");
    Value::Table(toml::map::Map::new())
}

/// 从文件或目录加载配置值
fn load_config_value(path: &Path) -> Result<Value> {
    if !path.exists() {
        return Err(anyhow!(
            "configuration path {} does not exist",
            path.display()
        ));
    }

    let metadata = path
        .metadata()
        .with_context(|| format!("unable to read metadata for {}", path.display()))?;

    if metadata.is_dir() {
        load_config_from_directory(path)
    } else {
        load_toml_value(path)
    }
}

/// 从目录加载配置：`base.toml` + `shared/` + `services/` + `overrides/`
fn load_config_from_directory(path: &Path) -> Result<Value> {
    let base_file = path.join("base.toml");
    if !base_file.exists() {
        return Err(anyhow!(
            "missing base configuration: {}",
            base_file.display()
        ));
    }

    let mut merged = load_toml_value(&base_file)?;

    if !merged.is_table() {
        return Err(anyhow!(
            "base configuration must be a table: {}",
            base_file.display()
        ));
    }

    merge_directory(&mut merged, &path.join("shared"))?;
    merge_directory(&mut merged, &path.join("services"))?;
    merge_directory(&mut merged, &path.join("overrides"))?;

    Ok(merged)
}

/// 合并目录中的配置片段（按文件名排序）
fn merge_directory(root: &mut Value, dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }

    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("unable to read config directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(OsStr::to_str)
                .map(|ext| ext.eq_ignore_ascii_case("toml"))
                .unwrap_or(false)
        })
        .collect::<Vec<_>>();

    entries.sort_by_key(|entry| entry.path());

    for entry in entries {
        let value = load_toml_value(&entry.path())?;
        merge_value(root, value);
    }

    Ok(())
}

/// 加载 TOML 值
fn load_toml_value(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config fragment {}", path.display()))?;
    let value: Value = toml::from_str(&content)
        .with_context(|| format!("invalid TOML content in fragment {}", path.display()))?;
    Ok(value)
}

/// 深度合并：表按键递归合并，其余类型整体覆盖
pub(crate) fn merge_value(base: &mut Value, overlay: Value) {
    match overlay {
        Value::Table(overlay_table) => {
            if let Value::Table(base_table) = base {
                for (key, overlay_value) in overlay_table.into_iter() {
                    match base_table.get_mut(&key) {
                        Some(base_value) => merge_value(base_value, overlay_value),
                        None => {
                            base_table.insert(key, overlay_value);
                        }
                    }
                }
            } else {
                *base = Value::Table(overlay_table);
            }
        }
        other => {
            *base = other;
        }
    }
}

/// 当前是否设置了某个环境变量（非空）
pub(crate) fn env_non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = GatewayConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.api.port, 10002);
        assert_eq!(cfg.discovery.backend, DiscoveryStrategy::Etcd);
    }

    #[test]
    fn test_parse_partial_config() {
        let cfg = parse_config(
            r#"
            [api]
            port = 18080

            [discovery]
            backend = "k8s"

            [discovery.kubernetes]
            namespace = "im"
            port = 10110

            [presence]
            shard_timeout_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(cfg.api.port, 18080);
        assert_eq!(cfg.api.listen_ip, "0.0.0.0");
        assert_eq!(cfg.discovery.backend, DiscoveryStrategy::Kubernetes);
        assert_eq!(cfg.discovery.kubernetes.port, 10110);
        assert_eq!(cfg.presence.shard_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_merge_value_overrides_nested_keys() {
        let mut base: Value = toml::from_str(
            r#"
            [api]
            port = 1
            listen_ip = "127.0.0.1"
            "#,
        )
        .unwrap();
        let overlay: Value = toml::from_str(
            r#"
            [api]
            port = 2
            "#,
        )
        .unwrap();

        merge_value(&mut base, overlay);
        let cfg: GatewayConfig = base.try_into().unwrap();
        assert_eq!(cfg.api.port, 2);
        assert_eq!(cfg.api.listen_ip, "127.0.0.1");
    }

    #[test]
    fn test_encoded_blob_omits_secrets() {
        let mut cfg = GatewayConfig::default();
        cfg.token.secret = "top-secret".to_string();
        let blob = cfg.encode().unwrap();
        let text = String::from_utf8(blob).unwrap();
        assert!(!text.contains("top-secret"));
        assert!(text.contains("shard_timeout_ms"));
    }

    #[test]
    fn test_root_nodes_follow_default_groups() {
        let cfg = parse_config(
            r#"
            [rpc_register_name]
            message_gateway = "msg-gateway-v2"
            "#,
        )
        .unwrap();

        let all = cfg.rpc_register_name.all();
        assert_eq!(all.len(), service_names::DEFAULT_RPC_GROUPS.len());
        assert_eq!(all[4], "msg-gateway-v2");
        assert!(!all.iter().any(|name| name == service_names::MESSAGE_GATEWAY));
        assert!(!all.iter().any(|name| name == service_names::API));
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!(
            "K8S".parse::<DiscoveryStrategy>().unwrap(),
            DiscoveryStrategy::Kubernetes
        );
        assert!("zookeeper".parse::<DiscoveryStrategy>().is_err());
    }
}
