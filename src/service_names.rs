//! 后端 RPC 服务名定义模块
//!
//! 网关通过服务发现寻址的所有后端服务名都在这里定义，
//! 注册中心中的根节点、配置中的默认值都以这些常量为准。
//!
//! ## 环境变量覆盖
//!
//! 不同环境部署时可以通过 `{SERVICE}_SERVICE` 覆盖，例如：
//! - `USER_SERVICE=User-dev`
//! - `MESSAGE_GATEWAY_SERVICE=MessageGateway-staging`
//!
//! **注意**：覆盖后注册方与发现方必须使用同一个服务名。

/// 后端服务名常量
pub mod service_names {
    /// 用户服务
    pub const USER: &str = "User";

    /// 好友服务
    pub const FRIEND: &str = "Friend";

    /// 消息服务
    pub const MSG: &str = "Msg";

    /// 推送服务
    pub const PUSH: &str = "Push";

    /// 消息网关服务（在线状态按实例分片）
    pub const MESSAGE_GATEWAY: &str = "MessageGateway";

    /// 群组服务
    pub const GROUP: &str = "Group";

    /// 认证服务
    pub const AUTH: &str = "Auth";

    /// 会话服务
    pub const CONVERSATION: &str = "Conversation";

    /// 第三方服务（对象存储、日志、推送令牌）
    pub const THIRD: &str = "Third";

    /// 网关自身（仅用于注册）
    pub const API: &str = "Api";
}

pub use service_names::*;

/// 启动时在注册中心创建根节点的默认服务分组
pub const DEFAULT_RPC_GROUPS: [&str; 9] = [
    USER,
    FRIEND,
    MSG,
    PUSH,
    MESSAGE_GATEWAY,
    GROUP,
    AUTH,
    CONVERSATION,
    THIRD,
];

/// 服务名对应的环境变量名称
///
/// `MessageGateway` -> `MESSAGE_GATEWAY_SERVICE`
pub fn service_name_env_var(service_name: &str) -> String {
    let mut upper = String::with_capacity(service_name.len() + 8);
    for (idx, ch) in service_name.chars().enumerate() {
        if ch.is_ascii_uppercase() && idx > 0 {
            upper.push('_');
        }
        upper.push(ch.to_ascii_uppercase());
    }
    format!("{}_SERVICE", upper)
}

/// 优先读取环境变量，否则使用给定的默认服务名
pub fn get_service_name(constant_name: &str) -> String {
    std::env::var(service_name_env_var(constant_name))
        .unwrap_or_else(|_| constant_name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_naming() {
        assert_eq!(service_name_env_var(USER), "USER_SERVICE");
        assert_eq!(
            service_name_env_var(MESSAGE_GATEWAY),
            "MESSAGE_GATEWAY_SERVICE"
        );
    }
}
