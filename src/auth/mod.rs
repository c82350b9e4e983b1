//! # 会话校验模块
//!
//! 请求携带的 `token` 先在本地校验签名和有效期，再到共享的吊销状态存储中确认
//! 该设备的这枚 Token 仍然有效。校验通过后只向下游传递 [`SessionIdentity`]，
//! 原始 Token 不会继续向后传递。

pub mod claims;
pub mod revocation;
pub mod validator;

pub use claims::{Claims, TokenVerifier};
pub use revocation::{MemoryRevocationStore, RedisRevocationStore, RevocationStore, TokenStatus};
pub use validator::SessionValidator;

/// 已通过校验的调用方身份
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub user_id: String,
    pub platform_id: i32,
    pub platform_name: String,
}

impl SessionIdentity {
    pub fn new(user_id: impl Into<String>, platform_id: i32) -> Self {
        Self {
            user_id: user_id.into(),
            platform_id,
            platform_name: platform_name(platform_id).to_string(),
        }
    }
}

/// 平台 ID → 平台名
pub fn platform_name(platform_id: i32) -> &'static str {
    match platform_id {
        1 => "IOS",
        2 => "Android",
        3 => "Windows",
        4 => "OSX",
        5 => "Web",
        6 => "MiniWeb",
        7 => "Linux",
        8 => "AndroidPad",
        9 => "IPad",
        10 => "Admin",
        _ => "",
    }
}
