//! 在线状态数据模型（字段名与消息网关服务保持一致）

use serde::{Deserialize, Serialize};

/// 在线
pub const ONLINE_STATUS: i32 = 1;
/// 离线
pub const OFFLINE_STATUS: i32 = 0;

/// 在线状态查询请求
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetUsersOnlineStatusReq {
    #[serde(rename = "userIDs", default)]
    pub user_ids: Vec<String>,
}

/// 单个平台上的在线连接
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformDetail {
    pub platform: String,
    pub status: String,
    #[serde(rename = "connID")]
    pub conn_id: String,
    #[serde(rename = "isBackground")]
    pub is_background: bool,
    pub token: String,
}

/// 单个用户的在线状态
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserPresence {
    #[serde(rename = "userID")]
    pub user_id: String,
    pub status: i32,
    #[serde(rename = "detailPlatformStatus")]
    pub detail_platform_status: Vec<PlatformDetail>,
}

impl UserPresence {
    pub fn offline(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            status: OFFLINE_STATUS,
            detail_platform_status: Vec::new(),
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == ONLINE_STATUS
    }
}

/// 在线状态查询响应（单个分片）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetUsersOnlineStatusResp {
    #[serde(rename = "successResult", default)]
    pub success_result: Vec<UserPresence>,
}

/// 某个平台上的 Token 列表
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformTokens {
    pub platform: String,
    pub token: Vec<String>,
    pub total: i32,
}

/// 单个在线用户按平台分组的 Token 明细
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTokenDetail {
    #[serde(rename = "userID")]
    pub user_id: String,
    pub status: i32,
    #[serde(rename = "singlePlatformToken")]
    pub single_platform_token: Vec<PlatformTokens>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_field_names() {
        let req: GetUsersOnlineStatusReq =
            serde_json::from_str(r#"{"userIDs":["u1","u2"]}"#).unwrap();
        assert_eq!(req.user_ids, vec!["u1", "u2"]);

        let resp: GetUsersOnlineStatusResp = serde_json::from_str(
            r#"{"successResult":[{"userID":"u1","status":1,
                "detailPlatformStatus":[{"platform":"IOS","connID":"c1","isBackground":true,"token":"t"}]}]}"#,
        )
        .unwrap();
        let user = &resp.success_result[0];
        assert!(user.is_online());
        assert_eq!(user.detail_platform_status[0].conn_id, "c1");
        assert!(user.detail_platform_status[0].is_background);
    }
}
