//! 统一响应结构：`{errCode, errMsg, errDlt, data}`

use axum::Json;
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{ErrorCode, GatewayError, Result};

/// 成功响应
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    #[serde(rename = "errCode")]
    pub err_code: i32,
    #[serde(rename = "errMsg")]
    pub err_msg: String,
    #[serde(rename = "errDlt")]
    pub err_dlt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

/// 包装成功结果
pub fn success<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        err_code: ErrorCode::Ok.as_i32(),
        err_msg: String::new(),
        err_dlt: String::new(),
        data: Some(data),
    })
}

/// 解析 JSON 请求体，空请求体按 `{}` 处理
pub fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T> {
    let payload: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        &body[..]
    };
    serde_json::from_slice(payload).map_err(|e| GatewayError::Argument(e.to_string()))
}
