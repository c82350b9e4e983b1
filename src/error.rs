//! Flare API Gateway 错误模块
//!
//! - 定义网关对外暴露的错误分类（参数错误、鉴权失败、上游错误等）
//! - 维护与客户端约定的数字错误码
//! - 负责把错误转换成 `{errCode, errMsg, errDlt}` 结构的 HTTP 响应

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// 网关结果类型
pub type Result<T> = std::result::Result<T, GatewayError>;

/// 客户端约定的数字错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// 成功
    Ok = 0,
    /// 服务内部错误
    ServerInternal = 500,
    /// 服务不可用（没有存活实例）
    ServiceUnavailable = 503,
    /// 上游调用超时
    Timeout = 504,
    /// 参数错误
    Args = 1001,
    /// 无权限
    NoPermission = 1002,
    /// 记录不存在
    RecordNotFound = 1004,
    /// Token 签名或有效期校验失败
    TokenInvalid = 1502,
    /// Token 状态未知
    TokenUnknown = 1505,
    /// Token 已被踢下线
    TokenKicked = 1506,
    /// Token 不存在
    TokenNotExist = 1507,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// 网关错误类型
///
/// 本地产生的错误（参数、鉴权、Token 状态）直接终止请求，不做重试；
/// 上游错误由服务发现 / RPC 层产生，网关自身同样不重试。
#[derive(Debug, Error)]
pub enum GatewayError {
    /// 请求格式错误
    #[error("ArgsError: {0}")]
    Argument(String),

    /// 缺少 Token 或 Token 校验失败
    #[error("TokenInvalidError: {0}")]
    Unauthenticated(String),

    /// 当前设备没有记录中的会话，需要重新登录
    #[error("TokenNotExistError")]
    TokenNotFound,

    /// Token 已被新的登录踢下线
    #[error("TokenKickedError")]
    TokenKicked,

    /// Token 状态既不是正常也不是被踢
    #[error("TokenUnknownError")]
    TokenUnknown,

    /// 该服务名当前没有任何存活实例
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// 上游调用超时
    #[error("upstream timeout: {0}")]
    UpstreamTimeout(String),

    /// 上游拒绝（无权限）
    #[error("NoPermissionError: {0}")]
    UpstreamPermissionDenied(String),

    /// 上游记录不存在
    #[error("RecordNotFoundError: {0}")]
    UpstreamNotFound(String),

    /// 上游内部错误
    #[error("ServerInternalError: {0}")]
    UpstreamInternal(String),
}

impl GatewayError {
    /// 错误对应的数字错误码
    pub fn code(&self) -> ErrorCode {
        match self {
            GatewayError::Argument(_) => ErrorCode::Args,
            GatewayError::Unauthenticated(_) => ErrorCode::TokenInvalid,
            GatewayError::TokenNotFound => ErrorCode::TokenNotExist,
            GatewayError::TokenKicked => ErrorCode::TokenKicked,
            GatewayError::TokenUnknown => ErrorCode::TokenUnknown,
            GatewayError::ServiceUnavailable(_) => ErrorCode::ServiceUnavailable,
            GatewayError::UpstreamTimeout(_) => ErrorCode::Timeout,
            GatewayError::UpstreamPermissionDenied(_) => ErrorCode::NoPermission,
            GatewayError::UpstreamNotFound(_) => ErrorCode::RecordNotFound,
            GatewayError::UpstreamInternal(_) => ErrorCode::ServerInternal,
        }
    }

    /// 错误对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Argument(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unauthenticated(_)
            | GatewayError::TokenNotFound
            | GatewayError::TokenKicked
            | GatewayError::TokenUnknown => StatusCode::UNAUTHORIZED,
            GatewayError::UpstreamPermissionDenied(_) => StatusCode::FORBIDDEN,
            GatewayError::UpstreamNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::UpstreamInternal(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// 面向客户端的错误信息
    pub fn message(&self) -> &'static str {
        match self {
            GatewayError::Argument(_) => "ArgsError",
            GatewayError::Unauthenticated(_) => "TokenInvalidError",
            GatewayError::TokenNotFound => "TokenNotExistError",
            GatewayError::TokenKicked => "TokenKickedError",
            GatewayError::TokenUnknown => "TokenUnknownError",
            GatewayError::ServiceUnavailable(_) => "ServiceUnavailableError",
            GatewayError::UpstreamTimeout(_) => "TimeoutError",
            GatewayError::UpstreamPermissionDenied(_) => "NoPermissionError",
            GatewayError::UpstreamNotFound(_) => "RecordNotFoundError",
            GatewayError::UpstreamInternal(_) => "ServerInternalError",
        }
    }

    /// 错误细节（写入 errDlt）
    pub fn detail(&self) -> String {
        match self {
            GatewayError::Argument(d)
            | GatewayError::Unauthenticated(d)
            | GatewayError::ServiceUnavailable(d)
            | GatewayError::UpstreamTimeout(d)
            | GatewayError::UpstreamPermissionDenied(d)
            | GatewayError::UpstreamNotFound(d)
            | GatewayError::UpstreamInternal(d) => d.clone(),
            GatewayError::TokenNotFound | GatewayError::TokenKicked | GatewayError::TokenUnknown => {
                String::new()
            }
        }
    }

    /// 按严重程度记录日志
    pub fn log(&self) {
        let status = self.status_code();
        let code = self.code().as_i32();

        if status.is_server_error() {
            tracing::error!(error = %self, err_code = code, status = status.as_u16(), "Upstream or server error");
        } else if status == StatusCode::UNAUTHORIZED {
            tracing::warn!(error = %self, err_code = code, "Session validation failed");
        } else {
            tracing::debug!(error = %self, err_code = code, "Client error");
        }
    }
}

/// 错误响应体
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    #[serde(rename = "errCode")]
    pub err_code: i32,
    #[serde(rename = "errMsg")]
    pub err_msg: String,
    #[serde(rename = "errDlt")]
    pub err_dlt: String,
}

impl From<&GatewayError> for ErrorBody {
    fn from(err: &GatewayError) -> Self {
        Self {
            err_code: err.code().as_i32(),
            err_msg: err.message().to_string(),
            err_dlt: err.detail(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        self.log();
        let status = self.status_code();
        (status, Json(ErrorBody::from(&self))).into_response()
    }
}
