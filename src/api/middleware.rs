//! HTTP 中间件
//!
//! - `cors_layer`：宽松跨域，OPTIONS 预检请求在这一层直接返回 200
//! - `operation_id`：POST 请求必须携带 `operationID` 头，并为整个请求建立 span
//! - `request_deadline`：单个请求的整体超时
//! - `require_session`：会话校验，通过后把 [`SessionIdentity`] 放入请求扩展

use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{Instrument, debug, info_span};

use super::AppState;
use crate::auth::SessionIdentity;
use crate::error::GatewayError;

/// 操作 ID 请求头
pub const OPERATION_ID_HEADER: &str = "operationid";
/// Token 请求头
pub const TOKEN_HEADER: &str = "token";

/// 预检缓存时间
const CORS_MAX_AGE: Duration = Duration::from_secs(172_800);

/// 本次请求的操作 ID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationId(pub String);

/// 宽松的跨域策略
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any)
        .max_age(CORS_MAX_AGE)
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub async fn operation_id(mut req: Request, next: Next) -> Response {
    let id = match header_value(req.headers(), OPERATION_ID_HEADER) {
        Some(id) => id,
        None if req.method() == Method::POST => {
            return GatewayError::Argument("header must have operationID".to_string()).into_response();
        }
        None => format!("gw-{}", Utc::now().timestamp_micros()),
    };

    let span = info_span!(
        "request",
        operation_id = %id,
        method = %req.method(),
        path = %req.uri().path()
    );
    req.extensions_mut().insert(OperationId(id));
    next.run(req).instrument(span).await
}

pub async fn request_deadline(State(state): State<AppState>, req: Request, next: Next) -> Response {
    match tokio::time::timeout(state.request_timeout, next.run(req)).await {
        Ok(resp) => resp,
        Err(_) => GatewayError::UpstreamTimeout(format!(
            "request exceeded {}ms",
            state.request_timeout.as_millis()
        ))
        .into_response(),
    }
}

pub async fn require_session(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let token = header_value(req.headers(), TOKEN_HEADER);

    match state.validator.validate(token.as_deref()).await {
        Ok(identity) => {
            debug!(user_id = %identity.user_id, platform = %identity.platform_name, "Session validated");
            req.extensions_mut().insert::<SessionIdentity>(identity);
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}
