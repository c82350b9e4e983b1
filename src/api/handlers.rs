//! 请求处理函数

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Request, State};
use bytes::Bytes;
use serde_json::{Value, json};
use tracing::debug;

use super::AppState;
use super::middleware::OperationId;
use super::response::{ApiResponse, parse_body, success};
use crate::auth::SessionIdentity;
use crate::error::{GatewayError, Result};
use crate::presence::{GetUsersOnlineStatusReq, UserPresence, UserTokenDetail};
use crate::rpc::RpcContext;

/// 请求体大小上限
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// 转发目标：实际服务名 + gRPC 方法路径
#[derive(Debug, Clone)]
pub struct ForwardTarget {
    pub service: String,
    pub method: String,
}

/// 拆出调用上下文和请求体
async fn read_request(req: Request) -> Result<(RpcContext, Bytes)> {
    let (parts, body) = req.into_parts();

    let mut ctx = RpcContext::new(
        parts
            .extensions
            .get::<OperationId>()
            .map(|op| op.0.clone())
            .unwrap_or_default(),
    );
    if let Some(identity) = parts.extensions.get::<SessionIdentity>() {
        ctx.op_user_id = Some(identity.user_id.clone());
        ctx.op_user_platform = Some(identity.platform_name.clone());
    }

    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| GatewayError::Argument(format!("failed to read body: {e}")))?;
    Ok((ctx, bytes))
}

/// 通用转发：请求体原样发给后端，返回值包进统一响应
pub async fn forward(
    state: AppState,
    target: Arc<ForwardTarget>,
    req: Request,
) -> Result<Json<ApiResponse<Value>>> {
    let (ctx, body) = read_request(req).await?;
    let payload: Value = parse_body(&body)?;

    debug!(service_name = %target.service, method = %target.method, "Forwarding request");
    let data = state
        .invoker
        .invoke(&target.service, &target.method, payload, &ctx)
        .await?;
    Ok(success(data))
}

/// 批量查询在线状态
pub async fn online_status(
    State(state): State<AppState>,
    req: Request,
) -> Result<Json<ApiResponse<Vec<UserPresence>>>> {
    let (ctx, body) = read_request(req).await?;
    let query: GetUsersOnlineStatusReq = parse_body(&body)?;

    let result = state.presence.online_status(&query.user_ids, &ctx).await?;
    Ok(success(result))
}

/// 批量查询在线 Token 明细
pub async fn online_token_detail(
    State(state): State<AppState>,
    req: Request,
) -> Result<Json<ApiResponse<Vec<UserTokenDetail>>>> {
    let (ctx, body) = read_request(req).await?;
    let query: GetUsersOnlineStatusReq = parse_body(&body)?;

    let result = state
        .presence
        .online_token_detail(&query.user_ids, &ctx)
        .await?;
    Ok(success(result))
}

/// 健康检查：各服务当前的存活实例数
pub async fn healthz(State(state): State<AppState>) -> Json<Value> {
    let services: BTreeMap<String, usize> = state.stats.endpoint_counts().into_iter().collect();
    Json(json!({
        "status": "ok",
        "services": services,
    }))
}
