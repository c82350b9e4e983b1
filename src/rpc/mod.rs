//! 出站 RPC 调用
//!
//! 网关与后端业务服务之间只有一个约定：拿到一个已解析的连接，
//! 发起一次调用，并把结果归类为 {参数错误, 不存在, 无权限, 超时, 不可用, 内部错误}。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::{MetadataMap, MetadataValue};
use tonic::transport::{Channel, Endpoint as TonicEndpoint};
use tonic::{Code, Status};
use tracing::{debug, warn};

use crate::discovery::{Connector, DiscoveryError, EndpointDirectory};
use crate::error::GatewayError;

pub mod codec;

pub use codec::JsonCodec;

/// 出站调用附带的元数据键
pub mod metadata_keys {
    pub const OPERATION_ID: &str = "operationid";
    pub const OP_USER_ID: &str = "opuserid";
    pub const OP_USER_PLATFORM: &str = "opuserplatform";
}

/// 单次调用的结果分类
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcError {
    #[error("bad arguments: {0}")]
    BadArguments(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl RpcError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, RpcError::PermissionDenied(_))
    }
}

impl From<Status> for RpcError {
    fn from(status: Status) -> Self {
        let message = status.message().to_string();
        match status.code() {
            Code::InvalidArgument | Code::FailedPrecondition | Code::OutOfRange => {
                RpcError::BadArguments(message)
            }
            Code::NotFound => RpcError::NotFound(message),
            Code::PermissionDenied | Code::Unauthenticated => RpcError::PermissionDenied(message),
            Code::DeadlineExceeded | Code::Cancelled => RpcError::Timeout(message),
            Code::Unavailable => RpcError::Unavailable(message),
            _ => RpcError::Internal(message),
        }
    }
}

impl From<RpcError> for GatewayError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::BadArguments(m) => GatewayError::Argument(m),
            RpcError::NotFound(m) => GatewayError::UpstreamNotFound(m),
            RpcError::PermissionDenied(m) => GatewayError::UpstreamPermissionDenied(m),
            RpcError::Timeout(m) => GatewayError::UpstreamTimeout(m),
            RpcError::Unavailable(m) => GatewayError::ServiceUnavailable(m),
            RpcError::Internal(m) => GatewayError::UpstreamInternal(m),
        }
    }
}

/// 调用上下文：操作 ID 以及已通过校验的调用方身份
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RpcContext {
    pub operation_id: String,
    pub op_user_id: Option<String>,
    pub op_user_platform: Option<String>,
}

impl RpcContext {
    pub fn new(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            ..Default::default()
        }
    }

    /// 写入 gRPC 元数据；非 ASCII 的值直接跳过
    pub fn apply(&self, metadata: &mut MetadataMap) {
        let pairs = [
            (metadata_keys::OPERATION_ID, Some(self.operation_id.as_str())),
            (metadata_keys::OP_USER_ID, self.op_user_id.as_deref()),
            (metadata_keys::OP_USER_PLATFORM, self.op_user_platform.as_deref()),
        ];
        for (key, value) in pairs {
            let Some(value) = value.filter(|v| !v.is_empty()) else {
                continue;
            };
            match MetadataValue::try_from(value) {
                Ok(v) => {
                    metadata.insert(key, v);
                }
                Err(_) => debug!(key, "Skipping non-ascii metadata value"),
            }
        }
    }
}

/// 基于 tonic Channel 的调用客户端
#[derive(Debug, Clone)]
pub struct RpcClient {
    channel: Channel,
    timeout: Duration,
}

impl RpcClient {
    pub fn new(channel: Channel, timeout: Duration) -> Self {
        Self { channel, timeout }
    }

    /// 发起一次一元调用
    ///
    /// `path` 形如 `/flare.user.user/GetDesignateUsers`。超时由网关自己的预算控制，不做重试。
    pub async fn call<Req, Resp>(&self, path: &str, req: Req, ctx: &RpcContext) -> Result<Resp, RpcError>
    where
        Req: Serialize + Send + Sync + 'static,
        Resp: DeserializeOwned + Send + Sync + 'static,
    {
        let path: PathAndQuery = path
            .parse()
            .map_err(|_| RpcError::BadArguments(format!("invalid method path: {path}")))?;

        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        let call = async {
            grpc.ready()
                .await
                .map_err(|e| RpcError::Unavailable(format!("service was not ready: {e}")))?;

            let mut request = tonic::Request::new(req);
            request.set_timeout(self.timeout);
            ctx.apply(request.metadata_mut());

            grpc.unary(request, path, JsonCodec::<Req, Resp>::default())
                .await
                .map(|resp| resp.into_inner())
                .map_err(RpcError::from)
        };

        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Timeout(format!(
                "call exceeded {}ms",
                self.timeout.as_millis()
            ))),
        }
    }
}

/// gRPC 建连器
///
/// `lazy` 为真时不在刷新时真正建连，而是在首次调用时按需建连（平台 DNS 模式）。
#[derive(Debug, Clone)]
pub struct GrpcConnector {
    dial_timeout: Duration,
    lazy: bool,
}

impl GrpcConnector {
    pub fn new(dial_timeout: Duration) -> Self {
        Self {
            dial_timeout,
            lazy: false,
        }
    }

    pub fn lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }
}

pub(crate) fn endpoint_uri(address: &str) -> String {
    if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    }
}

#[async_trait]
impl Connector for GrpcConnector {
    type Conn = Channel;

    async fn connect(&self, address: &str) -> Result<Channel, DiscoveryError> {
        let endpoint = TonicEndpoint::from_shared(endpoint_uri(address))
            .map_err(|_| DiscoveryError::InvalidAddress(address.to_string()))?
            .connect_timeout(self.dial_timeout)
            .tcp_nodelay(true);

        if self.lazy {
            return Ok(endpoint.connect_lazy());
        }

        endpoint.connect().await.map_err(|e| DiscoveryError::Dial {
            address: address.to_string(),
            reason: e.to_string(),
        })
    }
}

/// 通用转发调用接口：给定服务名和方法路径，转发一个 JSON 请求
#[async_trait]
pub trait RpcInvoker: Send + Sync {
    async fn invoke(
        &self,
        service: &str,
        method: &str,
        body: Value,
        ctx: &RpcContext,
    ) -> Result<Value, GatewayError>;
}

/// 通过端点目录轮询选择实例的调用器
pub struct DirectoryInvoker {
    directory: Arc<EndpointDirectory<GrpcConnector>>,
    call_timeout: Duration,
}

impl DirectoryInvoker {
    pub fn new(directory: Arc<EndpointDirectory<GrpcConnector>>, call_timeout: Duration) -> Self {
        Self {
            directory,
            call_timeout,
        }
    }
}

#[async_trait]
impl RpcInvoker for DirectoryInvoker {
    async fn invoke(
        &self,
        service: &str,
        method: &str,
        body: Value,
        ctx: &RpcContext,
    ) -> Result<Value, GatewayError> {
        let channel = self.directory.resolve_one(service)?;
        let client = RpcClient::new(channel, self.call_timeout);

        client.call::<Value, Value>(method, body, ctx).await.map_err(|e| {
            warn!(service_name = %service, method = %method, operation_id = %ctx.operation_id, error = %e, "RPC call failed");
            GatewayError::from(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(
            RpcError::from(Status::invalid_argument("bad")),
            RpcError::BadArguments("bad".to_string())
        );
        assert!(RpcError::from(Status::permission_denied("no")).is_permission_denied());
        assert!(matches!(
            RpcError::from(Status::deadline_exceeded("slow")),
            RpcError::Timeout(_)
        ));
        assert!(matches!(
            RpcError::from(Status::unknown("boom")),
            RpcError::Internal(_)
        ));
    }

    #[test]
    fn test_rpc_error_to_gateway_error() {
        assert!(matches!(
            GatewayError::from(RpcError::NotFound("u1".into())),
            GatewayError::UpstreamNotFound(_)
        ));
        assert!(matches!(
            GatewayError::from(RpcError::Unavailable("x".into())),
            GatewayError::ServiceUnavailable(_)
        ));
        assert!(matches!(
            GatewayError::from(RpcError::PermissionDenied("x".into())),
            GatewayError::UpstreamPermissionDenied(_)
        ));
    }

    #[test]
    fn test_context_metadata() {
        let ctx = RpcContext {
            operation_id: "op-1".to_string(),
            op_user_id: Some("u1".to_string()),
            op_user_platform: None,
        };
        let mut md = MetadataMap::new();
        ctx.apply(&mut md);
        assert_eq!(md.get(metadata_keys::OPERATION_ID).unwrap(), "op-1");
        assert_eq!(md.get(metadata_keys::OP_USER_ID).unwrap(), "u1");
        assert!(md.get(metadata_keys::OP_USER_PLATFORM).is_none());
    }

    #[test]
    fn test_endpoint_uri() {
        assert_eq!(endpoint_uri("10.0.0.1:10140"), "http://10.0.0.1:10140");
        assert_eq!(endpoint_uri("http://msg.im.svc:80"), "http://msg.im.svc:80");
    }
}
