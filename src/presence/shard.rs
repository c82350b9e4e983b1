//! 在线状态分片
//!
//! 消息网关按连接分片持有在线状态，每个实例只知道连到自己身上的用户。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::Channel;

use super::model::{GetUsersOnlineStatusReq, GetUsersOnlineStatusResp, UserPresence};
use crate::discovery::EndpointDirectory;
use crate::error::Result;
use crate::rpc::{GrpcConnector, RpcClient, RpcContext, RpcError};

/// 消息网关在线状态查询方法
pub const GET_USERS_ONLINE_STATUS: &str = "/flare.msggateway.msgGateway/GetUsersOnlineStatus";

/// 单个分片
#[async_trait]
pub trait PresenceShard: Send + Sync {
    /// 分片地址（用于日志）
    fn address(&self) -> &str;

    /// 查询该分片上这些用户的在线情况
    async fn online_status(
        &self,
        user_ids: &[String],
        ctx: &RpcContext,
    ) -> std::result::Result<Vec<UserPresence>, RpcError>;
}

/// 分片来源：每次查询时给出当前全部存活分片
#[async_trait]
pub trait ShardSource: Send + Sync {
    async fn shards(&self) -> Result<Vec<Arc<dyn PresenceShard>>>;
}

/// 基于 gRPC 连接的分片
pub struct GrpcPresenceShard {
    address: String,
    client: RpcClient,
}

impl GrpcPresenceShard {
    pub fn new(address: impl Into<String>, channel: Channel, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            client: RpcClient::new(channel, timeout),
        }
    }
}

#[async_trait]
impl PresenceShard for GrpcPresenceShard {
    fn address(&self) -> &str {
        &self.address
    }

    async fn online_status(
        &self,
        user_ids: &[String],
        ctx: &RpcContext,
    ) -> std::result::Result<Vec<UserPresence>, RpcError> {
        let req = GetUsersOnlineStatusReq {
            user_ids: user_ids.to_vec(),
        };
        let resp: GetUsersOnlineStatusResp = self.client.call(GET_USERS_ONLINE_STATUS, req, ctx).await?;
        Ok(resp.success_result)
    }
}

/// 从端点目录取出消息网关的全部实例
pub struct DirectoryShardSource {
    directory: Arc<EndpointDirectory<GrpcConnector>>,
    service: String,
    call_timeout: Duration,
}

impl DirectoryShardSource {
    pub fn new(
        directory: Arc<EndpointDirectory<GrpcConnector>>,
        service: impl Into<String>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            service: service.into(),
            call_timeout,
        }
    }
}

#[async_trait]
impl ShardSource for DirectoryShardSource {
    async fn shards(&self) -> Result<Vec<Arc<dyn PresenceShard>>> {
        let endpoints = self.directory.resolve_all(&self.service)?;
        Ok(endpoints
            .into_iter()
            .map(|ep| {
                Arc::new(GrpcPresenceShard::new(ep.address(), ep.conn(), self.call_timeout))
                    as Arc<dyn PresenceShard>
            })
            .collect())
    }
}
