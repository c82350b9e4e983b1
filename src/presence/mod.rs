//! # 在线状态聚合模块
//!
//! 在线状态分布在消息网关的各个实例上，查询时需要广播到全部实例再合并。

pub mod aggregator;
pub mod model;
pub mod shard;

pub use aggregator::{PresenceAggregator, merge_status, merge_token_detail};
pub use model::{
    GetUsersOnlineStatusReq, GetUsersOnlineStatusResp, OFFLINE_STATUS, ONLINE_STATUS,
    PlatformDetail, PlatformTokens, UserPresence, UserTokenDetail,
};
pub use shard::{DirectoryShardSource, GrpcPresenceShard, PresenceShard, ShardSource};
