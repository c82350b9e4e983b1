//! 在线状态聚合
//!
//! 一次查询广播到消息网关的全部实例：每个实例各自带超时并发查询，结果按分片下标
//! 放入固定槽位，全部完成后做一次确定性合并，输出顺序与请求中的用户顺序一致。
//!
//! - 某个分片返回无权限：立即终止整次聚合（请求本身不合法）
//! - 其他错误或超时：记录日志后忽略该分片

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::model::{ONLINE_STATUS, PlatformTokens, UserPresence, UserTokenDetail};
use super::shard::ShardSource;
use crate::error::{GatewayError, Result};
use crate::rpc::RpcContext;

/// 在线状态聚合器
pub struct PresenceAggregator {
    source: Arc<dyn ShardSource>,
    shard_timeout: Duration,
}

impl PresenceAggregator {
    pub fn new(source: Arc<dyn ShardSource>, shard_timeout: Duration) -> Self {
        Self {
            source,
            shard_timeout,
        }
    }

    /// 查询在线状态：每个请求用户一条记录，未在任何分片出现的用户为离线
    pub async fn online_status(&self, user_ids: &[String], ctx: &RpcContext) -> Result<Vec<UserPresence>> {
        let partials = self.scatter(user_ids, ctx).await?;
        Ok(merge_status(user_ids, &partials))
    }

    /// 查询在线 Token 明细：只返回在线用户，按平台分组
    pub async fn online_token_detail(
        &self,
        user_ids: &[String],
        ctx: &RpcContext,
    ) -> Result<Vec<UserTokenDetail>> {
        let partials = self.scatter(user_ids, ctx).await?;
        Ok(merge_token_detail(user_ids, &partials))
    }

    /// 广播查询并收集各分片结果（失败的分片对应空槽位）
    async fn scatter(&self, user_ids: &[String], ctx: &RpcContext) -> Result<Vec<Vec<UserPresence>>> {
        let shards = self.source.shards().await?;
        let ids: Arc<[String]> = Arc::from(user_ids);

        // JoinSet 被丢弃时会中止所有尚未完成的查询
        let mut set = JoinSet::new();
        for (idx, shard) in shards.iter().enumerate() {
            let shard = Arc::clone(shard);
            let ids = Arc::clone(&ids);
            let ctx = ctx.clone();
            let timeout = self.shard_timeout;
            set.spawn(async move {
                let outcome = tokio::time::timeout(timeout, shard.online_status(&ids, &ctx)).await;
                (idx, outcome)
            });
        }

        let mut slots: Vec<Option<Vec<UserPresence>>> = vec![None; shards.len()];
        while let Some(joined) = set.join_next().await {
            let (idx, outcome) = match joined {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "Presence shard task failed");
                    continue;
                }
            };
            let address = shards[idx].address();

            match outcome {
                Ok(Ok(partial)) => {
                    debug!(shard = %address, users = partial.len(), "Presence shard answered");
                    slots[idx] = Some(partial);
                }
                Ok(Err(e)) if e.is_permission_denied() => {
                    warn!(shard = %address, operation_id = %ctx.operation_id, error = %e, "Presence query rejected, aborting aggregation");
                    return Err(GatewayError::from(e));
                }
                Ok(Err(e)) => {
                    warn!(shard = %address, operation_id = %ctx.operation_id, error = %e, "Presence shard failed, skipping");
                }
                Err(_) => {
                    warn!(
                        shard = %address,
                        operation_id = %ctx.operation_id,
                        timeout_ms = self.shard_timeout.as_millis() as u64,
                        "Presence shard timed out, skipping"
                    );
                }
            }
        }

        Ok(slots.into_iter().flatten().collect())
    }
}

/// 合并在线状态
///
/// 同一用户在多个分片上出现时合并为一条记录，平台明细取并集。
pub fn merge_status(user_ids: &[String], partials: &[Vec<UserPresence>]) -> Vec<UserPresence> {
    user_ids
        .iter()
        .map(|user_id| {
            let mut merged = UserPresence::offline(user_id.clone());
            for entry in partials.iter().flatten().filter(|p| &p.user_id == user_id) {
                merged.status = ONLINE_STATUS;
                for detail in &entry.detail_platform_status {
                    if !merged.detail_platform_status.contains(detail) {
                        merged.detail_platform_status.push(detail.clone());
                    }
                }
            }
            merged
        })
        .collect()
}

/// 合并 Token 明细：平台按首次出现顺序输出，离线用户不出现在结果中
pub fn merge_token_detail(user_ids: &[String], partials: &[Vec<UserPresence>]) -> Vec<UserTokenDetail> {
    let mut out = Vec::new();
    for user_id in user_ids {
        let mut found = false;
        let mut groups: Vec<(String, Vec<String>)> = Vec::new();

        for entry in partials.iter().flatten().filter(|p| &p.user_id == user_id) {
            found = true;
            for detail in &entry.detail_platform_status {
                match groups.iter_mut().find(|(platform, _)| *platform == detail.platform) {
                    Some((_, tokens)) => tokens.push(detail.token.clone()),
                    None => groups.push((detail.platform.clone(), vec![detail.token.clone()])),
                }
            }
        }

        if !found {
            continue;
        }
        out.push(UserTokenDetail {
            user_id: user_id.clone(),
            status: ONLINE_STATUS,
            single_platform_token: groups
                .into_iter()
                .map(|(platform, token)| PlatformTokens {
                    platform,
                    total: token.len() as i32,
                    token,
                })
                .collect(),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::presence::model::{OFFLINE_STATUS, PlatformDetail};
    use crate::presence::shard::PresenceShard;
    use crate::rpc::RpcError;

    enum Behavior {
        Answer(Vec<UserPresence>),
        Fail(RpcError),
        Hang,
    }

    struct FakeShard {
        address: String,
        behavior: Behavior,
        delay: Duration,
        finished: Arc<AtomicBool>,
    }

    impl FakeShard {
        fn new(address: &str, behavior: Behavior) -> Self {
            Self {
                address: address.to_string(),
                behavior,
                delay: Duration::ZERO,
                finished: Arc::new(AtomicBool::new(false)),
            }
        }

        fn delayed(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl PresenceShard for FakeShard {
        fn address(&self) -> &str {
            &self.address
        }

        async fn online_status(
            &self,
            user_ids: &[String],
            _ctx: &RpcContext,
        ) -> std::result::Result<Vec<UserPresence>, RpcError> {
            tokio::time::sleep(self.delay).await;
            let result = match &self.behavior {
                Behavior::Answer(all) => Ok(all
                    .iter()
                    .filter(|p| user_ids.contains(&p.user_id))
                    .cloned()
                    .collect()),
                Behavior::Fail(e) => Err(e.clone()),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Vec::new())
                }
            };
            self.finished.store(true, Ordering::SeqCst);
            result
        }
    }

    struct FixedShards(Vec<Arc<dyn PresenceShard>>);

    #[async_trait]
    impl ShardSource for FixedShards {
        async fn shards(&self) -> Result<Vec<Arc<dyn PresenceShard>>> {
            if self.0.is_empty() {
                return Err(GatewayError::ServiceUnavailable("MessageGateway".to_string()));
            }
            Ok(self.0.clone())
        }
    }

    fn online(user_id: &str, platform: &str, token: &str) -> UserPresence {
        UserPresence {
            user_id: user_id.to_string(),
            status: ONLINE_STATUS,
            detail_platform_status: vec![PlatformDetail {
                platform: platform.to_string(),
                status: "online".to_string(),
                conn_id: format!("{user_id}-{platform}"),
                is_background: false,
                token: token.to_string(),
            }],
        }
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn aggregator(shards: Vec<FakeShard>) -> PresenceAggregator {
        let shards: Vec<Arc<dyn PresenceShard>> = shards
            .into_iter()
            .map(|s| Arc::new(s) as Arc<dyn PresenceShard>)
            .collect();
        PresenceAggregator::new(Arc::new(FixedShards(shards)), Duration::from_secs(2))
    }

    #[tokio::test]
    async fn test_two_shard_merge() {
        let agg = aggregator(vec![
            FakeShard::new("a", Behavior::Answer(vec![online("u1", "ios", "t1")])),
            FakeShard::new("b", Behavior::Answer(vec![])),
        ]);

        let result = agg
            .online_status(&ids(&["u1", "u2"]), &RpcContext::new("op"))
            .await
            .unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].user_id, "u1");
        assert_eq!(result[0].status, ONLINE_STATUS);
        assert_eq!(result[0].detail_platform_status.len(), 1);
        assert_eq!(result[0].detail_platform_status[0].platform, "ios");
        assert_eq!(result[1].user_id, "u2");
        assert_eq!(result[1].status, OFFLINE_STATUS);
        assert!(result[1].detail_platform_status.is_empty());
    }

    #[tokio::test]
    async fn test_user_on_two_shards_is_merged_once() {
        let agg = aggregator(vec![
            FakeShard::new("a", Behavior::Answer(vec![online("u1", "ios", "t1")])),
            FakeShard::new("b", Behavior::Answer(vec![online("u1", "web", "t2")])),
        ]);

        let result = agg
            .online_status(&ids(&["u1"]), &RpcContext::new("op"))
            .await
            .unwrap();

        assert_eq!(result.len(), 1);
        let platforms: Vec<&str> = result[0]
            .detail_platform_status
            .iter()
            .map(|d| d.platform.as_str())
            .collect();
        assert_eq!(platforms, vec!["ios", "web"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_order_follows_request() {
        let agg = aggregator(vec![
            FakeShard::new("slow", Behavior::Answer(vec![online("u3", "ios", "t3")]))
                .delayed(Duration::from_millis(500)),
            FakeShard::new("fast", Behavior::Answer(vec![online("u1", "web", "t1")])),
        ]);

        let result = agg
            .online_status(&ids(&["u3", "u1", "u2"]), &RpcContext::new("op"))
            .await
            .unwrap();

        let order: Vec<&str> = result.iter().map(|r| r.user_id.as_str()).collect();
        assert_eq!(order, vec!["u3", "u1", "u2"]);
        assert!(result[0].is_online());
        assert!(result[1].is_online());
        assert!(!result[2].is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_shard_is_skipped() {
        let agg = aggregator(vec![
            FakeShard::new("a", Behavior::Answer(vec![online("u1", "ios", "t1")])),
            FakeShard::new("hung", Behavior::Hang),
            FakeShard::new("c", Behavior::Answer(vec![online("u2", "web", "t2")])),
        ]);

        let started = tokio::time::Instant::now();
        let result = agg
            .online_status(&ids(&["u1", "u2"]), &RpcContext::new("op"))
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(result.iter().all(|r| r.is_online()));
    }

    #[tokio::test]
    async fn test_other_errors_are_swallowed() {
        let agg = aggregator(vec![
            FakeShard::new("a", Behavior::Fail(RpcError::Internal("boom".into()))),
            FakeShard::new("b", Behavior::Answer(vec![online("u1", "ios", "t1")])),
        ]);

        let result = agg
            .online_status(&ids(&["u1"]), &RpcContext::new("op"))
            .await
            .unwrap();
        assert!(result[0].is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_denied_aborts() {
        let slow = FakeShard::new("slow", Behavior::Answer(vec![online("u1", "ios", "t1")]))
            .delayed(Duration::from_secs(1));
        let slow_finished = Arc::clone(&slow.finished);

        let agg = aggregator(vec![
            slow,
            FakeShard::new("deny", Behavior::Fail(RpcError::PermissionDenied("not admin".into()))),
        ]);

        let err = agg
            .online_status(&ids(&["u1"]), &RpcContext::new("op"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamPermissionDenied(_)));

        // 剩余查询随 JoinSet 一起被中止
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!slow_finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_no_shards_is_unavailable() {
        let agg = aggregator(vec![]);
        assert!(matches!(
            agg.online_status(&ids(&["u1"]), &RpcContext::new("op")).await,
            Err(GatewayError::ServiceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_token_detail_groups_by_platform() {
        let mut u1_a = online("u1", "ios", "t1");
        u1_a.detail_platform_status.push(PlatformDetail {
            platform: "web".to_string(),
            token: "t2".to_string(),
            ..Default::default()
        });
        let agg = aggregator(vec![
            FakeShard::new("a", Behavior::Answer(vec![u1_a])),
            FakeShard::new("b", Behavior::Answer(vec![online("u1", "ios", "t3")])),
        ]);

        let result = agg
            .online_token_detail(&ids(&["u2", "u1"]), &RpcContext::new("op"))
            .await
            .unwrap();

        // 离线用户不出现
        assert_eq!(result.len(), 1);
        let detail = &result[0];
        assert_eq!(detail.user_id, "u1");
        assert_eq!(detail.single_platform_token.len(), 2);
        assert_eq!(detail.single_platform_token[0].platform, "ios");
        assert_eq!(detail.single_platform_token[0].token, vec!["t1", "t3"]);
        assert_eq!(detail.single_platform_token[0].total, 2);
        assert_eq!(detail.single_platform_token[1].platform, "web");
        assert_eq!(detail.single_platform_token[1].total, 1);
    }
}
