//! 端点目录
//!
//! 按服务名维护当前可达的后端实例集合以及每个实例上已经建立的连接。
//!
//! - 读路径（`resolve_one` / `resolve_all`）只做一次 `ArcSwap::load`，不加锁
//! - 写路径（`refresh` / `retry_failed`）由每个服务自己的异步互斥锁串行化，
//!   先构建完整的新集合，再一次性发布
//! - 建连失败的地址只记录下来，由后台 watcher 定时重试，不会出现在请求路径上

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use rand::Rng;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{DiscoveryBackend, DiscoveryError, normalize_snapshot};
use crate::error::{GatewayError, Result};

/// 建连器：把地址变成可复用的连接句柄
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// 连接句柄，调用方按次借用（clone）
    type Conn: Clone + Send + Sync + 'static;

    async fn connect(&self, address: &str) -> std::result::Result<Self::Conn, DiscoveryError>;
}

/// 一个后端实例
///
/// 实例的身份是地址而不是连接对象。
#[derive(Debug)]
pub struct Endpoint<T> {
    address: String,
    conn: T,
}

impl<T: Clone> Endpoint<T> {
    pub fn new(address: impl Into<String>, conn: T) -> Self {
        Self {
            address: address.into(),
            conn,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn conn(&self) -> T {
        self.conn.clone()
    }
}

/// 某一时刻的实例集合快照
struct EndpointSet<T> {
    endpoints: Vec<Arc<Endpoint<T>>>,
    failed: Vec<String>,
}

impl<T> Default for EndpointSet<T> {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            failed: Vec::new(),
        }
    }
}

/// 一次刷新的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub failed: Vec<String>,
}

impl RefreshOutcome {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.failed.is_empty()
    }
}

/// 单个服务名下的实例集合
pub struct ServiceEndpoints<C: Connector> {
    name: String,
    connector: Arc<C>,
    current: ArcSwap<EndpointSet<C::Conn>>,
    cursor: AtomicUsize,
    write_lock: Mutex<()>,
}

impl<C: Connector> ServiceEndpoints<C> {
    pub fn new(name: impl Into<String>, connector: Arc<C>) -> Self {
        // 随机起点，避免所有网关副本同时打到同一个实例
        let start = rand::thread_rng().gen_range(0..1024);
        Self {
            name: name.into(),
            connector,
            current: ArcSwap::from_pointee(EndpointSet::default()),
            cursor: AtomicUsize::new(start),
            write_lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 当前可用实例数
    pub fn len(&self) -> usize {
        self.current.load().endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 当前可用实例地址
    pub fn addresses(&self) -> Vec<String> {
        self.current
            .load()
            .endpoints
            .iter()
            .map(|ep| ep.address.clone())
            .collect()
    }

    /// 等待重试的地址
    pub fn failed_addresses(&self) -> Vec<String> {
        self.current.load().failed.clone()
    }

    /// 轮询选择一个连接
    pub fn resolve_one(&self) -> Result<C::Conn> {
        let set = self.current.load();
        if set.endpoints.is_empty() {
            return Err(GatewayError::ServiceUnavailable(self.name.clone()));
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % set.endpoints.len();
        Ok(set.endpoints[idx].conn.clone())
    }

    /// 返回全部实例（用于广播）
    pub fn resolve_all(&self) -> Result<Vec<Arc<Endpoint<C::Conn>>>> {
        let set = self.current.load();
        if set.endpoints.is_empty() {
            return Err(GatewayError::ServiceUnavailable(self.name.clone()));
        }
        Ok(set.endpoints.clone())
    }

    /// 用新的地址集合刷新
    ///
    /// 已存在的实例原样保留，只对新增地址建连；被移除的实例在最后一个借用者释放后关闭。
    pub async fn refresh(&self, addrs: &[String]) -> RefreshOutcome {
        let _guard = self.write_lock.lock().await;

        let desired = normalize_snapshot(addrs);
        let current = self.current.load_full();
        let existing: HashMap<&str, &Arc<Endpoint<C::Conn>>> = current
            .endpoints
            .iter()
            .map(|ep| (ep.address.as_str(), ep))
            .collect();

        // 仍在快照中的失败地址留给定时重试
        let to_dial: Vec<&String> = desired
            .iter()
            .filter(|addr| !existing.contains_key(addr.as_str()) && !current.failed.contains(addr))
            .collect();
        let removed: Vec<String> = current
            .endpoints
            .iter()
            .filter(|ep| !desired.contains(&ep.address))
            .map(|ep| ep.address.clone())
            .collect();

        // 没有新增也没有移除，且没有失效地址被撤下时，不做任何发布
        let stale_failed = current.failed.iter().any(|addr| !desired.contains(addr));
        if to_dial.is_empty() && removed.is_empty() && !stale_failed {
            return RefreshOutcome::default();
        }

        let dialed = self.dial_many(to_dial.iter().map(|s| s.as_str())).await;
        let mut outcome = RefreshOutcome {
            removed,
            ..Default::default()
        };

        let mut next = EndpointSet::default();
        for addr in &desired {
            if let Some(ep) = existing.get(addr.as_str()) {
                next.endpoints.push(Arc::clone(ep));
                continue;
            }
            match dialed.get(addr.as_str()) {
                Some(Ok(conn)) => {
                    next.endpoints
                        .push(Arc::new(Endpoint::new(addr.clone(), conn.clone())));
                    outcome.added.push(addr.clone());
                }
                Some(Err(err)) => {
                    warn!(service_name = %self.name, address = %addr, error = %err, "Failed to dial endpoint, will retry later");
                    next.failed.push(addr.clone());
                    outcome.failed.push(addr.clone());
                }
                None => {
                    if current.failed.contains(addr) {
                        next.failed.push(addr.clone());
                    }
                }
            }
        }

        for addr in &outcome.removed {
            debug!(service_name = %self.name, address = %addr, "Endpoint removed");
        }

        info!(
            service_name = %self.name,
            endpoints = next.endpoints.len(),
            added = outcome.added.len(),
            removed = outcome.removed.len(),
            failed = outcome.failed.len(),
            "Endpoint set refreshed"
        );

        self.current.store(Arc::new(next));
        outcome
    }

    /// 重试之前建连失败的地址
    pub async fn retry_failed(&self) -> RefreshOutcome {
        let _guard = self.write_lock.lock().await;

        let current = self.current.load_full();
        if current.failed.is_empty() {
            return RefreshOutcome::default();
        }

        let dialed = self
            .dial_many(current.failed.iter().map(|s| s.as_str()))
            .await;

        let mut outcome = RefreshOutcome::default();
        let mut next = EndpointSet {
            endpoints: current.endpoints.clone(),
            failed: Vec::new(),
        };
        for addr in &current.failed {
            match dialed.get(addr.as_str()) {
                Some(Ok(conn)) => {
                    next.endpoints
                        .push(Arc::new(Endpoint::new(addr.clone(), conn.clone())));
                    outcome.added.push(addr.clone());
                }
                _ => {
                    next.failed.push(addr.clone());
                    outcome.failed.push(addr.clone());
                }
            }
        }

        if !outcome.added.is_empty() {
            info!(service_name = %self.name, recovered = outcome.added.len(), "Recovered endpoints after retry");
        }
        self.current.store(Arc::new(next));
        outcome
    }

    async fn dial_many<'a, I>(
        &self,
        addrs: I,
    ) -> HashMap<String, std::result::Result<C::Conn, DiscoveryError>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let dials = addrs.into_iter().map(|addr| {
            let connector = Arc::clone(&self.connector);
            async move { (addr.to_string(), connector.connect(addr).await) }
        });
        join_all(dials).await.into_iter().collect()
    }
}

/// 端点目录：服务名 → 实例集合
pub struct EndpointDirectory<C: Connector> {
    connector: Arc<C>,
    services: DashMap<String, Arc<ServiceEndpoints<C>>>,
    watchers: DashMap<String, JoinHandle<()>>,
    watch_lock: Mutex<()>,
    retry_interval: Duration,
}

impl<C: Connector> EndpointDirectory<C> {
    pub fn new(connector: C, retry_interval: Duration) -> Self {
        Self {
            connector: Arc::new(connector),
            services: DashMap::new(),
            watchers: DashMap::new(),
            watch_lock: Mutex::new(()),
            retry_interval,
        }
    }

    /// 获取（或创建）某个服务的实例集合
    pub fn service(&self, name: &str) -> Arc<ServiceEndpoints<C>> {
        self.services
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(ServiceEndpoints::new(name, Arc::clone(&self.connector))))
            .clone()
    }

    /// 轮询解析一个连接
    pub fn resolve_one(&self, name: &str) -> Result<C::Conn> {
        match self.services.get(name) {
            Some(svc) => svc.resolve_one(),
            None => Err(GatewayError::ServiceUnavailable(name.to_string())),
        }
    }

    /// 解析全部实例
    pub fn resolve_all(&self, name: &str) -> Result<Vec<Arc<Endpoint<C::Conn>>>> {
        match self.services.get(name) {
            Some(svc) => svc.resolve_all(),
            None => Err(GatewayError::ServiceUnavailable(name.to_string())),
        }
    }

    /// 用新的地址集合刷新某个服务
    pub async fn refresh(&self, name: &str, addrs: &[String]) -> RefreshOutcome {
        self.service(name).refresh(addrs).await
    }

    /// 订阅服务成员变化并启动后台刷新任务
    ///
    /// 首个快照在返回前同步应用。同一个服务名只会启动一个 watcher。
    /// 首次订阅失败时返回错误，但 watcher 仍然启动，并按重试间隔重新订阅。
    pub async fn watch_service(
        &self,
        backend: &Arc<dyn DiscoveryBackend>,
        name: &str,
    ) -> std::result::Result<(), DiscoveryError> {
        let _guard = self.watch_lock.lock().await;
        if self.watchers.contains_key(name) {
            return Ok(());
        }

        let svc = self.service(name);
        let (rx, result) = match backend.watch(name).await {
            Ok(mut rx) => {
                let initial = rx.borrow_and_update().clone();
                svc.refresh(&initial).await;
                info!(service_name = %name, "Watching service endpoints");
                (Some(rx), Ok(()))
            }
            Err(e) => (None, Err(e)),
        };

        let handle = tokio::spawn(run_watcher(
            Arc::clone(backend),
            svc,
            rx,
            self.retry_interval,
        ));
        self.watchers.insert(name.to_string(), handle);
        result
    }

    /// 已知服务名
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// 每个服务当前的实例数（按服务名排序）
    pub fn endpoint_counts(&self) -> Vec<(String, usize)> {
        let mut counts: Vec<(String, usize)> = self
            .services
            .iter()
            .map(|e| (e.key().clone(), e.value().len()))
            .collect();
        counts.sort();
        counts
    }

    /// 停止全部 watcher
    pub fn shutdown(&self) {
        let names: Vec<String> = self.watchers.iter().map(|e| e.key().clone()).collect();
        for name in names {
            if let Some((_, handle)) = self.watchers.remove(&name) {
                handle.abort();
            }
        }
        debug!("Endpoint directory watchers stopped");
    }
}

/// 后台 watcher：应用成员快照，定时重试失败地址
///
/// `rx` 为空表示订阅尚未建立，每个重试周期重新调用一次 `backend.watch`。
async fn run_watcher<C: Connector>(
    backend: Arc<dyn DiscoveryBackend>,
    svc: Arc<ServiceEndpoints<C>>,
    mut rx: Option<watch::Receiver<Vec<String>>>,
    retry_interval: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + retry_interval, retry_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // 成员通道关闭后保留最后一份快照，只继续做失败重试
    let mut membership_open = true;
    loop {
        if rx.is_none() {
            ticker.tick().await;
            match backend.watch(svc.name()).await {
                Ok(mut fresh) => {
                    let snapshot = fresh.borrow_and_update().clone();
                    svc.refresh(&snapshot).await;
                    info!(service_name = %svc.name(), "Watching service endpoints after retry");
                    rx = Some(fresh);
                }
                Err(e) => {
                    warn!(service_name = %svc.name(), error = %e, "Failed to watch service, will retry later");
                }
            }
            continue;
        }
        let Some(current) = rx.as_mut() else {
            continue;
        };

        tokio::select! {
            changed = current.changed(), if membership_open => {
                if changed.is_err() {
                    debug!(service_name = %svc.name(), "Membership channel closed, keeping last snapshot");
                    membership_open = false;
                    continue;
                }
                let snapshot = current.borrow_and_update().clone();
                svc.refresh(&snapshot).await;
            }
            _ = ticker.tick() => {
                svc.retry_failed().await;
            }
        }
    }
}

/// 端点统计（健康检查使用）
pub trait EndpointStats: Send + Sync {
    fn endpoint_counts(&self) -> Vec<(String, usize)>;
}

impl<C: Connector> EndpointStats for EndpointDirectory<C> {
    fn endpoint_counts(&self) -> Vec<(String, usize)> {
        EndpointDirectory::endpoint_counts(self)
    }
}

impl<C: Connector> Drop for EndpointDirectory<C> {
    fn drop(&mut self) {
        for entry in self.watchers.iter() {
            entry.value().abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiscoveryStrategy;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;

    /// 记录建连次数的假连接器，地址在 `refuse` 中时建连失败
    #[derive(Default)]
    struct CountingConnector {
        dials: AtomicUsize,
        refuse: StdMutex<HashSet<String>>,
    }

    #[async_trait]
    impl Connector for Arc<CountingConnector> {
        type Conn = String;

        async fn connect(&self, address: &str) -> std::result::Result<String, DiscoveryError> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            if self.refuse.lock().unwrap().contains(address) {
                return Err(DiscoveryError::Dial {
                    address: address.to_string(),
                    reason: "connection refused".to_string(),
                });
            }
            Ok(address.to_string())
        }
    }

    fn addrs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn directory() -> (EndpointDirectory<Arc<CountingConnector>>, Arc<CountingConnector>) {
        let connector = Arc::new(CountingConnector::default());
        (
            EndpointDirectory::new(Arc::clone(&connector), Duration::from_secs(5)),
            connector,
        )
    }

    #[tokio::test]
    async fn test_round_robin_is_even() {
        let (dir, _) = directory();
        dir.refresh("User", &addrs(&["a:1", "b:1", "c:1"])).await;

        let mut hits: HashMap<String, usize> = HashMap::new();
        for _ in 0..30 {
            let conn = dir.resolve_one("User").unwrap();
            *hits.entry(conn).or_default() += 1;
        }

        assert_eq!(hits.len(), 3);
        assert!(hits.values().all(|&n| n == 10));
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent() {
        let (dir, connector) = directory();
        let set = addrs(&["a:1", "b:1"]);

        let first = dir.refresh("Msg", &set).await;
        assert_eq!(first.added.len(), 2);
        let before = dir.resolve_all("Msg").unwrap();

        let second = dir.refresh("Msg", &set).await;
        assert!(second.is_noop());
        assert_eq!(connector.dials.load(Ordering::SeqCst), 2);

        let after = dir.resolve_all("Msg").unwrap();
        for (a, b) in before.iter().zip(after.iter()) {
            assert!(Arc::ptr_eq(a, b));
        }
    }

    #[tokio::test]
    async fn test_refresh_symmetric_difference() {
        let (dir, connector) = directory();
        dir.refresh("Group", &addrs(&["a:1", "b:1"])).await;
        let kept = dir.resolve_all("Group").unwrap();

        let outcome = dir.refresh("Group", &addrs(&["b:1", "c:1"])).await;
        assert_eq!(outcome.added, vec!["c:1".to_string()]);
        assert_eq!(outcome.removed, vec!["a:1".to_string()]);
        assert_eq!(connector.dials.load(Ordering::SeqCst), 3);

        let now = dir.resolve_all("Group").unwrap();
        let b_before = kept.iter().find(|ep| ep.address() == "b:1").unwrap();
        let b_after = now.iter().find(|ep| ep.address() == "b:1").unwrap();
        assert!(Arc::ptr_eq(b_before, b_after));
    }

    #[tokio::test]
    async fn test_empty_service_is_unavailable() {
        let (dir, _) = directory();
        assert!(matches!(
            dir.resolve_one("Friend"),
            Err(GatewayError::ServiceUnavailable(name)) if name == "Friend"
        ));

        dir.refresh("Friend", &addrs(&["a:1"])).await;
        dir.refresh("Friend", &[]).await;
        assert!(matches!(
            dir.resolve_all("Friend"),
            Err(GatewayError::ServiceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_dial_failure_does_not_block_others() {
        let (dir, connector) = directory();
        connector.refuse.lock().unwrap().insert("bad:1".to_string());

        let outcome = dir.refresh("Push", &addrs(&["good:1", "bad:1"])).await;
        assert_eq!(outcome.failed, vec!["bad:1".to_string()]);
        assert_eq!(dir.resolve_one("Push").unwrap(), "good:1");

        let svc = dir.service("Push");
        assert_eq!(svc.failed_addresses(), vec!["bad:1".to_string()]);

        // 同一快照再次到达时失败地址不会在刷新路径上重拨
        let again = dir.refresh("Push", &addrs(&["good:1", "bad:1"])).await;
        assert!(again.is_noop());
        assert_eq!(connector.dials.load(Ordering::SeqCst), 2);
        assert_eq!(svc.failed_addresses(), vec!["bad:1".to_string()]);

        connector.refuse.lock().unwrap().clear();
        let retried = svc.retry_failed().await;
        assert_eq!(retried.added, vec!["bad:1".to_string()]);
        assert_eq!(svc.len(), 2);
        assert!(svc.failed_addresses().is_empty());
    }

    /// 基于 watch 通道的假后端，前 `fail_first` 次订阅返回错误
    struct ChannelBackend {
        tx: watch::Sender<Vec<String>>,
        fail_first: AtomicUsize,
        watch_calls: AtomicUsize,
    }

    impl ChannelBackend {
        fn new(initial: Vec<String>, fail_first: usize) -> Arc<Self> {
            let (tx, _) = watch::channel(initial);
            Arc::new(Self {
                tx,
                fail_first: AtomicUsize::new(fail_first),
                watch_calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl DiscoveryBackend for ChannelBackend {
        fn strategy(&self) -> DiscoveryStrategy {
            DiscoveryStrategy::Kubernetes
        }
        async fn register(&self, _: &str, _: &str) -> std::result::Result<(), DiscoveryError> {
            Ok(())
        }
        async fn unregister(&self) -> std::result::Result<(), DiscoveryError> {
            Ok(())
        }
        async fn create_root_nodes(&self, _: &[String]) -> std::result::Result<(), DiscoveryError> {
            Ok(())
        }
        async fn watch(
            &self,
            _: &str,
        ) -> std::result::Result<watch::Receiver<Vec<String>>, DiscoveryError> {
            self.watch_calls.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .fail_first
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(DiscoveryError::Backend("etcd unavailable".to_string()));
            }
            Ok(self.tx.subscribe())
        }
        async fn publish_shared_config(
            &self,
            _: &str,
            _: Vec<u8>,
        ) -> std::result::Result<(), DiscoveryError> {
            Ok(())
        }
        async fn fetch_shared_config(
            &self,
            _: &str,
        ) -> std::result::Result<Option<Vec<u8>>, DiscoveryError> {
            Ok(None)
        }
        async fn close(&self) {}
    }

    #[tokio::test]
    async fn test_watch_applies_latest_snapshot() {
        let (dir, _) = directory();
        let backend = ChannelBackend::new(addrs(&["a:1"]), 0);
        let dyn_backend: Arc<dyn DiscoveryBackend> = backend.clone();

        dir.watch_service(&dyn_backend, "MessageGateway").await.unwrap();
        assert_eq!(dir.service("MessageGateway").addresses(), addrs(&["a:1"]));

        backend.tx.send_replace(addrs(&["b:1"]));
        backend.tx.send_replace(addrs(&["b:1", "c:1"]));

        let svc = dir.service("MessageGateway");
        for _ in 0..100 {
            if svc.addresses() == addrs(&["b:1", "c:1"]) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(svc.addresses(), addrs(&["b:1", "c:1"]));

        dir.shutdown();
        assert_eq!(dir.endpoint_counts(), vec![("MessageGateway".to_string(), 2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_recovers_after_initial_failure() {
        let (dir, _) = directory();
        let backend = ChannelBackend::new(addrs(&["a:1", "b:1"]), 1);
        let dyn_backend: Arc<dyn DiscoveryBackend> = backend.clone();

        assert!(dir.watch_service(&dyn_backend, "Conversation").await.is_err());
        assert!(matches!(
            dir.resolve_all("Conversation"),
            Err(GatewayError::ServiceUnavailable(_))
        ));
        // watcher 已经存在，重复订阅不会再起一个
        dir.watch_service(&dyn_backend, "Conversation").await.unwrap();
        assert_eq!(backend.watch_calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        for _ in 0..100 {
            if dir.resolve_all("Conversation").is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let endpoints = dir.resolve_all("Conversation").unwrap();
        assert_eq!(endpoints.len(), 2);
        assert_eq!(backend.watch_calls.load(Ordering::SeqCst), 2);

        backend.tx.send_replace(addrs(&["c:1"]));
        for _ in 0..100 {
            if dir.service("Conversation").addresses() == addrs(&["c:1"]) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(dir.service("Conversation").addresses(), addrs(&["c:1"]));
        dir.shutdown();
    }

    #[tokio::test]
    async fn test_concurrent_watch_starts_single_watcher() {
        let (dir, _) = directory();
        let backend = ChannelBackend::new(addrs(&["a:1"]), 0);
        let dyn_backend: Arc<dyn DiscoveryBackend> = backend.clone();

        let (first, second) = tokio::join!(
            dir.watch_service(&dyn_backend, "Auth"),
            dir.watch_service(&dyn_backend, "Auth"),
        );
        first.unwrap();
        second.unwrap();

        assert_eq!(backend.watch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(dir.watchers.len(), 1);
        dir.shutdown();
    }
}
