//! 基于 etcd 的服务发现
//!
//! 键布局：
//! - 服务根节点：`/{namespace}/{service}`
//! - 实例节点：`/{namespace}/{service}/{address}`，挂在租约上，由后台任务续期
//! - 共享配置：`/{namespace}/config/{key}`

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use etcd_client::{Client, ConnectOptions, GetOptions, PutOptions, WatchOptions};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{DiscoveryBackend, DiscoveryError, normalize_snapshot};
use crate::config::{DiscoveryStrategy, EtcdConfig};

/// watch 流断开后的重建间隔
const REWATCH_DELAY: Duration = Duration::from_secs(1);

/// 当前实例节点挂载的租约
///
/// 续约任务重新注册后会换成新租约，注销时撤销的必须是最新的那一个。
#[derive(Clone)]
struct LeaseSlot(Arc<AtomicI64>);

impl LeaseSlot {
    fn new(lease_id: i64) -> Self {
        Self(Arc::new(AtomicI64::new(lease_id)))
    }

    fn current(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }

    /// 换成新租约，返回旧租约
    fn replace(&self, lease_id: i64) -> i64 {
        self.0.swap(lease_id, Ordering::AcqRel)
    }
}

struct Registration {
    key: String,
    address: String,
    lease: LeaseSlot,
    keep_alive: JoinHandle<()>,
}

impl Registration {
    /// 停止续约并撤销最新租约，同时删除实例节点
    async fn release(self, client: &mut Client) -> Result<(), DiscoveryError> {
        self.keep_alive.abort();
        // 等续约任务真正退出，之后租约不会再被替换
        let _ = self.keep_alive.await;

        let lease_id = self.lease.current();
        if let Err(e) = client.lease_revoke(lease_id).await {
            warn!(key = %self.key, lease_id, error = %e, "Failed to revoke lease");
        }
        client.delete(self.key.as_str(), None).await?;
        Ok(())
    }
}

/// etcd 服务发现后端
pub struct EtcdDiscovery {
    client: Client,
    namespace: String,
    lease_ttl: i64,
    registration: Mutex<Option<Registration>>,
    watchers: DashMap<String, JoinHandle<()>>,
}

impl EtcdDiscovery {
    /// 连接 etcd
    pub async fn connect(config: &EtcdConfig) -> Result<Self, DiscoveryError> {
        let mut options =
            ConnectOptions::new().with_connect_timeout(Duration::from_millis(config.dial_timeout_ms));
        if let (Some(user), Some(password)) = (&config.username, &config.password) {
            options = options.with_user(user.clone(), password.clone());
        }

        let client = Client::connect(&config.endpoints, Some(options))
            .await
            .map_err(|e| DiscoveryError::Connect(e.to_string()))?;

        info!(endpoints = ?config.endpoints, namespace = %config.namespace, "Connected to etcd");

        Ok(Self {
            client,
            namespace: config.namespace.trim_matches('/').to_string(),
            lease_ttl: config.lease_ttl_secs,
            registration: Mutex::new(None),
            watchers: DashMap::new(),
        })
    }

    fn service_key(&self, service: &str) -> String {
        service_key(&self.namespace, service)
    }

    fn instance_key(&self, service: &str, address: &str) -> String {
        format!("{}/{}", self.service_key(service), address)
    }

    fn config_key(&self, key: &str) -> String {
        format!("/{}/config/{}", self.namespace, key)
    }
}

pub(crate) fn service_key(namespace: &str, service: &str) -> String {
    format!("/{}/{}", namespace, service)
}

/// 从实例键中取出地址部分；根节点本身返回 `None`
pub(crate) fn address_from_key(prefix: &str, key: &str) -> Option<String> {
    let rest = key.strip_prefix(prefix)?.strip_prefix('/')?;
    if rest.is_empty() || rest.contains('/') {
        return None;
    }
    Some(rest.to_string())
}

/// 读取某个服务当前的全部实例地址
async fn read_members(client: &mut Client, prefix: &str) -> Result<Vec<String>, DiscoveryError> {
    let resp = client
        .get(prefix, Some(GetOptions::new().with_prefix()))
        .await?;

    let mut addrs = Vec::with_capacity(resp.kvs().len());
    for kv in resp.kvs() {
        let Ok(key) = kv.key_str() else {
            continue;
        };
        if let Some(addr) = address_from_key(prefix, key) {
            addrs.push(addr);
        }
    }
    addrs.sort();
    Ok(normalize_snapshot(addrs))
}

/// 申请租约、写入实例节点
async fn put_instance(client: &mut Client, key: &str, address: &str, ttl: i64) -> Result<i64, DiscoveryError> {
    let lease = client.lease_grant(ttl, None).await?;
    let lease_id = lease.id();
    client
        .put(key, address, Some(PutOptions::new().with_lease(lease_id)))
        .await?;
    Ok(lease_id)
}

/// 续约循环：续约失败时重新申请租约并写回实例节点
async fn keep_alive_loop(mut client: Client, key: String, address: String, lease: LeaseSlot, ttl: i64) {
    let interval = Duration::from_secs((ttl / 3).max(1) as u64);

    loop {
        match client.lease_keep_alive(lease.current()).await {
            Ok((mut keeper, mut stream)) => loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = keeper.keep_alive().await {
                    warn!(key = %key, error = %e, "Lease keep-alive request failed");
                    break;
                }
                match stream.message().await {
                    Ok(Some(resp)) if resp.ttl() > 0 => {
                        debug!(key = %key, ttl = resp.ttl(), "Lease renewed");
                    }
                    Ok(_) => {
                        warn!(key = %key, "Lease expired, re-registering");
                        break;
                    }
                    Err(e) => {
                        warn!(key = %key, error = %e, "Lease keep-alive stream failed");
                        break;
                    }
                }
            },
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to open lease keep-alive stream");
            }
        }

        tokio::time::sleep(REWATCH_DELAY).await;
        match put_instance(&mut client, &key, &address, ttl).await {
            Ok(id) => {
                let expired = lease.replace(id);
                info!(key = %key, lease_id = id, expired, "Instance re-registered");
            }
            Err(e) => error!(key = %key, error = %e, "Failed to re-register instance"),
        }
    }
}

/// watch 循环：每个事件都触发一次全量前缀读取，读取结果作为最新快照发布
async fn watch_loop(mut client: Client, prefix: String, tx: watch::Sender<Vec<String>>) {
    loop {
        if tx.is_closed() {
            debug!(prefix = %prefix, "All watch receivers dropped, stopping");
            return;
        }

        let watch_prefix = format!("{}/", prefix);
        let (_watcher, mut stream) = match client
            .watch(watch_prefix.as_str(), Some(WatchOptions::new().with_prefix()))
            .await
        {
            Ok(pair) => pair,
            Err(e) => {
                warn!(prefix = %prefix, error = %e, "Failed to establish etcd watch, retrying");
                tokio::time::sleep(REWATCH_DELAY).await;
                continue;
            }
        };

        // 重建 watch 期间可能错过事件，先补一次全量读取
        match read_members(&mut client, &prefix).await {
            Ok(addrs) => publish(&tx, addrs),
            Err(e) => warn!(prefix = %prefix, error = %e, "Failed to read members"),
        }

        loop {
            match stream.message().await {
                Ok(Some(resp)) => {
                    if resp.canceled() {
                        warn!(prefix = %prefix, "etcd watch canceled by server");
                        break;
                    }
                    if resp.events().is_empty() {
                        continue;
                    }
                    match read_members(&mut client, &prefix).await {
                        Ok(addrs) => publish(&tx, addrs),
                        Err(e) => warn!(prefix = %prefix, error = %e, "Failed to re-read members"),
                    }
                }
                Ok(None) => {
                    warn!(prefix = %prefix, "etcd watch stream ended");
                    break;
                }
                Err(e) => {
                    warn!(prefix = %prefix, error = %e, "etcd watch stream failed");
                    break;
                }
            }
        }

        tokio::time::sleep(REWATCH_DELAY).await;
    }
}

/// 只有快照变化时才通知接收方
fn publish(tx: &watch::Sender<Vec<String>>, addrs: Vec<String>) {
    tx.send_if_modified(|current| {
        if *current == addrs {
            false
        } else {
            *current = addrs;
            true
        }
    });
}

#[async_trait]
impl DiscoveryBackend for EtcdDiscovery {
    fn strategy(&self) -> DiscoveryStrategy {
        DiscoveryStrategy::Etcd
    }

    async fn register(&self, service: &str, address: &str) -> Result<(), DiscoveryError> {
        let key = self.instance_key(service, address);
        let mut guard = self.registration.lock().await;

        if let Some(existing) = guard.as_ref() {
            if existing.key == key {
                return Ok(());
            }
        }
        if let Some(previous) = guard.take() {
            let mut client = self.client.clone();
            let previous_key = previous.key.clone();
            if let Err(e) = previous.release(&mut client).await {
                warn!(key = %previous_key, error = %e, "Failed to release previous registration");
            }
        }

        let mut client = self.client.clone();
        let lease_id = put_instance(&mut client, &key, address, self.lease_ttl).await?;
        let lease = LeaseSlot::new(lease_id);
        let keep_alive = tokio::spawn(keep_alive_loop(
            self.client.clone(),
            key.clone(),
            address.to_string(),
            lease.clone(),
            self.lease_ttl,
        ));

        info!(service_name = %service, address = %address, lease_id, "Registered instance in etcd");
        *guard = Some(Registration {
            key,
            address: address.to_string(),
            lease,
            keep_alive,
        });
        Ok(())
    }

    async fn unregister(&self) -> Result<(), DiscoveryError> {
        let Some(reg) = self.registration.lock().await.take() else {
            return Ok(());
        };
        let key = reg.key.clone();
        let address = reg.address.clone();

        let mut client = self.client.clone();
        reg.release(&mut client).await?;
        info!(key = %key, address = %address, "Unregistered instance from etcd");
        Ok(())
    }

    async fn create_root_nodes(&self, services: &[String]) -> Result<(), DiscoveryError> {
        let mut client = self.client.clone();
        for service in services {
            let key = self.service_key(service);
            let resp = client.get(key.as_str(), None).await?;
            if resp.kvs().is_empty() {
                client.put(key.as_str(), "", None).await?;
                debug!(key = %key, "Created service root node");
            }
        }
        info!(count = services.len(), "Service root nodes ensured");
        Ok(())
    }

    async fn watch(&self, service: &str) -> Result<watch::Receiver<Vec<String>>, DiscoveryError> {
        let prefix = self.service_key(service);
        let mut client = self.client.clone();
        let initial = read_members(&mut client, &prefix).await?;

        let (tx, rx) = watch::channel(initial);
        let handle = tokio::spawn(watch_loop(client, prefix, tx));
        if let Some(previous) = self.watchers.insert(service.to_string(), handle) {
            previous.abort();
        }
        Ok(rx)
    }

    async fn publish_shared_config(&self, key: &str, blob: Vec<u8>) -> Result<(), DiscoveryError> {
        let full_key = self.config_key(key);
        let mut client = self.client.clone();
        client.put(full_key.as_str(), blob, None).await?;
        info!(key = %full_key, "Published shared config");
        Ok(())
    }

    async fn fetch_shared_config(&self, key: &str) -> Result<Option<Vec<u8>>, DiscoveryError> {
        let full_key = self.config_key(key);
        let mut client = self.client.clone();
        let resp = client.get(full_key.as_str(), None).await?;
        Ok(resp.kvs().first().map(|kv| kv.value().to_vec()))
    }

    async fn close(&self) {
        for entry in self.watchers.iter() {
            entry.value().abort();
        }
        self.watchers.clear();
        if let Err(e) = self.unregister().await {
            warn!(error = %e, "Failed to unregister on close");
        }
    }
}
