//! In-Memory Coordinator
//!
//! A process-local stand-in for the coordination service. It keeps group
//! membership and config blobs per path, fans notifications out to every
//! watcher, and can be taken offline to exercise disconnect handling:
//!
//! - while offline, `subscribe`, `get` and `watch` wait for it to come back,
//!   and mutations are stored silently;
//! - going offline sends `Disconnected` to every watcher;
//! - coming back online sends each watcher an authoritative re-read.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::{mpsc, watch, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{
    ConfigEvent, ConfigSink, ConfigSource, DiscoveryEvent, DiscoverySource, DiscoverySubscription,
    EventStream,
};
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::sizing::{Revision, VersionedBlob};

/// In-process coordination service
pub struct MemoryCoordinator {
    store: Mutex<Store>,
    /// Only changed while `store` is locked
    online: watch::Sender<bool>,
}

#[derive(Default)]
struct Store {
    pools: HashMap<String, PoolEntry>,
    /// Fatal error returned by every subsequent `subscribe`
    discovery_failure: Option<String>,
    last_revision: Revision,
}

#[derive(Default)]
struct PoolEntry {
    members: BTreeSet<Endpoint>,
    config: Option<VersionedBlob>,
    member_watchers: Vec<mpsc::UnboundedSender<DiscoveryEvent>>,
    config_watchers: Vec<mpsc::UnboundedSender<ConfigEvent>>,
}

impl PoolEntry {
    fn notify_members(&mut self, event: DiscoveryEvent) {
        self.member_watchers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn notify_config(&mut self, event: ConfigEvent) {
        self.config_watchers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl MemoryCoordinator {
    /// Create a coordinator that is online
    pub fn new() -> Self {
        Self::with_online(true)
    }

    /// Create a coordinator that is unreachable until [`set_online`](Self::set_online)
    pub fn offline() -> Self {
        Self::with_online(false)
    }

    fn with_online(online: bool) -> Self {
        let (online, _) = watch::channel(online);
        Self {
            store: Mutex::new(Store::default()),
            online,
        }
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Take the service offline or bring it back
    pub async fn set_online(&self, online: bool) {
        let mut store = self.store.lock().await;
        let was_online = self.online.send_replace(online);
        if was_online == online {
            return;
        }

        tracing::debug!("Memory coordinator is now {}", if online { "online" } else { "offline" });
        for entry in store.pools.values_mut() {
            if online {
                let members = entry.members.clone();
                entry.notify_members(DiscoveryEvent::Snapshot(members));
                if let Some(blob) = entry.config.clone() {
                    entry.notify_config(ConfigEvent::Data(blob));
                }
            } else {
                entry.notify_members(DiscoveryEvent::Disconnected);
                entry.notify_config(ConfigEvent::Disconnected);
            }
        }
    }

    /// Register an endpoint under `path`
    pub async fn register(&self, path: &str, endpoint: Endpoint) {
        let mut store = self.store.lock().await;
        let online = self.is_online();
        let entry = store.pools.entry(path.to_string()).or_default();
        entry.members.replace(endpoint.clone());
        if online {
            entry.notify_members(DiscoveryEvent::Change {
                endpoint,
                present: true,
            });
        }
    }

    /// Remove an endpoint from `path`
    pub async fn deregister(&self, path: &str, endpoint: &Endpoint) {
        let mut store = self.store.lock().await;
        let online = self.is_online();
        let entry = store.pools.entry(path.to_string()).or_default();
        if entry.members.remove(endpoint) && online {
            entry.notify_members(DiscoveryEvent::Change {
                endpoint: endpoint.clone(),
                present: false,
            });
        }
    }

    /// Make every later `subscribe` fail fatally
    pub async fn fail_discovery(&self, reason: impl Into<String>) {
        self.store.lock().await.discovery_failure = Some(reason.into());
    }

    /// Endpoints currently registered under `path`
    pub async fn members(&self, path: &str) -> BTreeSet<Endpoint> {
        let store = self.store.lock().await;
        store
            .pools
            .get(path)
            .map(|entry| entry.members.clone())
            .unwrap_or_default()
    }

    /// Number of live discovery and config watches on `path`
    pub async fn watcher_count(&self, path: &str) -> usize {
        let mut store = self.store.lock().await;
        match store.pools.get_mut(path) {
            Some(entry) => {
                entry.member_watchers.retain(|tx| !tx.is_closed());
                entry.config_watchers.retain(|tx| !tx.is_closed());
                entry.member_watchers.len() + entry.config_watchers.len()
            }
            None => 0,
        }
    }

    async fn wait_online(&self) -> Result<()> {
        let mut online = self.online.subscribe();
        online
            .wait_for(|up| *up)
            .await
            .map(|_| ())
            .map_err(|_| Error::Internal("memory coordinator dropped".into()))
    }
}

impl Default for MemoryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiscoverySource for MemoryCoordinator {
    async fn subscribe(&self, path: &str) -> Result<DiscoverySubscription> {
        if let Some(reason) = self.store.lock().await.discovery_failure.clone() {
            return Err(Error::Discovery(reason));
        }

        self.wait_online().await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut store = self.store.lock().await;
        let entry = store.pools.entry(path.to_string()).or_default();
        entry.member_watchers.push(tx);

        Ok(DiscoverySubscription {
            initial: entry.members.clone(),
            changes: UnboundedReceiverStream::new(rx).boxed(),
        })
    }
}

#[async_trait]
impl ConfigSource for MemoryCoordinator {
    async fn get(&self, path: &str) -> Result<Option<VersionedBlob>> {
        self.wait_online().await?;
        let store = self.store.lock().await;
        Ok(store.pools.get(path).and_then(|entry| entry.config.clone()))
    }

    async fn watch(&self, path: &str) -> Result<EventStream<ConfigEvent>> {
        self.wait_online().await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut store = self.store.lock().await;
        store
            .pools
            .entry(path.to_string())
            .or_default()
            .config_watchers
            .push(tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

#[async_trait]
impl ConfigSink for MemoryCoordinator {
    async fn put(&self, path: &str, data: Bytes) -> Result<Revision> {
        let mut store = self.store.lock().await;
        let online = self.is_online();
        store.last_revision += 1;
        let blob = VersionedBlob::new(data, store.last_revision);

        let entry = store.pools.entry(path.to_string()).or_default();
        entry.config = Some(blob.clone());
        if online {
            entry.notify_config(ConfigEvent::Data(blob.clone()));
        }
        Ok(blob.revision)
    }
}
