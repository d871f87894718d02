//! Coordination Sources
//!
//! Interfaces to the coordination service the pool is built on: a
//! group-membership primitive for discovery, a versioned blob for the size
//! config, and the administrative write path for that blob.
//!
//! Two backends ship with the crate: an in-process [`MemoryCoordinator`]
//! and a polling [`FileCoordinator`].

pub mod file;
pub mod memory;

pub use file::FileCoordinator;
pub use memory::MemoryCoordinator;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::collections::BTreeSet;

use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::sizing::{Revision, SizeConfig, VersionedBlob};

/// Unbounded stream of notifications from a source
pub type EventStream<T> = BoxStream<'static, T>;

/// Notification from a discovery subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// One endpoint registered or deregistered
    Change { endpoint: Endpoint, present: bool },
    /// Authoritative full read, delivered after recovering a lost session
    Snapshot(BTreeSet<Endpoint>),
    /// Session lost; membership should be treated as frozen
    Disconnected,
}

/// Result of subscribing to a membership group
pub struct DiscoverySubscription {
    /// Endpoints registered at subscription time
    pub initial: BTreeSet<Endpoint>,
    /// Subsequent notifications
    pub changes: EventStream<DiscoveryEvent>,
}

/// Group-membership primitive of the coordination service
///
/// Implementations reconnect on their own and follow every recovery with a
/// [`DiscoveryEvent::Snapshot`] rather than resuming incremental changes.
/// `subscribe` waits until the first read is available and returns an error
/// only for fatal failures (construction, authentication).
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    async fn subscribe(&self, path: &str) -> Result<DiscoverySubscription>;
}

/// Notification from a config watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigEvent {
    /// New payload (or an authoritative re-read after reconnect)
    Data(VersionedBlob),
    /// Session lost
    Disconnected,
}

/// Versioned config storage of the coordination service
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Current payload, or `None` if nothing has been written yet
    async fn get(&self, path: &str) -> Result<Option<VersionedBlob>>;

    /// Stream of subsequent payloads
    async fn watch(&self, path: &str) -> Result<EventStream<ConfigEvent>>;
}

/// Administrative write access to the config blob
#[async_trait]
pub trait ConfigSink: Send + Sync {
    /// Overwrite the payload at `path`, returning its new revision
    async fn put(&self, path: &str, data: Bytes) -> Result<Revision>;
}

/// Authorize a pool resize by overwriting its size config
pub async fn resize_pool(sink: &dyn ConfigSink, path: &str, desired_size: usize) -> Result<Revision> {
    let data = SizeConfig::new(desired_size).encode()?;
    let revision = sink.put(path, data).await?;
    tracing::info!("Resized pool {} to {} (revision {})", path, desired_size, revision);
    Ok(revision)
}
