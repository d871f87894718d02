//! File Coordinator
//!
//! Backs a pool with plain files under a root directory, polled at a fixed
//! interval. A pool path `/cache/pools/web` maps to:
//!
//! - `<root>/cache/pools/web/members`: endpoints, one or more per line,
//!   comma separated, `#` starts a comment
//! - `<root>/cache/pools/web/config`: the size config JSON
//!
//! An unreadable members file (or one that fails to parse) counts as a lost
//! session: watchers get `Disconnected` once, then an authoritative
//! `Snapshot` when it reads cleanly again. An unreadable config file is
//! reported the same way and followed by a re-delivery of its payload.
//!
//! Config revisions are the CRC32 of the payload, so a byte-identical
//! rewrite is not a new revision and is never delivered. To re-authorize
//! the same size by hand, change the payload (for example its `updatedAt`
//! stamp); `resize_pool` stamps a fresh `updatedAt` on every write.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{
    ConfigEvent, ConfigSink, ConfigSource, DiscoveryEvent, DiscoverySource, DiscoverySubscription,
    EventStream,
};
use crate::endpoint::{parse_endpoint_list, Endpoint};
use crate::error::{Error, Result};
use crate::sizing::{Revision, VersionedBlob};

/// Members file name inside a pool directory
pub const MEMBERS_FILE: &str = "members";

/// Size config file name inside a pool directory
pub const CONFIG_FILE: &str = "config";

/// Polling coordinator over a directory tree
#[derive(Debug, Clone)]
pub struct FileCoordinator {
    root: PathBuf,
    poll_interval: Duration,
}

impl FileCoordinator {
    /// Create a coordinator rooted at `root`
    pub fn new(root: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            root: root.into(),
            poll_interval,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding a pool's files
    pub fn pool_dir(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    pub fn members_path(&self, path: &str) -> PathBuf {
        self.pool_dir(path).join(MEMBERS_FILE)
    }

    pub fn config_path(&self, path: &str) -> PathBuf {
        self.pool_dir(path).join(CONFIG_FILE)
    }

    /// Write a members file (used by operators and tests)
    pub async fn write_members(&self, path: &str, members: &BTreeSet<Endpoint>) -> Result<()> {
        let contents: String = members
            .iter()
            .map(|ep| format!("{}:{}\n", ep.address(), ep.shard_weight))
            .collect();
        write_atomic(&self.members_path(path), contents.as_bytes()).await
    }
}

/// Parse a members file body
fn parse_members(contents: &str) -> Result<BTreeSet<Endpoint>> {
    let mut members = BTreeSet::new();
    for line in contents.lines() {
        let line = line.split('#').next().unwrap_or_default();
        for ep in parse_endpoint_list(line)? {
            members.replace(ep);
        }
    }
    Ok(members)
}

async fn read_members(file: &Path) -> Result<BTreeSet<Endpoint>> {
    let contents = tokio::fs::read_to_string(file).await?;
    parse_members(&contents)
}

/// Read the config file; `Ok(None)` when it does not exist yet
async fn read_config(file: &Path) -> Result<Option<VersionedBlob>> {
    match tokio::fs::read(file).await {
        Ok(data) => {
            let revision = crc32fast::hash(&data) as Revision;
            Ok(Some(VersionedBlob::new(data, revision)))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Unavailable(format!("{}: {}", file.display(), e))),
    }
}

/// Write via a temp file and rename so pollers never see a partial payload
async fn write_atomic(file: &Path, data: &[u8]) -> Result<()> {
    if let Some(dir) = file.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    let tmp = file.with_extension("tmp");
    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, file).await?;
    Ok(())
}

#[async_trait]
impl DiscoverySource for FileCoordinator {
    async fn subscribe(&self, path: &str) -> Result<DiscoverySubscription> {
        if !self.root.is_dir() {
            return Err(Error::Discovery(format!(
                "coordinator root {} is not a directory",
                self.root.display()
            )));
        }

        let file = self.members_path(path);
        let initial = loop {
            match read_members(&file).await {
                Ok(members) => break members,
                Err(e) => {
                    tracing::debug!("Waiting for members file {}: {}", file.display(), e);
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(poll_members(file, initial.clone(), self.poll_interval, tx));

        Ok(DiscoverySubscription {
            initial,
            changes: UnboundedReceiverStream::new(rx).boxed(),
        })
    }
}

/// Poll the members file, emitting diffs until the subscriber goes away
async fn poll_members(
    file: PathBuf,
    mut last: BTreeSet<Endpoint>,
    poll_interval: Duration,
    tx: mpsc::UnboundedSender<DiscoveryEvent>,
) {
    let mut connected = true;
    let mut interval = tokio::time::interval(poll_interval);
    interval.tick().await;

    loop {
        interval.tick().await;
        if tx.is_closed() {
            break;
        }

        let current = match read_members(&file).await {
            Ok(members) => members,
            Err(e) => {
                if connected {
                    tracing::warn!("Lost members file {}: {}", file.display(), e);
                    connected = false;
                    let _ = tx.send(DiscoveryEvent::Disconnected);
                }
                continue;
            }
        };

        if !connected {
            tracing::info!("Members file {} readable again", file.display());
            connected = true;
            let _ = tx.send(DiscoveryEvent::Snapshot(current.clone()));
        } else {
            for gone in last.difference(&current) {
                let _ = tx.send(DiscoveryEvent::Change {
                    endpoint: gone.clone(),
                    present: false,
                });
            }
            for added in current.difference(&last) {
                let _ = tx.send(DiscoveryEvent::Change {
                    endpoint: added.clone(),
                    present: true,
                });
            }
        }
        last = current;
    }

    tracing::debug!("Stopped polling {}", file.display());
}

#[async_trait]
impl ConfigSource for FileCoordinator {
    async fn get(&self, path: &str) -> Result<Option<VersionedBlob>> {
        read_config(&self.config_path(path)).await
    }

    async fn watch(&self, path: &str) -> Result<EventStream<ConfigEvent>> {
        let file = self.config_path(path);
        let last = read_config(&file).await.ok().flatten().map(|blob| blob.revision);

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(poll_config(file, last, self.poll_interval, tx));
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

/// Poll the config file, emitting each new revision
async fn poll_config(
    file: PathBuf,
    mut last: Option<Revision>,
    poll_interval: Duration,
    tx: mpsc::UnboundedSender<ConfigEvent>,
) {
    let mut connected = true;
    let mut interval = tokio::time::interval(poll_interval);
    interval.tick().await;

    loop {
        interval.tick().await;
        if tx.is_closed() {
            break;
        }

        match read_config(&file).await {
            Ok(Some(blob)) => {
                // After a lost session, re-deliver even an unchanged revision
                if !connected || last != Some(blob.revision) {
                    connected = true;
                    last = Some(blob.revision);
                    let _ = tx.send(ConfigEvent::Data(blob));
                }
            }
            Ok(None) => {}
            Err(e) => {
                if connected {
                    tracing::warn!("Lost config file: {}", e);
                    connected = false;
                    let _ = tx.send(ConfigEvent::Disconnected);
                }
            }
        }
    }
}

#[async_trait]
impl ConfigSink for FileCoordinator {
    async fn put(&self, path: &str, data: Bytes) -> Result<Revision> {
        write_atomic(&self.config_path(path), &data).await?;
        Ok(crc32fast::hash(&data) as Revision)
    }
}
