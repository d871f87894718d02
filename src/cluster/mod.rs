//! Pool Cluster
//!
//! Runs one [`ReconciliationEngine`] per pool path behind a single actor
//! task. Discovery and config notifications arrive from two independent
//! feed tasks over an mpsc queue; the actor applies them one at a time,
//! appends each resulting batch to the [`ChangeLog`], and serves `snap`
//! requests from the same loop so a snapshot and its cursor always agree.
//!
//! Feeds hold weak senders: once every [`ClusterHandle`] is gone the queue
//! closes and the actor shuts down on its own.

use chrono::{DateTime, Utc};
use futures::stream::Fuse;
use futures::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;

use crate::changelog::{ChangeEvent, ChangeLog, Cursor};
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::sizing::{Revision, VersionedBlob};
use crate::source::{ConfigEvent, ConfigSource, DiscoveryEvent, DiscoverySource, EventStream};
use crate::state::{PoolMode, ReconciliationEngine};


/// Options for opening a pool
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Size the pool from its config (true) or mirror discovery (false)
    pub managed: bool,
    /// Static membership published until live data arrives
    pub backup: Option<BTreeSet<Endpoint>>,
    /// Capacity of the actor's update queue
    pub queue_capacity: usize,
    /// Delay between attempts when the config source is unavailable
    pub retry_delay: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            managed: true,
            backup: None,
            queue_capacity: 1024,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Observability snapshot of a pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSummary {
    pub path: String,
    pub mode: PoolMode,
    pub candidates: usize,
    pub desired_size: Option<usize>,
    pub published: usize,
    pub last_revision: Option<Revision>,
    pub discovery_connected: bool,
    pub config_connected: bool,
    /// Malformed config payloads rejected so far
    pub config_errors: u64,
    /// Change events appended to the log so far
    pub events_emitted: u64,
    pub last_change_at: Option<DateTime<Utc>>,
}

/// Readiness as seen by `ClusterHandle::ready`
#[derive(Debug, Clone)]
enum Readiness {
    Pending,
    Ready,
    Failed(String),
}

/// Messages processed by the pool actor
enum Command {
    Discovery(DiscoveryEvent),
    DiscoveryFailed(Error),
    Config(ConfigEvent),
    Snap(oneshot::Sender<(BTreeSet<Endpoint>, Cursor)>),
    Summary(oneshot::Sender<PoolSummary>),
    Shutdown,
}

/// Open a pool with default options
pub fn open(
    path: &str,
    discovery: Arc<dyn DiscoverySource>,
    config: Arc<dyn ConfigSource>,
    backup: Option<BTreeSet<Endpoint>>,
    managed: bool,
) -> ClusterHandle {
    open_with_options(
        path,
        discovery,
        config,
        PoolOptions {
            managed,
            backup,
            ..PoolOptions::default()
        },
    )
}

/// Open a pool and start tracking its membership
///
/// Must be called from within a Tokio runtime.
pub fn open_with_options(
    path: &str,
    discovery: Arc<dyn DiscoverySource>,
    config: Arc<dyn ConfigSource>,
    options: PoolOptions,
) -> ClusterHandle {
    let (sender, receiver) = mpsc::channel(options.queue_capacity.max(1));
    let (readiness_tx, readiness_rx) = watch::channel(Readiness::Pending);

    let mut engine = ReconciliationEngine::new(options.managed);
    let log = ChangeLog::new();
    let mut events_emitted = 0;
    let mut last_change_at = None;

    if let Some(backup) = options.backup {
        let seeded = engine.seed_backup(backup);
        if !seeded.is_empty() {
            events_emitted = seeded.len() as u64;
            last_change_at = Some(Utc::now());
            log.append(seeded);
            readiness_tx.send_replace(Readiness::Ready);
        }
    }

    let discovery_feed = tokio::spawn(run_discovery_feed(
        discovery,
        path.to_string(),
        sender.downgrade(),
        options.retry_delay,
    ));

    // Unmanaged pools ignore config entirely
    let config_feed = options.managed.then(|| {
        tokio::spawn(run_config_feed(
            config,
            path.to_string(),
            sender.downgrade(),
            options.retry_delay,
        ))
    });

    tracing::info!(
        "Opened pool {} ({})",
        path,
        if options.managed { "managed" } else { "unmanaged" }
    );

    let actor = PoolActor {
        path: path.to_string(),
        engine,
        log,
        readiness: readiness_tx,
        discovery_connected: false,
        config_connected: false,
        config_errors: 0,
        events_emitted,
        last_change_at,
        discovery_feed,
        config_feed,
    };
    let task = tokio::spawn(actor.run(receiver));

    ClusterHandle {
        path: Arc::from(path),
        sender,
        readiness: readiness_rx,
        task: Arc::new(Mutex::new(Some(task))),
    }
}

/// Handle to a tracked pool
///
/// Cheap to clone; all clones refer to the same pool.
#[derive(Clone)]
pub struct ClusterHandle {
    path: Arc<str>,
    sender: mpsc::Sender<Command>,
    readiness: watch::Receiver<Readiness>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ClusterHandle {
    /// Pool path this handle tracks
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Wait until the pool first has a membership to publish
    ///
    /// Resolves once, on reaching managed, unmanaged or backup-seeded state.
    /// Fails with `Error::Discovery` on a fatal discovery failure and with
    /// `Error::Closed` if the pool is closed first. Without discovery, config
    /// and a backup pool this never resolves; callers apply their own deadline.
    pub async fn ready(&self) -> Result<()> {
        let mut readiness = self.readiness.clone();
        let state = readiness
            .wait_for(|r| !matches!(r, Readiness::Pending))
            .await
            .map_err(|_| Error::Closed)?
            .clone();

        match state {
            Readiness::Failed(reason) => Err(Error::Discovery(reason)),
            _ => Ok(()),
        }
    }

    /// Current published set plus a cursor positioned exactly after it
    ///
    /// Replaying every event from the cursor onto the returned set tracks
    /// the published set with no gap or duplicate.
    pub async fn snap(&self) -> Result<(BTreeSet<Endpoint>, Cursor)> {
        self.request(Command::Snap).await
    }

    /// Observability snapshot of the pool
    pub async fn summary(&self) -> Result<PoolSummary> {
        self.request(Command::Summary).await
    }

    /// Stop tracking the pool
    ///
    /// Releases both watches. Existing cursors drain what was already
    /// appended and then return `Error::Closed`. Idempotent.
    pub async fn close(&self) {
        let _ = self.sender.send(Command::Shutdown).await;
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                tracing::error!("Pool actor for {} ended abnormally: {}", self.path, e);
            }
        }
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender.send(make(tx)).await.map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)
    }
}

/// Single owner of a pool's membership state
struct PoolActor {
    path: String,
    engine: ReconciliationEngine,
    log: ChangeLog,
    readiness: watch::Sender<Readiness>,
    discovery_connected: bool,
    config_connected: bool,
    config_errors: u64,
    events_emitted: u64,
    last_change_at: Option<DateTime<Utc>>,
    discovery_feed: JoinHandle<()>,
    config_feed: Option<JoinHandle<()>>,
}

impl PoolActor {
    async fn run(mut self, mut receiver: mpsc::Receiver<Command>) {
        while let Some(command) = receiver.recv().await {
            match command {
                Command::Discovery(event) => self.on_discovery(event),
                Command::DiscoveryFailed(e) => self.on_discovery_failed(e),
                Command::Config(event) => self.on_config(event),
                Command::Snap(reply) => {
                    let _ = reply.send((self.engine.published().clone(), self.log.cursor()));
                }
                Command::Summary(reply) => {
                    let _ = reply.send(self.summary());
                }
                Command::Shutdown => break,
            }
        }

        // Cancelled feeds drop their streams, which releases the watches
        self.discovery_feed.abort();
        let _ = (&mut self.discovery_feed).await;
        if let Some(feed) = self.config_feed.as_mut() {
            feed.abort();
            let _ = feed.await;
        }
        tracing::info!(
            "Closed pool {} with {} published endpoints",
            self.path,
            self.engine.published().len()
        );
    }

    fn on_discovery(&mut self, event: DiscoveryEvent) {
        let events = match event {
            DiscoveryEvent::Snapshot(members) => {
                if !self.discovery_connected {
                    tracing::info!("Discovery for {} read {} candidates", self.path, members.len());
                }
                self.discovery_connected = true;
                self.engine.on_candidate_update(members)
            }
            DiscoveryEvent::Change { endpoint, present } => {
                self.engine.on_candidate_change(endpoint, present)
            }
            DiscoveryEvent::Disconnected => {
                self.discovery_connected = false;
                tracing::warn!(
                    "Discovery for {} disconnected; holding {} candidates",
                    self.path,
                    self.engine.candidates().len()
                );
                Vec::new()
            }
        };
        self.publish(events);
    }

    fn on_discovery_failed(&mut self, error: Error) {
        if matches!(*self.readiness.borrow(), Readiness::Pending) {
            tracing::error!("Discovery for {} failed: {}", self.path, error);
            self.readiness.send_replace(Readiness::Failed(error.to_string()));
        } else {
            tracing::error!(
                "Discovery for {} failed: {}; keeping {} published endpoints",
                self.path,
                error,
                self.engine.published().len()
            );
        }
    }

    fn on_config(&mut self, event: ConfigEvent) {
        match event {
            ConfigEvent::Data(VersionedBlob { data, revision }) => {
                self.config_connected = true;
                match self.engine.on_config_update(&data, revision) {
                    Ok(events) => self.publish(events),
                    Err(e) => {
                        self.config_errors += 1;
                        tracing::warn!(
                            "Rejected size config revision {} for {}: {}",
                            revision,
                            self.path,
                            e
                        );
                    }
                }
            }
            ConfigEvent::Disconnected => {
                self.config_connected = false;
                tracing::warn!(
                    "Config for {} disconnected; holding desired size {:?}",
                    self.path,
                    self.engine.desired_size()
                );
            }
        }
    }

    fn publish(&mut self, events: Vec<ChangeEvent>) {
        if !events.is_empty() {
            let adds = events.iter().filter(|e| e.is_add()).count();
            let removals = events.len() - adds;
            self.events_emitted += events.len() as u64;
            self.last_change_at = Some(Utc::now());
            self.log.append(events);

            tracing::info!(
                "Pool {} [{}]: +{} -{} -> {} published",
                self.path,
                self.engine.mode(),
                adds,
                removals,
                self.engine.published().len()
            );
        }

        let newly_ready = self.engine.mode().is_ready()
            && matches!(*self.readiness.borrow(), Readiness::Pending);
        if newly_ready {
            tracing::info!("Pool {} ready in {} mode", self.path, self.engine.mode());
            self.readiness.send_replace(Readiness::Ready);
        }
    }

    fn summary(&self) -> PoolSummary {
        PoolSummary {
            path: self.path.clone(),
            mode: self.engine.mode(),
            candidates: self.engine.candidates().len(),
            desired_size: self.engine.desired_size(),
            published: self.engine.published().len(),
            last_revision: self.engine.last_revision(),
            discovery_connected: self.discovery_connected,
            config_connected: self.config_connected,
            config_errors: self.config_errors,
            events_emitted: self.events_emitted,
            last_change_at: self.last_change_at,
        }
    }
}

/// Forward a command to the actor; false once the pool is gone
async fn forward(sender: &mpsc::WeakSender<Command>, command: Command) -> bool {
    match sender.upgrade() {
        Some(sender) => sender.send(command).await.is_ok(),
        None => false,
    }
}

/// Subscribe to discovery and feed every notification to the actor
///
/// Retryable subscribe errors are retried after `retry_delay`; anything
/// else fails readiness.
async fn run_discovery_feed(
    source: Arc<dyn DiscoverySource>,
    path: String,
    sender: mpsc::WeakSender<Command>,
    retry_delay: Duration,
) {
    let subscription = loop {
        match source.subscribe(&path).await {
            Ok(subscription) => break subscription,
            Err(e) if e.is_retryable() => {
                tracing::warn!("Discovery subscribe on {} failed: {}; retrying", path, e);
                tokio::time::sleep(retry_delay).await;
            }
            Err(e) => {
                forward(&sender, Command::DiscoveryFailed(e)).await;
                return;
            }
        }
    };

    let initial = DiscoveryEvent::Snapshot(subscription.initial);
    if !forward(&sender, Command::Discovery(initial)).await {
        return;
    }

    let mut changes = subscription.changes;
    while let Some(event) = changes.next().await {
        if !forward(&sender, Command::Discovery(event)).await {
            return;
        }
    }

    tracing::warn!("Discovery stream for {} ended", path);
    forward(&sender, Command::Discovery(DiscoveryEvent::Disconnected)).await;
}

/// Drop watch notifications already covered by the initial read
///
/// Every write that landed between opening the watch and the read is queued
/// ahead of the read's own revision. Those are older than what the read
/// returned, so everything up to and including that revision is discarded.
/// Notifications not yet queued arrived after the read and are kept.
fn skip_covered(updates: &mut Fuse<EventStream<ConfigEvent>>, current: Revision) -> Vec<ConfigEvent> {
    let mut queued = Vec::new();
    while let Some(Some(event)) = updates.next().now_or_never() {
        queued.push(event);
    }

    let covered = queued
        .iter()
        .position(|event| matches!(event, ConfigEvent::Data(blob) if blob.revision == current));
    if let Some(index) = covered {
        tracing::debug!("Skipping {} config notifications older than revision {}", index + 1, current);
        queued = queued.split_off(index + 1);
    }
    queued
}

/// Watch the size config and feed every payload to the actor
async fn run_config_feed(
    source: Arc<dyn ConfigSource>,
    path: String,
    sender: mpsc::WeakSender<Command>,
    retry_delay: Duration,
) {
    // Watch before the initial read so no write falls between the two
    let mut updates = loop {
        match source.watch(&path).await {
            Ok(updates) => break updates.fuse(),
            Err(e) if e.is_retryable() => {
                tracing::warn!("Config watch on {} failed: {}; retrying", path, e);
                tokio::time::sleep(retry_delay).await;
            }
            Err(e) => {
                tracing::error!("Config watch on {} failed permanently: {}", path, e);
                return;
            }
        }
    };

    let mut pending = Vec::new();
    loop {
        match source.get(&path).await {
            Ok(Some(blob)) => {
                pending = skip_covered(&mut updates, blob.revision);
                if !forward(&sender, Command::Config(ConfigEvent::Data(blob))).await {
                    return;
                }
                break;
            }
            Ok(None) => {
                tracing::info!("No size config at {} yet", path);
                break;
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!("Config read on {} failed: {}; retrying", path, e);
                tokio::time::sleep(retry_delay).await;
            }
            Err(e) => {
                tracing::error!("Config read on {} failed: {}", path, e);
                break;
            }
        }
    }

    for event in pending {
        if !forward(&sender, Command::Config(event)).await {
            return;
        }
    }

    while let Some(event) = updates.next().await {
        if !forward(&sender, Command::Config(event)).await {
            return;
        }
    }

    tracing::warn!("Config stream for {} ended", path);
    forward(&sender, Command::Config(ConfigEvent::Disconnected)).await;
}
