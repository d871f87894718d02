//! Reconciliation Engine
//!
//! The membership state machine behind a pool. It holds the latest
//! candidates from discovery, the operator's desired size and the published
//! set, and turns updates into batches of [`ChangeEvent`]s.
//!
//! In managed mode, candidate churn only refreshes the data a future
//! recompute will use; the published set changes solely when a new size
//! config revision arrives (or when live data first becomes available). In
//! unmanaged mode the published set tracks the candidates verbatim.
//!
//! The engine is plain synchronous state. Serialization of updates is the
//! caller's job; see `crate::cluster`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::selection::{diff, select_target};
use crate::changelog::ChangeEvent;
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::sizing::{Revision, SizeConfig};

/// Lifecycle mode of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolMode {
    /// Waiting for initial discovery (and config, when managed)
    Initializing,
    /// Publishing the static backup pool until live data arrives
    Backup,
    /// Published set sized by the operator's config
    Managed,
    /// Published set mirrors discovery
    Unmanaged,
}

impl PoolMode {
    /// Whether the pool has something to publish
    pub fn is_ready(&self) -> bool {
        !matches!(self, PoolMode::Initializing)
    }
}

impl std::fmt::Display for PoolMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolMode::Initializing => write!(f, "INITIALIZING"),
            PoolMode::Backup => write!(f, "BACKUP"),
            PoolMode::Managed => write!(f, "MANAGED"),
            PoolMode::Unmanaged => write!(f, "UNMANAGED"),
        }
    }
}

/// Membership reconciliation state machine
#[derive(Debug)]
pub struct ReconciliationEngine {
    /// Size published sets by config (true) or mirror discovery (false)
    managed: bool,
    mode: PoolMode,
    /// Latest endpoints seen through discovery
    candidates: BTreeSet<Endpoint>,
    /// Set once the first authoritative discovery read is in
    candidates_loaded: bool,
    desired_size: Option<usize>,
    /// Revision of the last config applied
    last_revision: Option<Revision>,
    published: BTreeSet<Endpoint>,
}

impl ReconciliationEngine {
    /// Create an engine with nothing published
    pub fn new(managed: bool) -> Self {
        Self {
            managed,
            mode: PoolMode::Initializing,
            candidates: BTreeSet::new(),
            candidates_loaded: false,
            desired_size: None,
            last_revision: None,
            published: BTreeSet::new(),
        }
    }

    pub fn mode(&self) -> PoolMode {
        self.mode
    }

    pub fn is_managed(&self) -> bool {
        self.managed
    }

    pub fn published(&self) -> &BTreeSet<Endpoint> {
        &self.published
    }

    pub fn candidates(&self) -> &BTreeSet<Endpoint> {
        &self.candidates
    }

    pub fn desired_size(&self) -> Option<usize> {
        self.desired_size
    }

    pub fn last_revision(&self) -> Option<Revision> {
        self.last_revision
    }

    /// Publish a static backup pool while live data is unavailable
    ///
    /// Only takes effect before the pool is ready and for a non-empty pool.
    pub fn seed_backup(&mut self, backup: BTreeSet<Endpoint>) -> Vec<ChangeEvent> {
        if self.mode != PoolMode::Initializing || backup.is_empty() {
            return Vec::new();
        }

        tracing::info!("Seeding {} backup endpoints until live data arrives", backup.len());
        self.mode = PoolMode::Backup;
        self.publish(backup)
    }

    /// Replace the candidate set wholesale (initial read or re-read)
    pub fn on_candidate_update(&mut self, candidates: BTreeSet<Endpoint>) -> Vec<ChangeEvent> {
        self.candidates = candidates;
        self.candidates_changed()
    }

    /// Apply one presence notification to the candidate set
    pub fn on_candidate_change(&mut self, endpoint: Endpoint, present: bool) -> Vec<ChangeEvent> {
        if present {
            tracing::debug!("Candidate registered: {}", endpoint);
            self.candidates.replace(endpoint);
        } else {
            tracing::debug!("Candidate deregistered: {}", endpoint);
            self.candidates.remove(&endpoint);
        }
        self.candidates_changed()
    }

    /// Apply a size config payload
    ///
    /// A malformed payload returns an error and leaves all state untouched.
    /// A payload carrying the revision already applied is ignored, so a
    /// reconnect re-read cannot reshape the pool on its own.
    pub fn on_config_update(&mut self, data: &[u8], revision: Revision) -> Result<Vec<ChangeEvent>> {
        if !self.managed {
            tracing::trace!("Ignoring size config revision {} for unmanaged pool", revision);
            return Ok(Vec::new());
        }

        if self.last_revision == Some(revision) {
            tracing::debug!("Size config revision {} already applied", revision);
            return Ok(Vec::new());
        }

        let config = SizeConfig::decode(data)?;
        tracing::info!(
            "Size config revision {}: desired size {:?} -> {}",
            revision,
            self.desired_size,
            config.desired_size
        );
        self.desired_size = Some(config.desired_size);
        self.last_revision = Some(revision);

        if !self.candidates_loaded {
            // Discovery has not answered yet; activation happens on its first read
            return Ok(Vec::new());
        }

        self.mode = PoolMode::Managed;
        Ok(self.recompute())
    }

    /// Sticky reselection of the published set against the desired size
    pub fn recompute(&mut self) -> Vec<ChangeEvent> {
        let Some(desired) = self.desired_size else {
            return Vec::new();
        };

        if desired > self.candidates.len() {
            tracing::warn!(
                "Desired size {} exceeds {} available candidates",
                desired,
                self.candidates.len()
            );
        }

        let target = select_target(&self.published, &self.candidates, desired);
        self.publish(target)
    }

    fn candidates_changed(&mut self) -> Vec<ChangeEvent> {
        let first_read = !self.candidates_loaded;
        self.candidates_loaded = true;

        if !self.managed {
            self.mode = PoolMode::Unmanaged;
            let target = self.candidates.clone();
            return self.publish(target);
        }

        if first_read && self.desired_size.is_some() {
            self.mode = PoolMode::Managed;
            return self.recompute();
        }

        Vec::new()
    }

    fn publish(&mut self, target: BTreeSet<Endpoint>) -> Vec<ChangeEvent> {
        let events = diff(&self.published, &target);
        self.published = target;
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(i: u16) -> Endpoint {
        Endpoint::new(format!("cache-{:02}", i), 11211)
    }

    fn eps(range: std::ops::Range<u16>) -> BTreeSet<Endpoint> {
        range.map(ep).collect()
    }

    fn size(n: usize) -> Vec<u8> {
        format!("{{\"desiredSize\": {}}}", n).into_bytes()
    }

    fn counts(events: &[ChangeEvent]) -> (usize, usize) {
        let adds = events.iter().filter(|e| e.is_add()).count();
        (adds, events.len() - adds)
    }

    /// Managed engine with `n` candidates published at size `n`
    fn managed_at(n: u16) -> ReconciliationEngine {
        let mut engine = ReconciliationEngine::new(true);
        engine.on_candidate_update(eps(0..n));
        engine.on_config_update(&size(n as usize), 1).unwrap();
        engine
    }

    #[test]
    fn test_ready_requires_discovery_and_config() {
        let mut engine = ReconciliationEngine::new(true);
        assert!(engine.on_candidate_update(eps(0..3)).is_empty());
        assert_eq!(engine.mode(), PoolMode::Initializing);

        let events = engine.on_config_update(&size(3), 1).unwrap();
        assert_eq!(counts(&events), (3, 0));
        assert_eq!(engine.mode(), PoolMode::Managed);
    }

    #[test]
    fn test_config_before_discovery() {
        let mut engine = ReconciliationEngine::new(true);
        assert!(engine.on_config_update(&size(2), 1).unwrap().is_empty());
        assert_eq!(engine.mode(), PoolMode::Initializing);

        let events = engine.on_candidate_update(eps(0..5));
        assert_eq!(counts(&events), (2, 0));
        assert_eq!(engine.mode(), PoolMode::Managed);
        assert_eq!(engine.published(), &eps(0..2));
    }

    #[test]
    fn test_candidate_churn_does_not_publish() {
        let mut engine = managed_at(5);
        assert!(engine.on_candidate_update(eps(0..20)).is_empty());
        assert!(engine.on_candidate_change(ep(2), false).is_empty());
        assert!(engine.on_candidate_update(eps(0..1)).is_empty());
        assert_eq!(engine.published(), &eps(0..5));
    }

    #[test]
    fn test_size_increase_only_adds() {
        let mut engine = managed_at(4);
        engine.on_candidate_update(eps(0..10));

        let events = engine.on_config_update(&size(9), 2).unwrap();
        assert_eq!(counts(&events), (5, 0));
        assert_eq!(engine.published().len(), 9);
    }

    #[test]
    fn test_size_decrease_only_removes_deterministically() {
        let run = || {
            let mut engine = managed_at(8);
            engine.on_config_update(&size(5), 2).unwrap()
        };

        let first = run();
        assert_eq!(counts(&first), (0, 3));
        assert_eq!(first, run());
        assert_eq!(
            first,
            vec![
                ChangeEvent::Rem(ep(5)),
                ChangeEvent::Rem(ep(6)),
                ChangeEvent::Rem(ep(7)),
            ]
        );
    }

    #[test]
    fn test_malformed_config_keeps_state() {
        let mut engine = managed_at(3);
        assert!(engine.on_config_update(b"{broken", 2).is_err());
        assert_eq!(engine.desired_size(), Some(3));
        assert_eq!(engine.last_revision(), Some(1));
        assert_eq!(engine.published().len(), 3);
    }

    #[test]
    fn test_same_revision_is_not_reapplied() {
        let mut engine = managed_at(5);
        engine.on_candidate_change(ep(0), false);

        // Re-read of revision 1 after a reconnect
        assert!(engine.on_config_update(&size(5), 1).unwrap().is_empty());
        assert!(engine.published().contains(&ep(0)));

        // A fresh write of the same size is an explicit action
        let events = engine.on_config_update(&size(5), 2).unwrap();
        assert_eq!(events, vec![ChangeEvent::Rem(ep(0))]);
    }

    #[test]
    fn test_backup_swap_on_live_data() {
        let mut engine = ReconciliationEngine::new(true);
        let backup: BTreeSet<Endpoint> =
            [Endpoint::new("backup-a", 1), Endpoint::new("backup-b", 1)].into();

        let seeded = engine.seed_backup(backup);
        assert_eq!(counts(&seeded), (2, 0));
        assert_eq!(engine.mode(), PoolMode::Backup);

        assert!(engine.on_candidate_update(eps(0..5)).is_empty());
        assert_eq!(engine.mode(), PoolMode::Backup);

        let events = engine.on_config_update(&size(5), 1).unwrap();
        assert_eq!(counts(&events), (5, 2));
        assert!(!events[0].is_add() && !events[1].is_add());
        assert_eq!(engine.mode(), PoolMode::Managed);
        assert_eq!(engine.published(), &eps(0..5));
    }

    #[test]
    fn test_backup_ignored_once_ready() {
        let mut engine = managed_at(2);
        assert!(engine.seed_backup(eps(10..12)).is_empty());
        assert!(ReconciliationEngine::new(true).seed_backup(BTreeSet::new()).is_empty());
    }

    #[test]
    fn test_unmanaged_tracks_candidates() {
        let mut engine = ReconciliationEngine::new(false);
        let events = engine.on_candidate_update(eps(0..3));
        assert_eq!(counts(&events), (3, 0));
        assert_eq!(engine.mode(), PoolMode::Unmanaged);

        assert_eq!(engine.on_candidate_change(ep(1), false), vec![ChangeEvent::Rem(ep(1))]);
        assert_eq!(engine.on_candidate_change(ep(7), true), vec![ChangeEvent::Add(ep(7))]);

        // Config is ignored entirely
        assert!(engine.on_config_update(&size(1), 1).unwrap().is_empty());
        assert_eq!(engine.published().len(), 3);
        assert_eq!(engine.desired_size(), None);
    }

    #[test]
    fn test_recompute_without_config_is_noop() {
        let mut engine = ReconciliationEngine::new(true);
        engine.on_candidate_update(eps(0..3));
        assert!(engine.recompute().is_empty());
        assert!(engine.published().is_empty());
    }
}
