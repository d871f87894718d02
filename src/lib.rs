//! WolfPool - Dynamic Cache Pool Membership
//!
//! Tracks which cache servers a sharded cache client should place keys on.
//! Endpoints register themselves with a coordination service; an operator
//! sets the pool size in a versioned config blob; WolfPool reconciles the
//! two into a published membership plus an ordered stream of changes.
//!
//! # Architecture
//!
//! Each pool runs a single actor that owns its reconciliation state.
//! Discovery and config notifications are fed to it from independent tasks,
//! and every membership delta is appended to a broadcast change log that
//! consumers tail through their own cursors.
//!
//! # Features
//!
//! - Sticky, deterministic pool sizing: endpoint churn never reshapes the
//!   ring until the operator writes a new size revision
//! - Consistent snapshots: `snap()` returns the membership and a cursor
//!   positioned exactly after it
//! - Backup pool published while the coordination service is unreachable
//! - Frozen state across disconnects, resynced from authoritative re-reads
//! - In-memory and file-backed coordination backends

pub mod address;
pub mod changelog;
pub mod cluster;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod sizing;
pub mod source;
pub mod state;

pub use config::WolfPoolConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::address::PoolAddress;
    pub use crate::changelog::{ChangeEvent, Cursor};
    pub use crate::cluster::{open, open_with_options, ClusterHandle, PoolOptions, PoolSummary};
    pub use crate::config::WolfPoolConfig;
    pub use crate::endpoint::Endpoint;
    pub use crate::error::{Error, Result};
    pub use crate::sizing::SizeConfig;
    pub use crate::source::{ConfigSink, ConfigSource, DiscoverySource};
    pub use crate::state::PoolMode;
}
