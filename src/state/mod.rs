//! State Management Module
//!
//! Holds the membership state machine and the sticky selection rules it
//! uses to size the published set.

mod engine;
pub mod selection;

pub use engine::{PoolMode, ReconciliationEngine};
pub use selection::{diff, select_target};
