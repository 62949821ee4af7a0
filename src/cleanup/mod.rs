//! Stale-connection cleanup
//!
//! - `engine` - threshold check, victim selection and closing
//! - `audit` - append-only log of executed runs
//! - `alert` - text alert raised after each executed run

pub mod alert;
pub mod audit;
pub mod engine;

pub use audit::{AuditLog, CleanupLogEntry, ClosedConnection};
pub use engine::{CleanupEngine, CleanupOutcome, CleanupPolicy, ExecutedCleanup, SkippedCleanup};
