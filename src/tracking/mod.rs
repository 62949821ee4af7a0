//! Connection lifecycle tracking
//!
//! Records one [`Connection`] per tracked request-session and answers the
//! active/inactive queries the cleanup engine and status endpoints need.

pub mod connection;
pub mod store;

pub use connection::{Connection, ConnectionId, ConnectionStatus};
pub use store::{ActiveFilter, ActivitySummary, ConnectionStore, StoreError};
