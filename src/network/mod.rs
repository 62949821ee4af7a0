//! Per-address network bookkeeping: client address resolution and the
//! suspicious-actor counters.

pub mod client_ip;
pub mod suspicious;

pub use client_ip::resolve_client_ip;
pub use suspicious::{SuspiciousActor, SuspiciousTracker};
