//! Server implementations
//!
//! - webhook: HTTP surface for webhook intake, connection status and cleanup

pub mod webhook;
