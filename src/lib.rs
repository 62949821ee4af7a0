//! Connwatch - webhook connection lifecycle tracker
//!
//! Records every inbound request as a connection, counts webhook hits per
//! source address, and evicts the oldest inactive connections once too many
//! have piled up.

// ============================================
// Core Modules
// ============================================

/// Injectable time source
pub mod clock;
/// Server configuration (YAML)
pub mod config;
/// Connection records and the sharded store
pub mod tracking;
/// Client address resolution and per-address webhook counts
pub mod network;
/// Cleanup policy, engine, audit log and alerts
pub mod cleanup;
/// Request classification into the store and tracker
pub mod recorder;

// ============================================
// Servers
// ============================================

/// HTTP server (axum)
pub mod servers;
