//! Server configuration module
//!
//! Parses and manages server configuration from YAML files.
//!
//! Every key is optional; serde fills in the defaults below, so an empty
//! file is a valid configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::cleanup::engine::{
    DEFAULT_CLEANUP_FRACTION, DEFAULT_INACTIVITY_TIMEOUT_SECS, DEFAULT_MAX_INACTIVE_THRESHOLD,
};
use crate::network::suspicious::DEFAULT_MIN_COUNT;
use crate::tracking::store::DEFAULT_SHARDS;

/// Upper bound on store shards
pub const MAX_SHARDS: usize = 1024;

/// Largest timeout a `chrono::TimeDelta` can hold, in whole seconds
pub const MAX_INACTIVITY_TIMEOUT_SECS: u64 = (i64::MAX / 1000) as u64;

/// Main server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    // ============================================
    // Listener
    // ============================================
    #[serde(default = "default_bind_ip")]
    pub bind_ip: String,

    #[serde(default = "default_port")]
    pub port: u16,

    // ============================================
    // Cleanup policy
    // ============================================
    /// Seconds without activity before a connection counts as inactive
    #[serde(default = "default_inactivity_timeout_secs")]
    pub inactivity_timeout_secs: u64,

    /// Inactive-connection count that must be exceeded to trigger cleanup
    #[serde(default = "default_max_inactive_threshold")]
    pub max_inactive_threshold: usize,

    /// Share of the inactive connections closed per run (0.0 - 1.0)
    #[serde(default = "default_cleanup_fraction")]
    pub cleanup_fraction: f64,

    /// Background sweep interval in seconds (0 = disabled)
    #[serde(default)]
    pub sweep_interval_secs: u64,

    // ============================================
    // Simulated webhook work
    // ============================================
    #[serde(default = "default_webhook_processing_ms")]
    pub webhook_processing_ms: u64,

    #[serde(default = "default_long_webhook_secs")]
    pub long_webhook_secs: u64,

    // ============================================
    // Reporting
    // ============================================
    /// `count >= N` cutoff for suspicious IPs in system stats
    #[serde(default = "default_suspicious_min_count")]
    pub suspicious_min_count: u64,

    /// Number of recent cleanup runs shown in system stats
    #[serde(default = "default_cleanup_history_limit")]
    pub cleanup_history_limit: usize,

    /// Append-only JSON-lines file for cleanup audit entries
    #[serde(default)]
    pub audit_log_path: Option<String>,

    // ============================================
    // Store
    // ============================================
    #[serde(default = "default_store_shards")]
    pub store_shards: usize,
}

// ============================================
// Default value functions
// These are called by serde when a field is missing
// ============================================

fn default_bind_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_inactivity_timeout_secs() -> u64 {
    DEFAULT_INACTIVITY_TIMEOUT_SECS
}

fn default_max_inactive_threshold() -> usize {
    DEFAULT_MAX_INACTIVE_THRESHOLD
}

fn default_cleanup_fraction() -> f64 {
    DEFAULT_CLEANUP_FRACTION
}

fn default_webhook_processing_ms() -> u64 {
    2000
}

fn default_long_webhook_secs() -> u64 {
    45
}

fn default_suspicious_min_count() -> u64 {
    DEFAULT_MIN_COUNT
}

fn default_cleanup_history_limit() -> usize {
    5
}

fn default_store_shards() -> usize {
    DEFAULT_SHARDS
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_ip: default_bind_ip(),
            port: default_port(),
            inactivity_timeout_secs: default_inactivity_timeout_secs(),
            max_inactive_threshold: default_max_inactive_threshold(),
            cleanup_fraction: default_cleanup_fraction(),
            sweep_interval_secs: 0,
            webhook_processing_ms: default_webhook_processing_ms(),
            long_webhook_secs: default_long_webhook_secs(),
            suspicious_min_count: default_suspicious_min_count(),
            cleanup_history_limit: default_cleanup_history_limit(),
            audit_log_path: None,
            store_shards: default_store_shards(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file
    ///
    /// # Example
    /// ```no_run
    /// use connwatch::config::ServerConfig;
    ///
    /// let config = ServerConfig::from_file("conf/server.yaml")
    ///     .expect("Failed to load config");
    /// println!("threshold: {}", config.max_inactive_threshold);
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_str(&contents)
            .with_context(|| format!("Failed to load config from {}", path.display()))
    }

    /// Parse configuration from a YAML string
    ///
    /// Useful for testing
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self> {
        // An empty document deserializes as null, not as an empty mapping.
        let config: ServerConfig = if contents.trim().is_empty() {
            ServerConfig::default()
        } else {
            serde_yaml::from_str(contents).context("Failed to parse YAML")?
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.bind_ip.is_empty(), "bind_ip cannot be empty");
        anyhow::ensure!(
            self.inactivity_timeout_secs > 0,
            "inactivity_timeout_secs must be greater than 0"
        );
        anyhow::ensure!(
            self.inactivity_timeout_secs <= MAX_INACTIVITY_TIMEOUT_SECS,
            "inactivity_timeout_secs out of range: {} (max {})",
            self.inactivity_timeout_secs,
            MAX_INACTIVITY_TIMEOUT_SECS
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.cleanup_fraction),
            "cleanup_fraction out of range: {} (expected 0.0 - 1.0)",
            self.cleanup_fraction
        );
        anyhow::ensure!(
            self.store_shards > 0 && self.store_shards <= MAX_SHARDS,
            "store_shards out of range: {} (max {})",
            self.store_shards,
            MAX_SHARDS
        );

        if let Some(path) = &self.audit_log_path {
            anyhow::ensure!(!path.is_empty(), "audit_log_path cannot be empty when set");
        }

        Ok(())
    }

    /// Address the HTTP listener binds to
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_ip, self.port)
    }

    /// Save configuration to a YAML file
    ///
    /// Useful for generating config templates
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(&self).context("Failed to serialize config to YAML")?;

        fs::write(path.as_ref(), yaml)
            .with_context(|| format!("Failed to write config to {}", path.as_ref().display()))?;

        Ok(())
    }
}
