//! Threshold-triggered eviction of stale connections.
//!
//! A run is split in two halves: [`CleanupEngine::plan`] snapshots the store
//! and picks victims without touching anything, [`CleanupEngine::apply`]
//! closes them, writes the audit entry and raises the alert. Runs are
//! serialized by `run_lock` so two runs never pick overlapping victims.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::alert::raise_alert;
use super::audit::{AuditLog, ClosedConnection, NewCleanupLogEntry};
use crate::config::ServerConfig;
use crate::network::SuspiciousTracker;
use crate::tracking::{Connection, ConnectionStore};

pub const DEFAULT_INACTIVITY_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_INACTIVE_THRESHOLD: usize = 200;
pub const DEFAULT_CLEANUP_FRACTION: f64 = 0.5;

pub const REASON_THRESHOLD_NOT_REACHED: &str = "threshold not reached";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CleanupPolicy {
    pub inactivity_timeout_secs: u64,
    /// Inactive-connection count that must be exceeded before a run acts.
    /// Not a cap on total connections.
    pub max_inactive_threshold: usize,
    pub cleanup_fraction: f64,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self {
            inactivity_timeout_secs: DEFAULT_INACTIVITY_TIMEOUT_SECS,
            max_inactive_threshold: DEFAULT_MAX_INACTIVE_THRESHOLD,
            cleanup_fraction: DEFAULT_CLEANUP_FRACTION,
        }
    }
}

impl From<&ServerConfig> for CleanupPolicy {
    fn from(config: &ServerConfig) -> Self {
        Self {
            inactivity_timeout_secs: config.inactivity_timeout_secs,
            max_inactive_threshold: config.max_inactive_threshold,
            cleanup_fraction: config.cleanup_fraction,
        }
    }
}

impl CleanupPolicy {
    pub fn threshold_exceeded(&self, inactive_count: usize) -> bool {
        inactive_count > self.max_inactive_threshold
    }

    /// `floor(inactive_count * cleanup_fraction)`, never more than `inactive_count`.
    pub fn victim_count(&self, inactive_count: usize) -> usize {
        let n = (inactive_count as f64 * self.cleanup_fraction).floor();
        (n.max(0.0) as usize).min(inactive_count)
    }

    fn reason(&self) -> String {
        format!(
            "Threshold of {} inactive connections exceeded",
            self.max_inactive_threshold
        )
    }
}

/// Result of a run that found nothing to do.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedCleanup {
    pub executed: bool,
    pub reason: String,
    pub inactive_connections: usize,
    pub threshold: usize,
}

/// Result of a run that closed connections.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutedCleanup {
    pub executed: bool,
    pub total_connections_before: usize,
    pub inactive_connections_found: usize,
    pub connections_closed: usize,
    pub cleanup_fraction: f64,
    /// `cleanup_fraction` as a percentage.
    pub cleanup_percentage: f64,
    pub closed_connections: Vec<ClosedConnection>,
    pub cleanup_log_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CleanupOutcome {
    Skipped(SkippedCleanup),
    Executed(ExecutedCleanup),
}

impl CleanupOutcome {
    pub fn executed(&self) -> bool {
        matches!(self, CleanupOutcome::Executed(_))
    }

    pub fn connections_closed(&self) -> usize {
        match self {
            CleanupOutcome::Skipped(_) => 0,
            CleanupOutcome::Executed(e) => e.connections_closed,
        }
    }
}

/// Victims chosen by [`CleanupEngine::plan`], oldest activity first.
#[derive(Debug, Clone)]
pub struct CleanupPlan {
    pub taken_at: DateTime<Utc>,
    pub total_before: usize,
    pub inactive_count: usize,
    pub victims: Vec<ClosedConnection>,
}

#[derive(Debug, Clone)]
pub enum CleanupDecision {
    Skip(SkippedCleanup),
    Execute(CleanupPlan),
}

pub struct CleanupEngine {
    store: Arc<ConnectionStore>,
    tracker: Arc<SuspiciousTracker>,
    audit: Arc<AuditLog>,
    policy: CleanupPolicy,
    run_lock: Mutex<()>,
}

impl CleanupEngine {
    pub fn new(
        store: Arc<ConnectionStore>,
        tracker: Arc<SuspiciousTracker>,
        audit: Arc<AuditLog>,
        policy: CleanupPolicy,
    ) -> Self {
        Self {
            store,
            tracker,
            audit,
            policy,
            run_lock: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &CleanupPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<ConnectionStore> {
        &self.store
    }

    /// True while a run holds the run lock.
    pub fn is_running(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }

    /// Snapshot the store and decide. Mutates nothing.
    pub fn plan(&self) -> CleanupDecision {
        let taken_at = self.store.now();
        let snapshot = self.store.list_active();
        let total_before = snapshot.len();

        let mut inactive: Vec<Connection> = snapshot
            .into_iter()
            .filter(|c| c.is_inactive(taken_at, self.policy.inactivity_timeout_secs))
            .collect();
        let inactive_count = inactive.len();

        tracing::info!(
            "[cleanup] [scan] inactive={} total={} threshold={}",
            inactive_count,
            total_before,
            self.policy.max_inactive_threshold
        );

        if !self.policy.threshold_exceeded(inactive_count) {
            return CleanupDecision::Skip(SkippedCleanup {
                executed: false,
                reason: REASON_THRESHOLD_NOT_REACHED.to_string(),
                inactive_connections: inactive_count,
                threshold: self.policy.max_inactive_threshold,
            });
        }

        // Oldest activity first; insertion order breaks ties.
        inactive.sort_by(|a, b| {
            a.last_activity
                .cmp(&b.last_activity)
                .then_with(|| a.seq.cmp(&b.seq))
        });

        let victims = inactive
            .iter()
            .take(self.policy.victim_count(inactive_count))
            .map(|c| ClosedConnection {
                connection_id: c.id,
                client_ip: c.source_address.clone(),
                inactive_time: c.inactive_seconds(taken_at),
                is_webhook: c.is_webhook,
            })
            .collect();

        CleanupDecision::Execute(CleanupPlan {
            taken_at,
            total_before,
            inactive_count,
            victims,
        })
    }

    /// Close the planned victims, log the run and raise the alert.
    ///
    /// A victim that cannot be closed is logged and left out of the result.
    pub fn apply(&self, plan: CleanupPlan) -> ExecutedCleanup {
        tracing::warn!(
            "[cleanup] [triggered] closing={} inactive={}",
            plan.victims.len(),
            plan.inactive_count
        );

        let mut closed = Vec::with_capacity(plan.victims.len());
        for victim in plan.victims {
            if victim.is_webhook {
                self.tracker.record_webhook_from_address(&victim.client_ip);
            }

            match self.store.close_connection(victim.connection_id) {
                Ok(_) => {
                    tracing::debug!(
                        "[cleanup] [closed] conn={} ip={}",
                        victim.connection_id,
                        victim.client_ip
                    );
                    closed.push(victim);
                }
                Err(e) => {
                    tracing::error!(
                        "[cleanup] [close_failed] conn={} error={}",
                        victim.connection_id,
                        e
                    );
                }
            }
        }

        let (entry, audit_err) = self.audit.append(NewCleanupLogEntry {
            timestamp: self.store.now(),
            total_connections_before: plan.total_before,
            inactive_connections_found: plan.inactive_count,
            cleanup_reason: self.policy.reason(),
            connections_closed_list: closed,
        });
        if let Some(e) = audit_err {
            tracing::warn!("[cleanup] [audit_write_failed] log_id={} error={}", entry.id, e);
        }

        raise_alert(
            &entry,
            self.policy.cleanup_fraction,
            self.policy.max_inactive_threshold,
        );

        tracing::info!(
            "[cleanup] [executed] closed={} inactive={} log_id={}",
            entry.connections_closed,
            entry.inactive_connections_found,
            entry.id
        );

        ExecutedCleanup {
            executed: true,
            total_connections_before: entry.total_connections_before,
            inactive_connections_found: entry.inactive_connections_found,
            connections_closed: entry.connections_closed,
            cleanup_fraction: self.policy.cleanup_fraction,
            cleanup_percentage: self.policy.cleanup_fraction * 100.0,
            closed_connections: entry.connections_closed_list,
            cleanup_log_id: entry.id,
        }
    }

    /// Plan and apply. Caller must hold `run_lock`.
    fn run_locked(&self) -> CleanupOutcome {
        match self.plan() {
            CleanupDecision::Skip(skipped) => {
                tracing::info!(
                    "[cleanup] [skipped] inactive={} threshold={}",
                    skipped.inactive_connections,
                    skipped.threshold
                );
                CleanupOutcome::Skipped(skipped)
            }
            CleanupDecision::Execute(plan) => CleanupOutcome::Executed(self.apply(plan)),
        }
    }

    /// Run cleanup now, waiting for any run already in progress.
    pub async fn run_cleanup(&self) -> CleanupOutcome {
        let _guard = self.run_lock.lock().await;
        self.run_locked()
    }

    /// Start a run on its own task. If a run is already in progress this
    /// one is dropped and the task yields `None`.
    pub fn spawn_cleanup(self: &Arc<Self>) -> JoinHandle<Option<CleanupOutcome>> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let Ok(_guard) = engine.run_lock.try_lock() else {
                tracing::debug!("[cleanup] [busy] run already in progress, trigger dropped");
                return None;
            };
            Some(engine.run_locked())
        })
    }

    /// Trigger a background run whenever a tick finds the threshold exceeded.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // first tick completes immediately
            ticker.tick().await;
            tracing::info!("[cleanup] [sweeper_started] interval={}s", every.as_secs());

            loop {
                ticker.tick().await;
                let inactive = engine.store.count_inactive();
                if engine.policy.threshold_exceeded(inactive) {
                    tracing::warn!(
                        "[cleanup] [sweep_threshold] inactive={} threshold={}",
                        inactive,
                        engine.policy.max_inactive_threshold
                    );
                    drop(engine.spawn_cleanup());
                }
            }
        })
    }
}
