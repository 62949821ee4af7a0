//! Connection records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Process-unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Active,
    /// Terminal. Only the cleanup engine moves a record here.
    Closed,
}

/// One tracked request-session.
///
/// Every field except `last_activity` and `status` is fixed at creation.
/// `last_activity` only moves for reused (non-webhook) records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    /// Store-wide insertion sequence, the tie-break when activity times collide.
    pub seq: u64,
    pub source_address: String,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub is_webhook: bool,
    /// Webhook path, empty for plain connections.
    pub endpoint: String,
    pub status: ConnectionStatus,
}

impl Connection {
    pub(crate) fn new(
        seq: u64,
        source_address: &str,
        user_agent: &str,
        endpoint: Option<&str>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ConnectionId::new(),
            seq,
            source_address: source_address.to_string(),
            user_agent: user_agent.to_string(),
            created_at: now,
            last_activity: now,
            is_webhook: endpoint.is_some(),
            endpoint: endpoint.unwrap_or_default().to_string(),
            status: ConnectionStatus::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ConnectionStatus::Active
    }

    /// Seconds since the last recorded activity, never negative.
    pub fn inactive_seconds(&self, now: DateTime<Utc>) -> f64 {
        let elapsed = now.signed_duration_since(self.last_activity);
        (elapsed.num_milliseconds() as f64 / 1000.0).max(0.0)
    }

    /// `now - last_activity > timeout`. Computed on demand, never stored.
    ///
    /// A timeout too large for a `TimeDelta` can never elapse.
    pub fn is_inactive(&self, now: DateTime<Utc>, timeout_secs: u64) -> bool {
        let Some(timeout) = i64::try_from(timeout_secs)
            .ok()
            .and_then(chrono::TimeDelta::try_seconds)
        else {
            return false;
        };
        now.signed_duration_since(self.last_activity) > timeout
    }

    /// Refresh activity; the timestamp never moves backwards.
    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_activity {
            self.last_activity = now;
        }
    }
}
