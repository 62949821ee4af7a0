//! Activity recorder
//!
//! Classifies each inbound request and writes it to the connection store
//! (and, for webhooks, the suspicious-actor tracker).

use std::sync::Arc;

use crate::network::SuspiciousTracker;
use crate::tracking::{ConnectionId, ConnectionStore};

/// Any path mentioning "webhook", case-insensitively.
pub fn is_webhook_path(path: &str) -> bool {
    path.to_ascii_lowercase().contains("webhook")
}

/// What the recorder did for one request. Attached to the request so
/// handlers can echo the connection id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedActivity {
    pub connection_id: ConnectionId,
    pub is_webhook: bool,
    pub source_address: String,
}

#[derive(Clone)]
pub struct ActivityRecorder {
    store: Arc<ConnectionStore>,
    tracker: Arc<SuspiciousTracker>,
}

impl ActivityRecorder {
    pub fn new(store: Arc<ConnectionStore>, tracker: Arc<SuspiciousTracker>) -> Self {
        Self { store, tracker }
    }

    pub fn record(&self, source_address: &str, user_agent: &str, path: &str) -> RecordedActivity {
        let is_webhook = is_webhook_path(path);

        let conn = if is_webhook {
            let conn = self
                .store
                .record_webhook_activity(source_address, user_agent, path);
            self.tracker.record_webhook_from_address(source_address);
            tracing::info!(
                "[recorder] [webhook_connection] conn={} ip={} endpoint={}",
                conn.id,
                source_address,
                path
            );
            conn
        } else {
            self.store.record_plain_activity(source_address, user_agent)
        };

        tracing::debug!(
            "[recorder] [activity] ip={} webhook={} conn={}",
            source_address,
            is_webhook,
            conn.id
        );

        RecordedActivity {
            connection_id: conn.id,
            is_webhook,
            source_address: source_address.to_string(),
        }
    }
}
