//! Route handlers.

use std::time::Duration;

use axum::{body::Bytes, extract::State, Extension, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::error::ApiError;
use super::AppState;
use crate::cleanup::CleanupOutcome;
use crate::recorder::RecordedActivity;
use crate::tracking::ConnectionId;

pub const SERVICE_NAME: &str = "connwatch";

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub timestamp: DateTime<Utc>,
    pub connection_id: ConnectionId,
    pub data_received: Value,
}

#[derive(Debug, Serialize)]
pub struct EndpointStatus {
    pub status: &'static str,
    pub message: &'static str,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct LongWebhookResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub duration: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct Message {
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ConnectionStatusResponse {
    pub total_active_connections: usize,
    pub inactive_connections: usize,
    pub webhook_connections: usize,
    pub threshold_reached: bool,
    pub cleanup_needed: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ManualCleanupResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub result: CleanupOutcome,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ConnectionStats {
    pub total_active: usize,
    pub inactive_count: usize,
    pub webhook_connections: usize,
    pub max_allowed: usize,
    pub cleanup_threshold_reached: bool,
}

#[derive(Debug, Serialize)]
pub struct CleanupHistoryItem {
    pub timestamp: DateTime<Utc>,
    pub connections_closed: usize,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct SuspiciousIpItem {
    pub ip: String,
    pub connection_count: u64,
    pub backup_count: u64,
    pub is_blocked: bool,
}

#[derive(Debug, Serialize)]
pub struct MirrorStatus {
    pub enabled: bool,
    pub backup_synchronized: bool,
}

#[derive(Debug, Serialize)]
pub struct SystemStatsResponse {
    pub connections: ConnectionStats,
    pub cleanup_history: Vec<CleanupHistoryItem>,
    pub suspicious_ips: Vec<SuspiciousIpItem>,
    pub raid1_status: MirrorStatus,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub timestamp: DateTime<Utc>,
    pub version: &'static str,
}

/// POST /api/webhook/
pub async fn receive_webhook(
    State(state): State<AppState>,
    Extension(activity): Extension<RecordedActivity>,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let data: Value = if body.is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_slice(&body)?
    };

    tracing::info!(
        "[webhook] [received] ip={} conn={} bytes={}",
        activity.source_address,
        activity.connection_id,
        body.len()
    );

    // simulated processing keeps the connection open
    tokio::time::sleep(Duration::from_millis(state.config.webhook_processing_ms)).await;

    Ok(Json(WebhookResponse {
        status: "success",
        message: "Webhook processed successfully",
        timestamp: state.clock.now(),
        connection_id: activity.connection_id,
        data_received: data,
    }))
}

/// GET /api/webhook/
pub async fn webhook_status(State(state): State<AppState>) -> Json<EndpointStatus> {
    Json(EndpointStatus {
        status: "active",
        message: "Webhook endpoint active",
        timestamp: state.clock.now(),
    })
}

/// POST /api/webhook/long/
///
/// Dropping the request future (client gone, server shutting down) cancels
/// the wait.
pub async fn long_webhook(
    State(state): State<AppState>,
    Extension(activity): Extension<RecordedActivity>,
) -> Json<LongWebhookResponse> {
    let secs = state.config.long_webhook_secs;
    tracing::info!(
        "[webhook] [long_started] ip={} conn={} secs={}",
        activity.source_address,
        activity.connection_id,
        secs
    );

    tokio::time::sleep(Duration::from_secs(secs)).await;

    Json(LongWebhookResponse {
        status: "completed",
        message: "Long processing completed",
        duration: format!("{} segundos", secs),
        timestamp: state.clock.now(),
    })
}

/// GET /api/webhook/long/
pub async fn long_webhook_status() -> Json<Message> {
    Json(Message {
        message: "Long webhook endpoint active",
    })
}

/// GET /api/connections/status/
///
/// Reports the counts as seen before any cleanup; a cleanup it triggers runs
/// on its own task.
pub async fn connection_status(State(state): State<AppState>) -> Json<ConnectionStatusResponse> {
    let summary = state.store.summary();
    let reached = state.engine.policy().threshold_exceeded(summary.inactive);

    if reached {
        tracing::warn!(
            "[status] [threshold_reached] inactive={} threshold={}",
            summary.inactive,
            state.engine.policy().max_inactive_threshold
        );
        drop(state.engine.spawn_cleanup());
    }

    Json(ConnectionStatusResponse {
        total_active_connections: summary.total_active,
        inactive_connections: summary.inactive,
        webhook_connections: summary.webhook,
        threshold_reached: reached,
        cleanup_needed: reached,
        timestamp: state.clock.now(),
    })
}

/// POST /api/connections/cleanup/
pub async fn manual_cleanup(State(state): State<AppState>) -> Json<ManualCleanupResponse> {
    let result = state.engine.run_cleanup().await;

    Json(ManualCleanupResponse {
        status: "success",
        message: "Cleanup executed",
        result,
        timestamp: state.clock.now(),
    })
}

/// GET /api/system/stats/
pub async fn system_stats(State(state): State<AppState>) -> Json<SystemStatsResponse> {
    let summary = state.store.summary();
    let policy = state.engine.policy();

    let cleanup_history = state
        .audit
        .recent(state.config.cleanup_history_limit)
        .into_iter()
        .map(|entry| CleanupHistoryItem {
            timestamp: entry.timestamp,
            connections_closed: entry.connections_closed,
            reason: entry.cleanup_reason,
        })
        .collect();

    let frequent = state.tracker.list_frequent(state.config.suspicious_min_count);
    let backup_synchronized = frequent.iter().all(|a| a.is_mirrored());
    let suspicious_ips = frequent
        .into_iter()
        .map(|a| SuspiciousIpItem {
            ip: a.address,
            connection_count: a.count,
            backup_count: a.backup_count,
            is_blocked: a.is_blocked,
        })
        .collect();

    Json(SystemStatsResponse {
        connections: ConnectionStats {
            total_active: summary.total_active,
            inactive_count: summary.inactive,
            webhook_connections: summary.webhook,
            max_allowed: policy.max_inactive_threshold,
            cleanup_threshold_reached: policy.threshold_exceeded(summary.inactive),
        },
        cleanup_history,
        suspicious_ips,
        raid1_status: MirrorStatus {
            enabled: true,
            backup_synchronized,
        },
    })
}

/// GET /api/health/
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: SERVICE_NAME,
        timestamp: state.clock.now(),
        version: env!("CARGO_PKG_VERSION"),
    })
}
