//! Webhook HTTP server
//!
//! Every routed request passes through [`middleware::track_activity`] before
//! its handler runs, so the connection record exists by the time the
//! handler sees the request.

pub mod error;
pub mod handlers;
pub mod middleware;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::catch_panic::CatchPanicLayer;

use crate::cleanup::{AuditLog, CleanupEngine, CleanupPolicy};
use crate::clock::{system_clock, SharedClock};
use crate::config::ServerConfig;
use crate::network::SuspiciousTracker;
use crate::recorder::ActivityRecorder;
use crate::tracking::ConnectionStore;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: Arc<ConnectionStore>,
    pub tracker: Arc<SuspiciousTracker>,
    pub audit: Arc<AuditLog>,
    pub engine: Arc<CleanupEngine>,
    pub recorder: ActivityRecorder,
    pub clock: SharedClock,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Result<Self> {
        Self::with_clock(config, system_clock())
    }

    /// Build the state on an explicit clock. Opens the audit file when one
    /// is configured.
    pub fn with_clock(config: ServerConfig, clock: SharedClock) -> Result<Self> {
        let store = Arc::new(ConnectionStore::with_shards(
            clock.clone(),
            config.inactivity_timeout_secs,
            config.store_shards,
        ));
        let tracker = Arc::new(SuspiciousTracker::new(clock.clone()));

        let audit = match &config.audit_log_path {
            Some(path) => Arc::new(
                AuditLog::with_file(path)
                    .with_context(|| format!("Cannot open audit log: {}", path))?,
            ),
            None => Arc::new(AuditLog::new()),
        };

        let engine = Arc::new(CleanupEngine::new(
            store.clone(),
            tracker.clone(),
            audit.clone(),
            CleanupPolicy::from(&config),
        ));
        let recorder = ActivityRecorder::new(store.clone(), tracker.clone());

        Ok(Self {
            config: Arc::new(config),
            store,
            tracker,
            audit,
            engine,
            recorder,
            clock,
        })
    }
}

pub fn create_router(state: AppState) -> Router {
    let router = Router::new()
        .route(
            "/api/webhook/",
            get(handlers::webhook_status).post(handlers::receive_webhook),
        )
        .route(
            "/api/webhook/long/",
            get(handlers::long_webhook_status).post(handlers::long_webhook),
        )
        .route("/api/connections/status/", get(handlers::connection_status))
        .route("/api/connections/cleanup/", post(handlers::manual_cleanup))
        .route("/api/system/stats/", get(handlers::system_stats))
        .route("/api/health/", get(handlers::health_check))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::track_activity,
        ));

    catch_panics(router).with_state(state)
}

/// Outermost layer: a panic anywhere below becomes a 500 `{status, message}`.
pub fn catch_panics<S>(router: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(CatchPanicLayer::custom(error::panic_response))
}

/// Bind, serve until Ctrl-C, then drain in-flight requests.
pub async fn run(state: AppState) -> Result<()> {
    let bind = state.config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Cannot bind: {}", bind))?;

    let sweeper = match state.config.sweep_interval_secs {
        0 => None,
        secs => Some(state.engine.spawn_sweeper(Duration::from_secs(secs))),
    };

    tracing::info!(
        "[server] [listening] addr={} timeout={}s threshold={} fraction={}",
        bind,
        state.config.inactivity_timeout_secs,
        state.config.max_inactive_threshold,
        state.config.cleanup_fraction
    );

    let app = create_router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    if let Some(handle) = sweeper {
        handle.abort();
    }
    tracing::info!("[server] [stopped]");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("[server] [signal_error] {}", e);
        return;
    }
    tracing::info!("[server] [shutdown] Ctrl-C received");
}
