//! Connection tracking middleware.
//!
//! Runs the activity recorder for every routed request and attaches the
//! resulting [`RecordedActivity`] to the request extensions.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use super::AppState;
use crate::network::resolve_client_ip;
use crate::recorder::RecordedActivity;

pub const FORWARDED_FOR: &str = "x-forwarded-for";

pub async fn track_activity(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let source_address = {
        let forwarded = request
            .headers()
            .get(FORWARDED_FOR)
            .and_then(|v| v.to_str().ok());
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        resolve_client_ip(forwarded, peer)
    };

    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let activity: RecordedActivity =
        state.recorder.record(&source_address, &user_agent, request.uri().path());
    request.extensions_mut().insert(activity);

    next.run(request).await
}
