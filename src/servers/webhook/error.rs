//! Error responses for the HTTP surface.

use std::any::Any;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    MalformedRequestBody(#[from] serde_json::Error),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    status: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!("[http] [error] {}", self);
        error_response(self.to_string())
    }
}

fn error_response(message: String) -> Response {
    let body = ErrorBody {
        status: "error",
        message,
    };
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

/// Render a caught handler panic the same way as an [`ApiError`].
pub fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "Unknown panic in request handler".to_string()
    };

    tracing::error!("[http] [panic] {}", message);
    error_response(message)
}
