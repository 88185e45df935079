//! HTTP response helper functions for consistent API responses.
//!
//! Every REST response is `{success, data?, error?, timestamp}`.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use serde_json::json;

use crate::utils::now_millis;

/// Success response with a JSON payload.
pub fn api_data<T: Serialize>(data: T) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "data": data,
            "timestamp": now_millis(),
        })),
    )
}

/// Bare success response.
pub fn api_ok() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "timestamp": now_millis(),
        })),
    )
}

/// Error response with a message.
pub fn api_error(status: StatusCode, message: impl std::fmt::Display) -> impl IntoResponse {
    (
        status,
        Json(json!({
            "success": false,
            "error": message.to_string(),
            "timestamp": now_millis(),
        })),
    )
}
