//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to the store, scheduler, and
//! question registry. Media playback supports byte-range requests for UI
//! scrubbing.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::response::{api_data, api_ok};
use crate::api::ws::ws_handler;
use crate::api::AppState;
use crate::error::{VigilError, VigilResult};
use crate::protocol_constants::APP_NAME;

/// Builds the delivery-surface router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        // REST over the store
        .route("/api/status", get(get_status))
        .route("/api/experiment-log", get(get_experiment_log))
        .route("/api/inference-history", get(get_inference_history))
        .route("/api/latest-inference", get(get_latest_inference))
        .route("/api/latest-inference-with-ai", get(get_latest_inference_with_ai))
        .route("/api/inference-count", get(get_inference_count))
        .route("/api/media-history", get(get_media_history))
        .route("/api/videos/{filename}", get(serve_media))
        .route("/api/media/{filename}", get(serve_media))
        .route("/api/stream/start", post(start_stream))
        .route("/api/stream/stop", post(stop_stream))
        .route("/api/history", delete(clear_history))
        .route("/api/sentry/status", get(sentry_status))
        .route("/api/sentry/toggle", post(sentry_toggle))
        // Internal endpoints for out-of-process packagers
        .route("/internal/video/latest-frame", get(internal_latest_frame))
        .route("/internal/video/status", get(internal_video_status))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Deserialize)]
struct LimitQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    50
}

// ─────────────────────────────────────────────────────────────────────────────
// Status
// ─────────────────────────────────────────────────────────────────────────────

async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    api_data(json!({
        "app": APP_NAME,
        "session_id": state.store.session_id(),
        "uptime_secs": state.store.uptime_secs(),
        "reader": {
            "state": state.reader.state().as_str(),
            "frames_read": state.reader.frames_read(),
            "protocol_errors": state.reader.protocol_errors(),
            "decode_errors": state.reader.decode_errors(),
        },
        "packager": {
            "artifacts_packaged": state.packager.artifacts_packaged(),
            "batches_discarded": state.packager.batches_discarded(),
            "frames_dropped": state.packager.frames_dropped(),
        },
        "scheduler": state.scheduler.snapshot(),
        "clients": state.ws_manager.connection_count(),
        "streaming": state.ws_manager.any_streaming(),
        "inference_count": state.store.inference_count(),
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Store Queries
// ─────────────────────────────────────────────────────────────────────────────

async fn get_experiment_log(State(state): State<AppState>) -> impl IntoResponse {
    api_data(state.store.experiment_log())
}

async fn get_inference_history(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    api_data(state.store.history(query.limit))
}

async fn get_latest_inference(State(state): State<AppState>) -> impl IntoResponse {
    api_data(state.store.latest_inference())
}

async fn get_latest_inference_with_ai(State(state): State<AppState>) -> impl IntoResponse {
    api_data(state.store.latest_inference_with_ai())
}

async fn get_inference_count(State(state): State<AppState>) -> impl IntoResponse {
    api_data(json!({ "count": state.store.inference_count() }))
}

async fn get_media_history(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    api_data(state.store.media_history(query.limit))
}

async fn clear_history(State(state): State<AppState>) -> impl IntoResponse {
    let cleared = state.store.clear_history();
    log::info!("[API] History cleared ({} records)", cleared);
    api_data(json!({ "cleared": cleared }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Streaming Control
// ─────────────────────────────────────────────────────────────────────────────

async fn start_stream(State(state): State<AppState>) -> impl IntoResponse {
    state.ws_manager.set_all_streaming(true);
    state.emit_stream_status();
    api_ok()
}

async fn stop_stream(State(state): State<AppState>) -> impl IntoResponse {
    state.ws_manager.set_all_streaming(false);
    state.emit_stream_status();
    api_ok()
}

// ─────────────────────────────────────────────────────────────────────────────
// Sentry Mode
// ─────────────────────────────────────────────────────────────────────────────

async fn sentry_status(State(state): State<AppState>) -> impl IntoResponse {
    api_data(json!({ "enabled": state.scheduler.sentry_enabled() }))
}

async fn sentry_toggle(State(state): State<AppState>) -> impl IntoResponse {
    let enabled = state.scheduler.toggle_sentry();
    log::info!("[API] Sentry mode toggled to {}", enabled);
    api_data(json!({ "enabled": enabled }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Media Playback
// ─────────────────────────────────────────────────────────────────────────────

/// An inclusive byte range resolved against a file length.
fn parse_range(header: &str, len: u64) -> Option<(u64, u64)> {
    let spec = header.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    if len == 0 {
        return None;
    }

    if start.is_empty() {
        // Suffix form: last N bytes.
        let suffix: u64 = end.parse().ok()?;
        if suffix == 0 {
            return None;
        }
        return Some((len.saturating_sub(suffix), len - 1));
    }

    let start: u64 = start.parse().ok()?;
    if start >= len {
        return None;
    }
    let end: u64 = if end.is_empty() {
        len - 1
    } else {
        end.parse::<u64>().ok()?.min(len - 1)
    };
    (start <= end).then_some((start, end))
}

fn content_type_for(path: &std::path::Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("mp4") => "video/mp4",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

async fn serve_media(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    headers: HeaderMap,
) -> VigilResult<Response> {
    let path = state
        .store
        .media_path(&filename)
        .ok_or_else(|| VigilError::MediaNotFound(filename.clone()))?;

    let mut file = tokio::fs::File::open(&path)
        .await
        .map_err(|_| VigilError::MediaNotFound(filename.clone()))?;
    let len = file
        .metadata()
        .await
        .map_err(|e| VigilError::Store(e.to_string()))?
        .len();

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| parse_range(h, len));

    let content_type = content_type_for(&path);
    match range {
        Some((start, end)) => {
            file.seek(std::io::SeekFrom::Start(start))
                .await
                .map_err(|e| VigilError::Store(e.to_string()))?;
            let mut buf = vec![0u8; (end - start + 1) as usize];
            file.read_exact(&mut buf)
                .await
                .map_err(|e| VigilError::Store(e.to_string()))?;

            Response::builder()
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::ACCEPT_RANGES, "bytes")
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {}-{}/{}", start, end, len),
                )
                .body(Body::from(buf))
                .map_err(|e| VigilError::Internal(e.to_string()))
        }
        None => {
            let mut buf = Vec::with_capacity(len as usize);
            file.read_to_end(&mut buf)
                .await
                .map_err(|e| VigilError::Store(e.to_string()))?;

            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::ACCEPT_RANGES, "bytes")
                .body(Body::from(buf))
                .map_err(|e| VigilError::Internal(e.to_string()))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal Endpoints
// ─────────────────────────────────────────────────────────────────────────────

/// Exposes the distributor's latest slot so an out-of-process packager does
/// not need a second TCP client to the camera.
async fn internal_latest_frame(State(state): State<AppState>) -> Response {
    match state.distributor.latest() {
        Some(frame) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "image/jpeg")
            .header("x-frame-number", frame.seq.to_string())
            .header("x-frame-timestamp", frame.timestamp_ms.to_string())
            .body(Body::from(frame.data.clone()))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "error": "no frame yet" })),
        )
            .into_response(),
    }
}

async fn internal_video_status(State(state): State<AppState>) -> impl IntoResponse {
    api_data(json!({
        "reader_state": state.reader.state().as_str(),
        "frames_read": state.reader.frames_read(),
        "has_frame": state.distributor.latest().is_some(),
    }))
}
