//! Event system for real-time client communication.
//!
//! This module provides:
//! - [`EventEmitter`] trait for domain services to emit events
//! - Event payload types for frames, inference results, and status
//! - The `{type, data, timestamp}` envelope used on the WebSocket wire
//!
//! The actual transport implementation (WebSocket fan-out) is handled
//! separately in the `api` module using [`BroadcastEventBridge`].

mod bridge;
mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

use crate::store::records::InferenceRecord;
use crate::utils::now_millis;

/// One live frame pushed to streaming clients.
#[derive(Debug, Clone, Serialize)]
pub struct VideoFramePayload {
    /// Monotonic frame sequence number.
    pub frame_number: u64,
    /// Wall-clock capture time (Unix milliseconds).
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Base64-encoded JPEG bytes.
    pub data: String,
}

/// Scheduling / ingress status change.
#[derive(Debug, Clone, Serialize)]
pub struct StatusUpdatePayload {
    /// Component that changed: `reader`, `packager`, `scheduler`.
    pub component: String,
    /// New state, e.g. `up`, `down`, `terminal`, `dispatched`.
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StatusUpdatePayload {
    pub fn new(component: &str, state: &str) -> Self {
        Self {
            component: component.to_string(),
            state: state.to_string(),
            detail: None,
        }
    }

    pub fn with_detail(component: &str, state: &str, detail: impl Into<String>) -> Self {
        Self {
            component: component.to_string(),
            state: state.to_string(),
            detail: Some(detail.into()),
        }
    }
}

/// Live-view streaming state.
#[derive(Debug, Clone, Serialize)]
pub struct StreamStatusPayload {
    /// Whether any connected client has streaming enabled.
    pub streaming: bool,
    /// Number of connected WebSocket clients.
    pub clients: usize,
    /// Frames ingested so far this session.
    pub frame_count: u64,
}

/// Diagnostic pushed to clients on recoverable failures.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    /// Stable error kind from the crate error taxonomy.
    pub code: String,
    pub message: String,
}

/// Events broadcast to WebSocket clients.
#[derive(Debug, Clone)]
pub enum BroadcastEvent {
    VideoFrame(VideoFramePayload),
    InferenceResult(Box<InferenceRecord>),
    StatusUpdate(StatusUpdatePayload),
    StreamStatus(StreamStatusPayload),
    Error(ErrorPayload),
}

impl BroadcastEvent {
    /// Wire message type for the envelope.
    #[must_use]
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::VideoFrame(_) => "video_frame",
            Self::InferenceResult(_) => "inference_result",
            Self::StatusUpdate(_) => "status_update",
            Self::StreamStatus(_) => "stream_status",
            Self::Error(_) => "error",
        }
    }

    /// True for lossy messages that may be shed under backpressure.
    /// `inference_result` messages are never dropped.
    #[must_use]
    pub fn is_droppable(&self) -> bool {
        matches!(self, Self::VideoFrame(_))
    }

    /// Wraps the event in the `{type, data, timestamp}` wire envelope.
    #[must_use]
    pub fn to_envelope(&self) -> WsEnvelope {
        let data = match self {
            Self::VideoFrame(p) => serde_json::to_value(p),
            Self::InferenceResult(r) => serde_json::to_value(r),
            Self::StatusUpdate(p) => serde_json::to_value(p),
            Self::StreamStatus(p) => serde_json::to_value(p),
            Self::Error(p) => serde_json::to_value(p),
        }
        .unwrap_or(serde_json::Value::Null);

        WsEnvelope {
            message_type: self.message_type().to_string(),
            data,
            timestamp: now_millis(),
        }
    }
}

/// The `{type, data, timestamp}` JSON envelope framing every WS message.
#[derive(Debug, Clone, Serialize)]
pub struct WsEnvelope {
    #[serde(rename = "type")]
    pub message_type: String,
    pub data: serde_json::Value,
    pub timestamp: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_wire_type() {
        let event = BroadcastEvent::Error(ErrorPayload {
            code: "encode_error".to_string(),
            message: "batch dropped".to_string(),
        });
        let envelope = event.to_envelope();
        assert_eq!(envelope.message_type, "error");
        assert!(envelope.timestamp > 0);

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["data"]["code"], "encode_error");
    }

    #[test]
    fn only_video_frames_are_droppable() {
        let frame = BroadcastEvent::VideoFrame(VideoFramePayload {
            frame_number: 1,
            timestamp: 1,
            width: None,
            height: None,
            data: String::new(),
        });
        assert!(frame.is_droppable());

        let status = BroadcastEvent::StatusUpdate(StatusUpdatePayload::new("reader", "up"));
        assert!(!status.is_droppable());
    }
}
