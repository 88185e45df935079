//! Centralized error types for the Vigil core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses
//!
//! Every recoverable failure carries a stable machine-readable kind so the
//! delivery surface can report it without string matching.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

// ─────────────────────────────────────────────────────────────────────────────
// Subsystem Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised by the TCP frame reader.
#[derive(Debug, Error)]
pub enum ReaderError {
    /// Could not establish the upstream TCP connection.
    #[error("connect to {endpoint} failed: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// Connect attempt exceeded the configured timeout.
    #[error("connect to {0} timed out")]
    ConnectTimeout(String),

    /// Retry budget exhausted; the reader is down until externally restarted.
    #[error("connect retry budget exhausted after {attempts} attempts")]
    RetryBudgetExhausted { attempts: u32 },

    /// Malformed stream header or record framing.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Read failure on an established connection.
    #[error("read failed: {0}")]
    Read(#[from] std::io::Error),
}

impl ErrorCode for ReaderError {
    fn code(&self) -> &'static str {
        match self {
            Self::Connect { .. } | Self::ConnectTimeout(_) => "connect_error",
            Self::RetryBudgetExhausted { .. } => "connect_budget_exhausted",
            Self::Protocol(_) => "protocol_error",
            Self::Read(_) => "read_error",
        }
    }
}

/// Errors raised while producing a media artifact.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// JPEG decode of an upstream frame failed.
    #[error("frame decode failed: {0}")]
    Decode(#[from] image::ImageError),

    /// ffmpeg exited with a failure status.
    #[error("ffmpeg failed with status {status}: {stderr}")]
    Ffmpeg { status: i32, stderr: String },

    /// ffmpeg could not be launched.
    #[error("failed to launch ffmpeg: {0}")]
    Spawn(std::io::Error),

    /// Filesystem error while staging frames.
    #[error("encode io error: {0}")]
    Io(std::io::Error),

    /// The batch closed without any usable frames.
    #[error("empty batch, nothing to encode")]
    EmptyBatch,
}

impl ErrorCode for EncodeError {
    fn code(&self) -> &'static str {
        "encode_error"
    }
}

/// Errors raised by the VLM client.
#[derive(Debug, Error)]
pub enum VlmError {
    /// Network or 5xx failure against the VLM endpoint. Retryable by caller.
    #[error("vlm request failed: {0}")]
    Transient(String),

    /// The per-call deadline elapsed.
    #[error("vlm request timed out after {0} seconds")]
    Timeout(u64),

    /// The response body could not be parsed as a chat completion.
    #[error("vlm response malformed: {0}")]
    Parse(String),
}

impl ErrorCode for VlmError {
    fn code(&self) -> &'static str {
        match self {
            Self::Transient(_) => "inference_transient_error",
            Self::Timeout(_) => "inference_timeout",
            Self::Parse(_) => "inference_parse_error",
        }
    }
}

impl From<reqwest::Error> for VlmError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transient(err.to_string())
    }
}

/// Errors raised by the result store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem write or rename failed.
    #[error("store io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Record serialization failed.
    #[error("record serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ErrorCode for StoreError {
    fn code(&self) -> &'static str {
        "store_error"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Application Error
// ─────────────────────────────────────────────────────────────────────────────

/// Application-wide error type for the Vigil server.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum VigilError {
    /// Invalid or missing configuration at startup. Fatal.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Upstream TCP or outbound HTTP socket could not be established.
    #[error("Connect error: {0}")]
    Connect(String),

    /// Malformed frame header/length on the TCP stream.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Failure to produce an MP4/JPEG artifact.
    #[error("Encode error: {0}")]
    Encode(String),

    /// Network / 5xx / timeout against the VLM.
    #[error("Inference failed: {0}")]
    InferenceTransient(String),

    /// Malformed JSON in the VLM response.
    #[error("Inference response unparseable: {0}")]
    InferenceParse(String),

    /// Filesystem write failed in the result store.
    #[error("Store error: {0}")]
    Store(String),

    /// MCP control bridge call failed.
    #[error("Control bridge error: {0}")]
    ControlBridge(String),

    /// Requested media file does not exist in the session.
    #[error("Media not found: {0}")]
    MediaNotFound(String),

    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl VigilError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "config_error",
            Self::Connect(_) => "connect_error",
            Self::Protocol(_) => "protocol_error",
            Self::Encode(_) => "encode_error",
            Self::InferenceTransient(_) => "inference_transient_error",
            Self::InferenceParse(_) => "inference_parse_error",
            Self::Store(_) => "store_error",
            Self::ControlBridge(_) => "control_bridge_error",
            Self::MediaNotFound(_) => "media_not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MediaNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type VigilResult<T> = Result<T, VigilError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for VigilError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<ReaderError> for VigilError {
    fn from(err: ReaderError) -> Self {
        match &err {
            ReaderError::Protocol(_) => Self::Protocol(err.to_string()),
            _ => Self::Connect(err.to_string()),
        }
    }
}

impl From<EncodeError> for VigilError {
    fn from(err: EncodeError) -> Self {
        Self::Encode(err.to_string())
    }
}

impl From<VlmError> for VigilError {
    fn from(err: VlmError) -> Self {
        match &err {
            VlmError::Parse(_) => Self::InferenceParse(err.to_string()),
            _ => Self::InferenceTransient(err.to_string()),
        }
    }
}

impl From<StoreError> for VigilError {
    fn from(err: StoreError) -> Self {
        Self::Store(err.to_string())
    }
}
