//! HTTP/WebSocket API layer.
//!
//! This module contains thin handlers that delegate to the core services.
//! It provides router construction, the shared [`AppState`], and server
//! startup for both the delivery surface and the ASR intake router.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::events::{BroadcastEventBridge, EventEmitter, StreamStatusPayload};
use crate::ingest::{FrameDistributor, TcpFrameReader};
use crate::pipeline::MediaPackager;
use crate::scheduler::{InferenceScheduler, QuestionRegistry};
use crate::state::Config;
use crate::store::SessionStore;

pub mod asr;
pub mod http;
pub mod response;
pub mod ws;
pub mod ws_connection;

pub use asr::{asr_router, start_asr_server};
pub use http::create_router;
pub use ws_connection::WsConnectionManager;

/// Errors that can occur when starting or running a server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared application state for the API layer.
///
/// A thin bundle of service references; all business logic lives in the
/// services themselves.
#[derive(Clone)]
pub struct AppState {
    /// Session-scoped record store.
    pub store: Arc<SessionStore>,
    /// Last-value frame slot.
    pub distributor: Arc<FrameDistributor>,
    /// The upstream TCP reader (for status reporting).
    pub reader: Arc<TcpFrameReader>,
    /// The media packager (for status reporting).
    pub packager: Arc<MediaPackager>,
    /// The inference scheduler.
    pub scheduler: Arc<InferenceScheduler>,
    /// The at-most-one user-question registry.
    pub questions: Arc<QuestionRegistry>,
    /// Event bridge feeding the WebSocket fan-out.
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// WebSocket connection registry.
    pub ws_manager: Arc<WsConnectionManager>,
    /// Configuration snapshot.
    pub config: Arc<Config>,
    /// Cooperative shutdown signal.
    pub cancel: CancellationToken,
}

impl AppState {
    /// Pushes the current streaming state to all clients.
    pub fn emit_stream_status(&self) {
        self.event_bridge.emit_stream_status(StreamStatusPayload {
            streaming: self.ws_manager.any_streaming(),
            clients: self.ws_manager.connection_count(),
            frame_count: self.reader.frames_read(),
        });
    }
}

/// Starts the delivery surface on the configured port and runs it to
/// completion.
///
/// Also spawns the two fan-out pumps (frames, events) that feed connected
/// WebSocket clients.
pub async fn start_server(state: AppState) -> Result<(), ServerError> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tokio::spawn(ws::frame_pump(state.clone()));
    tokio::spawn(ws::event_pump(state.clone()));

    log::info!("Server listening on http://0.0.0.0:{}", state.config.port);
    let app = http::create_router(state);
    axum::serve(listener, app).await?;
    Ok(())
}
