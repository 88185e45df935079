//! WebSocket handler and fan-out pumps for real-time client communication.
//!
//! Two long-lived pumps feed the per-connection send queues:
//!
//! - the frame pump mirrors the distributor into `video_frame` messages
//!   while at least one client has streaming enabled
//! - the event pump serializes every broadcast event once and fans it out
//!
//! Per-connection backpressure is handled by the send queue in
//! [`super::ws_connection`]: frames are shed first, results never.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use serde::Deserialize;

use crate::api::AppState;
use crate::events::{BroadcastEvent, ErrorPayload, EventEmitter, VideoFramePayload};

/// Incoming client command envelope.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsCommand {
    StartStream {
        #[serde(default)]
        #[allow(dead_code)]
        data: serde_json::Value,
    },
    StopStream {
        #[serde(default)]
        #[allow(dead_code)]
        data: serde_json::Value,
    },
}

pub(super) async fn ws_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let guard = state.ws_manager.register();
    let (mut sink, mut stream) = socket.split();

    state.emit_stream_status();

    // Writer: drains this connection's send queue into the socket.
    let queue = Arc::clone(guard.queue());
    let cancel = guard.cancel_token().clone();
    let writer = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                message = queue.pop() => message,
            };
            let Some(message) = message else { break };
            if sink
                .send(Message::Text(message.text.to_string().into()))
                .await
                .is_err()
            {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // Reader: applies client commands until the socket closes.
    loop {
        let message = tokio::select! {
            _ = guard.cancel_token().cancelled() => break,
            message = stream.next() => message,
        };
        let Some(Ok(message)) = message else { break };

        match message {
            Message::Text(text) => match serde_json::from_str::<WsCommand>(&text) {
                Ok(WsCommand::StartStream { .. }) => {
                    log::info!("[WS] {} started streaming", guard.id());
                    guard.set_streaming(true);
                    state.emit_stream_status();
                }
                Ok(WsCommand::StopStream { .. }) => {
                    log::info!("[WS] {} stopped streaming", guard.id());
                    guard.set_streaming(false);
                    state.emit_stream_status();
                }
                Err(err) => {
                    let event = BroadcastEvent::Error(ErrorPayload {
                        code: "invalid_request".to_string(),
                        message: format!("unrecognized command: {}", err),
                    });
                    if let Ok(text) = serde_json::to_string(&event.to_envelope()) {
                        guard.queue().push(super::ws_connection::QueuedMessage {
                            text: Arc::from(text.as_str()),
                            droppable: false,
                        });
                    }
                }
            },
            Message::Close(_) => break,
            // Pings are answered by axum automatically.
            _ => {}
        }
    }

    guard.queue().close();
    let _ = writer.await;
    drop(guard);
    state.emit_stream_status();
}

/// Mirrors the distributor into `video_frame` events while any client is
/// streaming. Runs until shutdown.
pub(super) async fn frame_pump(state: AppState) {
    let mut sub = state.distributor.subscribe();
    loop {
        let frame = tokio::select! {
            _ = state.cancel.cancelled() => break,
            frame = sub.changed() => frame,
        };
        let Some(frame) = frame else { break };

        if !state.ws_manager.any_streaming() {
            continue;
        }
        let (width, height) = match frame.dimensions {
            Some((w, h)) => (Some(w), Some(h)),
            None => (None, None),
        };
        state.event_bridge.emit_frame(VideoFramePayload {
            frame_number: frame.seq,
            timestamp: frame.timestamp_ms,
            width,
            height,
            data: BASE64.encode(&frame.data),
        });
    }
    log::debug!("[WS] Frame pump stopped");
}

/// Serializes broadcast events once and fans them out to all connections.
/// Runs until shutdown.
pub(super) async fn event_pump(state: AppState) {
    let mut rx = state.event_bridge.subscribe();
    loop {
        let event = tokio::select! {
            _ = state.cancel.cancelled() => break,
            event = rx.recv() => event,
        };
        match event {
            Ok(event) => {
                let droppable = event.is_droppable();
                match serde_json::to_string(&event.to_envelope()) {
                    Ok(text) => state.ws_manager.broadcast(Arc::from(text.as_str()), droppable),
                    Err(err) => log::warn!("[WS] Failed to serialize event: {}", err),
                }
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                log::warn!("[WS] Event pump lagged by {} events", n);
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
    log::debug!("[WS] Event pump stopped");
}
