//! Bridge implementation that maps domain events to broadcast transport.
//!
//! The [`BroadcastEventBridge`] lives at the boundary between domain services
//! and transport concerns, mapping typed domain events to the broadcast
//! channel the WebSocket fan-out pump subscribes to.

use tokio::sync::broadcast;

use super::emitter::EventEmitter;
use super::{
    BroadcastEvent, ErrorPayload, StatusUpdatePayload, StreamStatusPayload, VideoFramePayload,
};
use crate::store::records::InferenceRecord;

/// Bridges domain events to the WebSocket broadcast channel.
///
/// Implements [`EventEmitter`] by forwarding events to a
/// `tokio::sync::broadcast` channel. Sending to a channel with no receivers
/// is not an error; events are simply discarded until a client connects.
#[derive(Clone)]
pub struct BroadcastEventBridge {
    tx: broadcast::Sender<BroadcastEvent>,
}

impl BroadcastEventBridge {
    /// Creates a new bridge with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Creates a new bridge wrapping an existing broadcast sender.
    pub fn with_sender(tx: broadcast::Sender<BroadcastEvent>) -> Self {
        Self { tx }
    }

    /// Returns a new receiver for the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.tx.subscribe()
    }

    /// Returns a reference to the broadcast sender.
    pub fn sender(&self) -> &broadcast::Sender<BroadcastEvent> {
        &self.tx
    }

    fn send(&self, event: BroadcastEvent) {
        if let Err(e) = self.tx.send(event) {
            log::trace!("[EventBridge] No broadcast receivers: {}", e);
        }
    }
}

impl EventEmitter for BroadcastEventBridge {
    fn emit_frame(&self, frame: VideoFramePayload) {
        self.send(BroadcastEvent::VideoFrame(frame));
    }

    fn emit_inference(&self, record: InferenceRecord) {
        self.send(BroadcastEvent::InferenceResult(Box::new(record)));
    }

    fn emit_status(&self, status: StatusUpdatePayload) {
        self.send(BroadcastEvent::StatusUpdate(status));
    }

    fn emit_stream_status(&self, status: StreamStatusPayload) {
        self.send(BroadcastEvent::StreamStatus(status));
    }

    fn emit_error(&self, error: ErrorPayload) {
        self.send(BroadcastEvent::Error(error));
    }
}
