//! Event emitter abstraction for decoupling services from transport.
//!
//! Services depend on the [`EventEmitter`] trait rather than concrete
//! broadcast channels, enabling testing and alternative transports.

use super::{ErrorPayload, StatusUpdatePayload, StreamStatusPayload, VideoFramePayload};
use crate::store::records::InferenceRecord;

/// Trait for emitting domain events without knowledge of transport.
pub trait EventEmitter: Send + Sync {
    /// Emits a live video frame for streaming clients.
    fn emit_frame(&self, frame: VideoFramePayload);

    /// Emits a finalized inference record.
    fn emit_inference(&self, record: InferenceRecord);

    /// Emits a scheduling or ingress status change.
    fn emit_status(&self, status: StatusUpdatePayload);

    /// Emits a live-view streaming state change.
    fn emit_stream_status(&self, status: StreamStatusPayload);

    /// Emits a recoverable-error diagnostic.
    fn emit_error(&self, error: ErrorPayload);
}

/// No-op emitter for tests and headless embeddings.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_frame(&self, _frame: VideoFramePayload) {}
    fn emit_inference(&self, _record: InferenceRecord) {}
    fn emit_status(&self, _status: StatusUpdatePayload) {}
    fn emit_stream_status(&self, _status: StreamStatusPayload) {}
    fn emit_error(&self, _error: ErrorPayload) {}
}

/// Logging emitter for debugging event flow in development.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_frame(&self, frame: VideoFramePayload) {
        tracing::trace!(frame_number = frame.frame_number, "video_frame");
    }

    fn emit_inference(&self, record: InferenceRecord) {
        tracing::debug!(media_id = %record.media.id, "inference_result");
    }

    fn emit_status(&self, status: StatusUpdatePayload) {
        tracing::debug!(component = %status.component, state = %status.state, "status_update");
    }

    fn emit_stream_status(&self, status: StreamStatusPayload) {
        tracing::debug!(streaming = status.streaming, clients = status.clients, "stream_status");
    }

    fn emit_error(&self, error: ErrorPayload) {
        tracing::debug!(code = %error.code, message = %error.message, "error_event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Test emitter that counts events per kind.
    struct CountingEventEmitter {
        frames: AtomicUsize,
        inferences: AtomicUsize,
        errors: AtomicUsize,
    }

    impl CountingEventEmitter {
        fn new() -> Self {
            Self {
                frames: AtomicUsize::new(0),
                inferences: AtomicUsize::new(0),
                errors: AtomicUsize::new(0),
            }
        }
    }

    impl EventEmitter for CountingEventEmitter {
        fn emit_frame(&self, _frame: VideoFramePayload) {
            self.frames.fetch_add(1, Ordering::SeqCst);
        }

        fn emit_inference(&self, _record: InferenceRecord) {
            self.inferences.fetch_add(1, Ordering::SeqCst);
        }

        fn emit_status(&self, _status: StatusUpdatePayload) {}
        fn emit_stream_status(&self, _status: StreamStatusPayload) {}

        fn emit_error(&self, _error: ErrorPayload) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn counting_emitter_tracks_events() {
        let emitter = Arc::new(CountingEventEmitter::new());

        emitter.emit_frame(VideoFramePayload {
            frame_number: 1,
            timestamp: 0,
            width: None,
            height: None,
            data: String::new(),
        });
        emitter.emit_frame(VideoFramePayload {
            frame_number: 2,
            timestamp: 0,
            width: None,
            height: None,
            data: String::new(),
        });
        emitter.emit_error(ErrorPayload {
            code: "protocol_error".to_string(),
            message: "bad length prefix".to_string(),
        });

        assert_eq!(emitter.frames.load(Ordering::SeqCst), 2);
        assert_eq!(emitter.inferences.load(Ordering::SeqCst), 0);
        assert_eq!(emitter.errors.load(Ordering::SeqCst), 1);
    }
}
