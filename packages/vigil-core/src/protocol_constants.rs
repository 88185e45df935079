//! Protocol constants and fixed defaults shared across the crate.

/// Application name reported in status payloads.
pub const APP_NAME: &str = "Vigil";

// ─────────────────────────────────────────────────────────────────────────────
// Frame stream wire format
// ─────────────────────────────────────────────────────────────────────────────

/// Magic bytes opening the upstream frame stream header.
pub const FRAME_STREAM_MAGIC: &[u8; 4] = b"FRAM";

/// Supported frame stream protocol version.
pub const FRAME_STREAM_VERSION: u8 = 1;

/// Header length: magic (4) + version (1) + reserved (3).
pub const FRAME_STREAM_HEADER_LEN: usize = 8;

/// Upper bound on a single frame record. Anything larger is treated as a
/// corrupted length prefix and triggers resync.
pub const MAX_FRAME_RECORD_LEN: u32 = 32 * 1024 * 1024;

/// JPEG start-of-image marker, used during resync scanning.
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

// ─────────────────────────────────────────────────────────────────────────────
// Ingestion defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Default TCP connect timeout (seconds).
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Default number of connect attempts before the reader goes terminal.
pub const DEFAULT_CONNECT_RETRIES: u32 = 5;

/// Base delay for exponential connect backoff (milliseconds).
pub const DEFAULT_CONNECT_BACKOFF_MS: u64 = 500;

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline capacities
// ─────────────────────────────────────────────────────────────────────────────

/// Frame intake queue capacity. The queue drops its oldest entry on overflow
/// so the live path never backpressures the reader.
pub const FRAME_QUEUE_CAPACITY: usize = 100;

/// Ready-artifact queue capacity. Sends block when full, pausing the packager.
pub const ARTIFACT_QUEUE_CAPACITY: usize = 10;

/// Default resize cap applied before re-encoding frames.
pub const DEFAULT_MAX_FRAME_WIDTH: u32 = 640;
pub const DEFAULT_MAX_FRAME_HEIGHT: u32 = 360;

/// Default JPEG quality for re-encoded frames.
pub const JPEG_ENCODE_QUALITY: u8 = 85;

// ─────────────────────────────────────────────────────────────────────────────
// Scheduler defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Default cap on concurrent inferences in async mode.
pub const DEFAULT_MAX_CONCURRENT_INFERENCES: usize = 1;

/// Default per-inference timeout (seconds).
pub const DEFAULT_INFERENCE_TIMEOUT_SECS: u64 = 60;

/// Default user-question expiry (seconds).
pub const DEFAULT_QUESTION_EXPIRY_SECS: u64 = 300;

/// Default maximum user-question length (characters).
pub const DEFAULT_QUESTION_MAX_LEN: usize = 500;

// ─────────────────────────────────────────────────────────────────────────────
// Delivery surface
// ─────────────────────────────────────────────────────────────────────────────

/// Capacity of the broadcast channel feeding WebSocket clients.
pub const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Per-connection outgoing message queue. When full, `video_frame` messages
/// are shed first; `inference_result` messages are never dropped.
pub const WS_SEND_QUEUE_CAPACITY: usize = 32;

// ─────────────────────────────────────────────────────────────────────────────
// Ancillary services
// ─────────────────────────────────────────────────────────────────────────────

/// Default TTS poll cadence (seconds).
pub const DEFAULT_TTS_POLL_INTERVAL_SECS: f64 = 5.0;

/// Practical minimum TTS poll cadence (seconds).
pub const MIN_TTS_POLL_INTERVAL_SECS: f64 = 0.1;

/// Default TTS request timeout (seconds).
pub const DEFAULT_TTS_TIMEOUT_SECS: u64 = 10;

/// Default TTS retry budget for transient failures.
pub const DEFAULT_TTS_MAX_RETRIES: u32 = 3;

/// Default interval between session-log checkpoints (seconds).
pub const DEFAULT_CHECKPOINT_INTERVAL_SECS: u64 = 30;
