//! Vigil Core - real-time VLM video monitoring.
//!
//! This crate is the core of a video-monitoring system: it ingests a
//! length-prefixed JPEG stream over TCP, derives analyzable media on a fixed
//! cadence, dispatches each artifact to a remote vision-language model for
//! structured scene understanding, and surfaces the stream and results to UI
//! clients with bounded latency. It is designed to be embedded by the
//! standalone `vigil-server` binary.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`ingest`]: TCP frame reader and last-value frame distributor
//! - [`pipeline`]: frame batching, sampling, and media packaging
//! - [`scheduler`]: sync/async inference discipline and question binding
//! - [`vlm`]: remote model client and total response parsing
//! - [`mcp`]: camera-control bridge
//! - [`store`]: session-scoped result store and session log
//! - [`api`]: WebSocket/REST delivery surface and ASR intake
//! - [`services`]: ancillary workers (TTS fan-out)
//! - [`events`]: event system for real-time client communication
//! - [`error`]: centralized error types
//!
//! The composition root is [`bootstrap::bootstrap_services`]; workers are
//! long-lived tasks owning their state, exchanging data through bounded
//! queues, and stopping cooperatively via a shared cancellation token.

#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod error;
pub mod events;
pub mod ingest;
pub mod mcp;
pub mod pipeline;
pub mod protocol_constants;
pub mod runtime;
pub mod scheduler;
pub mod services;
pub mod state;
pub mod store;
pub mod utils;
pub mod vlm;

// Re-export commonly used types at the crate root
pub use api::{start_asr_server, start_server, AppState, ServerError, WsConnectionManager};
pub use bootstrap::{bootstrap_services, BootstrappedServices};
pub use error::{ErrorCode, VigilError, VigilResult};
pub use events::{
    BroadcastEvent, BroadcastEventBridge, ErrorPayload, EventEmitter, StatusUpdatePayload,
    StreamStatusPayload, VideoFramePayload, WsEnvelope,
};
pub use ingest::{Frame, FrameDistributor, ReaderState, TcpFrameReader};
pub use pipeline::MediaPackager;
pub use runtime::{TaskSpawner, TokioSpawner};
pub use scheduler::{InferenceScheduler, QuestionRegistry, SchedulerSnapshot, UserQuestion};
pub use state::{Config, InferenceMode, McpTrigger};
pub use store::records::{InferenceRecord, McpResult, MediaArtifact, MediaKind, SceneResult};
pub use store::SessionStore;
pub use utils::now_millis;
pub use vlm::{HttpVlmClient, VlmAnalysis, VlmClient};
