//! The TCP frame reader: single owner of the upstream socket.
//!
//! The reader dials the configured endpoint, consumes the stream header,
//! decodes length-prefixed JPEG records into [`Frame`]s, and offers each to
//! the distributor. Transient decode errors are skipped with a counter;
//! transient read errors trigger reconnect; reconnect failure beyond the
//! configured budget surfaces a terminal status and the reader stays down
//! until externally restarted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use parking_lot::RwLock;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use super::decoder::{FramDecoder, StreamDecoder};
use super::distributor::FrameDistributor;
use super::frame::{probe_jpeg_dimensions, Frame};
use crate::error::ReaderError;
use crate::events::{ErrorPayload, EventEmitter, StatusUpdatePayload};
use crate::state::IngestConfig;
use crate::utils::now_millis;

/// Read buffer growth step.
const READ_CHUNK: usize = 64 * 1024;

/// Cap on exponential reconnect backoff.
const MAX_BACKOFF_MS: u64 = 30_000;

/// Observable reader lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Not started yet.
    Idle,
    /// Dialing the upstream endpoint.
    Connecting,
    /// Connected and emitting frames.
    Up,
    /// Connection lost; reconnect in progress.
    Down,
    /// Retry budget exhausted; no further autodial.
    Terminal,
}

impl ReaderState {
    /// Wire name for status payloads.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Up => "up",
            Self::Down => "down",
            Self::Terminal => "terminal",
        }
    }
}

/// Single authoritative TCP frame reader.
pub struct TcpFrameReader {
    config: IngestConfig,
    distributor: Arc<FrameDistributor>,
    emitter: Arc<dyn EventEmitter>,
    cancel: CancellationToken,
    session_start: Instant,
    state: RwLock<ReaderState>,
    frames_read: AtomicU64,
    protocol_errors: AtomicU64,
    decode_errors: AtomicU64,
}

impl TcpFrameReader {
    pub fn new(
        config: IngestConfig,
        distributor: Arc<FrameDistributor>,
        emitter: Arc<dyn EventEmitter>,
        cancel: CancellationToken,
        session_start: Instant,
    ) -> Self {
        Self {
            config,
            distributor,
            emitter,
            cancel,
            session_start,
            state: RwLock::new(ReaderState::Idle),
            frames_read: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ReaderState {
        *self.state.read()
    }

    /// Frames emitted so far this session.
    #[must_use]
    pub fn frames_read(&self) -> u64 {
        self.frames_read.load(Ordering::Relaxed)
    }

    /// Resync events recovered so far.
    #[must_use]
    pub fn protocol_errors(&self) -> u64 {
        self.protocol_errors.load(Ordering::Relaxed)
    }

    /// Frames skipped because the payload would not parse as a JPEG.
    #[must_use]
    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    /// Idempotent stop: signals the read worker to exit and tear down the
    /// socket. Safe to call from any task.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    fn set_state(&self, next: ReaderState) {
        let mut state = self.state.write();
        if *state != next {
            log::info!("[Reader] {} -> {}", state.as_str(), next.as_str());
            *state = next;
            self.emitter
                .emit_status(StatusUpdatePayload::new("reader", next.as_str()));
        }
    }

    /// Indefinite read loop until `stop()` or the retry budget is spent.
    pub async fn run(self: Arc<Self>) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            self.set_state(ReaderState::Connecting);
            let stream = match self.connect_with_budget().await {
                Ok(stream) => stream,
                Err(ReaderError::RetryBudgetExhausted { attempts }) => {
                    log::error!(
                        "[Reader] Giving up on {} after {} attempts",
                        self.config.endpoint,
                        attempts
                    );
                    self.set_state(ReaderState::Terminal);
                    self.emitter.emit_error(ErrorPayload {
                        code: "connect_budget_exhausted".to_string(),
                        message: format!(
                            "upstream {} unreachable after {} attempts",
                            self.config.endpoint, attempts
                        ),
                    });
                    return;
                }
                Err(_) => break, // cancelled mid-connect
            };

            self.set_state(ReaderState::Up);
            match self.read_loop(stream).await {
                Ok(()) => break, // cooperative stop
                Err(err) => {
                    log::warn!("[Reader] Connection lost: {}", err);
                    self.set_state(ReaderState::Down);
                }
            }
        }
        log::info!("[Reader] Stopped");
    }

    /// Dials the endpoint with timeout, retries, and exponential backoff.
    async fn connect_with_budget(&self) -> Result<TcpStream, ReaderError> {
        let timeout = Duration::from_secs(self.config.connect_timeout_secs);
        let mut attempt: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(ReaderError::Protocol("cancelled".to_string()));
            }
            attempt += 1;

            match tokio::time::timeout(timeout, TcpStream::connect(&self.config.endpoint)).await {
                Ok(Ok(stream)) => {
                    log::info!(
                        "[Reader] Connected to {} (attempt {})",
                        self.config.endpoint,
                        attempt
                    );
                    return Ok(stream);
                }
                Ok(Err(err)) => {
                    log::warn!(
                        "[Reader] Connect to {} failed (attempt {}): {}",
                        self.config.endpoint,
                        attempt,
                        err
                    );
                }
                Err(_) => {
                    log::warn!(
                        "[Reader] Connect to {} timed out (attempt {})",
                        self.config.endpoint,
                        attempt
                    );
                }
            }

            if attempt >= self.config.max_connect_retries {
                return Err(ReaderError::RetryBudgetExhausted { attempts: attempt });
            }

            let backoff = (self.config.connect_backoff_ms << (attempt - 1)).min(MAX_BACKOFF_MS);
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(ReaderError::Protocol("cancelled".to_string()));
                }
                _ = tokio::time::sleep(Duration::from_millis(backoff)) => {}
            }
        }
    }

    async fn read_loop(&self, mut stream: TcpStream) -> Result<(), ReaderError> {
        let mut decoder = FramDecoder::new();
        let mut buf = BytesMut::with_capacity(READ_CHUNK * 2);

        loop {
            let n = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                read = stream.read_buf(&mut buf) => read?,
            };
            if n == 0 {
                return Err(ReaderError::Read(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "upstream closed",
                )));
            }

            if !decoder.decode_header(&mut buf)? {
                continue;
            }

            let errors_before = decoder.protocol_errors();
            while let Some(payload) = decoder.decode_frame(&mut buf)? {
                self.emit_frame(payload);
            }
            let resyncs = decoder.protocol_errors() - errors_before;
            if resyncs > 0 {
                self.protocol_errors.fetch_add(resyncs, Ordering::Relaxed);
                self.emitter.emit_error(ErrorPayload {
                    code: "protocol_error".to_string(),
                    message: format!("resynced {} time(s) on corrupt framing", resyncs),
                });
            }
        }
    }

    fn emit_frame(&self, payload: bytes::Bytes) {
        let dimensions = match probe_jpeg_dimensions(&payload) {
            Some(dims) => Some(dims),
            None => {
                // The framing looked right but the body is undecodable; skip
                // it rather than poison downstream consumers.
                self.decode_errors.fetch_add(1, Ordering::Relaxed);
                log::debug!("[Reader] Skipping undecodable frame payload");
                return;
            }
        };

        let seq = self.frames_read.fetch_add(1, Ordering::Relaxed) + 1;
        let frame = Frame {
            seq,
            timestamp_ms: now_millis(),
            relative_ms: self.session_start.elapsed().as_millis() as u64,
            dimensions,
            data: payload,
        };
        self.distributor.publish(frame);
    }
}
