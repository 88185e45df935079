//! The media packager worker.
//!
//! Turns the live frame stream into analyzable media artifacts on a fixed
//! cadence. The `(target_duration, output_fps, target_frames)` triple
//! selects the mode: `(1,1,1)` emits one re-encoded frame per cadence tick;
//! anything else collects time-bounded batches, samples them over an even
//! grid, and encodes an MP4 clip.
//!
//! Intake is a drop-oldest queue so a slow encode never backpressures the
//! reader; the ready-artifact queue is a bounded `mpsc` whose sends block,
//! pausing the packager when the scheduler falls behind.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Local, TimeZone};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::encoder::{encode_mp4, resize_and_encode, EncodedFrame};
use super::queue::DropOldestQueue;
use super::sampler::sample_batch;
use crate::error::EncodeError;
use crate::events::{ErrorPayload, EventEmitter};
use crate::ingest::{Frame, FrameDistributor};
use crate::state::PackagerConfig;
use crate::store::records::{
    ImageDimensions, MediaArtifact, MediaKind, SampledFrame, SamplingInfo, VideoDetails,
};
use crate::store::SessionStore;
use crate::utils;

/// Long-lived worker that owns the in-progress batch.
pub struct MediaPackager {
    config: PackagerConfig,
    distributor: Arc<FrameDistributor>,
    store: Arc<SessionStore>,
    emitter: Arc<dyn EventEmitter>,
    cancel: CancellationToken,
    intake: DropOldestQueue<Arc<Frame>>,
    ready_tx: mpsc::Sender<MediaArtifact>,
    artifacts_packaged: AtomicU64,
    batches_discarded: AtomicU64,
}

impl MediaPackager {
    /// Creates the packager and the ready-artifact queue the scheduler
    /// consumes.
    pub fn new(
        config: PackagerConfig,
        distributor: Arc<FrameDistributor>,
        store: Arc<SessionStore>,
        emitter: Arc<dyn EventEmitter>,
        cancel: CancellationToken,
    ) -> (Arc<Self>, mpsc::Receiver<MediaArtifact>) {
        let (ready_tx, ready_rx) = mpsc::channel(config.artifact_queue_capacity);
        let intake = DropOldestQueue::new(config.frame_queue_capacity);
        (
            Arc::new(Self {
                config,
                distributor,
                store,
                emitter,
                cancel,
                intake,
                ready_tx,
                artifacts_packaged: AtomicU64::new(0),
                batches_discarded: AtomicU64::new(0),
            }),
            ready_rx,
        )
    }

    /// Artifacts emitted so far.
    #[must_use]
    pub fn artifacts_packaged(&self) -> u64 {
        self.artifacts_packaged.load(Ordering::Relaxed)
    }

    /// Batches dropped due to encode failures.
    #[must_use]
    pub fn batches_discarded(&self) -> u64 {
        self.batches_discarded.load(Ordering::Relaxed)
    }

    /// Frames evicted from the intake queue so far.
    #[must_use]
    pub fn frames_dropped(&self) -> u64 {
        self.intake.dropped()
    }

    /// Worker entry point.
    pub async fn run(self: Arc<Self>) {
        if self.config.is_image_mode() {
            log::info!("[Packager] Image mode, cadence {}s", self.config.target_duration_secs);
            self.run_image_mode().await;
        } else {
            log::info!(
                "[Packager] Video mode: {}s batches, {} sampled frames, {} fps out",
                self.config.target_duration_secs,
                self.config.sample_count(),
                self.config.output_fps
            );
            self.run_video_mode().await;
        }
        log::info!("[Packager] Stopped");
    }

    async fn run_image_mode(self: &Arc<Self>) {
        let cadence = std::time::Duration::from_secs(self.config.target_duration_secs.max(1));
        let mut tick = tokio::time::interval(cadence);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tick.tick() => {}
            }

            let Some(frame) = self.distributor.latest() else {
                continue; // nothing ingested yet
            };

            match self.package_image(&frame).await {
                Ok(artifact) => {
                    if !self.offer(artifact).await {
                        break;
                    }
                }
                Err(err) => self.discard("image", err),
            }
        }
    }

    async fn run_video_mode(self: &Arc<Self>) {
        // Intake pump on its own task: the drop-oldest queue keeps filling
        // while this worker is busy encoding, so batching survives encode
        // pauses and the ready-queue backpressure.
        let pump = {
            let packager = Arc::clone(self);
            let mut sub = self.distributor.subscribe();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = packager.cancel.cancelled() => break,
                        frame = sub.changed() => match frame {
                            Some(frame) => packager.intake.push(frame),
                            None => break,
                        }
                    }
                }
                packager.intake.close();
            })
        };

        let batch_size = self.config.batch_size();
        let mut batch: Vec<Arc<Frame>> = Vec::with_capacity(batch_size);

        loop {
            let Some(frame) = self.intake.pop().await else { break };
            batch.push(frame);

            if batch.len() < batch_size {
                continue;
            }
            let closed = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
            match self.package_video(&closed).await {
                Ok(artifact) => {
                    if !self.offer(artifact).await {
                        break;
                    }
                }
                Err(err) => self.discard("video", err),
            }
        }
        pump.abort();
    }

    /// Pushes an artifact into the ready queue, blocking while it is full.
    /// Returns false when the scheduler side is gone.
    async fn offer(&self, artifact: MediaArtifact) -> bool {
        self.artifacts_packaged.fetch_add(1, Ordering::Relaxed);
        if self.ready_tx.send(artifact).await.is_err() {
            log::warn!("[Packager] Ready queue closed, stopping");
            return false;
        }
        true
    }

    fn discard(&self, kind: &str, err: EncodeError) {
        self.batches_discarded.fetch_add(1, Ordering::Relaxed);
        log::warn!("[Packager] Discarding {} batch: {}", kind, err);
        self.emitter.emit_error(ErrorPayload {
            code: "encode_error".to_string(),
            message: err.to_string(),
        });
    }

    async fn package_image(&self, frame: &Frame) -> Result<MediaArtifact, EncodeError> {
        let encoded =
            resize_and_encode(&frame.data, self.config.max_width, self.config.max_height)?;

        let captured = Local
            .timestamp_millis_opt(frame.timestamp_ms as i64)
            .single()
            .unwrap_or_else(Local::now);
        let dir = self
            .store
            .create_image_dir(frame.seq, captured)
            .map_err(|e| EncodeError::Io(std::io::Error::other(e.to_string())))?;

        let id = uuid::Uuid::new_v4().simple().to_string();
        let file_name = format!("{}.jpg", id);
        let media_path = dir.join(&file_name);
        tokio::fs::write(&media_path, &encoded.jpeg)
            .await
            .map_err(EncodeError::Io)?;

        let artifact = MediaArtifact {
            id,
            kind: MediaKind::Image,
            dir,
            media_path,
            frame_range: [frame.seq, frame.seq],
            created_at: utils::now_iso(),
            created_timestamp: utils::now_secs_f64(),
            sampled_frames: vec![SampledFrame {
                original_index: frame.seq,
                relative_timestamp: frame.relative_secs(),
                file_name,
            }],
            target_duration_secs: None,
            effective_sample_rate: None,
            dimensions: Some(ImageDimensions {
                model_width: encoded.width,
                model_height: encoded.height,
            }),
        };
        self.store
            .register_artifact(artifact.clone(), None)
            .map_err(|e| EncodeError::Io(std::io::Error::other(e.to_string())))?;
        Ok(artifact)
    }

    async fn package_video(&self, batch: &[Arc<Frame>]) -> Result<MediaArtifact, EncodeError> {
        let picks = sample_batch(batch, self.config.sample_count());
        if picks.is_empty() {
            return Err(EncodeError::EmptyBatch);
        }

        let mut encoded: Vec<EncodedFrame> = Vec::with_capacity(picks.len());
        for frame in &picks {
            encoded.push(resize_and_encode(
                &frame.data,
                self.config.max_width,
                self.config.max_height,
            )?);
        }

        // Encode to scratch first so a failed batch never allocates an id.
        // The scratch file lives under the session dir so the final persist
        // is a same-filesystem rename.
        let scratch = tempfile::Builder::new()
            .suffix(".mp4")
            .tempfile_in(self.store.session_dir())
            .map_err(EncodeError::Io)?;
        encode_mp4(&encoded, self.config.output_fps, scratch.path()).await?;

        let id = self.store.next_video_id();
        let dir = self
            .store
            .create_video_dir(&id)
            .map_err(|e| EncodeError::Io(std::io::Error::other(e.to_string())))?;
        let media_path = dir.join(format!("sampled_video_{}.mp4", id));
        scratch
            .persist(&media_path)
            .map_err(|e| EncodeError::Io(e.error))?;

        let artifact = build_video_artifact(&self.config, id, dir, media_path, batch, &picks);
        let details = build_video_details(&self.config, &artifact, batch);
        self.store
            .register_artifact(artifact.clone(), Some(&details))
            .map_err(|e| EncodeError::Io(std::io::Error::other(e.to_string())))?;
        Ok(artifact)
    }
}

/// Assembles the artifact descriptor for a freshly encoded clip.
fn build_video_artifact(
    config: &PackagerConfig,
    id: String,
    dir: std::path::PathBuf,
    media_path: std::path::PathBuf,
    batch: &[Arc<Frame>],
    picks: &[Arc<Frame>],
) -> MediaArtifact {
    let first = batch.first().map(|f| f.seq).unwrap_or(0);
    let last = batch.last().map(|f| f.seq).unwrap_or(first);
    let span_secs = batch
        .last()
        .zip(batch.first())
        .map(|(b, a)| (b.relative_ms.saturating_sub(a.relative_ms)) as f64 / 1000.0)
        .unwrap_or(0.0);
    let effective_rate = if span_secs > 0.0 {
        picks.len() as f64 / span_secs
    } else {
        picks.len() as f64
    };

    MediaArtifact {
        id,
        kind: MediaKind::Video,
        dir,
        media_path,
        frame_range: [first, last],
        created_at: utils::now_iso(),
        created_timestamp: utils::now_secs_f64(),
        sampled_frames: picks
            .iter()
            .enumerate()
            .map(|(i, f)| SampledFrame {
                original_index: f.seq,
                relative_timestamp: f.relative_secs(),
                file_name: format!("frame_{:05}.jpg", i),
            })
            .collect(),
        target_duration_secs: Some(config.target_duration_secs as f64),
        effective_sample_rate: Some(effective_rate),
        dimensions: None,
    }
}

/// Assembles the `video_details.json` payload for a clip.
fn build_video_details(
    config: &PackagerConfig,
    artifact: &MediaArtifact,
    batch: &[Arc<Frame>],
) -> VideoDetails {
    let start_rel = batch.first().map(|f| f.relative_secs()).unwrap_or(0.0);
    let end_rel = batch.last().map(|f| f.relative_secs()).unwrap_or(start_rel);
    let iso = |ms: u64| {
        Local
            .timestamp_millis_opt(ms as i64)
            .single()
            .map(|t| t.to_rfc3339())
            .unwrap_or_default()
    };

    VideoDetails {
        video_path: artifact.media_path.clone(),
        frame_count: artifact.sampled_frames.len(),
        start_time: batch.first().map(|f| iso(f.timestamp_ms)).unwrap_or_default(),
        end_time: batch.last().map(|f| iso(f.timestamp_ms)).unwrap_or_default(),
        start_relative_timestamp: start_rel,
        end_relative_timestamp: end_rel,
        original_frame_range: artifact.frame_range,
        sampled_frames: artifact.sampled_frames.clone(),
        sampling_info: SamplingInfo {
            target_duration_secs: config.target_duration_secs as f64,
            output_fps: config.output_fps,
            sample_count: artifact.sampled_frames.len(),
            effective_sample_rate: artifact.effective_sample_rate.unwrap_or(0.0),
        },
    }
}
