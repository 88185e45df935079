//! The inference scheduler.
//!
//! Enforces the sync-or-async inference discipline, owns the single
//! pending-latest slot, binds user questions to exactly one inference each,
//! and folds MCP control results into the record before it is closed.
//!
//! All dispatch decisions happen under one mutex, including the
//! completion-time re-dispatch: the lock is never released between
//! decrementing `active_count` and consulting `pending_latest`, which closes
//! the freshest-between-completion-and-reentry race. The mutex is never held
//! across I/O; dispatched work runs on spawned worker tasks.

pub mod questions;

pub use questions::{QuestionRegistry, QuestionStats, UserQuestion};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ErrorCode;
use crate::events::{ErrorPayload, EventEmitter, StatusUpdatePayload};
use crate::mcp::McpBridge;
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::state::{InferenceMode, McpConfig, McpTrigger, SchedulerConfig};
use crate::store::records::{InferenceRecord, McpResult, MediaArtifact};
use crate::store::SessionStore;
use crate::vlm::{McpIntent, VlmClient};

/// Instruction sent to the control bridge when sentry mode fires without a
/// user question.
const SENTRY_INSTRUCTION: &str = "Assess the scene and adjust the camera if needed.";

/// Point-in-time view of the scheduler for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerSnapshot {
    pub mode: InferenceMode,
    pub active_count: usize,
    pub pending: bool,
    pub current_media_id: Option<String>,
    pub dispatched: u64,
    pub skipped: u64,
    pub sentry_enabled: bool,
}

/// Mutable state guarded by the scheduler mutex.
struct SchedulerState {
    active_count: usize,
    /// Newest artifact awaiting dispatch; newer arrivals overwrite older.
    pending_latest: Option<MediaArtifact>,
    current_media_id: Option<String>,
}

/// Long-lived worker enforcing the inference discipline.
pub struct InferenceScheduler {
    config: SchedulerConfig,
    mcp_config: McpConfig,
    vlm: Arc<dyn VlmClient>,
    bridge: Option<Arc<McpBridge>>,
    questions: Arc<QuestionRegistry>,
    store: Arc<SessionStore>,
    emitter: Arc<dyn EventEmitter>,
    spawner: TokioSpawner,
    cancel: CancellationToken,
    state: Mutex<SchedulerState>,
    sentry: AtomicBool,
    dispatched: AtomicU64,
    skipped: AtomicU64,
}

impl InferenceScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SchedulerConfig,
        mcp_config: McpConfig,
        vlm: Arc<dyn VlmClient>,
        bridge: Option<Arc<McpBridge>>,
        questions: Arc<QuestionRegistry>,
        store: Arc<SessionStore>,
        emitter: Arc<dyn EventEmitter>,
        spawner: TokioSpawner,
        cancel: CancellationToken,
        sentry_enabled: bool,
    ) -> Self {
        Self {
            config,
            mcp_config,
            vlm,
            bridge,
            questions,
            store,
            emitter,
            spawner,
            cancel,
            state: Mutex::new(SchedulerState {
                active_count: 0,
                pending_latest: None,
                current_media_id: None,
            }),
            sentry: AtomicBool::new(sentry_enabled),
            dispatched: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }

    /// Worker entry point: consumes the packager's ready queue.
    pub async fn run(self: Arc<Self>, mut ready_rx: mpsc::Receiver<MediaArtifact>) {
        log::info!(
            "[Scheduler] Running in {:?} mode (max_concurrent {})",
            self.config.mode,
            self.config.max_concurrent
        );
        loop {
            let artifact = tokio::select! {
                _ = self.cancel.cancelled() => break,
                artifact = ready_rx.recv() => artifact,
            };
            let Some(artifact) = artifact else { break };
            self.ingest(artifact);
        }
        log::info!("[Scheduler] Stopped");
    }

    /// Runs one artifact through the dispatch algorithm.
    pub fn ingest(self: &Arc<Self>, artifact: MediaArtifact) {
        let mut state = self.state.lock();
        self.decide(&mut state, artifact);
    }

    /// The dispatch algorithm. Caller holds the scheduler mutex.
    fn decide(self: &Arc<Self>, state: &mut SchedulerState, artifact: MediaArtifact) {
        let in_flight = state.active_count > 0;

        // User questions preempt the sync gate, but never an inference
        // already dispatched.
        if !in_flight && self.questions.has_active() {
            if let Some(question) = self.questions.take() {
                self.dispatch(state, artifact, Some(question));
                return;
            }
        }

        match self.config.mode {
            InferenceMode::Async if state.active_count < self.config.max_concurrent => {
                self.dispatch(state, artifact, None);
            }
            InferenceMode::Sync if state.active_count == 0 => {
                match state.pending_latest.take() {
                    Some(stale) => {
                        // The slot still holds the freshest artifact observed
                        // when the previous inference finished; run it and
                        // pend the new arrival.
                        state.pending_latest = Some(artifact);
                        self.dispatch(state, stale, None);
                    }
                    None => self.dispatch(state, artifact, None),
                }
            }
            _ => {
                // In flight or at cap: the newest artifact wins the slot.
                if state.pending_latest.replace(artifact).is_some() {
                    self.skipped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Opens a pending record and spawns the inference worker. Caller holds
    /// the scheduler mutex.
    fn dispatch(
        self: &Arc<Self>,
        state: &mut SchedulerState,
        media: MediaArtifact,
        question: Option<UserQuestion>,
    ) {
        state.active_count += 1;
        state.current_media_id = Some(media.id.clone());
        self.dispatched.fetch_add(1, Ordering::Relaxed);

        log::info!(
            "[Scheduler] Dispatching {} (question: {})",
            media.id,
            question.is_some()
        );
        self.emitter.emit_status(StatusUpdatePayload::with_detail(
            "scheduler",
            "dispatched",
            media.id.clone(),
        ));

        let record =
            InferenceRecord::pending(media, question.map(|question| question.question));
        let this = Arc::clone(self);
        self.spawner.spawn(async move {
            this.execute(record).await;
        });
    }

    /// Runs one inference to completion and finalizes its record.
    async fn execute(self: Arc<Self>, mut record: InferenceRecord) {
        let timeout = Duration::from_secs(self.config.inference_timeout_secs);
        let question = record.user_question.clone();

        let outcome = tokio::time::timeout(
            timeout,
            self.vlm.analyze(&record.media, question.as_deref()),
        )
        .await;

        match outcome {
            Ok(Ok(analysis)) => {
                record.raw_result = analysis.raw;
                record.parsed_result = analysis.scene;
                if !record.parsed_result.response.is_empty() {
                    record.response = Some(record.parsed_result.response.clone());
                }
                if let Some(parse_error) = &analysis.parse_error {
                    record.error = Some("inference_parse_error".to_string());
                    self.emitter.emit_error(ErrorPayload {
                        code: "inference_parse_error".to_string(),
                        message: parse_error.clone(),
                    });
                }
                record.mcp_result = self
                    .maybe_run_mcp(&record, analysis.mcp_intent, analysis.prelude)
                    .await;
            }
            Ok(Err(err)) => {
                log::warn!("[Scheduler] Inference on {} failed: {}", record.media.id, err);
                record.error = Some(err.code().to_string());
                self.emitter.emit_error(ErrorPayload {
                    code: err.code().to_string(),
                    message: err.to_string(),
                });
            }
            Err(_) => {
                log::warn!(
                    "[Scheduler] Inference on {} timed out after {}s",
                    record.media.id,
                    self.config.inference_timeout_secs
                );
                record.error = Some("inference_timeout".to_string());
                self.emitter.emit_error(ErrorPayload {
                    code: "inference_timeout".to_string(),
                    message: format!("inference on {} timed out", record.media.id),
                });
            }
        }

        record.finish();
        if let Err(err) = self.store.write_inference(record.clone()) {
            // Record stays incomplete on disk; the session continues.
            log::error!("[Scheduler] Failed to persist record {}: {}", record.media.id, err);
            self.emitter.emit_error(ErrorPayload {
                code: "store_error".to_string(),
                message: err.to_string(),
            });
        }
        self.emitter.emit_inference(record);

        self.complete();
    }

    /// Decrements the in-flight count and immediately re-enters the dispatch
    /// algorithm for the pending artifact, all under one lock acquisition.
    fn complete(self: &Arc<Self>) {
        let mut state = self.state.lock();
        state.active_count = state.active_count.saturating_sub(1);
        state.current_media_id = None;
        self.emitter
            .emit_status(StatusUpdatePayload::new("scheduler", "idle"));

        if let Some(pending) = state.pending_latest.take() {
            self.decide(&mut state, pending);
        }
    }

    /// Decides whether the control bridge runs for this inference, and runs
    /// it. Falls back to an intent skeleton when the bridge stays quiet.
    async fn maybe_run_mcp(
        &self,
        record: &InferenceRecord,
        intent: Option<McpIntent>,
        prelude: String,
    ) -> Option<McpResult> {
        let triggered = self.mcp_config.enabled
            && self.bridge.is_some()
            && match self.mcp_config.trigger {
                McpTrigger::Never => false,
                McpTrigger::OnQuestion => record.user_question.is_some() || intent.is_some(),
                McpTrigger::Sentry => self.sentry.load(Ordering::Relaxed) || intent.is_some(),
            };

        if triggered {
            let bridge = self.bridge.as_ref().expect("bridge checked above");
            let instruction = record
                .user_question
                .clone()
                .unwrap_or_else(|| SENTRY_INSTRUCTION.to_string());
            let mut result = bridge
                .analyze(&record.media.media_path.display().to_string(), &instruction)
                .await;
            if result.ai_response.is_empty() {
                result.ai_response = prelude;
            }
            return Some(result);
        }

        // Intent parsed but bridge not invoked: record it as unexecuted.
        intent.map(|intent| McpResult {
            success: false,
            tool_name: intent.tool_name,
            arguments: intent.arguments,
            reason: intent.reason,
            result: "not executed".to_string(),
            ai_response: prelude,
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Introspection
    // ─────────────────────────────────────────────────────────────────────

    /// Toggles sentry mode and returns the new state.
    pub fn toggle_sentry(&self) -> bool {
        !self.sentry.fetch_xor(true, Ordering::Relaxed)
    }

    #[must_use]
    pub fn sentry_enabled(&self) -> bool {
        self.sentry.load(Ordering::Relaxed)
    }

    /// Artifacts discarded from the pending slot without inference.
    #[must_use]
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn snapshot(&self) -> SchedulerSnapshot {
        let state = self.state.lock();
        SchedulerSnapshot {
            mode: self.config.mode,
            active_count: state.active_count,
            pending: state.pending_latest.is_some(),
            current_media_id: state.current_media_id.clone(),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            sentry_enabled: self.sentry_enabled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VlmError;
    use crate::events::NoopEventEmitter;
    use crate::state::{Config, QuestionConfig};
    use crate::store::records::{MediaKind, SceneResult};
    use crate::vlm::VlmAnalysis;
    use async_trait::async_trait;
    use tempfile::TempDir;
    use tokio::sync::Semaphore;

    /// Scripted VLM whose completions are gated by a semaphore: each call
    /// blocks until the test releases a permit.
    struct MockVlm {
        gate: Semaphore,
        calls: Mutex<Vec<(String, Option<String>)>>,
        scene: SceneResult,
    }

    impl MockVlm {
        fn gated() -> Self {
            Self {
                gate: Semaphore::new(0),
                calls: Mutex::new(Vec::new()),
                scene: SceneResult {
                    people_count: 1,
                    summary: "one person".to_string(),
                    response: "yes".to_string(),
                    ..Default::default()
                },
            }
        }

        fn release(&self) {
            self.gate.add_permits(1);
        }

        fn calls(&self) -> Vec<(String, Option<String>)> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl VlmClient for MockVlm {
        async fn analyze(
            &self,
            media: &MediaArtifact,
            question: Option<&str>,
        ) -> Result<VlmAnalysis, VlmError> {
            self.calls
                .lock()
                .push((media.id.clone(), question.map(str::to_string)));
            let permit = self.gate.acquire().await.map_err(|_| {
                VlmError::Transient("gate closed".to_string())
            })?;
            permit.forget();
            Ok(VlmAnalysis {
                raw: "{}".to_string(),
                scene: self.scene.clone(),
                ..Default::default()
            })
        }
    }

    struct Fixture {
        scheduler: Arc<InferenceScheduler>,
        vlm: Arc<MockVlm>,
        store: Arc<SessionStore>,
        questions: Arc<QuestionRegistry>,
        _tmp: TempDir,
    }

    fn fixture(mode: InferenceMode, max_concurrent: usize, timeout_secs: u64) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let config = Config::new("127.0.0.1:1234", tmp.path());
        let store = Arc::new(SessionStore::create(&config).unwrap());
        let vlm = Arc::new(MockVlm::gated());
        let questions = Arc::new(QuestionRegistry::new(QuestionConfig::default()));

        let scheduler = Arc::new(InferenceScheduler::new(
            SchedulerConfig {
                mode,
                max_concurrent,
                inference_timeout_secs: timeout_secs,
            },
            McpConfig::default(),
            Arc::clone(&vlm) as Arc<dyn VlmClient>,
            None,
            Arc::clone(&questions),
            Arc::clone(&store),
            Arc::new(NoopEventEmitter),
            TokioSpawner::current(),
            CancellationToken::new(),
            false,
        ));
        Fixture {
            scheduler,
            vlm,
            store,
            questions,
            _tmp: tmp,
        }
    }

    fn artifact(store: &SessionStore, id: &str, first: u64) -> MediaArtifact {
        let dir = store.create_video_dir(id).unwrap();
        MediaArtifact {
            id: id.to_string(),
            kind: MediaKind::Video,
            media_path: dir.join(format!("sampled_video_{}.mp4", id)),
            dir,
            frame_range: [first, first + 74],
            created_at: crate::utils::now_iso(),
            created_timestamp: crate::utils::now_secs_f64(),
            sampled_frames: vec![],
            target_duration_secs: Some(3.0),
            effective_sample_rate: Some(1.0),
            dimensions: None,
        }
    }

    async fn settle() {
        // Give spawned workers a few polls to run.
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn sync_mode_runs_one_at_a_time_and_keeps_freshest() {
        let f = fixture(InferenceMode::Sync, 1, 60);

        f.scheduler.ingest(artifact(&f.store, "a0", 1));
        settle().await;
        assert_eq!(f.vlm.calls().len(), 1, "a0 in flight");

        // Three more arrive while a0 is in flight.
        f.scheduler.ingest(artifact(&f.store, "a1", 76));
        f.scheduler.ingest(artifact(&f.store, "a2", 151));
        f.scheduler.ingest(artifact(&f.store, "a3", 226));
        settle().await;

        assert_eq!(f.vlm.calls().len(), 1, "nothing dispatched while in flight");
        assert_eq!(f.scheduler.skipped(), 2, "a1 and a2 discarded");
        assert!(f.scheduler.snapshot().pending);

        // a0 completes: exactly one dispatch occurs and it is a3.
        f.vlm.release();
        settle().await;
        let calls = f.vlm.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].0, "a3");
        assert!(!f.scheduler.snapshot().pending, "slot drained on re-entry");

        f.vlm.release();
        settle().await;
        assert_eq!(f.store.inference_count(), 2);
    }

    #[tokio::test]
    async fn question_binds_to_first_dispatch_only() {
        let f = fixture(InferenceMode::Sync, 1, 60);
        f.questions.submit("how many people").unwrap();

        f.scheduler.ingest(artifact(&f.store, "a0", 1));
        settle().await;
        f.vlm.release();
        settle().await;

        f.scheduler.ingest(artifact(&f.store, "a1", 76));
        settle().await;
        f.vlm.release();
        settle().await;

        let calls = f.vlm.calls();
        assert_eq!(calls[0].1.as_deref(), Some("how many people"));
        assert_eq!(calls[1].1, None, "question consumed exactly once");
        assert!(f.questions.current().is_none());

        // The record carries the question and the scripted response.
        let with_q = f
            .store
            .history(10)
            .into_iter()
            .find(|r| r.media.id == "a0")
            .unwrap();
        assert_eq!(with_q.user_question.as_deref(), Some("how many people"));
        assert_eq!(with_q.response.as_deref(), Some("yes"));
    }

    #[tokio::test]
    async fn question_does_not_preempt_inflight_inference() {
        let f = fixture(InferenceMode::Sync, 1, 60);

        f.scheduler.ingest(artifact(&f.store, "a0", 1));
        settle().await;
        assert_eq!(f.vlm.calls().len(), 1);

        // Question arrives while a0 is in flight; a1 must pend, not dispatch.
        f.questions.submit("who entered").unwrap();
        f.scheduler.ingest(artifact(&f.store, "a1", 76));
        settle().await;
        assert_eq!(f.vlm.calls().len(), 1, "no preemption");
        assert_eq!(f.vlm.calls()[0].1, None);

        // On completion the question binds to the next dispatch.
        f.vlm.release();
        settle().await;
        let calls = f.vlm.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].0, "a1");
        assert_eq!(calls[1].1.as_deref(), Some("who entered"));

        f.vlm.release();
        settle().await;
    }

    #[tokio::test]
    async fn async_mode_dispatches_up_to_cap() {
        let f = fixture(InferenceMode::Async, 2, 60);

        f.scheduler.ingest(artifact(&f.store, "a0", 1));
        f.scheduler.ingest(artifact(&f.store, "a1", 76));
        f.scheduler.ingest(artifact(&f.store, "a2", 151));
        settle().await;

        assert_eq!(f.vlm.calls().len(), 2, "cap of two in flight");
        assert_eq!(f.scheduler.snapshot().active_count, 2);
        assert!(f.scheduler.snapshot().pending);

        f.vlm.release();
        settle().await;
        assert_eq!(f.vlm.calls().len(), 3, "a2 follows a completion");

        f.vlm.release();
        f.vlm.release();
        settle().await;
        assert_eq!(f.scheduler.snapshot().active_count, 0);
    }

    #[tokio::test]
    async fn timeout_produces_error_record_and_frees_the_gate() {
        // Zero-second budget: the gated mock can never answer in time.
        let f = fixture(InferenceMode::Sync, 1, 0);

        f.scheduler.ingest(artifact(&f.store, "a0", 1));
        settle().await;

        assert_eq!(f.scheduler.snapshot().active_count, 0, "worker exited");
        let record = f.store.latest_inference().unwrap();
        assert_eq!(record.error.as_deref(), Some("inference_timeout"));
        assert!(record.is_complete());
        assert!(record.inference_end_timestamp.unwrap() >= record.inference_start_timestamp);

        // The next artifact dispatches normally.
        f.scheduler.ingest(artifact(&f.store, "a1", 76));
        settle().await;
        assert_eq!(f.vlm.calls().len(), 2);
    }

    #[tokio::test]
    async fn sentry_toggle_round_trips() {
        let f = fixture(InferenceMode::Sync, 1, 60);
        assert!(!f.scheduler.sentry_enabled());
        assert!(f.scheduler.toggle_sentry());
        assert!(f.scheduler.sentry_enabled());
        assert!(!f.scheduler.toggle_sentry());
        assert!(!f.scheduler.sentry_enabled());
    }
}
