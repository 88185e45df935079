//! Application bootstrap and dependency wiring.
//!
//! The composition root: the single place where all workers are
//! instantiated and wired together. Services are created in dependency
//! order (shared infrastructure first, then the ingestion chain, then the
//! inference chain); background tasks are started separately so embedders
//! can inspect the wiring before anything runs.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use reqwest::Client;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::api::{AppState, WsConnectionManager};
use crate::error::{VigilError, VigilResult};
use crate::events::{BroadcastEvent, BroadcastEventBridge, EventEmitter};
use crate::ingest::{FrameDistributor, TcpFrameReader};
use crate::mcp::McpBridge;
use crate::pipeline::MediaPackager;
use crate::protocol_constants::EVENT_CHANNEL_CAPACITY;
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::scheduler::{InferenceScheduler, QuestionRegistry};
use crate::services::TtsWorker;
use crate::state::Config;
use crate::store::records::MediaArtifact;
use crate::store::SessionStore;
use crate::vlm::{HttpVlmClient, VlmClient};

/// Container for all bootstrapped services.
pub struct BootstrappedServices {
    pub config: Arc<Config>,
    pub store: Arc<SessionStore>,
    pub distributor: Arc<FrameDistributor>,
    pub reader: Arc<TcpFrameReader>,
    pub packager: Arc<MediaPackager>,
    pub scheduler: Arc<InferenceScheduler>,
    pub questions: Arc<QuestionRegistry>,
    pub event_bridge: Arc<BroadcastEventBridge>,
    pub ws_manager: Arc<WsConnectionManager>,
    /// Broadcast channel sender for real-time events.
    pub broadcast_tx: broadcast::Sender<BroadcastEvent>,
    /// Shared HTTP client for connection pooling.
    http_client: Client,
    pub spawner: TokioSpawner,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
    /// Consumed by the scheduler when background tasks start.
    ready_rx: Mutex<Option<mpsc::Receiver<MediaArtifact>>>,
    tts: Option<Arc<TtsWorker>>,
}

impl std::fmt::Debug for BootstrappedServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrappedServices").finish_non_exhaustive()
    }
}

impl BootstrappedServices {
    /// Returns the shared HTTP client.
    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    /// Builds the API-layer state bundle.
    #[must_use]
    pub fn app_state(&self) -> AppState {
        AppState {
            store: Arc::clone(&self.store),
            distributor: Arc::clone(&self.distributor),
            reader: Arc::clone(&self.reader),
            packager: Arc::clone(&self.packager),
            scheduler: Arc::clone(&self.scheduler),
            questions: Arc::clone(&self.questions),
            event_bridge: Arc::clone(&self.event_bridge),
            ws_manager: Arc::clone(&self.ws_manager),
            config: Arc::clone(&self.config),
            cancel: self.cancel_token.clone(),
        }
    }

    /// Spawns the long-lived workers: reader, packager, scheduler,
    /// checkpointing, and the optional ASR/TTS services.
    pub fn start_background_tasks(&self) {
        self.spawner.spawn(Arc::clone(&self.reader).run());
        self.spawner.spawn(Arc::clone(&self.packager).run());

        if let Some(ready_rx) = self.ready_rx.lock().take() {
            self.spawner
                .spawn(Arc::clone(&self.scheduler).run(ready_rx));
        } else {
            log::warn!("[Bootstrap] Background tasks already started");
            return;
        }

        if let Some(tts) = &self.tts {
            self.spawner.spawn(Arc::clone(tts).run());
        }

        if self.config.asr.enabled {
            let questions = Arc::clone(&self.questions);
            let port = self.config.asr.port;
            self.spawner.spawn(async move {
                if let Err(e) = crate::api::start_asr_server(questions, port).await {
                    log::error!("[ASR] Intake server error: {}", e);
                }
            });
        }

        // Periodic session-log checkpoint.
        let store = Arc::clone(&self.store);
        let reader = Arc::clone(&self.reader);
        let scheduler = Arc::clone(&self.scheduler);
        let cancel = self.cancel_token.clone();
        let interval = Duration::from_secs(self.config.checkpoint_interval_secs.max(1));
        self.spawner.spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                store.set_total_frames(reader.frames_read());
                store.set_total_skipped_sync(scheduler.skipped());
                if let Err(e) = store.checkpoint() {
                    log::warn!("[Bootstrap] Checkpoint failed: {}", e);
                }
            }
        });

        log::info!("[Bootstrap] Background tasks started");
    }

    /// Initiates graceful shutdown: workers stop accepting new work, a
    /// final session log is written, and WebSocket connections close.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");
        self.cancel_token.cancel();

        let connections_closed = self.ws_manager.close_all();
        if connections_closed > 0 {
            log::info!("[Bootstrap] Closed {} WebSocket connection(s)", connections_closed);
        }

        // Final checkpoint with up-to-date counters.
        self.store.set_total_frames(self.reader.frames_read());
        self.store.set_total_skipped_sync(self.scheduler.skipped());
        match self.store.checkpoint() {
            Ok(()) => log::info!(
                "[Bootstrap] Session log written to {}",
                self.store.session_dir().display()
            ),
            Err(e) => log::error!("[Bootstrap] Final checkpoint failed: {}", e),
        }

        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// Creates the shared HTTP client used by the VLM client, the MCP bridge,
/// and the TTS worker. Per-call timeouts are applied at the call sites; the
/// client only bounds connection establishment.
fn create_http_client() -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .expect("Failed to create HTTP client")
}

/// Bootstraps all application services with their dependencies.
///
/// # Errors
///
/// Returns a fatal [`VigilError::Configuration`] for invalid configuration
/// and [`VigilError::Store`] when the session directory cannot be created.
pub fn bootstrap_services(config: Config) -> VigilResult<BootstrappedServices> {
    config.validate().map_err(VigilError::Configuration)?;
    let config = Arc::new(config);

    let spawner = TokioSpawner::current();
    let http_client = create_http_client();
    let cancel_token = CancellationToken::new();
    let session_start = Instant::now();

    // Event transport shared by all services.
    let (broadcast_tx, _) = broadcast::channel::<BroadcastEvent>(EVENT_CHANNEL_CAPACITY);
    let event_bridge = Arc::new(BroadcastEventBridge::with_sender(broadcast_tx.clone()));
    let ws_manager = Arc::new(WsConnectionManager::new());

    // Persistence root. With `resume`, reattach to the most recent session
    // directory and rebuild the registry from disk; queries are served from
    // memory thereafter.
    let store = if config.resume {
        match SessionStore::latest_session_dir(&config.output_dir) {
            Some(session_dir) => {
                let store = SessionStore::attach(&config, session_dir)?;
                let recovered = store.rescan()?;
                log::info!(
                    "[Bootstrap] Resumed session {} ({} record(s) recovered)",
                    store.session_id(),
                    recovered
                );
                store
            }
            None => {
                log::info!(
                    "[Bootstrap] No session to resume under {}, starting fresh",
                    config.output_dir.display()
                );
                SessionStore::create(&config)?
            }
        }
    } else {
        SessionStore::create(&config)?
    };
    let store = Arc::new(store);

    // Ingestion chain.
    let distributor = Arc::new(FrameDistributor::new());
    let reader = Arc::new(TcpFrameReader::new(
        config.ingest.clone(),
        Arc::clone(&distributor),
        Arc::clone(&event_bridge) as Arc<dyn EventEmitter>,
        cancel_token.child_token(),
        session_start,
    ));

    let (packager, ready_rx) = MediaPackager::new(
        config.packager.clone(),
        Arc::clone(&distributor),
        Arc::clone(&store),
        Arc::clone(&event_bridge) as Arc<dyn EventEmitter>,
        cancel_token.child_token(),
    );

    // Inference chain.
    let questions = Arc::new(QuestionRegistry::new(config.question.clone()));
    let vlm: Arc<dyn VlmClient> = Arc::new(HttpVlmClient::new(
        http_client.clone(),
        config.vlm.clone(),
    ));
    let bridge = config
        .mcp
        .enabled
        .then(|| Arc::new(McpBridge::new(http_client.clone(), config.mcp.clone())));

    let scheduler = Arc::new(InferenceScheduler::new(
        config.scheduler.clone(),
        config.mcp.clone(),
        vlm,
        bridge,
        Arc::clone(&questions),
        Arc::clone(&store),
        Arc::clone(&event_bridge) as Arc<dyn EventEmitter>,
        spawner.clone(),
        cancel_token.child_token(),
        config.sentry_enabled,
    ));

    let tts = config.tts.enabled.then(|| {
        Arc::new(TtsWorker::new(
            http_client.clone(),
            config.tts.clone(),
            Arc::clone(&store),
            cancel_token.child_token(),
        ))
    });

    Ok(BootstrappedServices {
        config,
        store,
        distributor,
        reader,
        packager,
        scheduler,
        questions,
        event_bridge,
        ws_manager,
        broadcast_tx,
        http_client,
        spawner,
        cancel_token,
        ready_rx: Mutex::new(Some(ready_rx)),
        tts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn bootstrap_wires_all_services() {
        let tmp = TempDir::new().unwrap();
        let config = Config::new("127.0.0.1:1234", tmp.path());
        let services = bootstrap_services(config).unwrap();

        assert!(services.store.session_dir().is_dir());
        assert_eq!(services.ws_manager.connection_count(), 0);
        assert!(services.ready_rx.lock().is_some());
        // AppState can be built before any task starts.
        let state = services.app_state();
        assert_eq!(state.store.inference_count(), 0);
    }

    #[tokio::test]
    async fn invalid_config_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::new("127.0.0.1:1234", tmp.path());
        config.scheduler.max_concurrent = 0;
        let err = bootstrap_services(config).unwrap_err();
        assert_eq!(err.code(), "config_error");
    }

    #[tokio::test]
    async fn resume_reattaches_to_latest_session_and_rescans() {
        use crate::store::records::{InferenceRecord, MediaArtifact, MediaKind};

        let tmp = TempDir::new().unwrap();

        // First run: one completed inference lands on disk.
        let first = bootstrap_services(Config::new("127.0.0.1:1234", tmp.path())).unwrap();
        let dir = first.store.create_video_dir("0001").unwrap();
        let media_path = dir.join("sampled_video_0001.mp4");
        std::fs::write(&media_path, b"mp4").unwrap();
        let media = MediaArtifact {
            id: "0001".to_string(),
            kind: MediaKind::Video,
            media_path,
            dir,
            frame_range: [1, 75],
            created_at: crate::utils::now_iso(),
            created_timestamp: crate::utils::now_secs_f64(),
            sampled_frames: vec![],
            target_duration_secs: Some(3.0),
            effective_sample_rate: Some(1.0),
            dimensions: None,
        };
        first.store.register_artifact(media.clone(), None).unwrap();
        let mut record = InferenceRecord::pending(media, None);
        record.finish();
        first.store.write_inference(record).unwrap();
        let first_session = first.store.session_id().to_string();
        drop(first);

        // Second run resumes the same session directory cold.
        let mut config = Config::new("127.0.0.1:1234", tmp.path());
        config.resume = true;
        let resumed = bootstrap_services(config).unwrap();

        assert_eq!(resumed.store.session_id(), first_session);
        assert_eq!(resumed.store.inference_count(), 1);
        assert_eq!(resumed.store.latest_inference().unwrap().media.id, "0001");
        assert_eq!(resumed.store.latest_media().unwrap().id, "0001");
        assert_eq!(
            resumed.store.next_video_id(),
            "0002",
            "clip ids continue past the recovered session"
        );
    }

    #[tokio::test]
    async fn resume_with_empty_output_dir_starts_fresh() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::new("127.0.0.1:1234", tmp.path());
        config.resume = true;

        let services = bootstrap_services(config).unwrap();
        assert!(services.store.session_dir().is_dir());
        assert_eq!(services.store.inference_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_writes_final_session_log() {
        let tmp = TempDir::new().unwrap();
        let config = Config::new("127.0.0.1:1234", tmp.path());
        let services = bootstrap_services(config).unwrap();

        services.shutdown().await;
        assert!(services
            .store
            .session_dir()
            .join(crate::store::EXPERIMENT_LOG_FILE)
            .is_file());
        assert!(services.cancel_token.is_cancelled());
    }
}
