//! TTS fan-out worker.
//!
//! Polls the result store for newly finalized inference records and forwards
//! each record's summary to the external speech endpoint. Records are
//! de-duplicated by `(artifact_dir, inference_end_timestamp)` so a worker
//! restart never speaks the same result twice; empty summaries are skipped.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::state::TtsConfig;
use crate::store::records::InferenceRecord;
use crate::store::SessionStore;

/// How many records to examine per poll. New records arrive at inference
/// cadence, so a small window is plenty.
const POLL_WINDOW: usize = 20;

/// De-duplication key for one spoken record.
fn dedupe_key(record: &InferenceRecord) -> Option<(String, String)> {
    let end = record.inference_end_timestamp?;
    Some((
        record.media.dir.display().to_string(),
        format!("{:.6}", end),
    ))
}

/// Store-polling worker pushing summaries to the speech endpoint.
pub struct TtsWorker {
    http: reqwest::Client,
    config: TtsConfig,
    store: Arc<SessionStore>,
    cancel: CancellationToken,
    spoken: Mutex<HashSet<(String, String)>>,
}

impl TtsWorker {
    pub fn new(
        http: reqwest::Client,
        config: TtsConfig,
        store: Arc<SessionStore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            http,
            config,
            store,
            cancel,
            spoken: Mutex::new(HashSet::new()),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}{}",
            self.config.host.trim_end_matches('/'),
            self.config.endpoint
        )
    }

    /// Worker entry point.
    pub async fn run(self: Arc<Self>) {
        let cadence = Duration::from_secs_f64(self.config.poll_interval_secs);
        log::info!(
            "[TTS] Forwarding summaries to {} every {:.1}s",
            self.endpoint(),
            self.config.poll_interval_secs
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(cadence) => {}
            }
            self.process_once().await;
        }
        log::info!("[TTS] Stopped");
    }

    /// One poll cycle: finds unseen finalized records and speaks them,
    /// oldest first.
    pub async fn process_once(&self) {
        let mut fresh: Vec<InferenceRecord> = Vec::new();
        {
            let spoken = self.spoken.lock();
            for record in self.store.history(POLL_WINDOW) {
                match dedupe_key(&record) {
                    Some(key) if !spoken.contains(&key) => fresh.push(record),
                    _ => {}
                }
            }
        }
        fresh.reverse(); // history is newest-first; speak in arrival order

        for record in fresh {
            let Some(key) = dedupe_key(&record) else { continue };
            // Mark before sending: a flapping endpoint must not cause the
            // same summary to be spoken twice after a late success.
            self.spoken.lock().insert(key);

            let summary = record.parsed_result.summary.trim();
            if summary.is_empty() {
                log::debug!("[TTS] Skipping {}: empty summary", record.media.id);
                continue;
            }
            self.speak(summary).await;
        }
    }

    /// Sends one summary with bounded retries on transient failures.
    async fn speak(&self, text: &str) {
        let url = self.endpoint();
        let timeout = Duration::from_secs(self.config.request_timeout_secs);

        for attempt in 1..=self.config.max_retries.max(1) {
            let result = self
                .http
                .post(&url)
                .timeout(timeout)
                .json(&json!({ "text": text }))
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    log::debug!("[TTS] Spoke {} chars", text.len());
                    return;
                }
                Ok(response) => {
                    log::warn!(
                        "[TTS] Endpoint returned HTTP {} (attempt {})",
                        response.status(),
                        attempt
                    );
                }
                Err(err) => {
                    log::warn!("[TTS] Request failed (attempt {}): {}", attempt, err);
                }
            }

            if attempt < self.config.max_retries {
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        }
        log::warn!("[TTS] Giving up after {} attempts", self.config.max_retries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Config;
    use crate::store::records::{MediaArtifact, MediaKind};
    use axum::routing::post;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn store() -> (Arc<SessionStore>, TempDir) {
        let tmp = TempDir::new().unwrap();
        let config = Config::new("127.0.0.1:1234", tmp.path());
        (Arc::new(SessionStore::create(&config).unwrap()), tmp)
    }

    fn record(store: &SessionStore, id: &str, summary: &str) -> InferenceRecord {
        let dir = store.create_video_dir(id).unwrap();
        let media = MediaArtifact {
            id: id.to_string(),
            kind: MediaKind::Video,
            media_path: dir.join(format!("sampled_video_{}.mp4", id)),
            dir,
            frame_range: [1, 75],
            created_at: crate::utils::now_iso(),
            created_timestamp: crate::utils::now_secs_f64(),
            sampled_frames: vec![],
            target_duration_secs: Some(3.0),
            effective_sample_rate: Some(1.0),
            dimensions: None,
        };
        let mut record = InferenceRecord::pending(media, None);
        record.parsed_result.summary = summary.to_string();
        record.finish();
        record
    }

    /// Spins up a local speech endpoint that counts requests.
    async fn speech_endpoint() -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let app = Router::new().route(
            "/speak",
            post(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    "ok"
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), hits)
    }

    fn worker(store: Arc<SessionStore>, host: String) -> TtsWorker {
        TtsWorker::new(
            reqwest::Client::new(),
            TtsConfig {
                enabled: true,
                host,
                endpoint: "/speak".to_string(),
                poll_interval_secs: 0.1,
                request_timeout_secs: 2,
                max_retries: 1,
            },
            store,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn speaks_each_record_exactly_once() {
        let (store, _tmp) = store();
        let (host, hits) = speech_endpoint().await;
        let worker = worker(Arc::clone(&store), host);

        let record = record(&store, "0001", "two people near the gate");
        store.register_artifact(record.media.clone(), None).unwrap();
        store.write_inference(record).unwrap();

        // Two polls over the same finalized record (simulates a worker
        // restart re-reading history).
        worker.process_once().await;
        worker.process_once().await;

        assert_eq!(hits.load(Ordering::SeqCst), 1, "dedupe by (dir, end_ts)");
    }

    #[tokio::test]
    async fn empty_summaries_are_skipped() {
        let (store, _tmp) = store();
        let (host, hits) = speech_endpoint().await;
        let worker = worker(Arc::clone(&store), host);

        let record = record(&store, "0001", "   ");
        store.register_artifact(record.media.clone(), None).unwrap();
        store.write_inference(record).unwrap();

        worker.process_once().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn speaks_multiple_records_in_arrival_order() {
        let (store, _tmp) = store();
        let (host, hits) = speech_endpoint().await;
        let worker = worker(Arc::clone(&store), host);

        for id in ["0001", "0002"] {
            let record = record(&store, id, "someone is at the door");
            store.register_artifact(record.media.clone(), None).unwrap();
            store.write_inference(record).unwrap();
        }

        worker.process_once().await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn incomplete_records_have_no_dedupe_key() {
        let (store, _tmp) = store();
        let mut rec = record(&store, "0001", "x");
        rec.inference_end_timestamp = None;
        assert!(dedupe_key(&rec).is_none());
    }
}
