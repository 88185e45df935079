//! Session-scoped result store.
//!
//! The store owns the on-disk session directory and an in-memory registry of
//! artifacts and inference records. All JSON files are written via
//! temp-then-rename so readers never observe a partial file; writes within
//! one artifact directory are serialized by a per-directory lock, and the
//! session-log rewrite is serialized globally.
//!
//! There is no cross-session state: on a cold start over an existing
//! directory, `rescan` rebuilds the registry from disk and queries are
//! served from memory thereafter.

pub mod records;

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use crate::error::StoreError;
use crate::state::Config;
use crate::utils;
use records::{ExperimentLog, InferenceRecord, MediaArtifact, SessionStatistics, VideoDetails};

/// File name of the per-artifact inference record.
pub const INFERENCE_RESULT_FILE: &str = "inference_result.json";
/// File name of the per-artifact MCP record.
pub const MCP_RESULT_FILE: &str = "mcp_result.json";
/// File name of the per-video sampling details.
pub const VIDEO_DETAILS_FILE: &str = "video_details.json";
/// File name of the session log.
pub const EXPERIMENT_LOG_FILE: &str = "experiment_log.json";

/// Modification time of an artifact's media file.
///
/// Artifacts whose media file is gone sort before every real file.
fn artifact_mtime(artifact: &MediaArtifact) -> SystemTime {
    fs::metadata(&artifact.media_path)
        .and_then(|meta| meta.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

/// Serializes a value to `path` via a sibling temp file and atomic rename.
fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let io_err = |source: std::io::Error| StoreError::Io {
        path: path.display().to_string(),
        source,
    };

    let parent = path.parent().ok_or_else(|| {
        io_err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "path has no parent",
        ))
    })?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(io_err)?;
    let body = serde_json::to_vec_pretty(value)?;
    tmp.write_all(&body).map_err(io_err)?;
    tmp.persist(path)
        .map_err(|e| io_err(e.error))
        .map(|_| ())
}

/// Session-scoped store for media artifacts and inference records.
pub struct SessionStore {
    session_id: String,
    session_dir: PathBuf,
    started_at: DateTime<Local>,
    start_timestamp: f64,
    config_snapshot: serde_json::Value,
    video_counter: AtomicU64,
    total_frames: AtomicU64,
    total_skipped_sync: AtomicU64,
    total_failed: AtomicU64,
    /// Artifacts in creation order (newest last).
    artifacts: RwLock<Vec<MediaArtifact>>,
    /// Completed records keyed by artifact id.
    records: RwLock<HashMap<String, InferenceRecord>>,
    /// Per-artifact-directory write locks.
    dir_locks: DashMap<PathBuf, Arc<Mutex<()>>>,
    /// Serializes session-log rewrites.
    log_lock: Mutex<()>,
}

impl SessionStore {
    /// Creates the session directory under `config.output_dir` and returns
    /// the store rooted there.
    pub fn create(config: &Config) -> Result<Self, StoreError> {
        let started_at = Local::now();
        let session_id = utils::session_id(started_at);
        let session_dir = config.output_dir.join(&session_id);

        fs::create_dir_all(&session_dir).map_err(|source| StoreError::Io {
            path: session_dir.display().to_string(),
            source,
        })?;
        log::info!("[Store] Session directory: {}", session_dir.display());

        Ok(Self {
            session_id,
            session_dir,
            started_at,
            start_timestamp: utils::now_secs_f64(),
            config_snapshot: serde_json::to_value(config).unwrap_or(serde_json::Value::Null),
            video_counter: AtomicU64::new(0),
            total_frames: AtomicU64::new(0),
            total_skipped_sync: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
            artifacts: RwLock::new(Vec::new()),
            records: RwLock::new(HashMap::new()),
            dir_locks: DashMap::new(),
            log_lock: Mutex::new(()),
        })
    }

    /// Attaches to an existing session directory instead of stamping a new
    /// one. The registry starts empty; call [`SessionStore::rescan`] to
    /// rebuild it from disk.
    pub fn attach(config: &Config, session_dir: PathBuf) -> Result<Self, StoreError> {
        if !session_dir.is_dir() {
            return Err(StoreError::Io {
                path: session_dir.display().to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "session directory does not exist",
                ),
            });
        }

        let session_id = session_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "session_unknown".to_string());
        // Recover the original start time from the directory name so
        // statistics span the whole session, not just this process run.
        let started_at = session_id
            .strip_prefix("session_")
            .and_then(|stamp| NaiveDateTime::parse_from_str(stamp, "%Y%m%d_%H%M%S").ok())
            .and_then(|naive| Local.from_local_datetime(&naive).single())
            .unwrap_or_else(Local::now);
        log::info!("[Store] Attached to session directory: {}", session_dir.display());

        Ok(Self {
            session_id,
            session_dir,
            started_at,
            start_timestamp: started_at.timestamp_millis() as f64 / 1000.0,
            config_snapshot: serde_json::to_value(config).unwrap_or(serde_json::Value::Null),
            video_counter: AtomicU64::new(0),
            total_frames: AtomicU64::new(0),
            total_skipped_sync: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
            artifacts: RwLock::new(Vec::new()),
            records: RwLock::new(HashMap::new()),
            dir_locks: DashMap::new(),
            log_lock: Mutex::new(()),
        })
    }

    /// Finds the most recent `session_*` directory under `output_dir`.
    /// Session ids carry their timestamp, so name order is creation order.
    #[must_use]
    pub fn latest_session_dir(output_dir: &Path) -> Option<PathBuf> {
        let entries = fs::read_dir(output_dir).ok()?;
        entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .filter(|path| {
                path.file_name()
                    .map(|name| name.to_string_lossy().starts_with("session_"))
                    .unwrap_or(false)
            })
            .max()
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    /// Seconds elapsed since session start.
    #[must_use]
    pub fn uptime_secs(&self) -> f64 {
        (utils::now_secs_f64() - self.start_timestamp).max(0.0)
    }

    fn dir_lock(&self, dir: &Path) -> Arc<Mutex<()>> {
        self.dir_locks
            .entry(dir.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Allocation
    // ─────────────────────────────────────────────────────────────────────

    /// Allocates the next video artifact id (`0001`, `0002`, ...).
    ///
    /// Call only after a successful encode so a discarded batch does not
    /// advance the counter.
    pub fn next_video_id(&self) -> String {
        format!("{:04}", self.video_counter.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Creates the details directory for an image artifact.
    pub fn create_image_dir(
        &self,
        frame_seq: u64,
        captured: DateTime<Local>,
    ) -> Result<PathBuf, StoreError> {
        let (hms, ms) = utils::frame_dir_time(captured);
        let dir = self
            .session_dir
            .join(format!("frame_{}_{}_{}_details", frame_seq, hms, ms));
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        Ok(dir)
    }

    /// Creates the details directory for a video artifact.
    pub fn create_video_dir(&self, video_id: &str) -> Result<PathBuf, StoreError> {
        let dir = self
            .session_dir
            .join(format!("sampled_video_{}_details", video_id));
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        Ok(dir)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────

    /// Registers a freshly packaged artifact, persisting video details for
    /// clips.
    pub fn register_artifact(
        &self,
        artifact: MediaArtifact,
        details: Option<&VideoDetails>,
    ) -> Result<(), StoreError> {
        if let Some(details) = details {
            let lock = self.dir_lock(&artifact.dir);
            let _guard = lock.lock();
            write_json_atomic(&artifact.dir.join(VIDEO_DETAILS_FILE), details)?;
        }
        self.artifacts.write().push(artifact);
        Ok(())
    }

    /// Persists a completed inference record into its artifact directory and
    /// the in-memory registry.
    pub fn write_inference(&self, record: InferenceRecord) -> Result<(), StoreError> {
        let dir = record.media.dir.clone();
        let lock = self.dir_lock(&dir);
        {
            let _guard = lock.lock();
            write_json_atomic(&dir.join(INFERENCE_RESULT_FILE), &record)?;
            if let Some(mcp) = &record.mcp_result {
                write_json_atomic(&dir.join(MCP_RESULT_FILE), mcp)?;
            }
        }

        if record.error.is_some() {
            self.total_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.records
            .write()
            .insert(record.media.id.clone(), record);
        Ok(())
    }

    /// Updates the session frame total (owned by the reader).
    pub fn set_total_frames(&self, frames: u64) {
        self.total_frames.store(frames, Ordering::Relaxed);
    }

    /// Updates the skipped-in-sync-mode counter (owned by the scheduler).
    pub fn set_total_skipped_sync(&self, skipped: u64) {
        self.total_skipped_sync.store(skipped, Ordering::Relaxed);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────

    /// The most recently created artifact, by filesystem mtime of its media
    /// file, tie-broken by id.
    #[must_use]
    pub fn latest_media(&self) -> Option<MediaArtifact> {
        let artifacts = self.artifacts.read();
        artifacts
            .iter()
            .max_by(|a, b| {
                artifact_mtime(a)
                    .cmp(&artifact_mtime(b))
                    .then_with(|| a.id.cmp(&b.id))
            })
            .cloned()
    }

    /// The latest completed inference record.
    #[must_use]
    pub fn latest_inference(&self) -> Option<InferenceRecord> {
        self.latest_matching(|_| true)
    }

    /// The latest record that is analytically meaningful: non-zero object
    /// counts, a non-empty response, or an attached MCP result.
    #[must_use]
    pub fn latest_inference_with_ai(&self) -> Option<InferenceRecord> {
        self.latest_matching(InferenceRecord::has_ai_content)
    }

    fn latest_matching(&self, pred: impl Fn(&InferenceRecord) -> bool) -> Option<InferenceRecord> {
        let artifacts = self.artifacts.read();
        let records = self.records.read();
        artifacts
            .iter()
            .rev()
            .filter_map(|a| records.get(&a.id))
            .find(|r| r.is_complete() && pred(r))
            .cloned()
    }

    /// Completed records, newest-first, bounded by `limit`.
    #[must_use]
    pub fn history(&self, limit: usize) -> Vec<InferenceRecord> {
        let artifacts = self.artifacts.read();
        let records = self.records.read();
        artifacts
            .iter()
            .rev()
            .filter_map(|a| records.get(&a.id))
            .filter(|r| r.is_complete())
            .take(limit)
            .cloned()
            .collect()
    }

    /// Artifacts, newest-first, bounded by `limit`.
    #[must_use]
    pub fn media_history(&self, limit: usize) -> Vec<MediaArtifact> {
        let artifacts = self.artifacts.read();
        artifacts.iter().rev().take(limit).cloned().collect()
    }

    /// Number of completed inference records.
    #[must_use]
    pub fn inference_count(&self) -> usize {
        self.records.read().len()
    }

    /// Resolves a media file name to its absolute path, for playback
    /// endpoints. Searches artifact media files and sampled frame files.
    #[must_use]
    pub fn media_path(&self, file_name: &str) -> Option<PathBuf> {
        // Reject traversal; only bare file names are valid.
        if file_name.contains('/') || file_name.contains('\\') || file_name.contains("..") {
            return None;
        }
        let artifacts = self.artifacts.read();
        for artifact in artifacts.iter().rev() {
            if artifact.file_name() == file_name {
                return Some(artifact.media_path.clone());
            }
            if artifact
                .sampled_frames
                .iter()
                .any(|f| f.file_name == file_name)
            {
                return Some(artifact.dir.join(file_name));
            }
        }
        None
    }

    /// Clears the in-memory record registry. On-disk session data is
    /// untouched.
    pub fn clear_history(&self) -> usize {
        let mut records = self.records.write();
        let cleared = records.len();
        records.clear();
        cleared
    }

    // ─────────────────────────────────────────────────────────────────────
    // Session Log
    // ─────────────────────────────────────────────────────────────────────

    fn statistics(&self) -> SessionStatistics {
        SessionStatistics {
            total_frames: self.total_frames.load(Ordering::Relaxed),
            total_artifacts: self.artifacts.read().len() as u64,
            total_inferences: self.records.read().len() as u64,
            total_failed_inferences: self.total_failed.load(Ordering::Relaxed),
            total_skipped_sync: self.total_skipped_sync.load(Ordering::Relaxed),
            start_time: self.started_at.to_rfc3339(),
            start_timestamp: self.start_timestamp,
            total_duration: self.uptime_secs(),
        }
    }

    /// Builds the current session log, with `inference_log` sorted ascending
    /// by the media's first frame sequence number.
    #[must_use]
    pub fn experiment_log(&self) -> ExperimentLog {
        let mut inference_log: Vec<InferenceRecord> =
            self.records.read().values().cloned().collect();
        inference_log.sort_by_key(|r| r.media.frame_range[0]);

        ExperimentLog {
            processor_config: self.config_snapshot.clone(),
            statistics: self.statistics(),
            inference_log,
        }
    }

    /// Atomically rewrites `experiment_log.json`. Called on periodic
    /// checkpoints and at session end.
    pub fn checkpoint(&self) -> Result<(), StoreError> {
        let log = self.experiment_log();
        let _guard = self.log_lock.lock();
        write_json_atomic(&self.session_dir.join(EXPERIMENT_LOG_FILE), &log)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Cold Start
    // ─────────────────────────────────────────────────────────────────────

    /// Rebuilds the in-memory registry from the session directory.
    ///
    /// Used after `clear_history` or when attaching to an existing session
    /// directory; queries are served from memory thereafter.
    pub fn rescan(&self) -> Result<usize, StoreError> {
        let mut loaded = Vec::new();
        let entries = fs::read_dir(&self.session_dir).map_err(|source| StoreError::Io {
            path: self.session_dir.display().to_string(),
            source,
        })?;

        let mut max_video_id = 0u64;
        for entry in entries.flatten() {
            // Restore the clip id counter from artifact directory names so a
            // resumed session never reuses an id, even for artifacts that
            // have no inference record yet.
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(id) = name
                .strip_prefix("sampled_video_")
                .and_then(|rest| rest.strip_suffix("_details"))
            {
                if let Ok(n) = id.parse::<u64>() {
                    max_video_id = max_video_id.max(n);
                }
            }

            let path = entry.path().join(INFERENCE_RESULT_FILE);
            if !path.is_file() {
                continue;
            }
            match fs::read_to_string(&path) {
                Ok(body) => match serde_json::from_str::<InferenceRecord>(&body) {
                    Ok(record) => loaded.push(record),
                    Err(err) => {
                        log::warn!("[Store] Skipping unreadable record {}: {}", path.display(), err)
                    }
                },
                Err(err) => {
                    log::warn!("[Store] Skipping unreadable record {}: {}", path.display(), err)
                }
            }
        }
        self.video_counter.fetch_max(max_video_id, Ordering::Relaxed);

        // Same ordering contract as `latest_media`: filesystem mtime of the
        // media file, tie-broken by id. Registry append order then matches
        // what the live path would have produced.
        loaded.sort_by(|a, b| {
            artifact_mtime(&a.media)
                .cmp(&artifact_mtime(&b.media))
                .then_with(|| a.media.id.cmp(&b.media.id))
        });

        let count = loaded.len();
        let mut artifacts = self.artifacts.write();
        let mut records = self.records.write();
        for record in loaded {
            if !artifacts.iter().any(|a| a.id == record.media.id) {
                artifacts.push(record.media.clone());
            }
            records.insert(record.media.id.clone(), record);
        }
        Ok(count)
    }
}
