//! Core configuration types.
//!
//! Provides the full configuration tree ([`Config`]) with one section per
//! subsystem. All fields have defaults usable out of the box; `validate()`
//! rejects values that would break invariants at runtime.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{
    ARTIFACT_QUEUE_CAPACITY, DEFAULT_CHECKPOINT_INTERVAL_SECS, DEFAULT_CONNECT_BACKOFF_MS,
    DEFAULT_CONNECT_RETRIES, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_INFERENCE_TIMEOUT_SECS,
    DEFAULT_MAX_CONCURRENT_INFERENCES, DEFAULT_MAX_FRAME_HEIGHT, DEFAULT_MAX_FRAME_WIDTH,
    DEFAULT_QUESTION_EXPIRY_SECS, DEFAULT_QUESTION_MAX_LEN, DEFAULT_TTS_MAX_RETRIES,
    DEFAULT_TTS_POLL_INTERVAL_SECS, DEFAULT_TTS_TIMEOUT_SECS, FRAME_QUEUE_CAPACITY,
    MIN_TTS_POLL_INTERVAL_SECS,
};

/// Whether at most one inference is in flight at a time, or up to
/// `max_concurrent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InferenceMode {
    /// One inference at a time; newer artifacts overwrite the pending slot.
    #[default]
    Sync,
    /// Up to `max_concurrent` inferences in flight.
    Async,
}

/// What causes a completed inference to be routed through the MCP bridge.
///
/// The source system left this trigger implicit; it is an explicit
/// configuration choice here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum McpTrigger {
    /// Never invoke the bridge.
    #[default]
    Never,
    /// Invoke the bridge only for inferences that carried a user question.
    OnQuestion,
    /// Invoke the bridge for every inference while the runtime sentry flag
    /// is enabled.
    Sentry,
}

/// Upstream TCP frame stream configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Upstream endpoint, `host:port`.
    pub endpoint: String,

    /// TCP connect timeout (seconds).
    pub connect_timeout_secs: u64,

    /// Connect attempts before the reader surfaces a terminal status.
    pub max_connect_retries: u32,

    /// Base delay for exponential connect backoff (milliseconds).
    pub connect_backoff_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:1234".to_string(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            max_connect_retries: DEFAULT_CONNECT_RETRIES,
            connect_backoff_ms: DEFAULT_CONNECT_BACKOFF_MS,
        }
    }
}

/// Media packager configuration.
///
/// The `(target_duration_secs, output_fps, target_frames_per_video)` triple
/// selects the operating mode: `(1, 1, 1)` means image mode, anything else
/// means video mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PackagerConfig {
    /// Time span covered by one video artifact (seconds).
    pub target_duration_secs: u64,

    /// Output FPS of the encoded MP4.
    pub output_fps: u32,

    /// Number of frames sampled into each video artifact.
    pub target_frames_per_video: u32,

    /// Assumed FPS of the upstream camera, used to size frame batches.
    pub expected_stream_fps: u32,

    /// Resize cap; frames larger than this are scaled down preserving aspect.
    pub max_width: u32,
    pub max_height: u32,

    /// Frame intake queue capacity (drop-oldest on overflow).
    pub frame_queue_capacity: usize,

    /// Ready-artifact queue capacity (blocking when full).
    pub artifact_queue_capacity: usize,
}

impl Default for PackagerConfig {
    fn default() -> Self {
        Self {
            target_duration_secs: 3,
            output_fps: 1,
            target_frames_per_video: 3,
            expected_stream_fps: 25,
            max_width: DEFAULT_MAX_FRAME_WIDTH,
            max_height: DEFAULT_MAX_FRAME_HEIGHT,
            frame_queue_capacity: FRAME_QUEUE_CAPACITY,
            artifact_queue_capacity: ARTIFACT_QUEUE_CAPACITY,
        }
    }
}

impl PackagerConfig {
    /// True when the mode triple selects single-frame (image) artifacts.
    #[must_use]
    pub fn is_image_mode(&self) -> bool {
        self.target_duration_secs == 1 && self.output_fps == 1 && self.target_frames_per_video == 1
    }

    /// Number of frames collected per batch in video mode.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        (self.target_duration_secs as usize * self.expected_stream_fps as usize).max(1)
    }

    /// Number of frames sampled from each closed batch.
    #[must_use]
    pub fn sample_count(&self) -> usize {
        (self.target_duration_secs as usize * self.output_fps as usize)
            .min(self.target_frames_per_video as usize)
            .max(1)
    }
}

/// Inference scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Sync-or-async inference discipline.
    pub mode: InferenceMode,

    /// Concurrency cap in async mode.
    pub max_concurrent: usize,

    /// Per-inference timeout (seconds).
    pub inference_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            mode: InferenceMode::Sync,
            max_concurrent: DEFAULT_MAX_CONCURRENT_INFERENCES,
            inference_timeout_secs: DEFAULT_INFERENCE_TIMEOUT_SECS,
        }
    }
}

/// Remote VLM endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VlmConfig {
    /// OpenAI-compatible chat completions base URL.
    pub base_url: String,

    /// Bearer API key. Overridable via `VIGIL_VLM_API_KEY`.
    pub api_key: String,

    /// Model identifier sent in the request body.
    pub model: String,

    /// System prompt for scene analysis.
    pub system_prompt: String,

    /// User prompt template. `{question}` is replaced with the active user
    /// question, or an empty string when none is bound.
    pub user_prompt_template: String,
}

impl Default for VlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.example.com/v1".to_string(),
            api_key: String::new(),
            model: "qwen-vl-max".to_string(),
            system_prompt: "You are a video surveillance analyst. Respond with a JSON object \
                            describing people, vehicles, and a one-sentence summary."
                .to_string(),
            user_prompt_template: "Analyze the attached footage. {question}".to_string(),
        }
    }
}

/// MCP control bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    /// Master switch for the bridge.
    pub enabled: bool,

    /// Base URL of the external camera-control inference service.
    pub base_url: String,

    /// What routes an inference through the bridge.
    pub trigger: McpTrigger,

    /// Request timeout (seconds).
    pub timeout_secs: u64,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "http://127.0.0.1:8765".to_string(),
            trigger: McpTrigger::Never,
            timeout_secs: 30,
        }
    }
}

/// User-question registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuestionConfig {
    /// Maximum accepted question length (characters).
    pub max_len: usize,

    /// Unconsumed questions are cleared after this many seconds.
    pub expiry_secs: u64,
}

impl Default for QuestionConfig {
    fn default() -> Self {
        Self {
            max_len: DEFAULT_QUESTION_MAX_LEN,
            expiry_secs: DEFAULT_QUESTION_EXPIRY_SECS,
        }
    }
}

/// TTS fan-out worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Master switch for the worker.
    pub enabled: bool,

    /// Target host, e.g. `http://127.0.0.1:5050`.
    pub host: String,

    /// Target endpoint path, e.g. `/speak`.
    pub endpoint: String,

    /// Poll cadence against the result store (seconds).
    pub poll_interval_secs: f64,

    /// Per-request timeout (seconds).
    pub request_timeout_secs: u64,

    /// Retry budget for transient failures.
    pub max_retries: u32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "http://127.0.0.1:5050".to_string(),
            endpoint: "/speak".to_string(),
            poll_interval_secs: DEFAULT_TTS_POLL_INTERVAL_SECS,
            request_timeout_secs: DEFAULT_TTS_TIMEOUT_SECS,
            max_retries: DEFAULT_TTS_MAX_RETRIES,
        }
    }
}

/// ASR intake server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AsrConfig {
    /// Master switch for the intake server.
    pub enabled: bool,

    /// Port for the intake router.
    pub port: u16,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8081,
        }
    }
}

/// Full configuration for the Vigil core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Port for the HTTP/WS delivery surface.
    pub port: u16,

    /// Root directory under which session directories are created.
    /// Overridable via `VIGIL_OUTPUT_DIR`.
    pub output_dir: PathBuf,

    /// Interval between session-log checkpoints (seconds).
    pub checkpoint_interval_secs: u64,

    /// Reattach to the most recent session directory under `output_dir`
    /// instead of starting a new session. The record registry is rebuilt
    /// from disk on startup.
    pub resume: bool,

    /// Whether sentry mode starts enabled.
    pub sentry_enabled: bool,

    pub ingest: IngestConfig,
    pub packager: PackagerConfig,
    pub scheduler: SchedulerConfig,
    pub vlm: VlmConfig,
    pub mcp: McpConfig,
    pub question: QuestionConfig,
    pub tts: TtsConfig,
    pub asr: AsrConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            output_dir: PathBuf::from("./output"),
            checkpoint_interval_secs: DEFAULT_CHECKPOINT_INTERVAL_SECS,
            resume: false,
            sentry_enabled: false,
            ingest: IngestConfig::default(),
            packager: PackagerConfig::default(),
            scheduler: SchedulerConfig::default(),
            vlm: VlmConfig::default(),
            mcp: McpConfig::default(),
            question: QuestionConfig::default(),
            tts: TtsConfig::default(),
            asr: AsrConfig::default(),
        }
    }
}

impl Config {
    /// Creates a config with defaults for everything except the required
    /// upstream endpoint and output root.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ingest: IngestConfig {
                endpoint: endpoint.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Applies environment variable overrides recognized by the core.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("VIGIL_VLM_API_KEY") {
            if !key.is_empty() {
                self.vlm.api_key = key;
            }
        }
        if let Ok(dir) = std::env::var("VIGIL_OUTPUT_DIR") {
            if !dir.is_empty() {
                self.output_dir = PathBuf::from(dir);
            }
        }
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.ingest.endpoint.is_empty() {
            return Err("ingest.endpoint must be set".to_string());
        }
        if self.packager.frame_queue_capacity == 0 {
            return Err("packager.frame_queue_capacity must be >= 1".to_string());
        }
        if self.packager.artifact_queue_capacity == 0 {
            return Err("packager.artifact_queue_capacity must be >= 1".to_string());
        }
        if self.packager.output_fps == 0 {
            return Err("packager.output_fps must be >= 1".to_string());
        }
        if self.packager.expected_stream_fps == 0 {
            return Err("packager.expected_stream_fps must be >= 1".to_string());
        }
        if self.scheduler.max_concurrent == 0 {
            return Err("scheduler.max_concurrent must be >= 1 (use sync mode to serialize)"
                .to_string());
        }
        if self.tts.enabled && self.tts.poll_interval_secs < MIN_TTS_POLL_INTERVAL_SECS {
            return Err(format!(
                "tts.poll_interval_secs must be >= {}",
                MIN_TTS_POLL_INTERVAL_SECS
            ));
        }
        if self.question.max_len == 0 {
            return Err("question.max_len must be >= 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod packager_mode {
        use super::*;

        #[test]
        fn unit_triple_selects_image_mode() {
            let cfg = PackagerConfig {
                target_duration_secs: 1,
                output_fps: 1,
                target_frames_per_video: 1,
                ..Default::default()
            };
            assert!(cfg.is_image_mode());
        }

        #[test]
        fn default_triple_selects_video_mode() {
            assert!(!PackagerConfig::default().is_image_mode());
        }

        #[test]
        fn batch_size_covers_target_duration() {
            let cfg = PackagerConfig {
                target_duration_secs: 3,
                expected_stream_fps: 25,
                ..Default::default()
            };
            assert_eq!(cfg.batch_size(), 75);
        }

        #[test]
        fn sample_count_is_duration_times_fps() {
            let cfg = PackagerConfig {
                target_duration_secs: 3,
                output_fps: 1,
                target_frames_per_video: 3,
                ..Default::default()
            };
            assert_eq!(cfg.sample_count(), 3);
        }

        #[test]
        fn sample_count_never_zero() {
            let cfg = PackagerConfig {
                target_duration_secs: 0,
                output_fps: 1,
                target_frames_per_video: 1,
                ..Default::default()
            };
            assert_eq!(cfg.sample_count(), 1);
        }
    }

    mod validation {
        use super::*;

        #[test]
        fn default_config_with_endpoint_is_valid() {
            let cfg = Config::new("127.0.0.1:1234", "/tmp/out");
            assert!(cfg.validate().is_ok());
        }

        #[test]
        fn empty_endpoint_rejected() {
            let mut cfg = Config::new("127.0.0.1:1234", "/tmp/out");
            cfg.ingest.endpoint.clear();
            assert!(cfg.validate().is_err());
        }

        #[test]
        fn zero_concurrency_rejected() {
            let mut cfg = Config::new("127.0.0.1:1234", "/tmp/out");
            cfg.scheduler.max_concurrent = 0;
            assert!(cfg.validate().is_err());
        }

        #[test]
        fn sub_minimum_tts_cadence_rejected() {
            let mut cfg = Config::new("127.0.0.1:1234", "/tmp/out");
            cfg.tts.enabled = true;
            cfg.tts.poll_interval_secs = 0.01;
            assert!(cfg.validate().is_err());
        }
    }
}
