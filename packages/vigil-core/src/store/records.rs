//! Record types persisted under the session directory.
//!
//! These structs define the on-disk JSON shapes (`inference_result.json`,
//! `video_details.json`, `mcp_result.json`, `experiment_log.json`) and double
//! as the wire shapes pushed to WebSocket clients. Field names are stable;
//! consumers diff session logs across runs.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Scene Analysis
// ─────────────────────────────────────────────────────────────────────────────

/// Dimensions of the image the model actually saw.
///
/// Bounding boxes are stored exactly as the model emitted them; consumers use
/// these dimensions to remap into display coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageDimensions {
    pub model_width: u32,
    pub model_height: u32,
}

/// One detected person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    #[serde(default)]
    pub id: u32,
    /// `[x1, y1, x2, y2]` in model-pixel coordinates, stored as received.
    #[serde(default)]
    pub bbox: [f64; 4],
    #[serde(default)]
    pub activity: String,
}

/// One detected vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    #[serde(default)]
    pub id: u32,
    #[serde(default)]
    pub bbox: [f64; 4],
    #[serde(rename = "type", default)]
    pub vehicle_type: String,
    #[serde(default)]
    pub status: String,
}

/// Structured scene description parsed from the VLM response.
///
/// Missing optional fields default: `response` to empty, counts to 0, lists
/// to empty. Unknown fields in the model output are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SceneResult {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub people_count: u32,
    #[serde(default)]
    pub vehicle_count: u32,
    #[serde(default)]
    pub people: Vec<Person>,
    #[serde(default)]
    pub vehicles: Vec<Vehicle>,
    #[serde(default)]
    pub summary: String,
    /// Answer to the bound user question, when one was asked.
    #[serde(default)]
    pub response: String,
    /// Dimensions of the (possibly resized) media sent to the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_dimensions: Option<ImageDimensions>,
}

impl SceneResult {
    /// True when this result carries analytically meaningful content:
    /// non-zero object counts or a non-empty answer to a user question.
    #[must_use]
    pub fn is_meaningful(&self) -> bool {
        self.people_count > 0 || self.vehicle_count > 0 || !self.response.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MCP
// ─────────────────────────────────────────────────────────────────────────────

/// Result of one MCP control bridge invocation.
///
/// A failed bridge call is represented with `success = false` and a
/// diagnostic `result`; it never fails the parent inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct McpResult {
    pub success: bool,
    #[serde(default)]
    pub tool_name: String,
    #[serde(default)]
    pub arguments: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub ai_response: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Media Artifacts
// ─────────────────────────────────────────────────────────────────────────────

/// Descriptor for one frame sampled into a video artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampledFrame {
    /// Sequence number of the frame in the upstream stream.
    pub original_index: u64,
    /// Timestamp relative to session start (seconds).
    pub relative_timestamp: f64,
    /// File name inside the artifact directory.
    pub file_name: String,
}

/// Whether an artifact is a single frame or a sampled clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

/// One analyzable media artifact produced by the packager.
///
/// Each artifact owns a sub-directory under the session; the id is unique
/// within the session and stable for its lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaArtifact {
    pub id: String,
    pub kind: MediaKind,
    /// Artifact sub-directory (absolute).
    pub dir: PathBuf,
    /// The media file itself (`.jpg` or `.mp4`, absolute).
    pub media_path: PathBuf,
    /// `[first, last]` upstream sequence numbers covered by this artifact.
    pub frame_range: [u64; 2],
    /// ISO-8601 creation time.
    pub created_at: String,
    /// Unix creation timestamp (fractional seconds).
    pub created_timestamp: f64,
    /// Frames included in the artifact (one entry for images).
    pub sampled_frames: Vec<SampledFrame>,
    /// Target clip duration in seconds (video artifacts).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_duration_secs: Option<f64>,
    /// Effective sample rate achieved over the batch span (frames/second).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_sample_rate: Option<f64>,
    /// Dimensions of the encoded media after the resize policy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<ImageDimensions>,
}

impl MediaArtifact {
    /// File name of the media file, for `/api/videos/<filename>` lookups.
    #[must_use]
    pub fn file_name(&self) -> String {
        self.media_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Sampling metadata written to `video_details.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingInfo {
    pub target_duration_secs: f64,
    pub output_fps: u32,
    pub sample_count: usize,
    pub effective_sample_rate: f64,
}

/// On-disk shape of `video_details.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoDetails {
    pub video_path: PathBuf,
    pub frame_count: usize,
    pub start_time: String,
    pub end_time: String,
    pub start_relative_timestamp: f64,
    pub end_relative_timestamp: f64,
    pub original_frame_range: [u64; 2],
    pub sampled_frames: Vec<SampledFrame>,
    pub sampling_info: SamplingInfo,
}

// ─────────────────────────────────────────────────────────────────────────────
// Inference Records
// ─────────────────────────────────────────────────────────────────────────────

/// One inference attempt against a media artifact.
///
/// Written to `inference_result.json` only after the remote call returns
/// (success or definite failure). A record without `inference_end_timestamp`
/// is "in progress" and excluded from latest-with-AI queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRecord {
    pub media: MediaArtifact,
    pub inference_start_time: String,
    pub inference_start_timestamp: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inference_end_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inference_end_timestamp: Option<f64>,
    /// End minus start, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inference_duration: Option<f64>,
    /// The remote model's raw text response.
    #[serde(default)]
    pub raw_result: String,
    #[serde(default)]
    pub parsed_result: SceneResult,
    /// Question bound to this inference, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_question: Option<String>,
    /// Convenience copy of `parsed_result.response` when non-empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    /// Stable error kind for failed inferences.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp_result: Option<McpResult>,
}

impl InferenceRecord {
    /// Opens a pending record for an artifact about to be dispatched.
    #[must_use]
    pub fn pending(media: MediaArtifact, user_question: Option<String>) -> Self {
        Self {
            media,
            inference_start_time: crate::utils::now_iso(),
            inference_start_timestamp: crate::utils::now_secs_f64(),
            inference_end_time: None,
            inference_end_timestamp: None,
            inference_duration: None,
            raw_result: String::new(),
            parsed_result: SceneResult::default(),
            user_question,
            response: None,
            error: None,
            mcp_result: None,
        }
    }

    /// True once the remote call has returned.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.inference_end_timestamp.is_some()
    }

    /// The inclusive "analytically meaningful" predicate: a meaningful scene
    /// OR an attached MCP result qualifies.
    #[must_use]
    pub fn has_ai_content(&self) -> bool {
        self.parsed_result.is_meaningful() || self.mcp_result.is_some()
    }

    /// Stamps the end time and duration.
    pub fn finish(&mut self) {
        let end = crate::utils::now_secs_f64();
        self.inference_end_time = Some(crate::utils::now_iso());
        self.inference_duration = Some((end - self.inference_start_timestamp).max(0.0));
        self.inference_end_timestamp = Some(end);
    }
}

/// Session-level statistics written to `experiment_log.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SessionStatistics {
    pub total_frames: u64,
    pub total_artifacts: u64,
    pub total_inferences: u64,
    pub total_failed_inferences: u64,
    pub total_skipped_sync: u64,
    pub start_time: String,
    pub start_timestamp: f64,
    pub total_duration: f64,
}

/// On-disk shape of `experiment_log.json`.
///
/// `inference_log` is sorted ascending by `media.frame_range[0]` before every
/// write so logs diff cleanly across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentLog {
    pub processor_config: serde_json::Value,
    pub statistics: SessionStatistics,
    pub inference_log: Vec<InferenceRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(id: &str, first: u64, last: u64) -> MediaArtifact {
        MediaArtifact {
            id: id.to_string(),
            kind: MediaKind::Image,
            dir: PathBuf::from("/tmp/a"),
            media_path: PathBuf::from("/tmp/a/x.jpg"),
            frame_range: [first, last],
            created_at: "2026-01-01T00:00:00.000Z".to_string(),
            created_timestamp: 0.0,
            sampled_frames: vec![],
            target_duration_secs: None,
            effective_sample_rate: None,
            dimensions: None,
        }
    }

    mod meaningful {
        use super::*;

        #[test]
        fn empty_scene_is_not_meaningful() {
            assert!(!SceneResult::default().is_meaningful());
        }

        #[test]
        fn people_count_qualifies() {
            let scene = SceneResult {
                people_count: 3,
                ..Default::default()
            };
            assert!(scene.is_meaningful());
        }

        #[test]
        fn nonempty_response_qualifies() {
            let scene = SceneResult {
                response: "two people near the gate".to_string(),
                ..Default::default()
            };
            assert!(scene.is_meaningful());
        }

        #[test]
        fn mcp_result_alone_qualifies_record() {
            let mut record = InferenceRecord::pending(artifact("a", 1, 1), None);
            record.finish();
            assert!(!record.has_ai_content());
            record.mcp_result = Some(McpResult {
                success: true,
                tool_name: "ptz_move".to_string(),
                ..Default::default()
            });
            assert!(record.has_ai_content());
        }
    }

    mod lifecycle {
        use super::*;

        #[test]
        fn pending_record_is_incomplete() {
            let record = InferenceRecord::pending(artifact("a", 1, 5), None);
            assert!(!record.is_complete());
            assert!(record.inference_end_timestamp.is_none());
        }

        #[test]
        fn finish_orders_end_after_start() {
            let mut record = InferenceRecord::pending(artifact("a", 1, 5), None);
            record.finish();
            assert!(record.is_complete());
            assert!(
                record.inference_end_timestamp.unwrap() >= record.inference_start_timestamp,
                "end must not precede start"
            );
            assert!(record.inference_duration.unwrap() >= 0.0);
        }
    }

    mod serde_shapes {
        use super::*;

        #[test]
        fn scene_result_defaults_missing_fields() {
            let scene: SceneResult =
                serde_json::from_str(r#"{"summary":"quiet street"}"#).unwrap();
            assert_eq!(scene.people_count, 0);
            assert_eq!(scene.vehicle_count, 0);
            assert!(scene.people.is_empty());
            assert_eq!(scene.response, "");
            assert_eq!(scene.summary, "quiet street");
        }

        #[test]
        fn scene_result_ignores_unknown_fields() {
            let scene: SceneResult = serde_json::from_str(
                r#"{"summary":"x","people_count":1,"confidence":0.9,"extra":[1,2]}"#,
            )
            .unwrap();
            assert_eq!(scene.people_count, 1);
        }

        #[test]
        fn vehicle_type_round_trips_as_type() {
            let v = Vehicle {
                id: 1,
                bbox: [0.0, 0.0, 10.0, 10.0],
                vehicle_type: "truck".to_string(),
                status: "parked".to_string(),
            };
            let json = serde_json::to_value(&v).unwrap();
            assert_eq!(json["type"], "truck");
            let back: Vehicle = serde_json::from_value(json).unwrap();
            assert_eq!(back, v);
        }

        #[test]
        fn inference_record_round_trips_stable_fields() {
            let mut record = InferenceRecord::pending(artifact("a", 1, 75), Some("q".into()));
            record.raw_result = "```json\n{}\n```".to_string();
            record.parsed_result.summary = "calm".to_string();
            record.finish();

            let json = serde_json::to_string(&record).unwrap();
            let back: InferenceRecord = serde_json::from_str(&json).unwrap();
            assert_eq!(back.raw_result, record.raw_result);
            assert_eq!(back.parsed_result, record.parsed_result);
            assert_eq!(back.inference_start_timestamp, record.inference_start_timestamp);
            assert_eq!(back.inference_end_timestamp, record.inference_end_timestamp);
        }
    }
}
