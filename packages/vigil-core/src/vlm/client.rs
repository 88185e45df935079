//! Client for the remote OpenAI-compatible vision-language endpoint.
//!
//! One operation: [`VlmClient::analyze`]. Media is inlined into the chat
//! request as a base64 data URL (`video_url` for clips, `image_url` for
//! frames); the response's `choices[0].message.content` is run through the
//! total parser in [`crate::vlm::parse`].

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;

use super::parse::{parse_response, McpIntent};
use crate::error::VlmError;
use crate::state::VlmConfig;
use crate::store::records::{MediaArtifact, MediaKind, SceneResult};

/// Result of one analyze call.
#[derive(Debug, Clone, Default)]
pub struct VlmAnalysis {
    /// The remote model's raw text response.
    pub raw: String,
    pub scene: SceneResult,
    /// Non-JSON prose preceding the structured payload.
    pub prelude: String,
    /// Parsed camera-control intent, if the model emitted one.
    pub mcp_intent: Option<McpIntent>,
    /// Present when the structured payload would not parse; `scene` holds
    /// defaults in that case.
    pub parse_error: Option<String>,
}

/// Seam for the remote model so the scheduler can be driven by mocks.
#[async_trait]
pub trait VlmClient: Send + Sync {
    /// Sends the artifact (plus the bound user question, if any) for
    /// structured scene understanding.
    async fn analyze(
        &self,
        media: &MediaArtifact,
        question: Option<&str>,
    ) -> Result<VlmAnalysis, VlmError>;
}

/// `reqwest`-backed client for OpenAI-compatible chat completions.
pub struct HttpVlmClient {
    http: reqwest::Client,
    config: VlmConfig,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

impl HttpVlmClient {
    pub fn new(http: reqwest::Client, config: VlmConfig) -> Self {
        Self { http, config }
    }

    fn media_part(media: &MediaArtifact, bytes: &[u8]) -> serde_json::Value {
        let encoded = BASE64.encode(bytes);
        match media.kind {
            MediaKind::Video => json!({
                "type": "video_url",
                "video_url": { "url": format!("data:video/mp4;base64,{}", encoded) },
            }),
            MediaKind::Image => json!({
                "type": "image_url",
                "image_url": { "url": format!("data:image/jpeg;base64,{}", encoded) },
            }),
        }
    }

    fn user_text(&self, question: Option<&str>) -> String {
        self.config
            .user_prompt_template
            .replace("{question}", question.unwrap_or(""))
            .trim()
            .to_string()
    }
}

#[async_trait]
impl VlmClient for HttpVlmClient {
    async fn analyze(
        &self,
        media: &MediaArtifact,
        question: Option<&str>,
    ) -> Result<VlmAnalysis, VlmError> {
        let bytes = tokio::fs::read(&media.media_path)
            .await
            .map_err(|e| VlmError::Transient(format!("read {}: {}", media.media_path.display(), e)))?;

        let body = json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": self.config.system_prompt },
                {
                    "role": "user",
                    "content": [
                        Self::media_part(media, &bytes),
                        { "type": "text", "text": self.user_text(question) },
                    ],
                },
            ],
        });

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(VlmError::Transient(format!(
                "HTTP {} from {}: {}",
                status,
                url,
                detail.chars().take(200).collect::<String>()
            )));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| VlmError::Parse(format!("completion envelope: {}", e)))?;
        let raw = completion
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| VlmError::Parse("empty choices".to_string()))?;

        let parsed = parse_response(&raw);
        let mut scene = parsed.scene;
        // Record the dimensions the model actually saw so consumers can
        // remap bboxes; never normalize at record time.
        if scene.image_dimensions.is_none() {
            scene.image_dimensions = media.dimensions;
        }

        Ok(VlmAnalysis {
            raw,
            scene,
            prelude: parsed.prelude,
            mcp_intent: parsed.mcp_intent,
            parse_error: parsed.parse_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_text_interpolates_question() {
        let client = HttpVlmClient::new(
            reqwest::Client::new(),
            VlmConfig {
                user_prompt_template: "Analyze the footage. {question}".to_string(),
                ..Default::default()
            },
        );
        assert_eq!(
            client.user_text(Some("how many people?")),
            "Analyze the footage. how many people?"
        );
        assert_eq!(client.user_text(None), "Analyze the footage.");
    }

    #[test]
    fn media_part_types_follow_artifact_kind() {
        let mut media = MediaArtifact {
            id: "0001".to_string(),
            kind: MediaKind::Video,
            dir: "/tmp/a".into(),
            media_path: "/tmp/a/sampled_video_0001.mp4".into(),
            frame_range: [1, 75],
            created_at: String::new(),
            created_timestamp: 0.0,
            sampled_frames: vec![],
            target_duration_secs: None,
            effective_sample_rate: None,
            dimensions: None,
        };

        let part = HttpVlmClient::media_part(&media, b"abc");
        assert_eq!(part["type"], "video_url");
        let url = part["video_url"]["url"].as_str().unwrap();
        assert!(url.starts_with("data:video/mp4;base64,"));

        media.kind = MediaKind::Image;
        let part = HttpVlmClient::media_part(&media, b"abc");
        assert_eq!(part["type"], "image_url");
        let url = part["image_url"]["url"].as_str().unwrap();
        assert!(url.starts_with("data:image/jpeg;base64,"));
        assert!(url.ends_with(&BASE64.encode(b"abc")));
    }
}
