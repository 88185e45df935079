//! MCP control bridge.
//!
//! Thin HTTP client to the external camera-control inference service. A
//! bridge failure is folded into an [`McpResult`] with `success = false` and
//! a diagnostic `result`; it never fails the parent inference.

use std::time::Duration;

use serde::Serialize;

use crate::state::McpConfig;
use crate::store::records::McpResult;

/// Request body for `POST /analyze` on the control service.
#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    image_path: &'a str,
    user_question: &'a str,
}

/// HTTP client for the external camera-control service.
pub struct McpBridge {
    http: reqwest::Client,
    config: McpConfig,
}

impl McpBridge {
    pub fn new(http: reqwest::Client, config: McpConfig) -> Self {
        Self { http, config }
    }

    /// Forwards the media path and instruction to the control service.
    ///
    /// Always returns a result; connection and HTTP errors are reported in
    /// the payload rather than as an `Err`.
    pub async fn analyze(&self, media_path: &str, user_question: &str) -> McpResult {
        let url = format!("{}/analyze", self.config.base_url.trim_end_matches('/'));
        let request = AnalyzeRequest {
            image_path: media_path,
            user_question,
        };

        let response = self
            .http
            .post(&url)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .json(&request)
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => {
                match response.json::<McpResult>().await {
                    Ok(result) => result,
                    Err(err) => failure(format!("malformed bridge response: {}", err)),
                }
            }
            Ok(response) => failure(format!("bridge returned HTTP {}", response.status())),
            Err(err) => failure(format!("bridge unreachable: {}", err)),
        }
    }
}

fn failure(diagnostic: String) -> McpResult {
    log::warn!("[MCP] {}", diagnostic);
    McpResult {
        success: false,
        result: diagnostic,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_bridge_degrades_to_failed_result() {
        let bridge = McpBridge::new(
            reqwest::Client::new(),
            McpConfig {
                enabled: true,
                // Nothing listens here.
                base_url: "http://127.0.0.1:1".to_string(),
                timeout_secs: 1,
                ..Default::default()
            },
        );

        let result = bridge.analyze("/tmp/clip.mp4", "follow the person").await;
        assert!(!result.success);
        assert!(result.result.contains("unreachable"));
        assert!(result.tool_name.is_empty());
    }
}
