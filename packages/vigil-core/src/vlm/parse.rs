//! Total parsing of VLM responses.
//!
//! Model output is treated as `prelude? + fenced_json + postlude?`. The JSON
//! payload is parsed into a [`SceneResult`] with defaulted optional fields;
//! the non-empty prelude is retained as prose. The full raw text is also
//! scanned for a `<use_mcp_tool>` block describing camera-control intent.
//! Parsing never fails out of this module: malformed input degrades to a
//! default scene plus a recorded parse error.

use std::collections::BTreeMap;

use crate::store::records::SceneResult;

/// Camera-control intent extracted from a `<use_mcp_tool>` block.
///
/// This is parsed intent only; execution is the control bridge's job.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct McpIntent {
    pub tool_name: String,
    pub arguments: BTreeMap<String, serde_json::Value>,
    pub reason: String,
}

/// Outcome of parsing one raw model response.
#[derive(Debug, Clone, Default)]
pub struct ParsedResponse {
    pub scene: SceneResult,
    /// Non-JSON prose preceding the fenced payload, if any.
    pub prelude: String,
    pub mcp_intent: Option<McpIntent>,
    /// Set when the payload was not valid JSON; the scene holds defaults.
    pub parse_error: Option<String>,
}

/// Parses a raw chat-completion text into scene, prose, and MCP intent.
#[must_use]
pub fn parse_response(raw: &str) -> ParsedResponse {
    let (prelude, payload) = split_fenced_json(raw);

    let (scene, parse_error) = match serde_json::from_str::<SceneResult>(&payload) {
        Ok(scene) => (scene, None),
        Err(err) => (SceneResult::default(), Some(err.to_string())),
    };

    ParsedResponse {
        scene,
        prelude,
        mcp_intent: parse_mcp_intent(raw),
        parse_error,
    }
}

/// Splits a response into (prelude prose, JSON payload candidate).
///
/// Recognizes ```json fences first; falls back to the outermost brace pair;
/// finally treats the whole text as the payload.
fn split_fenced_json(raw: &str) -> (String, String) {
    for fence in ["```json", "```"] {
        if let Some(open) = raw.find(fence) {
            let body_start = open + fence.len();
            if let Some(close_rel) = raw[body_start..].find("```") {
                let payload = raw[body_start..body_start + close_rel].trim().to_string();
                // Anything before the fence that is not JSON is prose.
                let prelude = raw[..open].trim().to_string();
                return (prelude, payload);
            }
        }
    }

    // No fence; try the outermost object literal.
    if let (Some(open), Some(close)) = (raw.find('{'), raw.rfind('}')) {
        if open < close {
            let prelude = raw[..open].trim().to_string();
            return (prelude, raw[open..=close].trim().to_string());
        }
    }

    (String::new(), raw.trim().to_string())
}

/// Extracts the text between `<tag>` and `</tag>`, if present.
fn tag_content<'a>(raw: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = raw.find(&open)? + open.len();
    let end_rel = raw[start..].find(&close)?;
    Some(raw[start..start + end_rel].trim())
}

/// Scans the raw text for a `<use_mcp_tool>` block and decodes its fields.
#[must_use]
pub fn parse_mcp_intent(raw: &str) -> Option<McpIntent> {
    let block = tag_content(raw, "use_mcp_tool")?;
    let tool_name = tag_content(block, "tool_name")?.to_string();

    let arguments = tag_content(block, "arguments")
        .and_then(|args| serde_json::from_str::<BTreeMap<String, serde_json::Value>>(args).ok())
        .unwrap_or_default();
    let reason = tag_content(block, "reason").unwrap_or_default().to_string();

    Some(McpIntent {
        tool_name,
        arguments,
        reason,
    })
}
