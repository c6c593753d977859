//! Wire payloads and request plumbing for the generation service.
//!
//! The service speaks an OpenAI-compatible contract: a streaming
//! `chat/completions` call whose SSE deltas carry the answer text plus an
//! optional `reasoning` channel, and a unary `images/generations` call.

use serde::{Deserialize, Serialize};

pub mod images;

/// Determinism parameter sent with every generation request. Kept low and
/// fixed; formulation advice should not drift between regenerations.
pub const RESPONSE_TEMPERATURE: f32 = 0.2;

#[derive(Serialize, Clone, Debug)]
pub struct ApiMessage {
    pub role: String,
    pub content: String,
}

#[derive(Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub messages: Vec<ApiMessage>,
    pub stream: bool,
    pub temperature: f32,
    /// "high" requests the model's additional thought channel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
    /// Opt-in external knowledge retrieval on the service side.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_retrieval: Option<bool>,
}

#[derive(Deserialize)]
pub struct GenerateResponseDelta {
    pub content: Option<String>,
    #[serde(default, alias = "reasoning_content")]
    pub reasoning: Option<String>,
}

#[derive(Deserialize)]
pub struct GenerateResponseChoice {
    pub delta: GenerateResponseDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Deserialize)]
pub struct GenerateResponse {
    pub choices: Vec<GenerateResponseChoice>,
}

/// Join a base URL and an endpoint path without doubling slashes.
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    )
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.to_string()),
                serde_json::Value::Object(map) => map
                    .get("message")
                    .and_then(|message| message.as_str().map(str::to_owned)),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary.map(|text| {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        collapsed.trim().to_string()
    })
}

/// Render an error body from the service for logs and diagnostics.
/// JSON bodies are pretty-printed with a one-line summary when one can be
/// dug out of the usual places.
pub fn format_api_error(error_text: &str) -> String {
    let trimmed = error_text.trim();

    if trimmed.is_empty() {
        return "API Error:\n```\n<empty>\n```".to_string();
    }

    if let Ok(json_value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Ok(pretty_json) = serde_json::to_string_pretty(&json_value) {
            if let Some(summary) = extract_error_summary(&json_value) {
                if !summary.is_empty() {
                    return format!("API Error: {}\n```json\n{}\n```", summary, pretty_json);
                }
            }
            return format!("API Error:\n```json\n{}\n```", pretty_json);
        }
    }

    if trimmed.starts_with('<') && trimmed.ends_with('>') {
        format!("API Error:\n```xml\n{}\n```", trimmed)
    } else {
        format!("API Error:\n```\n{}\n```", trimmed)
    }
}
