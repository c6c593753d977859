//! Unary image generation, outside the streaming chat path.

use crate::api::{construct_api_url, format_api_error};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

pub const DEFAULT_IMAGE_MODEL: &str = "imagen-4.0-generate-001";

#[derive(Serialize, Clone, Debug)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
    /// Resolution tier, e.g. "1024x1024".
    pub size: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    pub response_format: String,
}

impl ImageRequest {
    pub fn new(prompt: impl Into<String>, size: impl Into<String>) -> Self {
        Self {
            model: DEFAULT_IMAGE_MODEL.to_string(),
            prompt: prompt.into(),
            size: size.into(),
            aspect_ratio: None,
            response_format: "b64_json".to_string(),
        }
    }

    pub fn with_aspect_ratio(mut self, aspect_ratio: impl Into<String>) -> Self {
        self.aspect_ratio = Some(aspect_ratio.into());
        self
    }
}

#[derive(Deserialize)]
struct ImageData {
    b64_json: String,
}

#[derive(Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

/// Request a single generated image and decode its payload to raw bytes.
/// One attempt; failures surface as errors, never as partial payloads.
pub async fn generate_image(
    client: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    request: &ImageRequest,
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let url = construct_api_url(base_url, "images/generations");
    let response = client
        .post(url)
        .header("Content-Type", "application/json")
        .header("Authorization", format!("Bearer {api_key}"))
        .json(request)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "<no body>".to_string());
        return Err(format!("{status}: {}", format_api_error(&error_text)).into());
    }

    let parsed = response.json::<ImageResponse>().await?;
    let image = parsed
        .data
        .first()
        .ok_or("image response contained no data")?;
    Ok(BASE64.decode(image.b64_json.as_bytes())?)
}
