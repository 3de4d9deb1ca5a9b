//! OpenAI capability client
//!
//! Implements `GenerativeModel` against the OpenAI HTTP API:
//! - image edits via `/v1/images/edits` (multipart, base64 response)
//! - detection and judging via `/v1/chat/completions` with image content
//!
//! Default scoring provider; the judge prompt asks for a JSON object the
//! scorer parses downstream.

use crate::types::{BoundingBox, CapabilityError, GenerativeModel};
use async_trait::async_trait;
use base64::Engine;
use reqwest::{header, Client};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// OpenAI API base URL
const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// Default timeout for OpenAI requests (image edits are slow)
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Chat model used for detection and judging
const CHAT_MODEL: &str = "gpt-4o-mini";

/// Image model used for edits
const IMAGE_MODEL: &str = "gpt-image-1";

/// OpenAI client
pub struct OpenAiModel {
    http_client: Client,
    api_key: String,
}

impl OpenAiModel {
    /// Create a new client with the given API key
    pub fn new(api_key: String) -> Self {
        Self {
            http_client: Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .build()
                .expect("Failed to create HTTP client"),
            api_key,
        }
    }

    async fn chat(&self, body: serde_json::Value) -> Result<String, CapabilityError> {
        let response = self
            .http_client
            .post(format!("{}/chat/completions", OPENAI_API_URL))
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| CapabilityError::Network(format!("OpenAI request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CapabilityError::Api(format!(
                "OpenAI returned {}: {}",
                status, body
            )));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::Parse(format!("OpenAI response parse failed: {}", e)))?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| CapabilityError::Parse("OpenAI response had no choices".to_string()))
    }
}

#[async_trait]
impl GenerativeModel for OpenAiModel {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn edit_image(
        &self,
        image_bytes: &[u8],
        instruction: &str,
    ) -> Result<Vec<u8>, CapabilityError> {
        debug!(model = IMAGE_MODEL, "OpenAI image edit");

        let part = reqwest::multipart::Part::bytes(image_bytes.to_vec())
            .file_name("source.png")
            .mime_str("image/png")
            .map_err(|e| CapabilityError::Internal(format!("Multipart build failed: {}", e)))?;
        let form = reqwest::multipart::Form::new()
            .text("model", IMAGE_MODEL)
            .text("prompt", instruction.to_string())
            .part("image", part);

        let response = self
            .http_client
            .post(format!("{}/images/edits", OPENAI_API_URL))
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| CapabilityError::Network(format!("OpenAI request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CapabilityError::Api(format!(
                "OpenAI returned {}: {}",
                status, body
            )));
        }

        let edit: ImageEditResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::Parse(format!("OpenAI response parse failed: {}", e)))?;

        let b64 = edit
            .data
            .into_iter()
            .next()
            .and_then(|d| d.b64_json)
            .ok_or_else(|| {
                CapabilityError::Parse("OpenAI edit response had no image data".to_string())
            })?;

        base64::engine::general_purpose::STANDARD
            .decode(b64)
            .map_err(|e| CapabilityError::Parse(format!("Image decode failed: {}", e)))
    }

    async fn detect_objects(
        &self,
        image_bytes: &[u8],
        description: &str,
    ) -> Result<Vec<BoundingBox>, CapabilityError> {
        debug!(model = CHAT_MODEL, description = %description, "OpenAI object detection");

        let data_url = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(image_bytes)
        );
        let prompt = format!(
            "Locate every instance of '{}' in the image. Respond with a JSON array of \
             objects with integer pixel fields x, y, width, height. Respond with [] if \
             there are none. Output JSON only.",
            description
        );

        let content = self
            .chat(serde_json::json!({
                "model": CHAT_MODEL,
                "messages": [{
                    "role": "user",
                    "content": [
                        { "type": "text", "text": prompt },
                        { "type": "image_url", "image_url": { "url": data_url } }
                    ]
                }]
            }))
            .await?;

        serde_json::from_str(content.trim())
            .map_err(|e| CapabilityError::Parse(format!("Detection parse failed: {}", e)))
    }

    async fn judge_images(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        original_image_url: &str,
        candidate_image_url: &str,
    ) -> Result<String, CapabilityError> {
        debug!(model = CHAT_MODEL, "OpenAI image judging");

        self.chat(serde_json::json!({
            "model": CHAT_MODEL,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": system_prompt },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": user_prompt },
                        { "type": "image_url", "image_url": { "url": original_image_url } },
                        { "type": "image_url", "image_url": { "url": candidate_image_url } }
                    ]
                }
            ]
        }))
        .await
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ImageEditResponse {
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    b64_json: Option<String>,
}
