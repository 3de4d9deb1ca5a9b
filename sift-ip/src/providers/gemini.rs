//! Gemini capability client
//!
//! Implements `GenerativeModel` against the Gemini `generateContent`
//! API. Images travel inline as base64 parts in both directions, so a
//! judge call downloads both image URLs before dispatch. Default
//! generation provider.

use crate::types::{BoundingBox, CapabilityError, GenerativeModel};
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Gemini API base URL
const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default timeout for Gemini requests
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Model used for image generation/editing
const IMAGE_MODEL: &str = "gemini-2.5-flash-image";

/// Model used for detection and judging
const TEXT_MODEL: &str = "gemini-2.5-flash";

/// Gemini client
pub struct GeminiModel {
    http_client: Client,
    api_key: String,
}

impl GeminiModel {
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

    fn inline_part(image_bytes: &[u8]) -> serde_json::Value {
        serde_json::json!({
            "inline_data": {
                "mime_type": "image/png",
                "data": base64::engine::general_purpose::STANDARD.encode(image_bytes),
            }
        })
    }

    async fn generate_content(
        &self,
        model: &str,
        parts: Vec<serde_json::Value>,
    ) -> Result<GenerateContentResponse, CapabilityError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            GEMINI_API_URL, model, self.api_key
        );

        let response = self
            .http_client
            .post(&url)
            .json(&serde_json::json!({ "contents": [{ "parts": parts }] }))
            .send()
            .await
            .map_err(|e| CapabilityError::Network(format!("Gemini request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CapabilityError::Api(format!(
                "Gemini returned {}: {}",
                status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| CapabilityError::Parse(format!("Gemini response parse failed: {}", e)))
    }

    /// Download an image URL for inline transport
    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>, CapabilityError> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| CapabilityError::Network(format!("Image fetch failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(CapabilityError::Network(format!(
                "Image fetch returned {}: {}",
                response.status(),
                url
            )));
        }

        Ok(response
            .bytes()
            .await
            .map_err(|e| CapabilityError::Network(format!("Image fetch failed: {}", e)))?
            .to_vec())
    }
}

#[async_trait]
impl GenerativeModel for GeminiModel {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn edit_image(
        &self,
        image_bytes: &[u8],
        instruction: &str,
    ) -> Result<Vec<u8>, CapabilityError> {
        debug!(model = IMAGE_MODEL, "Gemini image edit");

        let response = self
            .generate_content(
                IMAGE_MODEL,
                vec![
                    serde_json::json!({ "text": instruction }),
                    Self::inline_part(image_bytes),
                ],
            )
            .await?;

        let b64 = response
            .candidates
            .into_iter()
            .flat_map(|c| c.content.parts)
            .find_map(|p| p.inline_data.map(|d| d.data))
            .ok_or_else(|| {
                CapabilityError::Parse("Gemini response contained no image part".to_string())
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
        debug!(model = TEXT_MODEL, description = %description, "Gemini object detection");

        let prompt = format!(
            "Locate every instance of '{}' in the image. Respond with a JSON array of \
             objects with integer pixel fields x, y, width, height. Respond with [] if \
             there are none. Output JSON only.",
            description
        );

        let response = self
            .generate_content(
                TEXT_MODEL,
                vec![
                    serde_json::json!({ "text": prompt }),
                    Self::inline_part(image_bytes),
                ],
            )
            .await?;

        let text = response
            .candidates
            .into_iter()
            .flat_map(|c| c.content.parts)
            .find_map(|p| p.text)
            .ok_or_else(|| {
                CapabilityError::Parse("Gemini response contained no text part".to_string())
            })?;

        serde_json::from_str(text.trim())
            .map_err(|e| CapabilityError::Parse(format!("Detection parse failed: {}", e)))
    }

    async fn judge_images(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        original_image_url: &str,
        candidate_image_url: &str,
    ) -> Result<String, CapabilityError> {
        debug!(model = TEXT_MODEL, "Gemini image judging");

        let original = self.fetch_image(original_image_url).await?;
        let candidate = self.fetch_image(candidate_image_url).await?;

        let response = self
            .generate_content(
                TEXT_MODEL,
                vec![
                    serde_json::json!({ "text": format!("{}\n\n{}", system_prompt, user_prompt) }),
                    Self::inline_part(&original),
                    Self::inline_part(&candidate),
                ],
            )
            .await?;

        response
            .candidates
            .into_iter()
            .flat_map(|c| c.content.parts)
            .find_map(|p| p.text)
            .ok_or_else(|| {
                CapabilityError::Parse("Gemini response contained no text part".to_string())
            })
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
}
