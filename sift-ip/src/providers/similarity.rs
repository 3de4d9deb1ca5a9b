//! Similarity judges for fuzzy cache lookups
//!
//! Two implementations of the `SimilarityJudge` capability:
//! - [`ChatSimilarityJudge`] asks an OpenAI-compatible chat endpoint to
//!   pick the closest string (the production path)
//! - [`StringSimilarityJudge`] uses Jaro-Winkler distance, deterministic
//!   and offline, for tests and keyless deployments

use crate::types::{CapabilityError, SimilarityJudge};
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Default timeout for similarity calls
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Gemini's OpenAI-compatible chat endpoint
const GEMINI_OPENAI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

/// Chat model used for similarity judgments
const SIMILARITY_MODEL: &str = "gemini-2.5-flash";

/// Minimum Jaro-Winkler similarity for the offline judge to accept a match
const STRING_MATCH_THRESHOLD: f64 = 0.75;

/// Chat-completion-backed similarity judge
pub struct ChatSimilarityJudge {
    http_client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl ChatSimilarityJudge {
    /// Judge backed by Gemini's OpenAI-compatible endpoint
    pub fn gemini(api_key: String) -> Self {
        Self::new(GEMINI_OPENAI_BASE.to_string(), api_key, SIMILARITY_MODEL.to_string())
    }

    /// Judge against an arbitrary OpenAI-compatible endpoint
    pub fn new(base_url: String, api_key: String, model: String) -> Self {
        Self {
            http_client: Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .build()
                .expect("Failed to create HTTP client"),
            base_url,
            api_key,
            model,
        }
    }
}

#[async_trait]
impl SimilarityJudge for ChatSimilarityJudge {
    async fn most_similar(
        &self,
        candidate: &str,
        existing: &[String],
    ) -> Result<Option<String>, CapabilityError> {
        if existing.is_empty() {
            return Ok(None);
        }

        let prompt = format!(
            "Here is a list of strings: {:?}. From this list return one string that \
             matches the most with the string: {:?}. Only return the string from the \
             list and nothing else. Also, if none of the items match, then return an \
             empty string",
            existing, candidate
        );

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "model": self.model,
                "messages": [{ "role": "user", "content": prompt }]
            }))
            .send()
            .await
            .map_err(|e| CapabilityError::Network(format!("Similarity request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CapabilityError::Api(format!(
                "Similarity endpoint returned {}: {}",
                status, body
            )));
        }

        let completion: ChatCompletionResponse = response.json().await.map_err(|e| {
            CapabilityError::Parse(format!("Similarity response parse failed: {}", e))
        })?;

        let answer = completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();

        debug!(candidate = %candidate, answer = %answer, "Similarity judgment");

        // The model must hand back a member of the list; anything else
        // (including the empty string) means no match.
        if existing.iter().any(|e| e == &answer) {
            Ok(Some(answer))
        } else {
            Ok(None)
        }
    }
}

/// Deterministic string-distance similarity judge
///
/// Accepts the closest existing string by Jaro-Winkler similarity when it
/// clears the acceptance threshold.
pub struct StringSimilarityJudge {
    threshold: f64,
}

impl StringSimilarityJudge {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl Default for StringSimilarityJudge {
    fn default() -> Self {
        Self::new(STRING_MATCH_THRESHOLD)
    }
}

#[async_trait]
impl SimilarityJudge for StringSimilarityJudge {
    async fn most_similar(
        &self,
        candidate: &str,
        existing: &[String],
    ) -> Result<Option<String>, CapabilityError> {
        let best = existing
            .iter()
            .map(|e| (e, strsim::jaro_winkler(candidate, e)))
            .max_by(|a, b| a.1.total_cmp(&b.1));

        Ok(match best {
            Some((string, similarity)) if similarity >= self.threshold => {
                debug!(candidate = %candidate, matched = %string, similarity, "String similarity match");
                Some(string.clone())
            }
            _ => None,
        })
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

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn string_judge_matches_near_duplicates() {
        let judge = StringSimilarityJudge::default();
        let existing = vec!["dogs.".to_string(), "blood.".to_string()];

        let matched = judge.most_similar("dog.", &existing).await.unwrap();
        assert_eq!(matched.as_deref(), Some("dogs."));
    }

    #[tokio::test]
    async fn string_judge_rejects_distant_strings() {
        let judge = StringSimilarityJudge::default();
        let existing = vec!["spiders.".to_string()];

        let matched = judge.most_similar("quarterly earnings", &existing).await.unwrap();
        assert!(matched.is_none());
    }

    #[tokio::test]
    async fn string_judge_handles_empty_list() {
        let judge = StringSimilarityJudge::default();
        let matched = judge.most_similar("dogs.", &[]).await.unwrap();
        assert!(matched.is_none());
    }
}
