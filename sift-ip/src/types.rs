//! Base traits and types for the image pipeline
//!
//! Defines the capability interfaces the pipeline consumes (generation,
//! detection, judging, similarity) and the data types that flow between
//! pipeline stages. Capability implementations live in `providers`; the
//! pipeline only ever sees these traits, so tests can substitute
//! deterministic doubles.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Capability invocation error
///
/// Always caught at the smallest possible scope (per candidate) and
/// converted into a failed status. Never propagates as a pipeline-fatal
/// error.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// Network request failed
    #[error("Network error: {0}")]
    Network(String),

    /// Capability API returned an error status
    #[error("API error: {0}")]
    Api(String),

    /// Capability response could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Capability cannot service this request (missing input, no match)
    #[error("Not available: {0}")]
    NotAvailable(String),

    /// Internal capability error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Pixel-space bounding box from the detection capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// External generative/judging model capability
///
/// One implementation per provider. All methods are opaque external
/// calls; the pipeline treats any error as "this candidate cannot
/// proceed", never as fatal.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Provider name for logging and provenance
    fn name(&self) -> &'static str;

    /// Transform an image according to a textual instruction
    ///
    /// # Arguments
    /// * `image_bytes` - Source image content
    /// * `instruction` - Transformation instruction
    ///
    /// # Returns
    /// The transformed image bytes
    async fn edit_image(
        &self,
        image_bytes: &[u8],
        instruction: &str,
    ) -> Result<Vec<u8>, CapabilityError>;

    /// Locate regions matching a description in an image
    async fn detect_objects(
        &self,
        image_bytes: &[u8],
        description: &str,
    ) -> Result<Vec<BoundingBox>, CapabilityError>;

    /// Judge a candidate image against the original
    ///
    /// Returns the raw response text; the scorer parses it into a
    /// [`Score`]. A malformed response is a scoring failure for that
    /// candidate only.
    async fn judge_images(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        original_image_url: &str,
        candidate_image_url: &str,
    ) -> Result<String, CapabilityError>;
}

/// Similarity judgment over signature strings
///
/// Backs the result cache's fuzzy fallback lookup. Injectable so tests
/// and offline deployments can use a deterministic string-distance
/// implementation instead of a live model.
#[async_trait]
pub trait SimilarityJudge: Send + Sync {
    /// Pick the existing string that best matches `candidate`
    ///
    /// Returns `None` when no existing string is a plausible match.
    async fn most_similar(
        &self,
        candidate: &str,
        existing: &[String],
    ) -> Result<Option<String>, CapabilityError>;
}

/// Candidate generation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateStatus {
    Success,
    Failed,
}

/// One Candidate Generator output, immutable once produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateResult {
    /// Name of the transformation that produced this candidate
    pub intervention_name: String,
    /// Generation outcome
    pub status: CandidateStatus,
    /// Stored artifact reference, present iff status is success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<String>,
    /// Inline-encoded payload (deferred; populated by storage when requested)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base64_url: Option<String>,
    /// Captured error, present iff status is failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CandidateResult {
    /// Successful generation result
    pub fn success(intervention_name: impl Into<String>, result_ref: impl Into<String>) -> Self {
        Self {
            intervention_name: intervention_name.into(),
            status: CandidateStatus::Success,
            result_ref: Some(result_ref.into()),
            base64_url: None,
            error: None,
        }
    }

    /// Failed generation result with captured error
    pub fn failed(intervention_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            intervention_name: intervention_name.into(),
            status: CandidateStatus::Failed,
            result_ref: None,
            base64_url: None,
            error: Some(error.into()),
        }
    }
}

/// One Candidate Scorer output
///
/// A failed scoring attempt carries value 0.0, which deterministically
/// loses any winner comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Score {
    /// Candidate this score belongs to
    pub intervention_name: String,
    /// Normalized scalar quality/fit score
    pub value: f64,
    /// Scoring outcome
    pub status: CandidateStatus,
}

/// Execution mode for a pipeline job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobMode {
    /// Apply one named transformation, no scoring
    Direct,
    /// Generate and score all candidates, select the winner
    Rank,
}

/// User content-sensitivity context forwarded to generation and scoring
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserContext {
    /// Active filter description (free text)
    #[serde(default)]
    pub filter_text: String,
    /// Declared sensitivity level (free text)
    #[serde(default)]
    pub sensitivity: String,
    /// Text of the post the image appeared in, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_text: Option<String>,
    /// Opaque per-filter metadata (bounding boxes, knobs)
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Job submission payload (consumed from the transport layer)
#[derive(Debug, Clone, Deserialize)]
pub struct JobRequest {
    /// Execution mode
    pub mode: JobMode,
    /// Source image reference
    pub url: String,
    /// Requesting user
    pub user_id: String,
    /// Filter descriptors forming the cache key
    #[serde(default)]
    pub filters: Vec<String>,
    /// Single transformation name, required iff mode is direct
    #[serde(default)]
    pub intervention_name: Option<String>,
    /// Candidate transformation names, required iff mode is rank
    #[serde(default)]
    pub candidate_names: Option<Vec<String>>,
    /// Provider for generation calls (defaults to gemini)
    #[serde(default)]
    pub generation_provider: Option<String>,
    /// Provider for scoring calls (defaults to openai)
    #[serde(default)]
    pub score_provider: Option<String>,
    /// User content-sensitivity context
    #[serde(default)]
    pub user_context: UserContext,
}

/// Handle returned by a non-blocking job submission
#[derive(Debug, Clone, Serialize)]
pub struct JobHandle {
    pub job_id: String,
}
