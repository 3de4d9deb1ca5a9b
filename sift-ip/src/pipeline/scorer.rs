//! Candidate Scorer
//!
//! Scores one successfully generated candidate against the original via
//! the judging capability. Any failure (capability error, malformed
//! judge response) yields `status = failed, value = 0.0`, which
//! deterministically loses the winner comparison. Scoring is never
//! pipeline-fatal.

use crate::types::{CandidateResult, CandidateStatus, GenerativeModel, Score, UserContext};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// System prompt for the judging capability
const SCORER_SYSTEM_PROMPT: &str = "You are a strict visual judge. You compare an original \
image with a transformed candidate and score how well the transformation reduces the \
salience of the user's trigger while preserving the scene's meaning, composition, and \
factual content. Respond with a JSON object: {\"overall_score\": <number from 0 to 10>}. \
Output JSON only.";

/// Judge response shape
#[derive(Debug, Deserialize)]
struct JudgeResponse {
    #[serde(default)]
    overall_score: f64,
}

/// Candidate scorer
pub struct CandidateScorer;

impl CandidateScorer {
    pub fn new() -> Self {
        Self
    }

    /// Score one candidate; only invoked for successful generations
    ///
    /// # Arguments
    /// * `model` - Judging capability
    /// * `original_url` - Source image reference
    /// * `candidate` - Successful generation result to score
    /// * `ctx` - User context shaping the judge prompt
    pub async fn score(
        &self,
        model: Arc<dyn GenerativeModel>,
        original_url: &str,
        candidate: &CandidateResult,
        ctx: &UserContext,
    ) -> Score {
        let name = candidate.intervention_name.clone();

        let Some(candidate_url) = candidate.result_ref.as_deref() else {
            // Should not happen: callers filter to successful candidates
            warn!(intervention = %name, "Scoring requested for candidate without result");
            return Score {
                intervention_name: name,
                value: 0.0,
                status: CandidateStatus::Failed,
            };
        };

        let user_prompt = build_user_prompt(ctx);

        match model
            .judge_images(SCORER_SYSTEM_PROMPT, &user_prompt, original_url, candidate_url)
            .await
        {
            Ok(raw) => match serde_json::from_str::<JudgeResponse>(raw.trim()) {
                Ok(judged) => {
                    debug!(
                        intervention = %name,
                        score = judged.overall_score,
                        "Candidate scored"
                    );
                    Score {
                        intervention_name: name,
                        value: judged.overall_score,
                        status: CandidateStatus::Success,
                    }
                }
                Err(e) => {
                    warn!(
                        intervention = %name,
                        error = %e,
                        "Judge response malformed, scoring as failed"
                    );
                    Score {
                        intervention_name: name,
                        value: 0.0,
                        status: CandidateStatus::Failed,
                    }
                }
            },
            Err(e) => {
                warn!(
                    intervention = %name,
                    error = %e,
                    "Judge call failed, scoring as failed"
                );
                Score {
                    intervention_name: name,
                    value: 0.0,
                    status: CandidateStatus::Failed,
                }
            }
        }
    }
}

impl Default for CandidateScorer {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the judge's user prompt from the user context
fn build_user_prompt(ctx: &UserContext) -> String {
    format!(
        "Post text: {}\nUser trigger: {}\nUser sensitivity: {}\n\
         The first image is the original, the second is the candidate transformation.",
        ctx.post_text.as_deref().unwrap_or("N/A"),
        if ctx.filter_text.is_empty() { "N/A" } else { &ctx.filter_text },
        if ctx.sensitivity.is_empty() { "N/A" } else { &ctx.sensitivity },
    )
}
