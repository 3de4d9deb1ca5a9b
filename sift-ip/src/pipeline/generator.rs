//! Candidate Generator
//!
//! Fans out one generation call per candidate transformation. The source
//! image is downloaded once and its bytes shared across the batch; each
//! candidate runs concurrently and fails independently, so one
//! candidate's capability error never aborts its siblings. The returned
//! list preserves input order for downstream tie-breaking.

use crate::interventions::Intervention;
use crate::storage::ArtifactStore;
use crate::types::{BoundingBox, CandidateResult, GenerativeModel, UserContext};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Batch candidate generator
pub struct CandidateGenerator {
    storage: Arc<dyn ArtifactStore>,
}

impl CandidateGenerator {
    pub fn new(storage: Arc<dyn ArtifactStore>) -> Self {
        Self { storage }
    }

    /// Generate one candidate per transformation, order-preserving
    ///
    /// # Arguments
    /// * `source_url` - Source image reference, downloaded once
    /// * `candidates` - Transformations to generate
    /// * `ctx` - User content-sensitivity context
    /// * `model` - Generation capability
    /// * `job_id` - Job identity, namespaces stored artifacts
    ///
    /// # Returns
    /// One `CandidateResult` per input, in input order. Generation
    /// failures are captured per candidate, never propagated.
    pub async fn generate_batch(
        &self,
        source_url: &str,
        candidates: &[Intervention],
        ctx: &UserContext,
        model: Arc<dyn GenerativeModel>,
        job_id: &str,
    ) -> Vec<CandidateResult> {
        info!(
            job_id = %job_id,
            candidates = candidates.len(),
            source_url = %source_url,
            "Generating candidate batch"
        );

        // Download once; the bytes are reused by every candidate
        let source_bytes = match self.storage.download_image(source_url).await {
            Ok(bytes) => Arc::new(bytes),
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Source download failed, failing whole batch");
                return candidates
                    .iter()
                    .map(|c| {
                        CandidateResult::failed(c.name(), format!("Image download failed: {}", e))
                    })
                    .collect();
            }
        };

        let futures = candidates.iter().map(|candidate| {
            let candidate = *candidate;
            let source_bytes = Arc::clone(&source_bytes);
            let model = Arc::clone(&model);
            let ctx = ctx.clone();
            async move {
                self.generate_one(&source_bytes, candidate, &ctx, model, job_id)
                    .await
            }
        });

        join_all(futures).await
    }

    /// Generate a single candidate, capturing any failure
    async fn generate_one(
        &self,
        source_bytes: &[u8],
        candidate: Intervention,
        ctx: &UserContext,
        model: Arc<dyn GenerativeModel>,
        job_id: &str,
    ) -> CandidateResult {
        let mut instruction = candidate.instruction(ctx);

        // Region-targeted interventions get detected boxes appended to
        // the instruction; a detection failure degrades to the plain
        // instruction rather than failing the candidate
        if candidate.needs_detection() && !ctx.filter_text.is_empty() {
            match model.detect_objects(source_bytes, &ctx.filter_text).await {
                Ok(boxes) if !boxes.is_empty() => {
                    instruction.push_str(&region_hint(&boxes));
                }
                Ok(_) => {
                    debug!(
                        job_id = %job_id,
                        intervention = candidate.name(),
                        "Detection found no regions"
                    );
                }
                Err(e) => {
                    warn!(
                        job_id = %job_id,
                        intervention = candidate.name(),
                        error = %e,
                        "Detection failed, proceeding without region hints"
                    );
                }
            }
        }

        let generated = match model.edit_image(source_bytes, &instruction).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(
                    job_id = %job_id,
                    intervention = candidate.name(),
                    error = %e,
                    "Candidate generation failed (isolated)"
                );
                return CandidateResult::failed(candidate.name(), e.to_string());
            }
        };

        let filename = format!("jobs/{}/{}.png", job_id, candidate.name());
        match self.storage.save(&generated, &filename).await {
            Ok(url) => {
                info!(
                    job_id = %job_id,
                    intervention = candidate.name(),
                    url = %url,
                    "Candidate generated"
                );
                CandidateResult::success(candidate.name(), url)
            }
            Err(e) => {
                warn!(
                    job_id = %job_id,
                    intervention = candidate.name(),
                    error = %e,
                    "Candidate save failed (isolated)"
                );
                CandidateResult::failed(candidate.name(), e.to_string())
            }
        }
    }
}

/// Render detected boxes as an instruction suffix
fn region_hint(boxes: &[BoundingBox]) -> String {
    let rendered: Vec<String> = boxes
        .iter()
        .map(|b| format!("({}, {}, {}, {})", b.x, b.y, b.width, b.height))
        .collect();
    format!(
        " Target regions (x, y, width, height in pixels): {}.",
        rendered.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::mock::{MemoryStore, MockModel};
    use crate::types::CandidateStatus;
    use std::sync::atomic::Ordering;

    fn candidates(names: &[&str]) -> Vec<Intervention> {
        names.iter().map(|n| n.parse().unwrap()).collect()
    }

    #[tokio::test]
    async fn batch_downloads_source_exactly_once() {
        let store = Arc::new(MemoryStore::new());
        let generator = CandidateGenerator::new(Arc::clone(&store) as Arc<_>);
        let model = Arc::new(MockModel::new());

        let results = generator
            .generate_batch(
                "http://img/source.png",
                &candidates(&["blur", "occlusion", "inpainting", "warning"]),
                &UserContext::default(),
                model,
                "job-1",
            )
            .await;

        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.status == CandidateStatus::Success));
        assert_eq!(store.downloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn results_preserve_input_order() {
        let store = Arc::new(MemoryStore::new());
        let generator = CandidateGenerator::new(store as Arc<_>);
        let model = Arc::new(MockModel::new());

        let results = generator
            .generate_batch(
                "http://img/source.png",
                &candidates(&["warning", "blur", "occlusion"]),
                &UserContext::default(),
                model,
                "job-1",
            )
            .await;

        let names: Vec<&str> = results.iter().map(|r| r.intervention_name.as_str()).collect();
        assert_eq!(names, vec!["warning", "blur", "occlusion"]);
    }

    #[tokio::test]
    async fn one_failure_does_not_abort_siblings() {
        let store = Arc::new(MemoryStore::new());
        let generator = CandidateGenerator::new(store as Arc<_>);
        // "gaussian" only appears in the blur instruction
        let model = Arc::new(MockModel::new().failing_for(&["gaussian"]));

        let results = generator
            .generate_batch(
                "http://img/source.png",
                &candidates(&["blur", "occlusion"]),
                &UserContext::default(),
                model,
                "job-1",
            )
            .await;

        assert_eq!(results[0].status, CandidateStatus::Failed);
        assert!(results[0].error.as_ref().unwrap().contains("scripted failure"));
        assert_eq!(results[1].status, CandidateStatus::Success);
        assert!(results[1].result_ref.as_ref().unwrap().contains("jobs/job-1/occlusion.png"));
    }

    #[tokio::test]
    async fn detected_regions_are_appended_to_the_instruction() {
        use crate::types::{BoundingBox, CapabilityError};
        use std::sync::Mutex;

        struct DetectingModel {
            last_instruction: Mutex<Option<String>>,
        }

        #[async_trait::async_trait]
        impl GenerativeModel for DetectingModel {
            fn name(&self) -> &'static str {
                "detecting"
            }
            async fn edit_image(
                &self,
                _image_bytes: &[u8],
                instruction: &str,
            ) -> Result<Vec<u8>, CapabilityError> {
                *self.last_instruction.lock().unwrap() = Some(instruction.to_string());
                Ok(b"edited".to_vec())
            }
            async fn detect_objects(
                &self,
                _image_bytes: &[u8],
                _description: &str,
            ) -> Result<Vec<BoundingBox>, CapabilityError> {
                Ok(vec![BoundingBox {
                    x: 10,
                    y: 20,
                    width: 30,
                    height: 40,
                }])
            }
            async fn judge_images(
                &self,
                _: &str,
                _: &str,
                _: &str,
                _: &str,
            ) -> Result<String, CapabilityError> {
                unimplemented!()
            }
        }

        let store = Arc::new(MemoryStore::new());
        let generator = CandidateGenerator::new(store as Arc<_>);
        let model = Arc::new(DetectingModel {
            last_instruction: Mutex::new(None),
        });

        let ctx = UserContext {
            filter_text: "spiders".to_string(),
            ..Default::default()
        };
        let results = generator
            .generate_batch("http://img/source.png", &candidates(&["blur"]), &ctx, model.clone(), "job-1")
            .await;

        assert_eq!(results[0].status, CandidateStatus::Success);
        let instruction = model.last_instruction.lock().unwrap().clone().unwrap();
        assert!(instruction.contains("Target regions"));
        assert!(instruction.contains("(10, 20, 30, 40)"));
    }

    #[tokio::test]
    async fn download_failure_fails_every_candidate() {
        let store = Arc::new(MemoryStore::failing());
        let generator = CandidateGenerator::new(store as Arc<_>);
        let model = Arc::new(MockModel::new());

        let results = generator
            .generate_batch(
                "http://img/source.png",
                &candidates(&["blur", "occlusion"]),
                &UserContext::default(),
                model.clone(),
                "job-1",
            )
            .await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.status == CandidateStatus::Failed));
        assert!(results
            .iter()
            .all(|r| r.error.as_ref().unwrap().contains("Image download failed")));
        // No generation calls are made when the download fails
        assert_eq!(model.edit_calls.load(Ordering::SeqCst), 0);
    }
}
