//! Orchestrator
//!
//! Pipeline coordinator for one job submission: validate, check the
//! result cache, derive a job identity, then dispatch either a direct
//! single-transformation run or a rank run (generation fan-out, scoring
//! fan-in, winner selection). Submission never blocks the caller on the
//! fan-out/fan-in; the job runs on a spawned task and completion is
//! observed through the cache and the event bus.
//!
//! Side-effect contract: exactly one cache write and at most one
//! completion event per successful job, zero cache writes on failure.

use crate::cache::{CachedValue, ResultCache};
use crate::interventions::{parse_candidates, Intervention};
use crate::pipeline::{CandidateGenerator, CandidateScorer};
use crate::providers::ProviderRegistry;
use crate::signature::filter_signature;
use crate::types::{
    CandidateResult, CandidateStatus, GenerativeModel, JobHandle, JobMode, JobRequest, Score,
};
use futures::future::join_all;
use sha2::{Digest, Sha256};
use sift_common::events::{EventBus, SiftEvent};
use sift_common::{Error, Result};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Provider used for generation when the request names none
const DEFAULT_GENERATION_PROVIDER: &str = "gemini";

/// Provider used for scoring when the request names none
const DEFAULT_SCORE_PROVIDER: &str = "openai";

/// Outcome of a job submission
#[derive(Debug)]
pub enum Submission {
    /// The requested result was already cached; no work was dispatched
    CacheHit(CachedValue),
    /// The job was dispatched; completion arrives asynchronously
    Dispatched(JobHandle),
}

/// Validated dispatch plan for one job
enum DispatchPlan {
    Direct(Intervention),
    Rank(Vec<Intervention>),
}

/// Pipeline coordinator
#[derive(Clone)]
pub struct Orchestrator {
    cache: ResultCache,
    providers: Arc<ProviderRegistry>,
    generator: Arc<CandidateGenerator>,
    scorer: Arc<CandidateScorer>,
    event_bus: EventBus,
}

impl Orchestrator {
    pub fn new(
        cache: ResultCache,
        providers: Arc<ProviderRegistry>,
        generator: Arc<CandidateGenerator>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            cache,
            providers,
            generator,
            scorer: Arc::new(CandidateScorer::new()),
            event_bus,
        }
    }

    /// Submit a job
    ///
    /// Validates the request, consults the cache, and either returns the
    /// cached value synchronously or dispatches the pipeline and returns
    /// a handle immediately. Validation and provider resolution failures
    /// are rejected here, before any job identity is allocated.
    pub async fn submit(&self, request: JobRequest) -> Result<Submission> {
        let plan = validate(&request)?;

        // Resolve providers up front so an unknown or unconfigured name
        // fails the submission, not the running job
        let generation_model = self.providers.resolve(
            request
                .generation_provider
                .as_deref()
                .unwrap_or(DEFAULT_GENERATION_PROVIDER),
        )?;
        let score_model = match request.mode {
            JobMode::Rank => Some(self.providers.resolve(
                request
                    .score_provider
                    .as_deref()
                    .unwrap_or(DEFAULT_SCORE_PROVIDER),
            )?),
            JobMode::Direct => None,
        };

        let filter_set = job_filter_set(&request);

        // Cache check: identical (image, filter) requests never re-invoke
        // the generation or scoring capabilities
        if let Some(cached) = self.cache.get(&request.url, &filter_set).await? {
            info!(image_url = %request.url, "Returning cached result, no dispatch");
            return Ok(Submission::CacheHit(cached));
        }

        let job_id = derive_job_id(&request.user_id, &filter_set);
        info!(
            job_id = %job_id,
            image_url = %request.url,
            mode = ?request.mode,
            "Starting intervention job"
        );

        self.event_bus
            .emit(SiftEvent::JobStarted {
                job_id: job_id.clone(),
                image_url: request.url.clone(),
                mode: match request.mode {
                    JobMode::Direct => "direct".to_string(),
                    JobMode::Rank => "rank".to_string(),
                },
                candidates: match &plan {
                    DispatchPlan::Direct(_) => 1,
                    DispatchPlan::Rank(candidates) => candidates.len(),
                },
                timestamp: chrono::Utc::now(),
            })
            .ok();

        let this = self.clone();
        let handle = JobHandle {
            job_id: job_id.clone(),
        };
        tokio::spawn(async move {
            match plan {
                DispatchPlan::Direct(intervention) => {
                    this.run_direct(job_id, request, filter_set, intervention, generation_model)
                        .await
                }
                DispatchPlan::Rank(candidates) => {
                    let score_model = score_model.expect("score model resolved for rank mode");
                    this.run_rank(
                        job_id,
                        request,
                        filter_set,
                        candidates,
                        generation_model,
                        score_model,
                    )
                    .await
                }
            }
        });

        Ok(Submission::Dispatched(handle))
    }

    /// Direct mode: one named transformation, no scoring
    async fn run_direct(
        self,
        job_id: String,
        request: JobRequest,
        filter_set: Vec<String>,
        intervention: Intervention,
        model: Arc<dyn GenerativeModel>,
    ) {
        let results = self
            .generator
            .generate_batch(
                &request.url,
                &[intervention],
                &request.user_context,
                model,
                &job_id,
            )
            .await;

        match results.into_iter().next() {
            Some(result) if result.status == CandidateStatus::Success => {
                self.finalize(&job_id, &request.url, &filter_set, result).await;
            }
            Some(result) => {
                self.fail(
                    &job_id,
                    &request.url,
                    result
                        .error
                        .unwrap_or_else(|| "Generation failed".to_string()),
                )
                .await;
            }
            None => {
                self.fail(&job_id, &request.url, "Generation produced no result".to_string())
                    .await;
            }
        }
    }

    /// Rank mode: generation fan-out, scoring fan-in, winner selection
    async fn run_rank(
        self,
        job_id: String,
        request: JobRequest,
        filter_set: Vec<String>,
        candidates: Vec<Intervention>,
        generation_model: Arc<dyn GenerativeModel>,
        score_model: Arc<dyn GenerativeModel>,
    ) {
        let batch = self
            .generator
            .generate_batch(
                &request.url,
                &candidates,
                &request.user_context,
                generation_model,
                &job_id,
            )
            .await;

        // Failed generations are dropped; order of survivors is input order
        let successful: Vec<CandidateResult> = batch
            .into_iter()
            .filter(|r| r.status == CandidateStatus::Success)
            .collect();

        if successful.is_empty() {
            self.fail(&job_id, &request.url, "All candidate generations failed".to_string())
                .await;
            return;
        }

        info!(
            job_id = %job_id,
            generated = successful.len(),
            total = candidates.len(),
            "Generation fan-out complete, scoring candidates"
        );

        // Fan-in: every dispatched score completes before winner selection
        let scores: Vec<Score> = join_all(successful.iter().map(|candidate| {
            let score_model = Arc::clone(&score_model);
            let scorer = Arc::clone(&self.scorer);
            let original_url = request.url.clone();
            let ctx = request.user_context.clone();
            async move {
                scorer
                    .score(score_model, &original_url, candidate, &ctx)
                    .await
            }
        }))
        .await;

        let Some(winner) = select_winner(&scores) else {
            self.fail(&job_id, &request.url, "All scoring tasks failed".to_string())
                .await;
            return;
        };

        let winning_name = winner.intervention_name.clone();
        info!(
            job_id = %job_id,
            winner = %winning_name,
            score = winner.value,
            "Winner selected"
        );

        // The winner always corresponds to one of the scored candidates
        let Some(final_result) = successful
            .into_iter()
            .find(|r| r.intervention_name == winning_name)
        else {
            self.fail(
                &job_id,
                &request.url,
                "No generation result matches the winning score".to_string(),
            )
            .await;
            return;
        };

        self.finalize(&job_id, &request.url, &filter_set, final_result)
            .await;
    }

    /// Write the winning result to the cache and emit completion
    async fn finalize(
        &self,
        job_id: &str,
        image_url: &str,
        filter_set: &[String],
        result: CandidateResult,
    ) {
        let winner = result.intervention_name.clone();
        let result_ref = result
            .result_ref
            .expect("finalize only called with successful results");

        let value = CachedValue::new(result_ref, result.base64_url);
        if let Err(e) = self.cache.set(image_url, filter_set, value).await {
            error!(job_id = %job_id, error = %e, "Cache write failed");
            self.fail(job_id, image_url, format!("Cache write failed: {}", e))
                .await;
            return;
        }

        info!(job_id = %job_id, winner = %winner, "Job completed");

        self.event_bus
            .emit(SiftEvent::JobCompleted {
                job_id: job_id.to_string(),
                image_url: image_url.to_string(),
                winner,
                timestamp: chrono::Utc::now(),
            })
            .ok();
    }

    /// Terminal failure: no cache write, no subscriber notification
    async fn fail(&self, job_id: &str, image_url: &str, error: String) {
        warn!(job_id = %job_id, error = %error, "Job failed");

        self.event_bus
            .emit(SiftEvent::JobFailed {
                job_id: job_id.to_string(),
                image_url: image_url.to_string(),
                error,
                timestamp: chrono::Utc::now(),
            })
            .ok();
    }
}

/// Validate a submission and produce its dispatch plan
///
/// Rejected submissions allocate no job identity and dispatch nothing.
fn validate(request: &JobRequest) -> Result<DispatchPlan> {
    match request.mode {
        JobMode::Direct => {
            let name = request.intervention_name.as_deref().ok_or_else(|| {
                Error::InvalidInput("'intervention_name' is required for 'direct' mode".to_string())
            })?;
            let intervention = name
                .parse::<Intervention>()
                .map_err(|e| Error::InvalidInput(e.to_string()))?;
            Ok(DispatchPlan::Direct(intervention))
        }
        JobMode::Rank => {
            let names = request
                .candidate_names
                .as_deref()
                .filter(|names| !names.is_empty())
                .ok_or_else(|| {
                    Error::InvalidInput(
                        "'candidate_names' is required for 'rank' mode".to_string(),
                    )
                })?;
            let candidates =
                parse_candidates(names).map_err(|e| Error::InvalidInput(e.to_string()))?;
            Ok(DispatchPlan::Rank(candidates))
        }
    }
}

/// The filter set a job is keyed by
///
/// The user's active filter text wins when present; otherwise the
/// submission's explicit filter list is used as-is.
fn job_filter_set(request: &JobRequest) -> Vec<String> {
    if request.user_context.filter_text.is_empty() {
        request.filters.clone()
    } else {
        vec![request.user_context.filter_text.clone()]
    }
}

/// Derive a collision-resistant, non-guessable job identity
///
/// Hash of the filter set keeps artifact paths stable per filter
/// combination; the random salt keeps concurrent jobs for the same image
/// from colliding.
fn derive_job_id(user_id: &str, filter_set: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(filter_signature(filter_set).as_bytes());
    let filters_hash = format!("{:x}", hasher.finalize());

    let salt = uuid::Uuid::new_v4().simple().to_string();

    format!("{}_{}_{}", user_id, &filters_hash[..8], &salt[..8])
}

/// Select the winning score: strictly greatest value among successful
/// scores, first-encountered on ties
fn select_winner(scores: &[Score]) -> Option<&Score> {
    let mut best: Option<&Score> = None;
    for score in scores.iter().filter(|s| s.status == CandidateStatus::Success) {
        match best {
            Some(current) if score.value > current.value => best = Some(score),
            None => best = Some(score),
            _ => {}
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::mock::{MemoryStore, MockModel, NoSimilarity};
    use crate::providers::Provider;
    use crate::types::UserContext;
    use sift_common::events::SiftEvent;
    use std::collections::HashMap;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn score(name: &str, value: f64, status: CandidateStatus) -> Score {
        Score {
            intervention_name: name.to_string(),
            value,
            status,
        }
    }

    #[test]
    fn winner_is_strict_max() {
        let scores = vec![
            score("a", 3.1, CandidateStatus::Success),
            score("b", 7.4, CandidateStatus::Success),
            score("c", 2.0, CandidateStatus::Success),
        ];
        assert_eq!(select_winner(&scores).unwrap().intervention_name, "b");
    }

    #[test]
    fn winner_tie_resolves_to_first_in_input_order() {
        let scores = vec![
            score("a", 3.1, CandidateStatus::Success),
            score("b", 7.4, CandidateStatus::Success),
            score("c", 7.4, CandidateStatus::Success),
            score("d", 2.0, CandidateStatus::Success),
        ];
        assert_eq!(select_winner(&scores).unwrap().intervention_name, "b");
    }

    #[test]
    fn failed_scores_cannot_win() {
        let scores = vec![
            score("a", 9.9, CandidateStatus::Failed),
            score("b", 0.5, CandidateStatus::Success),
        ];
        assert_eq!(select_winner(&scores).unwrap().intervention_name, "b");
    }

    #[test]
    fn no_successful_scores_means_no_winner() {
        let scores = vec![
            score("a", 0.0, CandidateStatus::Failed),
            score("b", 0.0, CandidateStatus::Failed),
        ];
        assert!(select_winner(&scores).is_none());
    }

    // ------------------------------------------------------------------
    // End-to-end pipeline runs with mock capabilities
    // ------------------------------------------------------------------

    struct Harness {
        orchestrator: Orchestrator,
        cache: ResultCache,
        store: Arc<MemoryStore>,
        model: Arc<MockModel>,
        bus: EventBus,
    }

    async fn harness(model: MockModel) -> Harness {
        let pool = crate::db::test_pool().await;
        let bus = EventBus::new(64);
        let cache = ResultCache::new(pool, Arc::new(NoSimilarity), bus.clone());
        let store = Arc::new(MemoryStore::new());
        let model = Arc::new(model);

        let mut models: HashMap<Provider, Arc<dyn GenerativeModel>> = HashMap::new();
        models.insert(Provider::Gemini, Arc::clone(&model) as Arc<dyn GenerativeModel>);
        models.insert(Provider::OpenAi, Arc::clone(&model) as Arc<dyn GenerativeModel>);
        let providers = Arc::new(crate::providers::ProviderRegistry::with_models(
            models,
            Arc::new(NoSimilarity),
        ));

        let generator = Arc::new(CandidateGenerator::new(
            Arc::clone(&store) as Arc<dyn crate::storage::ArtifactStore>
        ));

        let orchestrator = Orchestrator::new(cache.clone(), providers, generator, bus.clone());

        Harness {
            orchestrator,
            cache,
            store,
            model,
            bus,
        }
    }

    fn rank_request(candidates: &[&str]) -> JobRequest {
        JobRequest {
            mode: JobMode::Rank,
            url: "http://img/source.png".to_string(),
            user_id: "user1".to_string(),
            filters: vec![],
            intervention_name: None,
            candidate_names: Some(candidates.iter().map(|s| s.to_string()).collect()),
            generation_provider: None,
            score_provider: None,
            user_context: UserContext {
                filter_text: "spiders".to_string(),
                sensitivity: "3".to_string(),
                post_text: None,
                metadata: serde_json::Value::Null,
            },
        }
    }

    /// Wait until the cache holds a value for the request's key
    async fn wait_for_cache(cache: &ResultCache, url: &str, filters: &[String]) -> CachedValue {
        for _ in 0..100 {
            if let Some(value) = cache.get(url, filters).await.unwrap() {
                return value;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job did not complete in time");
    }

    /// Wait for a terminal job event on the bus
    async fn wait_for_terminal(
        rx: &mut tokio::sync::broadcast::Receiver<SiftEvent>,
    ) -> SiftEvent {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("no terminal event arrived")
                .unwrap();
            match event {
                SiftEvent::JobCompleted { .. } | SiftEvent::JobFailed { .. } => return event,
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn rank_job_selects_highest_scored_candidate() {
        let h = harness(MockModel::new().scoring(&[
            ("blur", 3.0),
            ("occlusion", 8.5),
            ("inpainting", 5.0),
        ]))
        .await;
        let mut rx = h.bus.subscribe();

        let request = rank_request(&["blur", "occlusion", "inpainting"]);
        let submission = h.orchestrator.submit(request).await.unwrap();
        assert!(matches!(submission, Submission::Dispatched(_)));

        let value =
            wait_for_cache(&h.cache, "http://img/source.png", &["spiders".to_string()]).await;
        assert!(value.url().contains("occlusion.png"));

        match wait_for_terminal(&mut rx).await {
            SiftEvent::JobCompleted { winner, .. } => assert_eq!(winner, "occlusion"),
            other => panic!("expected completion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn cache_hit_short_circuits_generation() {
        let h = harness(MockModel::new().scoring(&[("blur", 5.0)])).await;

        let submission = h.orchestrator.submit(rank_request(&["blur"])).await.unwrap();
        assert!(matches!(submission, Submission::Dispatched(_)));
        wait_for_cache(&h.cache, "http://img/source.png", &["spiders".to_string()]).await;

        let calls_after_first = h.model.edit_calls.load(Ordering::SeqCst);
        assert_eq!(calls_after_first, 1);

        // Second submission for the same (image, filter) pair
        let submission = h.orchestrator.submit(rank_request(&["blur"])).await.unwrap();
        assert!(matches!(submission, Submission::CacheHit(_)));
        assert_eq!(h.model.edit_calls.load(Ordering::SeqCst), calls_after_first);
    }

    #[tokio::test]
    async fn partial_generation_failure_still_completes() {
        // "gaussian" fails the blur candidate; "mask" fails occlusion
        let h = harness(
            MockModel::new()
                .failing_for(&["gaussian", "mask"])
                .scoring(&[("inpainting", 4.0), ("warning", 6.0)]),
        )
        .await;
        let mut rx = h.bus.subscribe();

        let request = rank_request(&["blur", "occlusion", "inpainting", "warning"]);
        h.orchestrator.submit(request).await.unwrap();

        let value =
            wait_for_cache(&h.cache, "http://img/source.png", &["spiders".to_string()]).await;
        assert!(value.url().contains("warning.png"));

        match wait_for_terminal(&mut rx).await {
            SiftEvent::JobCompleted { winner, .. } => assert_eq!(winner, "warning"),
            other => panic!("expected completion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn total_generation_failure_fails_job_with_no_cache_write() {
        let h = harness(MockModel::new().failing_for(&["gaussian", "mask"])).await;
        let mut rx = h.bus.subscribe();

        h.orchestrator
            .submit(rank_request(&["blur", "occlusion"]))
            .await
            .unwrap();

        match wait_for_terminal(&mut rx).await {
            SiftEvent::JobFailed { error, .. } => {
                assert!(error.contains("All candidate generations failed"));
            }
            other => panic!("expected failure, got {:?}", other),
        }

        assert!(h
            .cache
            .get("http://img/source.png", &["spiders".to_string()])
            .await
            .unwrap()
            .is_none());
        // Nothing was stored either
        assert!(h.store.saved.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn total_scoring_failure_fails_job_with_no_cache_write() {
        // Generation succeeds but no candidate has a scripted score
        let h = harness(MockModel::new()).await;
        let mut rx = h.bus.subscribe();

        h.orchestrator
            .submit(rank_request(&["blur", "occlusion"]))
            .await
            .unwrap();

        match wait_for_terminal(&mut rx).await {
            SiftEvent::JobFailed { error, .. } => {
                assert!(error.contains("All scoring tasks failed"));
            }
            other => panic!("expected failure, got {:?}", other),
        }

        assert!(h
            .cache
            .get("http://img/source.png", &["spiders".to_string()])
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn direct_mode_writes_cache_without_scoring() {
        let h = harness(MockModel::new()).await;

        let request = JobRequest {
            mode: JobMode::Direct,
            intervention_name: Some("blur".to_string()),
            candidate_names: None,
            ..rank_request(&[])
        };
        let submission = h.orchestrator.submit(request).await.unwrap();
        assert!(matches!(submission, Submission::Dispatched(_)));

        let value =
            wait_for_cache(&h.cache, "http://img/source.png", &["spiders".to_string()]).await;
        assert!(value.url().contains("blur.png"));
    }

    #[tokio::test]
    async fn direct_mode_requires_intervention_name() {
        let h = harness(MockModel::new()).await;

        let request = JobRequest {
            mode: JobMode::Direct,
            intervention_name: None,
            candidate_names: None,
            ..rank_request(&[])
        };
        let err = h.orchestrator.submit(request).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn rank_mode_requires_candidates() {
        let h = harness(MockModel::new()).await;

        let request = JobRequest {
            candidate_names: Some(vec![]),
            ..rank_request(&[])
        };
        let err = h.orchestrator.submit(request).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn unknown_candidate_name_is_rejected() {
        let h = harness(MockModel::new()).await;

        let err = h
            .orchestrator
            .submit(rank_request(&["blur", "sepia_tone"]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
