//! Shared test helpers: mock capabilities and app-state construction

use async_trait::async_trait;
use sift_common::events::EventBus;
use sift_ip::cache::ResultCache;
use sift_ip::pipeline::{CandidateGenerator, Orchestrator};
use sift_ip::providers::{Provider, ProviderRegistry};
use sift_ip::registry::SubscriptionRegistry;
use sift_ip::storage::ArtifactStore;
use sift_ip::types::{BoundingBox, CapabilityError, GenerativeModel, SimilarityJudge};
use sift_ip::AppState;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

/// Generation/judging double: every edit succeeds, every judge scores 5.0
pub struct StubModel;

#[async_trait]
impl GenerativeModel for StubModel {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn edit_image(
        &self,
        _image_bytes: &[u8],
        _instruction: &str,
    ) -> Result<Vec<u8>, CapabilityError> {
        Ok(b"edited".to_vec())
    }

    async fn detect_objects(
        &self,
        _image_bytes: &[u8],
        _description: &str,
    ) -> Result<Vec<BoundingBox>, CapabilityError> {
        Ok(vec![])
    }

    async fn judge_images(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _original_image_url: &str,
        _candidate_image_url: &str,
    ) -> Result<String, CapabilityError> {
        Ok("{\"overall_score\": 5.0}".to_string())
    }
}

/// Similarity double that never matches
pub struct NoSimilarity;

#[async_trait]
impl SimilarityJudge for NoSimilarity {
    async fn most_similar(
        &self,
        _candidate: &str,
        _existing: &[String],
    ) -> Result<Option<String>, CapabilityError> {
        Ok(None)
    }
}

/// Store double that serves fixed bytes and fake URLs, no network
pub struct StubStore;

#[async_trait]
impl ArtifactStore for StubStore {
    async fn download_image(&self, _url: &str) -> sift_common::Result<Vec<u8>> {
        Ok(b"source".to_vec())
    }

    async fn save(&self, _image_bytes: &[u8], filename: &str) -> sift_common::Result<String> {
        Ok(format!("http://127.0.0.1:5873/media/{}", filename))
    }
}

/// Build a full AppState wired to mock capabilities
///
/// Returns the state plus the TempDir keeping the database alive.
pub async fn test_state() -> (AppState, TempDir) {
    let dir = TempDir::new().unwrap();
    let db = sift_ip::db::init_database_pool(&dir.path().join("sift.db"))
        .await
        .unwrap();

    let event_bus = EventBus::new(64);

    let model: Arc<dyn GenerativeModel> = Arc::new(StubModel);
    let mut models: HashMap<Provider, Arc<dyn GenerativeModel>> = HashMap::new();
    models.insert(Provider::OpenAi, Arc::clone(&model));
    models.insert(Provider::Gemini, model);
    let providers = Arc::new(ProviderRegistry::with_models(models, Arc::new(NoSimilarity)));

    let cache = ResultCache::new(db.clone(), providers.similarity(), event_bus.clone());
    let registry = Arc::new(SubscriptionRegistry::new());

    tokio::spawn(sift_ip::event_bridge::run_event_bridge(
        event_bus.subscribe(),
        Arc::clone(&registry),
    ));

    let generator = Arc::new(CandidateGenerator::new(Arc::new(StubStore)));
    let orchestrator = Orchestrator::new(cache.clone(), providers, generator, event_bus.clone());

    let state = AppState::new(
        db,
        event_bus,
        cache,
        registry,
        orchestrator,
        dir.path().join("media"),
    );

    (state, dir)
}
