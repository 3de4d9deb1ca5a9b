//! Capability providers
//!
//! Implements the capability traits from `types` against external model
//! APIs. Provider names arriving in job submissions resolve through the
//! closed [`Provider`] enum; the [`ProviderRegistry`] is built once at
//! startup from configuration, so an unknown or unconfigured provider
//! fails fast instead of at call time.

pub mod gemini;
pub mod openai;
pub mod similarity;

use crate::types::{GenerativeModel, SimilarityJudge};
use sift_common::{Error, Result};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

pub use gemini::GeminiModel;
pub use openai::OpenAiModel;
pub use similarity::{ChatSimilarityJudge, StringSimilarityJudge};

/// Known model providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    OpenAi,
    Gemini,
}

impl Provider {
    pub fn name(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Gemini => "gemini",
        }
    }
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "openai" => Ok(Provider::OpenAi),
            "gemini" => Ok(Provider::Gemini),
            other => Err(Error::InvalidInput(format!("Unknown provider: {}", other))),
        }
    }
}

/// Provider registry resolved at startup
///
/// Holds one live client per configured provider plus the similarity
/// judge backing the cache's fuzzy lookups.
pub struct ProviderRegistry {
    models: HashMap<Provider, Arc<dyn GenerativeModel>>,
    similarity: Arc<dyn SimilarityJudge>,
}

impl ProviderRegistry {
    /// Build the registry from resolved API keys
    ///
    /// Providers without a configured key are left out of the registry;
    /// jobs naming them are rejected at validation. The similarity judge
    /// uses the Gemini-compatible chat endpoint when its key is present
    /// and falls back to the deterministic string-distance judge
    /// otherwise.
    pub fn from_keys(openai_api_key: Option<String>, gemini_api_key: Option<String>) -> Self {
        let mut models: HashMap<Provider, Arc<dyn GenerativeModel>> = HashMap::new();

        if let Some(key) = &openai_api_key {
            models.insert(Provider::OpenAi, Arc::new(OpenAiModel::new(key.clone())));
        }
        if let Some(key) = &gemini_api_key {
            models.insert(Provider::Gemini, Arc::new(GeminiModel::new(key.clone())));
        }

        let similarity: Arc<dyn SimilarityJudge> = match &gemini_api_key {
            Some(key) => Arc::new(ChatSimilarityJudge::gemini(key.clone())),
            None => Arc::new(StringSimilarityJudge::default()),
        };

        info!(
            providers = models.len(),
            "Provider registry initialized ({})",
            models
                .keys()
                .map(|p| p.name())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Self { models, similarity }
    }

    /// Registry with explicit implementations (used by tests)
    pub fn with_models(
        models: HashMap<Provider, Arc<dyn GenerativeModel>>,
        similarity: Arc<dyn SimilarityJudge>,
    ) -> Self {
        Self { models, similarity }
    }

    /// Resolve a provider name to a live model client
    ///
    /// Fails for names outside the closed enum and for providers that
    /// have no configured key.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn GenerativeModel>> {
        let provider = Provider::from_str(name)?;
        self.models.get(&provider).cloned().ok_or_else(|| {
            Error::Config(format!(
                "Provider '{}' is not configured (missing API key)",
                provider.name()
            ))
        })
    }

    /// The configured similarity judge
    pub fn similarity(&self) -> Arc<dyn SimilarityJudge> {
        Arc::clone(&self.similarity)
    }
}
