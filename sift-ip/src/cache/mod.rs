//! Result Cache
//!
//! Single source of truth for completed work. Each source image owns a
//! bounded map from filter signature to a sub-result; lookups try an
//! exact signature match first and fall back to a similarity judgment
//! over the image's existing signatures, so near-duplicate filter
//! phrasings reuse prior work instead of regenerating.
//!
//! Write policy: at most `sub_key_limit` sub-entries per image. At the
//! limit, new signatures are silently dropped; existing entries are never
//! evicted. The first successful write for a signature wins; a repeat
//! write for an occupied signature is a no-op. Every actual insert
//! publishes an `ImageProcessed` event on the bus.

use crate::signature::{filter_signature, CUSTOM_PREFIX};
use crate::types::SimilarityJudge;
use serde::{Deserialize, Serialize};
use sift_common::events::{EventBus, SiftEvent};
use sift_common::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default bound on sub-entries per image
pub const DEFAULT_SUB_KEY_LIMIT: usize = 10;

/// One cached sub-result
///
/// Either a bare reference string or a structured value carrying both the
/// reference and an inline-encoded payload. Readers must treat the two
/// forms as interchangeable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CachedValue {
    /// Reference plus inline payload
    WithPayload {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        base64: Option<String>,
    },
    /// Bare reference string
    Plain(String),
}

impl CachedValue {
    /// Construct the appropriate form for an optional inline payload
    pub fn new(url: impl Into<String>, base64: Option<String>) -> Self {
        match base64 {
            Some(b64) => CachedValue::WithPayload {
                url: url.into(),
                base64: Some(b64),
            },
            None => CachedValue::Plain(url.into()),
        }
    }

    /// The artifact reference, whichever form the value takes
    pub fn url(&self) -> &str {
        match self {
            CachedValue::Plain(url) => url,
            CachedValue::WithPayload { url, .. } => url,
        }
    }

    /// The inline payload, if the structured form carries one
    pub fn base64(&self) -> Option<&str> {
        match self {
            CachedValue::Plain(_) => None,
            CachedValue::WithPayload { base64, .. } => base64.as_deref(),
        }
    }
}

/// Result cache over the service database
#[derive(Clone)]
pub struct ResultCache {
    db: SqlitePool,
    sub_key_limit: usize,
    similarity: Arc<dyn SimilarityJudge>,
    event_bus: EventBus,
}

impl ResultCache {
    /// Create a cache with the default sub-entry bound
    pub fn new(db: SqlitePool, similarity: Arc<dyn SimilarityJudge>, event_bus: EventBus) -> Self {
        Self::with_limit(db, similarity, event_bus, DEFAULT_SUB_KEY_LIMIT)
    }

    /// Create a cache with an explicit sub-entry bound
    pub fn with_limit(
        db: SqlitePool,
        similarity: Arc<dyn SimilarityJudge>,
        event_bus: EventBus,
        sub_key_limit: usize,
    ) -> Self {
        Self {
            db,
            sub_key_limit,
            similarity,
            event_bus,
        }
    }

    /// Look up a processed value for an image and filter set
    ///
    /// Exact signature match first; then, for an empty requested
    /// signature, the image's first custom-prefixed entry; then the
    /// similarity fallback. A similarity capability failure is treated as
    /// a miss, never surfaced to the caller.
    pub async fn get(&self, image_url: &str, filters: &[String]) -> Result<Option<CachedValue>> {
        let signature = filter_signature(filters);
        let entries = self.load_entries(image_url).await?;

        if entries.is_empty() {
            debug!(image_url = %image_url, "Cache miss: no entries for image");
            return Ok(None);
        }

        // Exact signature match
        if let Some((_, value)) = entries.iter().find(|(sig, _)| *sig == signature) {
            debug!(image_url = %image_url, signature = %signature, "Cache hit (exact)");
            return Ok(Some(value.clone()));
        }

        // An empty requested signature matches the first custom entry
        if signature.is_empty() {
            if let Some((sig, value)) = entries
                .iter()
                .find(|(sig, _)| sig.starts_with(CUSTOM_PREFIX))
            {
                info!(image_url = %image_url, matched = %sig, "Cache hit (custom entry for empty signature)");
                return Ok(Some(value.clone()));
            }
        }

        // Fuzzy fallback through the similarity judge
        let existing: Vec<String> = entries.iter().map(|(sig, _)| sig.clone()).collect();
        match self.similarity.most_similar(&signature, &existing).await {
            Ok(Some(matched)) => {
                info!(
                    image_url = %image_url,
                    requested = %signature,
                    matched = %matched,
                    "Cache hit (similarity fallback)"
                );
                Ok(entries
                    .into_iter()
                    .find(|(sig, _)| *sig == matched)
                    .map(|(_, value)| value))
            }
            Ok(None) => {
                debug!(image_url = %image_url, signature = %signature, "Cache miss: no similar signature");
                Ok(None)
            }
            Err(e) => {
                warn!(
                    image_url = %image_url,
                    error = %e,
                    "Similarity judge failed, treating as cache miss"
                );
                Ok(None)
            }
        }
    }

    /// Store a processed value for an image and filter set
    ///
    /// Silently drops the write when the image is at its sub-entry bound
    /// or the signature is already occupied; the call still succeeds.
    /// Publishes an `ImageProcessed` event after each actual insert.
    pub async fn set(
        &self,
        image_url: &str,
        filters: &[String],
        value: CachedValue,
    ) -> Result<()> {
        let signature = filter_signature(filters);

        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM cache_entries WHERE image_url = ?",
        )
        .bind(image_url)
        .fetch_one(&self.db)
        .await?;

        if count as usize >= self.sub_key_limit {
            let occupied = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM cache_entries WHERE image_url = ? AND signature = ?",
            )
            .bind(image_url)
            .bind(&signature)
            .fetch_one(&self.db)
            .await?;
            if occupied == 0 {
                warn!(
                    image_url = %image_url,
                    signature = %signature,
                    limit = self.sub_key_limit,
                    "Cache sub-entry limit reached, dropping write"
                );
                return Ok(());
            }
        }

        let value_json = serde_json::to_string(&value)
            .map_err(|e| sift_common::Error::Internal(format!("Cache value encode failed: {}", e)))?;

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO cache_entries (image_url, signature, value_json, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(image_url)
        .bind(&signature)
        .bind(&value_json)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.db)
        .await?
        .rows_affected();

        if inserted == 0 {
            debug!(
                image_url = %image_url,
                signature = %signature,
                "Signature already occupied, keeping first write"
            );
            return Ok(());
        }

        info!(
            image_url = %image_url,
            signature = %signature,
            result = %value.url(),
            "Cached processed value"
        );

        self.event_bus
            .emit(SiftEvent::ImageProcessed {
                image_url: image_url.to_string(),
                result: value.url().to_string(),
                filters: filters.to_vec(),
                base64_url: value.base64().map(|s| s.to_string()),
                timestamp: chrono::Utc::now(),
            })
            .ok();

        Ok(())
    }

    /// All (signature, value) entries for an image, in insertion order
    async fn load_entries(&self, image_url: &str) -> Result<Vec<(String, CachedValue)>> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT signature, value_json FROM cache_entries WHERE image_url = ? ORDER BY rowid",
        )
        .bind(image_url)
        .fetch_all(&self.db)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for (signature, value_json) in rows {
            match serde_json::from_str::<CachedValue>(&value_json) {
                Ok(value) => entries.push((signature, value)),
                Err(e) => {
                    warn!(
                        image_url = %image_url,
                        signature = %signature,
                        error = %e,
                        "Skipping undecodable cache entry"
                    );
                }
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CapabilityError;
    use async_trait::async_trait;

    /// Similarity double that never matches
    struct NoMatch;

    #[async_trait]
    impl SimilarityJudge for NoMatch {
        async fn most_similar(
            &self,
            _candidate: &str,
            _existing: &[String],
        ) -> std::result::Result<Option<String>, CapabilityError> {
            Ok(None)
        }
    }

    /// Similarity double that always matches a fixed signature
    struct FixedMatch(String);

    #[async_trait]
    impl SimilarityJudge for FixedMatch {
        async fn most_similar(
            &self,
            _candidate: &str,
            _existing: &[String],
        ) -> std::result::Result<Option<String>, CapabilityError> {
            Ok(Some(self.0.clone()))
        }
    }

    /// Similarity double that always fails
    struct Failing;

    #[async_trait]
    impl SimilarityJudge for Failing {
        async fn most_similar(
            &self,
            _candidate: &str,
            _existing: &[String],
        ) -> std::result::Result<Option<String>, CapabilityError> {
            Err(CapabilityError::Api("judge offline".to_string()))
        }
    }

    async fn cache_with(similarity: Arc<dyn SimilarityJudge>) -> ResultCache {
        let pool = crate::db::test_pool().await;
        ResultCache::new(pool, similarity, EventBus::new(16))
    }

    fn filters(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn exact_match_round_trips() {
        let cache = cache_with(Arc::new(NoMatch)).await;

        cache
            .set("img", &filters(&["Dogs"]), CachedValue::Plain("r1".to_string()))
            .await
            .unwrap();

        // Different order/casing/punctuation, same signature
        let hit = cache.get("img", &filters(&["dogs."])).await.unwrap();
        assert_eq!(hit.unwrap().url(), "r1");
    }

    #[tokio::test]
    async fn miss_when_no_entries() {
        let cache = cache_with(Arc::new(NoMatch)).await;
        assert!(cache.get("img", &filters(&["dogs"])).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn similarity_fallback_returns_matched_entry() {
        let cache = cache_with(Arc::new(FixedMatch("dogs.".to_string()))).await;

        cache
            .set("img", &filters(&["dogs"]), CachedValue::Plain("r1".to_string()))
            .await
            .unwrap();

        let hit = cache.get("img", &filters(&["canines"])).await.unwrap();
        assert_eq!(hit.unwrap().url(), "r1");
    }

    #[tokio::test]
    async fn similarity_failure_is_a_miss() {
        let cache = cache_with(Arc::new(Failing)).await;

        cache
            .set("img", &filters(&["dogs"]), CachedValue::Plain("r1".to_string()))
            .await
            .unwrap();

        assert!(cache.get("img", &filters(&["canines"])).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_signature_matches_first_custom_entry() {
        let cache = cache_with(Arc::new(NoMatch)).await;

        cache
            .set("img", &filters(&["dogs"]), CachedValue::Plain("plain".to_string()))
            .await
            .unwrap();
        cache
            .set(
                "img",
                &filters(&["custom_blur_1a"]),
                CachedValue::Plain("custom-result".to_string()),
            )
            .await
            .unwrap();

        let hit = cache.get("img", &[]).await.unwrap();
        assert_eq!(hit.unwrap().url(), "custom-result");
    }

    #[tokio::test]
    async fn sub_entry_limit_drops_new_signatures() {
        let pool = crate::db::test_pool().await;
        let cache = ResultCache::with_limit(pool, Arc::new(NoMatch), EventBus::new(16), 10);

        for i in 0..10 {
            cache
                .set(
                    "img",
                    &filters(&[&format!("filter{}", i)]),
                    CachedValue::Plain(format!("r{}", i)),
                )
                .await
                .unwrap();
        }

        // 11th distinct signature: silently dropped, call still succeeds
        cache
            .set("img", &filters(&["filter10"]), CachedValue::Plain("r10".to_string()))
            .await
            .unwrap();

        assert!(cache.get("img", &filters(&["filter10"])).await.unwrap().is_none());
        // Existing entries are untouched
        let hit = cache.get("img", &filters(&["filter3"])).await.unwrap();
        assert_eq!(hit.unwrap().url(), "r3");
    }

    #[tokio::test]
    async fn first_write_wins_for_a_signature() {
        let cache = cache_with(Arc::new(NoMatch)).await;

        cache
            .set("img", &filters(&["dogs"]), CachedValue::Plain("first".to_string()))
            .await
            .unwrap();
        cache
            .set("img", &filters(&["dogs"]), CachedValue::Plain("second".to_string()))
            .await
            .unwrap();

        let hit = cache.get("img", &filters(&["dogs"])).await.unwrap();
        assert_eq!(hit.unwrap().url(), "first");
    }

    #[tokio::test]
    async fn insert_publishes_completion_event() {
        let pool = crate::db::test_pool().await;
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let cache = ResultCache::new(pool, Arc::new(NoMatch), bus);

        cache
            .set(
                "img",
                &filters(&["dogs"]),
                CachedValue::new("r1", Some("data:image/png;base64,AAAA".to_string())),
            )
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            SiftEvent::ImageProcessed {
                image_url,
                result,
                filters,
                base64_url,
                ..
            } => {
                assert_eq!(image_url, "img");
                assert_eq!(result, "r1");
                assert_eq!(filters, vec!["dogs".to_string()]);
                assert!(base64_url.is_some());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn dropped_write_publishes_nothing() {
        let pool = crate::db::test_pool().await;
        let bus = EventBus::new(16);
        let cache = ResultCache::with_limit(pool, Arc::new(NoMatch), bus.clone(), 1);

        let mut rx = bus.subscribe();
        cache
            .set("img", &filters(&["a"]), CachedValue::Plain("r1".to_string()))
            .await
            .unwrap();
        cache
            .set("img", &filters(&["b"]), CachedValue::Plain("r2".to_string()))
            .await
            .unwrap();

        // Exactly one event: the first insert
        assert!(matches!(rx.try_recv(), Ok(SiftEvent::ImageProcessed { .. })));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn cached_value_forms_are_interchangeable() {
        let plain: CachedValue = serde_json::from_str("\"https://x/y.png\"").unwrap();
        assert_eq!(plain.url(), "https://x/y.png");
        assert!(plain.base64().is_none());

        let structured: CachedValue =
            serde_json::from_str(r#"{"url":"https://x/y.png","base64":"data:..."}"#).unwrap();
        assert_eq!(structured.url(), "https://x/y.png");
        assert_eq!(structured.base64(), Some("data:..."));
    }
}
