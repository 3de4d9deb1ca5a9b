//! Artifact storage for the image pipeline
//!
//! Downloads source images and saves generated artifacts under the
//! service root folder. Stored files are served back over HTTP from the
//! same process (`/media/...`), so a save returns a URL usable in cache
//! values and notifications.

use async_trait::async_trait;
use reqwest::Client;
use sift_common::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Default timeout for source image downloads
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// URL path prefix under which stored artifacts are served
pub const MEDIA_ROUTE: &str = "/media";

/// Artifact storage seam
///
/// The pipeline only depends on this trait; [`StorageManager`] is the
/// production implementation, tests substitute in-memory doubles.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Download a source image and return its bytes
    async fn download_image(&self, url: &str) -> Result<Vec<u8>>;

    /// Save artifact bytes under a relative path, returning the served URL
    async fn save(&self, image_bytes: &[u8], filename: &str) -> Result<String>;
}

/// Storage manager for source downloads and artifact persistence
pub struct StorageManager {
    /// HTTP client for source downloads
    http_client: Client,
    /// On-disk media directory (`<root>/media`)
    media_dir: PathBuf,
    /// Public base URL of this service (e.g. `http://127.0.0.1:5873`)
    base_url: String,
}

impl StorageManager {
    /// Create a storage manager rooted at `<root_folder>/media`
    pub fn new(root_folder: &std::path::Path, base_url: impl Into<String>) -> Self {
        Self {
            http_client: Client::builder()
                .timeout(DOWNLOAD_TIMEOUT)
                .build()
                .expect("Failed to create HTTP client"),
            media_dir: root_folder.join("media"),
            base_url: base_url.into(),
        }
    }

    /// Media directory for static serving
    pub fn media_dir(&self) -> &std::path::Path {
        &self.media_dir
    }
}

#[async_trait]
impl ArtifactStore for StorageManager {
    /// Download a source image and return its bytes
    ///
    /// Called once per batch; the bytes are shared across all candidates.
    async fn download_image(&self, url: &str) -> Result<Vec<u8>> {
        debug!(url = %url, "Downloading source image");

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Capability(format!("Image download failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Capability(format!(
                "Image download returned {}: {}",
                response.status(),
                url
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Capability(format!("Image download failed: {}", e)))?;

        Ok(bytes.to_vec())
    }

    /// Save artifact bytes under the media directory and return the served URL
    ///
    /// `filename` is a relative path such as `jobs/<job_id>/<name>.png`.
    async fn save(&self, image_bytes: &[u8], filename: &str) -> Result<String> {
        let path = self.media_dir.join(filename);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, image_bytes).await?;

        let url = format!("{}{}/{}", self.base_url, MEDIA_ROUTE, filename);
        debug!(path = %path.display(), url = %url, "Saved artifact");
        Ok(url)
    }
}
