//! Configuration resolution for sift-ip
//!
//! Provides multi-tier configuration resolution with Database → ENV →
//! TOML priority for provider API keys, plus service tunables.

use sift_common::config::TomlConfig;
use sift_common::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Default port for the sift-ip service
pub const DEFAULT_PORT: u16 = 5873;

/// Resolve the OpenAI API key from 3-tier configuration
///
/// **Priority:** Database → ENV → TOML. Returns `None` when no tier has
/// a valid key; the provider registry then leaves OpenAI unconfigured.
pub async fn resolve_openai_api_key(
    db: &SqlitePool,
    toml_config: &TomlConfig,
) -> Result<Option<String>> {
    resolve_api_key(
        "OpenAI",
        crate::db::settings::get_openai_api_key(db).await?,
        std::env::var("SIFT_OPENAI_API_KEY").ok(),
        toml_config.openai_api_key.clone(),
    )
}

/// Resolve the Gemini API key from 3-tier configuration
///
/// **Priority:** Database → ENV → TOML.
pub async fn resolve_gemini_api_key(
    db: &SqlitePool,
    toml_config: &TomlConfig,
) -> Result<Option<String>> {
    resolve_api_key(
        "Gemini",
        crate::db::settings::get_gemini_api_key(db).await?,
        std::env::var("SIFT_GEMINI_API_KEY").ok(),
        toml_config.gemini_api_key.clone(),
    )
}

fn resolve_api_key(
    label: &str,
    db_key: Option<String>,
    env_key: Option<String>,
    toml_key: Option<String>,
) -> Result<Option<String>> {
    let mut sources = Vec::new();
    if db_key.as_deref().is_some_and(is_valid_key) {
        sources.push("database");
    }
    if env_key.as_deref().is_some_and(is_valid_key) {
        sources.push("environment");
    }
    if toml_key.as_deref().is_some_and(is_valid_key) {
        sources.push("TOML");
    }

    // Warn if multiple sources (potential misconfiguration)
    if sources.len() > 1 {
        warn!(
            "{} API key found in multiple sources: {}. Using {} (highest priority).",
            label,
            sources.join(", "),
            sources[0]
        );
    }

    // Resolution priority
    for (key, source) in [
        (db_key, "database"),
        (env_key, "environment variable"),
        (toml_key, "TOML config"),
    ] {
        if let Some(key) = key {
            if is_valid_key(&key) {
                info!("{} API key loaded from {}", label, source);
                return Ok(Some(key));
            }
        }
    }

    info!("{} API key not configured", label);
    Ok(None)
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Resolve the service's public base URL for stored-artifact links
///
/// ENV override first, then the compiled localhost default.
pub fn resolve_base_url(port: u16) -> String {
    std::env::var("SIFT_BASE_URL")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| format!("http://127.0.0.1:{}", port))
}
