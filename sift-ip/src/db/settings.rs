//! Settings persistence
//!
//! Key/value settings table. The database tier is authoritative for
//! provider API keys; `config::resolve_*` merges it with ENV and TOML.

use sift_common::Result;
use sqlx::SqlitePool;

/// Read a setting value
pub async fn get_setting(db: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value = sqlx::query_scalar::<_, String>("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await?;
    Ok(value)
}

/// Write a setting value (upsert)
pub async fn set_setting(db: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(db)
    .await?;
    Ok(())
}

/// OpenAI API key from the database tier
pub async fn get_openai_api_key(db: &SqlitePool) -> Result<Option<String>> {
    get_setting(db, "openai_api_key").await
}

/// Gemini API key from the database tier
pub async fn get_gemini_api_key(db: &SqlitePool) -> Result<Option<String>> {
    get_setting(db, "gemini_api_key").await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let pool = crate::db::test_pool().await;

        assert!(get_setting(&pool, "openai_api_key").await.unwrap().is_none());

        set_setting(&pool, "openai_api_key", "sk-first").await.unwrap();
        set_setting(&pool, "openai_api_key", "sk-second").await.unwrap();

        assert_eq!(
            get_openai_api_key(&pool).await.unwrap().as_deref(),
            Some("sk-second")
        );
    }
}
