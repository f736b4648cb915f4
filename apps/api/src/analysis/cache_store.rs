//! Cache Store: content-addressed storage of raw grading results.
//!
//! One live row per `cache_key`. Writes are upserts and the last one wins;
//! nothing serializes concurrent writers for the same key.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::analysis::identity::ContentIdentity;
use crate::models::cache::{CacheEntryRow, FileMetadata};

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Raw (pre-normalization) result stored for `cache_key`, if any.
    async fn get(&self, cache_key: &str) -> Result<Option<Value>>;

    /// Inserts or replaces the entry for `identity.cache_key`, refreshing `updated_at`.
    async fn put(
        &self,
        user_id: Uuid,
        identity: &ContentIdentity,
        metadata: &FileMetadata,
        raw_result: &Value,
    ) -> Result<()>;

    /// Deletes entries for `cache_key`, optionally only those owned by `user_id`.
    /// Returns the number of rows removed.
    async fn invalidate(&self, cache_key: &str, user_id: Option<Uuid>) -> Result<u64>;

    /// Full row for `cache_key`, used by the admin surface.
    async fn entry(&self, cache_key: &str) -> Result<Option<CacheEntryRow>>;

    async fn list_entries(&self) -> Result<Vec<CacheEntryRow>>;
}

pub struct PgCacheStore {
    pool: PgPool,
}

impl PgCacheStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CacheStore for PgCacheStore {
    async fn get(&self, cache_key: &str) -> Result<Option<Value>> {
        let text = sqlx::query_scalar::<_, String>(
            "SELECT analysis_result::text FROM analysis_cache WHERE cache_key = $1",
        )
        .bind(cache_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(text.map(|t| serde_json::from_str::<Value>(&t)).transpose()?)
    }

    async fn put(
        &self,
        user_id: Uuid,
        identity: &ContentIdentity,
        metadata: &FileMetadata,
        raw_result: &Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO analysis_cache
                (cache_key, user_id, text_hash, metadata_hash, metadata, analysis_result)
            VALUES ($1, $2, $3, $4, $5, $6::json)
            ON CONFLICT (cache_key) DO UPDATE SET
                user_id = EXCLUDED.user_id,
                text_hash = EXCLUDED.text_hash,
                metadata_hash = EXCLUDED.metadata_hash,
                metadata = EXCLUDED.metadata,
                analysis_result = EXCLUDED.analysis_result,
                updated_at = NOW()
            "#,
        )
        .bind(&identity.cache_key)
        .bind(user_id)
        .bind(&identity.text_hash)
        .bind(&identity.metadata_hash)
        .bind(serde_json::to_value(metadata)?)
        .bind(raw_result_text(raw_result)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn invalidate(&self, cache_key: &str, user_id: Option<Uuid>) -> Result<u64> {
        let result = match user_id {
            Some(user_id) => {
                sqlx::query("DELETE FROM analysis_cache WHERE cache_key = $1 AND user_id = $2")
                    .bind(cache_key)
                    .bind(user_id)
                    .execute(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("DELETE FROM analysis_cache WHERE cache_key = $1")
                    .bind(cache_key)
                    .execute(&self.pool)
                    .await?
            }
        };
        info!(
            "Invalidated {} cache entries for key {cache_key}",
            result.rows_affected()
        );
        Ok(result.rows_affected())
    }

    async fn entry(&self, cache_key: &str) -> Result<Option<CacheEntryRow>> {
        Ok(
            sqlx::query_as::<_, CacheEntryRow>("SELECT * FROM analysis_cache WHERE cache_key = $1")
                .bind(cache_key)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn list_entries(&self) -> Result<Vec<CacheEntryRow>> {
        Ok(sqlx::query_as::<_, CacheEntryRow>(
            "SELECT * FROM analysis_cache ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await?)
    }
}

/// `analysis_result` is a `json` column written from this text, so Postgres
/// hands back the provider's key order unchanged.
fn raw_result_text(raw_result: &Value) -> serde_json::Result<String> {
    serde_json::to_string(raw_result)
}
