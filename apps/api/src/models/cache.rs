use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// File metadata that participates in the cache identity.
/// Field order is part of the serialized form and therefore of the metadata hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub file_name: String,
    pub file_size: u64,
    /// Milliseconds since the Unix epoch, as reported by the uploader.
    pub last_modified: i64,
}

/// One row of `analysis_cache`. `analysis_result` holds the provider's raw,
/// pre-normalization output.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CacheEntryRow {
    pub cache_key: String,
    pub user_id: Uuid,
    pub text_hash: String,
    pub metadata_hash: String,
    pub metadata: Value,
    pub analysis_result: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
