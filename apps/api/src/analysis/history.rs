//! History Recorder: append-only audit trail of analysis attempts.
//!
//! A record is inserted as `processing` when a request passes the quota gate
//! and is finalized exactly once, to `completed` (with a 0..10 score) or
//! `failed`. Finalizing only touches rows still in `processing`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::PersistenceError;
use crate::models::history::{AnalysisStatus, HistoryRow};

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Inserts a `processing` record and returns its id.
    async fn insert(&self, user_id: Uuid, filename: &str, file_type: &str) -> Result<Uuid>;

    /// Moves a `processing` record to `completed`. Returns false if the record
    /// was missing or already terminal.
    async fn complete(&self, id: Uuid, score: f64) -> Result<bool>;

    /// Moves a `processing` record to `failed`. Same contract as `complete`.
    async fn fail(&self, id: Uuid) -> Result<bool>;

    /// Number of records created by `user_id` within `[start, end]`.
    async fn count_between(
        &self,
        user_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u32>;

    async fn list_all(&self) -> Result<Vec<HistoryRow>>;

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<HistoryRow>>;

    /// Returns false if no record had that id.
    async fn delete(&self, id: Uuid) -> Result<bool>;
}

pub struct PgHistoryStore {
    pool: PgPool,
}

impl PgHistoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn finalize(&self, id: Uuid, status: AnalysisStatus, score: Option<f64>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE analysis_history
            SET status = $1, score = $2, completed_at = NOW()
            WHERE id = $3 AND status = $4
            "#,
        )
        .bind(status.as_str())
        .bind(score)
        .bind(id)
        .bind(AnalysisStatus::Processing.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl HistoryStore for PgHistoryStore {
    async fn insert(&self, user_id: Uuid, filename: &str, file_type: &str) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO analysis_history (id, user_id, filename, file_type, status)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(filename)
        .bind(file_type)
        .bind(AnalysisStatus::Processing.as_str())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn complete(&self, id: Uuid, score: f64) -> Result<bool> {
        self.finalize(id, AnalysisStatus::Completed, Some(score))
            .await
    }

    async fn fail(&self, id: Uuid) -> Result<bool> {
        self.finalize(id, AnalysisStatus::Failed, None).await
    }

    async fn count_between(
        &self,
        user_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM analysis_history WHERE user_id = $1 AND created_at BETWEEN $2 AND $3",
        )
        .bind(user_id)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;
        Ok(u32::try_from(count)?)
    }

    async fn list_all(&self) -> Result<Vec<HistoryRow>> {
        Ok(sqlx::query_as::<_, HistoryRow>(
            "SELECT * FROM analysis_history ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<HistoryRow>> {
        Ok(sqlx::query_as::<_, HistoryRow>(
            "SELECT * FROM analysis_history WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM analysis_history WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Best-effort wrapper used by the pipeline. Storage failures are logged as
/// `PersistenceError::History` and never fail the request.
#[derive(Clone)]
pub struct HistoryRecorder {
    store: Arc<dyn HistoryStore>,
}

impl HistoryRecorder {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self { store }
    }

    /// Returns `None` if the record could not be written.
    pub async fn record_attempt(&self, user_id: Uuid, filename: &str, file_type: &str) -> Option<Uuid> {
        match self.store.insert(user_id, filename, file_type).await {
            Ok(id) => {
                debug!("History record {id} created for user {user_id}");
                Some(id)
            }
            Err(e) => {
                warn!("{}", PersistenceError::History(e));
                None
            }
        }
    }

    pub async fn mark_completed(&self, id: Option<Uuid>, score: f64) {
        let Some(id) = id else { return };
        match self.store.complete(id, score).await {
            Ok(true) => {}
            Ok(false) => warn!("History record {id} was already finalized"),
            Err(e) => warn!("{}", PersistenceError::History(e)),
        }
    }

    pub async fn mark_failed(&self, id: Option<Uuid>) {
        let Some(id) = id else { return };
        match self.store.fail(id).await {
            Ok(true) => {}
            Ok(false) => warn!("History record {id} was already finalized"),
            Err(e) => warn!("{}", PersistenceError::History(e)),
        }
    }
}
