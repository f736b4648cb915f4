//! In-memory stores and fakes for tests.
//!
//! `HashMap`/`Vec` behind `std::sync::RwLock`. Each store can be switched into
//! a failing mode to simulate persistence outages.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::analysis::cache_store::CacheStore;
use crate::analysis::extractor::ExtractedContent;
use crate::analysis::history::HistoryStore;
use crate::analysis::identity::ContentIdentity;
use crate::analysis::invoker::Grader;
use crate::analysis::quota::{Tier, TierResolver};
use crate::errors::AppError;
use crate::models::cache::{CacheEntryRow, FileMetadata};
use crate::models::history::{AnalysisStatus, HistoryRow};

fn poisoned() -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

#[derive(Default)]
pub struct InMemoryCacheStore {
    entries: RwLock<HashMap<String, CacheEntryRow>>,
    fail_writes: AtomicBool,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, cache_key: &str) -> Result<Option<Value>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.get(cache_key).map(|e| e.analysis_result.clone()))
    }

    async fn put(
        &self,
        user_id: Uuid,
        identity: &ContentIdentity,
        metadata: &FileMetadata,
        raw_result: &Value,
    ) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("simulated cache write failure");
        }
        let now = Utc::now();
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        let created_at = entries
            .get(&identity.cache_key)
            .map(|e| e.created_at)
            .unwrap_or(now);
        entries.insert(
            identity.cache_key.clone(),
            CacheEntryRow {
                cache_key: identity.cache_key.clone(),
                user_id,
                text_hash: identity.text_hash.clone(),
                metadata_hash: identity.metadata_hash.clone(),
                metadata: serde_json::to_value(metadata)?,
                analysis_result: raw_result.clone(),
                created_at,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn invalidate(&self, cache_key: &str, user_id: Option<Uuid>) -> Result<u64> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("simulated cache delete failure");
        }
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        let matches = entries
            .get(cache_key)
            .is_some_and(|e| user_id.map_or(true, |u| e.user_id == u));
        if matches {
            entries.remove(cache_key);
            return Ok(1);
        }
        Ok(0)
    }

    async fn entry(&self, cache_key: &str) -> Result<Option<CacheEntryRow>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.get(cache_key).cloned())
    }

    async fn list_entries(&self) -> Result<Vec<CacheEntryRow>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        let mut rows: Vec<_> = entries.values().cloned().collect();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(rows)
    }
}

#[derive(Default)]
pub struct InMemoryHistoryStore {
    rows: RwLock<Vec<HistoryRow>>,
    fail_writes: AtomicBool,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn finalize(&self, id: Uuid, status: AnalysisStatus, score: Option<f64>) -> Result<bool> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("simulated history write failure");
        }
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        let Some(row) = rows
            .iter_mut()
            .find(|r| r.id == id && r.status == AnalysisStatus::Processing.as_str())
        else {
            return Ok(false);
        };
        row.status = status.as_str().to_string();
        row.score = score;
        row.completed_at = Some(Utc::now());
        Ok(true)
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn insert(&self, user_id: Uuid, filename: &str, file_type: &str) -> Result<Uuid> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("simulated history write failure");
        }
        let id = Uuid::new_v4();
        self.rows.write().map_err(|_| poisoned())?.push(HistoryRow {
            id,
            user_id,
            filename: filename.to_string(),
            file_type: file_type.to_string(),
            score: None,
            status: AnalysisStatus::Processing.as_str().to_string(),
            created_at: Utc::now(),
            completed_at: None,
        });
        Ok(id)
    }

    async fn complete(&self, id: Uuid, score: f64) -> Result<bool> {
        self.finalize(id, AnalysisStatus::Completed, Some(score))
    }

    async fn fail(&self, id: Uuid) -> Result<bool> {
        self.finalize(id, AnalysisStatus::Failed, None)
    }

    async fn count_between(
        &self,
        user_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u32> {
        let rows = self.rows.read().map_err(|_| poisoned())?;
        let count = rows
            .iter()
            .filter(|r| r.user_id == user_id && r.created_at >= start && r.created_at <= end)
            .count();
        Ok(u32::try_from(count)?)
    }

    async fn list_all(&self) -> Result<Vec<HistoryRow>> {
        let mut rows = self.rows.read().map_err(|_| poisoned())?.clone();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<HistoryRow>> {
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .filter(|r| r.user_id == user_id)
            .collect())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        let before = rows.len();
        rows.retain(|r| r.id != id);
        Ok(rows.len() < before)
    }
}

pub struct StaticTierResolver(pub Tier);

#[async_trait]
impl TierResolver for StaticTierResolver {
    async fn resolve_tier(&self, _user_id: Uuid) -> Result<Tier> {
        Ok(self.0)
    }
}

/// Grader that returns a fixed response and counts how often it was called.
pub struct ScriptedGrader {
    response: std::result::Result<Value, String>,
    calls: AtomicUsize,
}

impl ScriptedGrader {
    pub fn returning(raw: Value) -> Self {
        Self {
            response: Ok(raw),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            response: Err(message.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Grader for ScriptedGrader {
    async fn grade(&self, _content: &ExtractedContent) -> std::result::Result<Value, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response
            .clone()
            .map_err(AppError::AnalysisProvider)
    }
}
