//! Analysis pipeline: orchestrates one résumé analysis request.
//!
//! Flow: quota gate → history(processing) → extract → identity →
//!       [invalidate if forced] → cache lookup → [miss] grade →
//!       normalize → cache write (best-effort) → history(completed).
//!
//! The quota gate runs before anything that costs money. Any failure after the
//! history record exists marks it `failed`. Cache and history writes never
//! fail the request.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis::cache_store::CacheStore;
use crate::analysis::extractor::{Document, Extractor};
use crate::analysis::history::HistoryRecorder;
use crate::analysis::identity::compute_identity;
use crate::analysis::invoker::Grader;
use crate::analysis::normalizer::normalize_result;
use crate::analysis::quota::QuotaGate;
use crate::errors::{AppError, PersistenceError};
use crate::models::analysis::CanonicalAnalysis;

pub struct AnalysisRequest {
    pub user_id: Uuid,
    pub document: Document,
    /// Drop any cached result for this content and grade again.
    pub force_refresh: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutcome {
    pub analysis: CanonicalAnalysis,
    pub cache_key: String,
    /// True when the result came from the cache and the grader was not called.
    pub cached: bool,
    /// None if the history record could not be written.
    pub history_id: Option<Uuid>,
}

pub struct AnalysisPipeline {
    quota: Arc<QuotaGate>,
    extractor: Extractor,
    cache: Arc<dyn CacheStore>,
    grader: Arc<dyn Grader>,
    history: HistoryRecorder,
}

impl AnalysisPipeline {
    pub fn new(
        quota: Arc<QuotaGate>,
        extractor: Extractor,
        cache: Arc<dyn CacheStore>,
        grader: Arc<dyn Grader>,
        history: HistoryRecorder,
    ) -> Self {
        Self {
            quota,
            extractor,
            cache,
            grader,
            history,
        }
    }

    pub async fn run(&self, request: AnalysisRequest) -> Result<AnalysisOutcome, AppError> {
        let AnalysisRequest {
            user_id,
            document,
            force_refresh,
        } = request;

        self.quota.enforce(user_id).await?;

        let history_id = self
            .history
            .record_attempt(user_id, &document.filename, document.kind().label())
            .await;

        match self
            .analyze(user_id, &document, force_refresh, history_id)
            .await
        {
            Ok(outcome) => {
                self.history
                    .mark_completed(history_id, outcome.analysis.history_score())
                    .await;
                info!(
                    "Analysis for user {user_id} done: score={} cached={}",
                    outcome.analysis.overall_score, outcome.cached
                );
                Ok(outcome)
            }
            Err(e) => {
                self.history.mark_failed(history_id).await;
                warn!("Analysis for user {user_id} failed: {e}");
                Err(e)
            }
        }
    }

    async fn analyze(
        &self,
        user_id: Uuid,
        document: &Document,
        force_refresh: bool,
        history_id: Option<Uuid>,
    ) -> Result<AnalysisOutcome, AppError> {
        let content = self.extractor.extract(document).await?;
        let metadata = document.metadata();
        let identity =
            compute_identity(&content, &metadata).map_err(|e| AppError::Internal(e.into()))?;

        let cached = if force_refresh {
            self.invalidate(&identity.cache_key).await;
            None
        } else {
            self.lookup(&identity.cache_key).await
        };

        if let Some(raw) = cached {
            info!("Cache hit for key {}", identity.cache_key);
            return Ok(AnalysisOutcome {
                analysis: normalize_result(&raw)?,
                cache_key: identity.cache_key,
                cached: true,
                history_id,
            });
        }

        info!("Cache miss for key {}, invoking grader", identity.cache_key);
        let raw = self.grader.grade(&content).await?;
        let analysis = normalize_result(&raw)?;

        if let Err(e) = self.cache.put(user_id, &identity, &metadata, &raw).await {
            warn!("{}", PersistenceError::Cache(e));
        }

        Ok(AnalysisOutcome {
            analysis,
            cache_key: identity.cache_key,
            cached: false,
            history_id,
        })
    }

    /// A failed read is treated as a miss.
    async fn lookup(&self, cache_key: &str) -> Option<Value> {
        match self.cache.get(cache_key).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Cache lookup for key {cache_key} failed, treating as miss: {e:#}");
                None
            }
        }
    }

    async fn invalidate(&self, cache_key: &str) {
        if let Err(e) = self.cache.invalidate(cache_key, None).await {
            warn!("{}", PersistenceError::Cache(e));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::analysis::cache_store::CacheStore;
    use crate::analysis::extractor::{ExtractError, PageImage, PageRenderer};
    use crate::analysis::history::HistoryStore;
    use crate::analysis::memory::{
        InMemoryCacheStore, InMemoryHistoryStore, ScriptedGrader, StaticTierResolver,
    };
    use crate::analysis::quota::{QuotaLimits, Tier};

    const RESUME: &str = "Jane Doe. Staff engineer, ten years of Rust and PostgreSQL.";

    struct NoRenderer;

    impl PageRenderer for NoRenderer {
        fn render_pages(&self, _bytes: &[u8]) -> Result<Vec<PageImage>, ExtractError> {
            Err(ExtractError::Render("no renderer in tests".to_string()))
        }
    }

    struct Harness {
        pipeline: AnalysisPipeline,
        cache: Arc<InMemoryCacheStore>,
        history: Arc<InMemoryHistoryStore>,
        grader: Arc<ScriptedGrader>,
    }

    fn harness(grader: ScriptedGrader, tier: Tier) -> Harness {
        let cache = Arc::new(InMemoryCacheStore::new());
        let history = Arc::new(InMemoryHistoryStore::new());
        let grader = Arc::new(grader);
        let quota = Arc::new(QuotaGate::new(
            history.clone(),
            Arc::new(StaticTierResolver(tier)),
            QuotaLimits::default(),
        ));
        let pipeline = AnalysisPipeline::new(
            quota,
            Extractor::new(20, Arc::new(NoRenderer)),
            cache.clone(),
            grader.clone(),
            HistoryRecorder::new(history.clone()),
        );
        Harness {
            pipeline,
            cache,
            history,
            grader,
        }
    }

    fn legacy_result() -> Value {
        json!({
            "score": 72,
            "strengths": ["Clear formatting"],
            "weaknesses": [
                {"issue": "No metrics", "suggestion": "Add numbers", "section": "Experience", "priority": 2},
                {"issue": "Vague summary", "suggestion": "Be specific", "section": "General", "priority": 1}
            ],
            "suggestionsBySection": {"Experience": ["Use action verbs"]},
            "notes": "Solid resume"
        })
    }

    fn request(user_id: Uuid, filename: &str, force_refresh: bool) -> AnalysisRequest {
        AnalysisRequest {
            user_id,
            document: Document::new(RESUME, filename, 1_760_000_000_000),
            force_refresh,
        }
    }

    #[tokio::test]
    async fn test_cache_hit_skips_grader() {
        let h = harness(ScriptedGrader::returning(legacy_result()), Tier::Elevated);
        let user_id = Uuid::new_v4();

        let first = h.pipeline.run(request(user_id, "cv.txt", false)).await.unwrap();
        let second = h.pipeline.run(request(user_id, "cv.txt", false)).await.unwrap();

        assert_eq!(h.grader.calls(), 1);
        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.cache_key, second.cache_key);
        assert_eq!(first.analysis, second.analysis);
    }

    #[tokio::test]
    async fn test_force_refresh_regrades_and_overwrites_entry() {
        let h = harness(ScriptedGrader::returning(legacy_result()), Tier::Elevated);
        let user_id = Uuid::new_v4();

        let first = h.pipeline.run(request(user_id, "cv.txt", false)).await.unwrap();
        let before = h.cache.entry(&first.cache_key).await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        let refreshed = h.pipeline.run(request(user_id, "cv.txt", true)).await.unwrap();
        let after = h.cache.entry(&first.cache_key).await.unwrap().unwrap();

        assert_eq!(h.grader.calls(), 2);
        assert!(!refreshed.cached);
        assert!(after.updated_at > before.updated_at);
        assert_eq!(h.cache.list_entries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_renamed_upload_is_a_cache_miss() {
        let h = harness(ScriptedGrader::returning(legacy_result()), Tier::Elevated);
        let user_id = Uuid::new_v4();

        h.pipeline.run(request(user_id, "cv.txt", false)).await.unwrap();
        h.pipeline.run(request(user_id, "cv-v2.txt", false)).await.unwrap();

        assert_eq!(h.grader.calls(), 2);
        assert_eq!(h.cache.list_entries().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cache_stores_raw_result_and_returns_canonical() {
        let h = harness(ScriptedGrader::returning(legacy_result()), Tier::Elevated);
        let outcome = h
            .pipeline
            .run(request(Uuid::new_v4(), "cv.txt", false))
            .await
            .unwrap();

        let stored = h.cache.get(&outcome.cache_key).await.unwrap().unwrap();
        assert_eq!(stored, legacy_result());
        assert_eq!(outcome.analysis.sections[0].name, "Highlights & Critical Points");
        assert_eq!(outcome.analysis.overall_score, 72.0);
    }

    #[tokio::test]
    async fn test_zero_byte_document_is_unreadable_and_leaves_no_trace() {
        let h = harness(ScriptedGrader::returning(legacy_result()), Tier::Elevated);
        let user_id = Uuid::new_v4();
        let result = h
            .pipeline
            .run(AnalysisRequest {
                user_id,
                document: Document::new(Vec::new(), "empty.pdf", 0),
                force_refresh: false,
            })
            .await;

        assert!(matches!(result, Err(AppError::UnreadableDocument(_))));
        assert_eq!(h.grader.calls(), 0);
        assert!(h.cache.list_entries().await.unwrap().is_empty());
        let rows = h.history.list_for_user(user_id).await.unwrap();
        assert!(rows.iter().all(|r| r.status != "completed"));
        assert_eq!(rows[0].status, "failed");
    }

    #[tokio::test]
    async fn test_cache_write_failure_still_returns_result() {
        let h = harness(ScriptedGrader::returning(legacy_result()), Tier::Elevated);
        h.cache.fail_writes(true);

        let outcome = h
            .pipeline
            .run(request(Uuid::new_v4(), "cv.txt", false))
            .await
            .unwrap();

        assert_eq!(outcome.analysis.summary, "Solid resume");
        assert!(h.cache.list_entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_forced_refresh_survives_invalidation_failure() {
        let h = harness(ScriptedGrader::returning(legacy_result()), Tier::Elevated);
        let user_id = Uuid::new_v4();
        h.pipeline.run(request(user_id, "cv.txt", false)).await.unwrap();

        h.cache.fail_writes(true);
        let outcome = h.pipeline.run(request(user_id, "cv.txt", true)).await.unwrap();

        assert!(!outcome.cached);
        assert_eq!(h.grader.calls(), 2);
    }

    #[tokio::test]
    async fn test_history_failure_does_not_fail_request() {
        let h = harness(ScriptedGrader::returning(legacy_result()), Tier::Elevated);
        h.history.fail_writes(true);

        let outcome = h
            .pipeline
            .run(request(Uuid::new_v4(), "cv.txt", false))
            .await
            .unwrap();
        assert!(outcome.history_id.is_none());
    }

    #[tokio::test]
    async fn test_completed_history_records_score_on_ten_point_scale() {
        let h = harness(ScriptedGrader::returning(legacy_result()), Tier::Elevated);
        let user_id = Uuid::new_v4();
        let outcome = h.pipeline.run(request(user_id, "cv.txt", false)).await.unwrap();

        let rows = h.history.list_for_user(user_id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(Some(rows[0].id), outcome.history_id);
        assert_eq!(rows[0].status, "completed");
        assert_eq!(rows[0].score, Some(7.2));
        assert_eq!(rows[0].file_type, "txt");
    }

    #[tokio::test]
    async fn test_quota_exceeded_rejects_before_grading() {
        let h = harness(ScriptedGrader::returning(legacy_result()), Tier::Standard);
        let user_id = Uuid::new_v4();
        for i in 0..3 {
            h.pipeline
                .run(request(user_id, &format!("cv-{i}.txt"), false))
                .await
                .unwrap();
        }

        let result = h.pipeline.run(request(user_id, "cv-4.txt", false)).await;

        assert!(matches!(result, Err(AppError::QuotaExceeded { .. })));
        assert_eq!(h.grader.calls(), 3);
        assert_eq!(h.history.list_for_user(user_id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_provider_failure_marks_history_failed() {
        let h = harness(ScriptedGrader::failing("upstream 503"), Tier::Elevated);
        let user_id = Uuid::new_v4();

        let result = h.pipeline.run(request(user_id, "cv.txt", false)).await;

        assert!(matches!(result, Err(AppError::AnalysisProvider(_))));
        assert!(h.cache.list_entries().await.unwrap().is_empty());
        let rows = h.history.list_for_user(user_id).await.unwrap();
        assert_eq!(rows[0].status, "failed");
        assert_eq!(rows[0].score, None);
    }

    #[tokio::test]
    async fn test_unrecognized_result_is_not_cached() {
        let h = harness(
            ScriptedGrader::returning(json!({"rating": "good"})),
            Tier::Elevated,
        );
        let result = h.pipeline.run(request(Uuid::new_v4(), "cv.txt", false)).await;

        assert!(matches!(
            result,
            Err(AppError::UnrecognizedResultShape(_))
        ));
        assert!(h.cache.list_entries().await.unwrap().is_empty());
    }
}
