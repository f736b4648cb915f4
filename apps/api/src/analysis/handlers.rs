use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analysis::extractor::Document;
use crate::analysis::pipeline::{AnalysisOutcome, AnalysisRequest};
use crate::analysis::quota::QuotaState;
use crate::errors::AppError;
use crate::models::cache::CacheEntryRow;
use crate::models::history::HistoryRow;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct UserIdQuery {
    pub user_id: Uuid,
}

#[derive(Deserialize)]
pub struct InvalidateQuery {
    pub user_id: Option<Uuid>,
}

#[derive(Serialize)]
pub struct InvalidateResponse {
    pub cache_key: String,
    pub removed: u64,
}

/// Fields collected from the upload form.
#[derive(Default)]
struct UploadForm {
    user_id: Option<Uuid>,
    file: Option<(String, Bytes)>,
    last_modified: i64,
    force_refresh: bool,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut form = UploadForm::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::Validation(format!("Malformed multipart body: {e}")))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "file" => {
                    let filename = field
                        .file_name()
                        .map(str::to_string)
                        .ok_or_else(|| AppError::Validation("file part has no filename".into()))?;
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| AppError::Validation(format!("Could not read file: {e}")))?;
                    form.file = Some((filename, bytes));
                }
                "user_id" => {
                    let raw = field_text(field).await?;
                    let id = Uuid::parse_str(raw.trim())
                        .map_err(|_| AppError::Validation(format!("Invalid user_id '{raw}'")))?;
                    form.user_id = Some(id);
                }
                "last_modified" => {
                    let raw = field_text(field).await?;
                    form.last_modified = raw.trim().parse().map_err(|_| {
                        AppError::Validation(format!("last_modified must be epoch millis, got '{raw}'"))
                    })?;
                }
                "force_refresh" => {
                    form.force_refresh = parse_flag(&field_text(field).await?);
                }
                _ => {}
            }
        }
        Ok(form)
    }
}

async fn field_text(field: axum::extract::multipart::Field<'_>) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|e| AppError::Validation(format!("Could not read form field: {e}")))
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// POST /api/v1/analyses
pub async fn handle_analyze(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<AnalysisOutcome>, AppError> {
    let form = UploadForm::read(multipart).await?;
    let user_id = form
        .user_id
        .ok_or_else(|| AppError::Validation("user_id is required".into()))?;
    let (filename, bytes) = form
        .file
        .ok_or_else(|| AppError::Validation("file is required".into()))?;

    let outcome = state
        .pipeline
        .run(AnalysisRequest {
            user_id,
            document: Document::new(bytes, filename, form.last_modified),
            force_refresh: form.force_refresh,
        })
        .await?;
    Ok(Json(outcome))
}

/// GET /api/v1/quota
pub async fn handle_get_quota(
    State(state): State<AppState>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<QuotaState>, AppError> {
    Ok(Json(state.quota.check_quota(params.user_id).await?))
}

/// GET /api/v1/history
pub async fn handle_user_history(
    State(state): State<AppState>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<Vec<HistoryRow>>, AppError> {
    Ok(Json(state.history.list_for_user(params.user_id).await?))
}

/// GET /api/v1/admin/cache
pub async fn handle_list_cache(
    State(state): State<AppState>,
) -> Result<Json<Vec<CacheEntryRow>>, AppError> {
    Ok(Json(state.cache.list_entries().await?))
}

/// GET /api/v1/admin/cache/:cache_key
pub async fn handle_get_cache_entry(
    State(state): State<AppState>,
    Path(cache_key): Path<String>,
) -> Result<Json<CacheEntryRow>, AppError> {
    state
        .cache
        .entry(&cache_key)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Cache entry {cache_key} not found")))
}

/// DELETE /api/v1/admin/cache/:cache_key
pub async fn handle_invalidate_cache(
    State(state): State<AppState>,
    Path(cache_key): Path<String>,
    Query(params): Query<InvalidateQuery>,
) -> Result<Json<InvalidateResponse>, AppError> {
    let removed = state.cache.invalidate(&cache_key, params.user_id).await?;
    if removed == 0 {
        return Err(AppError::NotFound(format!("Cache entry {cache_key} not found")));
    }
    Ok(Json(InvalidateResponse { cache_key, removed }))
}

/// GET /api/v1/admin/history
pub async fn handle_list_history(
    State(state): State<AppState>,
) -> Result<Json<Vec<HistoryRow>>, AppError> {
    Ok(Json(state.history.list_all().await?))
}

/// DELETE /api/v1/admin/history/:id
pub async fn handle_delete_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if !state.history.delete(id).await? {
        return Err(AppError::NotFound(format!("History record {id} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/admin/tiers
/// Drops cached tier lookups so plan changes apply on the next request.
pub async fn handle_clear_tier_cache(State(state): State<AppState>) -> StatusCode {
    state.tiers.clear();
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag_accepts_common_truthy_values() {
        for raw in ["true", "TRUE", " 1 ", "yes", "on"] {
            assert!(parse_flag(raw), "{raw}");
        }
        for raw in ["false", "0", "", "maybe"] {
            assert!(!parse_flag(raw), "{raw}");
        }
    }
}
