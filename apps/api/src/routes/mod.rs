pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};

use crate::analysis::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route(
            "/api/v1/analyses",
            post(handlers::handle_analyze).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/api/v1/quota", get(handlers::handle_get_quota))
        .route("/api/v1/history", get(handlers::handle_user_history))
        // Admin
        .route("/api/v1/admin/cache", get(handlers::handle_list_cache))
        .route(
            "/api/v1/admin/cache/:cache_key",
            get(handlers::handle_get_cache_entry).delete(handlers::handle_invalidate_cache),
        )
        .route("/api/v1/admin/history", get(handlers::handle_list_history))
        .route(
            "/api/v1/admin/history/:id",
            delete(handlers::handle_delete_history),
        )
        .route("/api/v1/admin/tiers", delete(handlers::handle_clear_tier_cache))
        .with_state(state)
}
