mod analysis;
mod config;
mod db;
mod errors;
mod llm_client;
mod models;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::analysis::cache_store::PgCacheStore;
use crate::analysis::extractor::{Extractor, PdftoppmRenderer};
use crate::analysis::history::{HistoryRecorder, PgHistoryStore};
use crate::analysis::invoker::LlmGrader;
use crate::analysis::pipeline::AnalysisPipeline;
use crate::analysis::quota::{CachedTierResolver, PgTierResolver, QuotaGate, QuotaLimits};
use crate::config::Config;
use crate::db::create_pool;
use crate::llm_client::LlmClient;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting analyzer v{}", env!("CARGO_PKG_VERSION"));

    // PostgreSQL (runs migrations)
    let db = create_pool(&config.database_url).await?;

    let cache = Arc::new(PgCacheStore::new(db.clone()));
    let history = Arc::new(PgHistoryStore::new(db.clone()));

    let tiers = Arc::new(CachedTierResolver::new(
        Arc::new(PgTierResolver::new(db.clone())),
        Duration::from_secs(config.tier_cache_ttl_secs),
    ));
    let quota = Arc::new(QuotaGate::new(
        history.clone(),
        tiers.clone(),
        QuotaLimits {
            standard: config.standard_max_analyses,
            elevated: config.elevated_max_analyses,
        },
    ));
    info!(
        "Quota limits: standard={} elevated={}",
        config.standard_max_analyses, config.elevated_max_analyses
    );

    let renderer = Arc::new(PdftoppmRenderer {
        bin: config.pdftoppm_bin.clone(),
        dpi: config.render_dpi,
        max_pages: config.max_render_pages,
    });
    let extractor = Extractor::new(config.min_text_chars, renderer);

    let llm = LlmClient::new(config.anthropic_api_key.clone());
    info!("LLM client initialized (model: {})", llm_client::MODEL);

    let pipeline = AnalysisPipeline::new(
        quota.clone(),
        extractor,
        cache.clone(),
        Arc::new(LlmGrader::new(llm)),
        HistoryRecorder::new(history.clone()),
    );

    let state = AppState {
        pipeline: Arc::new(pipeline),
        quota,
        cache,
        history,
        tiers,
    };

    let app = build_router(state, config.max_upload_bytes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
