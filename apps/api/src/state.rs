use std::sync::Arc;

use crate::analysis::cache_store::CacheStore;
use crate::analysis::history::HistoryStore;
use crate::analysis::pipeline::AnalysisPipeline;
use crate::analysis::quota::{CachedTierResolver, QuotaGate};

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<AnalysisPipeline>,
    pub quota: Arc<QuotaGate>,
    /// Admin surface reads these stores directly.
    pub cache: Arc<dyn CacheStore>,
    pub history: Arc<dyn HistoryStore>,
    pub tiers: Arc<CachedTierResolver>,
}
