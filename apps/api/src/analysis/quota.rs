//! Quota Gate: per-user monthly analysis limit.
//!
//! Usage is the number of history records a user created in the current
//! calendar month (UTC). The limit comes from the user's tier, which is owned
//! by the billing side of the product and read through [`TierResolver`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::analysis::history::HistoryStore;
use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Standard,
    Elevated,
}

impl Tier {
    /// Maps a stored tier string. Anything unknown is treated as standard.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "elevated" | "premium" | "pro" => Tier::Elevated,
            _ => Tier::Standard,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QuotaLimits {
    pub standard: u32,
    pub elevated: u32,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            standard: 3,
            elevated: 10,
        }
    }
}

impl QuotaLimits {
    pub fn for_tier(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Standard => self.standard,
            Tier::Elevated => self.elevated,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaState {
    pub period_label: String,
    pub analyses_count: u32,
    pub max_analyses: u32,
    pub can_analyze: bool,
}

impl QuotaState {
    pub fn new(period_label: String, analyses_count: u32, max_analyses: u32) -> Self {
        Self {
            period_label,
            analyses_count,
            max_analyses,
            can_analyze: analyses_count < max_analyses,
        }
    }
}

/// Calendar month containing `now`: first instant, last instant (inclusive)
/// and a `YYYY-MM` label.
pub fn month_bounds(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>, String) {
    let first_day = NaiveDate::from_ymd_opt(now.year(), now.month(), 1).unwrap_or(now.date_naive());
    let next_first_day = if now.month() == 12 {
        NaiveDate::from_ymd_opt(now.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(now.year(), now.month() + 1, 1)
    }
    .unwrap_or(first_day);

    let start = Utc.from_utc_datetime(&first_day.and_time(chrono::NaiveTime::MIN));
    let end = Utc.from_utc_datetime(&next_first_day.and_time(chrono::NaiveTime::MIN))
        - chrono::Duration::microseconds(1);
    (start, end, now.format("%Y-%m").to_string())
}

/// Source of a user's subscription tier.
#[async_trait]
pub trait TierResolver: Send + Sync {
    async fn resolve_tier(&self, user_id: Uuid) -> Result<Tier>;
}

/// Reads `users.tier`. Users without a row are standard.
pub struct PgTierResolver {
    pool: PgPool,
}

impl PgTierResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TierResolver for PgTierResolver {
    async fn resolve_tier(&self, user_id: Uuid) -> Result<Tier> {
        let tier: Option<String> = sqlx::query_scalar("SELECT tier FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(tier.map(|t| Tier::from_label(&t)).unwrap_or(Tier::Standard))
    }
}

/// Tier lookups cached in-process with a bounded freshness window.
pub struct CachedTierResolver {
    inner: Arc<dyn TierResolver>,
    ttl: Duration,
    entries: RwLock<HashMap<Uuid, (Tier, Instant)>>,
}

impl CachedTierResolver {
    pub fn new(inner: Arc<dyn TierResolver>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached tier if it is still fresh.
    pub fn get(&self, user_id: Uuid) -> Option<Tier> {
        let entries = self.entries.read().ok()?;
        entries
            .get(&user_id)
            .filter(|(_, cached_at)| cached_at.elapsed() < self.ttl)
            .map(|(tier, _)| *tier)
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }
}

#[async_trait]
impl TierResolver for CachedTierResolver {
    async fn resolve_tier(&self, user_id: Uuid) -> Result<Tier> {
        if let Some(tier) = self.get(user_id) {
            return Ok(tier);
        }
        let tier = self.inner.resolve_tier(user_id).await?;
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(user_id, (tier, Instant::now()));
        }
        Ok(tier)
    }
}

pub struct QuotaGate {
    history: Arc<dyn HistoryStore>,
    tiers: Arc<dyn TierResolver>,
    limits: QuotaLimits,
}

impl QuotaGate {
    pub fn new(
        history: Arc<dyn HistoryStore>,
        tiers: Arc<dyn TierResolver>,
        limits: QuotaLimits,
    ) -> Self {
        Self {
            history,
            tiers,
            limits,
        }
    }

    pub async fn check_quota(&self, user_id: Uuid) -> Result<QuotaState, AppError> {
        self.check_quota_at(user_id, Utc::now()).await
    }

    pub async fn check_quota_at(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<QuotaState, AppError> {
        let tier = match self.tiers.resolve_tier(user_id).await {
            Ok(tier) => tier,
            Err(e) => {
                warn!("Tier lookup failed for user {user_id}, using standard limits: {e:#}");
                Tier::Standard
            }
        };

        let (start, end, period_label) = month_bounds(now);
        let used = self.history.count_between(user_id, start, end).await?;
        let state = QuotaState::new(period_label, used, self.limits.for_tier(tier));

        debug!(
            "Quota for user {user_id}: {}/{} in {} ({tier:?})",
            state.analyses_count, state.max_analyses, state.period_label
        );
        Ok(state)
    }

    /// Fails with `AppError::QuotaExceeded` when the user has no analyses left.
    pub async fn enforce(&self, user_id: Uuid) -> Result<QuotaState, AppError> {
        let state = self.check_quota(user_id).await?;
        if !state.can_analyze {
            return Err(AppError::QuotaExceeded {
                period: state.period_label,
                used: state.analyses_count,
                limit: state.max_analyses,
            });
        }
        Ok(state)
    }
}
