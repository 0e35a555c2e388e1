use chrono::{DateTime, Datelike, Utc};
use quotabot_db::models::{AiModel, Plan};
use sqlx::SqlitePool;
use tracing::info;

use super::error::ServiceResult;

/// Premium-model call budgets, keyed by plan name. The catalog carries no
/// column for these, so unknown plan names get the FREE trickle.
const PREMIUM_FREE_PER_DAY: i64 = 1;
const PREMIUM_PRO_PER_MONTH: i64 = 150;
const PREMIUM_UNLIMITED: i64 = 999_999;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeteredResource {
    Tts,
    Stt,
    Image,
}

impl MeteredResource {
    fn table(self) -> &'static str {
        match self {
            MeteredResource::Tts => "tts_usage",
            MeteredResource::Stt => "stt_usage",
            MeteredResource::Image => "image_usage",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MeteredResource::Tts => "voice synthesis",
            MeteredResource::Stt => "voice transcription",
            MeteredResource::Image => "image generation",
        }
    }

    pub fn plan_limit(self, plan: &Plan) -> i64 {
        match self {
            MeteredResource::Tts => plan.tts_limit,
            MeteredResource::Stt => plan.stt_limit,
            MeteredResource::Image => plan.image_limit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageCheck {
    pub allowed: bool,
    pub remaining: i64,
    pub limit: i64,
}

impl UsageCheck {
    /// Promotional credits can drive the stored count negative, which
    /// simply raises `remaining`; the clamp only guards the other
    /// direction (over-ceiling after a downgrade).
    fn from_count(count: i64, limit: i64) -> Self {
        Self {
            allowed: count < limit,
            remaining: (limit - count).max(0),
            limit,
        }
    }
}

pub fn month_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

pub fn day_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

pub fn previous_month_key(now: DateTime<Utc>) -> String {
    let (year, month) = if now.month() == 1 {
        (now.year() - 1, 12)
    } else {
        (now.year(), now.month() - 1)
    };
    format!("{:04}-{:02}", year, month)
}

pub fn premium_limit(plan: &Plan) -> i64 {
    match plan.name.as_str() {
        "PRO" => PREMIUM_PRO_PER_MONTH,
        "PREMIUM" => PREMIUM_UNLIMITED,
        _ => PREMIUM_FREE_PER_DAY,
    }
}

/// FREE users get a daily premium-model trickle, paid tiers a monthly
/// pool.
pub fn premium_bucket(plan: &Plan, now: DateTime<Utc>) -> String {
    if plan.is_free() {
        day_key(now)
    } else {
        month_key(now)
    }
}

/// The entitlement engine for bucketed resources: monthly TTS/STT/image
/// counters and the premium-model counter. A missing counter row always
/// means zero usage. Commits are plain upsert increments and must only
/// run after the guarded provider call succeeded.
#[derive(Debug, Clone)]
pub struct QuotaService {
    pool: SqlitePool,
}

impl QuotaService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn check_monthly(
        &self,
        user_id: i64,
        resource: MeteredResource,
        plan: &Plan,
    ) -> ServiceResult<UsageCheck> {
        let bucket = month_key(Utc::now());
        let count: Option<i64> = sqlx::query_scalar(&format!(
            "SELECT usage_count FROM {} WHERE user_id = ? AND month_year = ?",
            resource.table()
        ))
        .bind(user_id)
        .bind(&bucket)
        .fetch_optional(&self.pool)
        .await?;

        Ok(UsageCheck::from_count(
            count.unwrap_or(0),
            resource.plan_limit(plan),
        ))
    }

    pub async fn commit_monthly(
        &self,
        user_id: i64,
        resource: MeteredResource,
    ) -> ServiceResult<()> {
        let bucket = month_key(Utc::now());
        sqlx::query(&format!(
            "INSERT INTO {} (user_id, month_year, usage_count) VALUES (?, ?, 1)
             ON CONFLICT(user_id, month_year) DO UPDATE SET usage_count = usage_count + 1",
            resource.table()
        ))
        .bind(user_id)
        .bind(&bucket)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Returns None for models that are not premium-typed: those are not
    /// gated here at all.
    pub async fn check_premium(
        &self,
        user_id: i64,
        model: &AiModel,
        plan: &Plan,
    ) -> ServiceResult<Option<UsageCheck>> {
        if !model.is_premium() {
            return Ok(None);
        }

        let bucket = premium_bucket(plan, Utc::now());
        let count: Option<i64> = sqlx::query_scalar(
            "SELECT usage_count FROM pro_model_usage
             WHERE user_id = ? AND model_id = ? AND month_year = ?",
        )
        .bind(user_id)
        .bind(&model.id)
        .bind(&bucket)
        .fetch_optional(&self.pool)
        .await?;

        Ok(Some(UsageCheck::from_count(
            count.unwrap_or(0),
            premium_limit(plan),
        )))
    }

    pub async fn commit_premium(
        &self,
        user_id: i64,
        model_id: &str,
        plan: &Plan,
    ) -> ServiceResult<()> {
        let bucket = premium_bucket(plan, Utc::now());
        sqlx::query(
            "INSERT INTO pro_model_usage (user_id, model_id, month_year, usage_count)
             VALUES (?, ?, ?, 1)
             ON CONFLICT(user_id, model_id, month_year)
             DO UPDATE SET usage_count = usage_count + 1",
        )
        .bind(user_id)
        .bind(model_id)
        .bind(&bucket)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Retention sweep: drops counter rows older than the previous month.
    /// Plain string comparison keeps the current and previous-month
    /// buckets, daily `YYYY-MM-DD` keys included.
    pub async fn sweep_stale_buckets(&self) -> ServiceResult<u64> {
        let cutoff = previous_month_key(Utc::now());
        let mut removed = 0u64;

        for table in ["tts_usage", "stt_usage", "image_usage", "pro_model_usage"] {
            let res = sqlx::query(&format!("DELETE FROM {} WHERE month_year < ?", table))
                .bind(&cutoff)
                .execute(&self.pool)
                .await?;
            removed += res.rows_affected();
        }

        info!(removed, cutoff = %cutoff, "Swept stale usage buckets");
        Ok(removed)
    }
}
