use std::sync::Arc;

use quotabot_db::models::{Plan, User};
use sqlx::SqlitePool;

use super::catalog_service::CatalogService;
use super::error::ServiceResult;
use super::fetch_user;
use super::quota_service::{MeteredResource, QuotaService, UsageCheck};

#[derive(Debug, Clone, Copy, Default)]
pub struct DayStats {
    pub requests: i64,
    pub tokens: i64,
}

#[derive(Debug, Clone)]
pub struct UserOverview {
    pub user: User,
    pub plan: Plan,
    pub today: DayStats,
    pub tts: UsageCheck,
    pub stt: UsageCheck,
    pub image: UsageCheck,
}

/// Per-day aggregate stats rows plus the assembled `/stats` view.
#[derive(Debug, Clone)]
pub struct StatsService {
    pool: SqlitePool,
    catalog: Arc<CatalogService>,
    quota: Arc<QuotaService>,
}

impl StatsService {
    pub fn new(pool: SqlitePool, catalog: Arc<CatalogService>, quota: Arc<QuotaService>) -> Self {
        Self {
            pool,
            catalog,
            quota,
        }
    }

    /// Appends one request and its token cost to today's aggregate row.
    pub async fn record(&self, telegram_id: i64, tokens: i64) -> ServiceResult<()> {
        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM user_stats WHERE user_id = ? AND date(created_at) = date('now')",
        )
        .bind(telegram_id)
        .fetch_optional(&self.pool)
        .await?;

        match existing {
            Some(id) => {
                sqlx::query(
                    "UPDATE user_stats SET requests = requests + 1, tokens = tokens + ? WHERE id = ?",
                )
                .bind(tokens)
                .bind(id)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query("INSERT INTO user_stats (user_id, requests, tokens) VALUES (?, 1, ?)")
                    .bind(telegram_id)
                    .bind(tokens)
                    .execute(&self.pool)
                    .await?;
            }
        }

        Ok(())
    }

    pub async fn overview(&self, telegram_id: i64) -> ServiceResult<UserOverview> {
        let user = fetch_user(&self.pool, telegram_id).await?;
        let plan = self.catalog.plan_for(&user).await?;

        let today: Option<(i64, i64)> = sqlx::query_as(
            "SELECT requests, tokens FROM user_stats
             WHERE user_id = ? AND date(created_at) = date('now')",
        )
        .bind(telegram_id)
        .fetch_optional(&self.pool)
        .await?;
        let (requests, tokens) = today.unwrap_or((0, 0));

        let tts = self
            .quota
            .check_monthly(telegram_id, MeteredResource::Tts, &plan)
            .await?;
        let stt = self
            .quota
            .check_monthly(telegram_id, MeteredResource::Stt, &plan)
            .await?;
        let image = self
            .quota
            .check_monthly(telegram_id, MeteredResource::Image, &plan)
            .await?;

        Ok(UserOverview {
            user,
            plan,
            today: DayStats { requests, tokens },
            tts,
            stt,
            image,
        })
    }
}
