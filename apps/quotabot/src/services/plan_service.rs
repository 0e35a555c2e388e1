use chrono::{DateTime, Duration, Utc};
use quotabot_db::models::{Plan, User};
use sqlx::SqlitePool;
use tracing::info;

use super::error::{ServiceError, ServiceResult};
use super::fetch_user;

pub const DEFAULT_PRO_DAYS: i64 = 30;

/// Plan transitions: admin- or promocode-triggered tier changes plus the
/// lazy PRO expiry. Ceilings always come from the plan catalog row.
#[derive(Debug, Clone)]
pub struct PlanService {
    pool: SqlitePool,
}

impl PlanService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Moves the user to the named plan, overwriting the ceilings.
    /// Consumption counters stay as-is: a downgrade can leave the user
    /// over-ceiling until the next daily reset, and checks clamp that to
    /// zero remaining.
    pub async fn change_plan(&self, telegram_id: i64, plan_name: &str) -> ServiceResult<Plan> {
        let plan = self.plan_row(plan_name).await?;
        let user = fetch_user(&self.pool, telegram_id).await?;

        let is_pro = !plan.is_free();
        let pro_expires_at: Option<DateTime<Utc>> = if is_pro {
            Some(Utc::now() + Duration::days(DEFAULT_PRO_DAYS))
        } else {
            None
        };

        sqlx::query(
            "UPDATE users SET plan_type = ?, is_pro = ?, pro_expires_at = ?,
                daily_tokens = ?, total_tokens = ?
             WHERE telegram_id = ?",
        )
        .bind(&plan.name)
        .bind(is_pro)
        .bind(pro_expires_at)
        .bind(plan.daily_tokens)
        .bind(plan.total_tokens)
        .bind(user.telegram_id)
        .execute(&self.pool)
        .await?;

        info!(user = telegram_id, plan = %plan.name, "Plan changed");
        Ok(plan)
    }

    /// A grant always gives a fresh daily allowance.
    pub async fn grant_pro(&self, telegram_id: i64, days: i64) -> ServiceResult<DateTime<Utc>> {
        let plan = self.plan_row("PRO").await?;
        let expires_at = Utc::now() + Duration::days(days);

        let res = sqlx::query(
            "UPDATE users SET is_pro = 1, pro_expires_at = ?, plan_type = 'PRO',
                daily_tokens = ?, total_tokens = ?, daily_used = 0
             WHERE telegram_id = ?",
        )
        .bind(expires_at)
        .bind(plan.daily_tokens)
        .bind(plan.total_tokens)
        .bind(telegram_id)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            return Err(ServiceError::NotFound("user"));
        }

        info!(user = telegram_id, days, "PRO granted");
        Ok(expires_at)
    }

    pub async fn expire_pro(&self, telegram_id: i64) -> ServiceResult<()> {
        let plan = self.plan_row("FREE").await?;

        let res = sqlx::query(
            "UPDATE users SET is_pro = 0, pro_expires_at = NULL, plan_type = 'FREE',
                daily_tokens = ?, total_tokens = ?, daily_used = 0
             WHERE telegram_id = ?",
        )
        .bind(plan.daily_tokens)
        .bind(plan.total_tokens)
        .bind(telegram_id)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            return Err(ServiceError::NotFound("user"));
        }

        Ok(())
    }

    /// Explicit check-and-maybe-expire. Returns the (possibly refreshed)
    /// user plus whether a downgrade happened, so callers and tests can
    /// observe the mutation instead of it hiding inside a getter.
    pub async fn refresh_pro_status(&self, user: User) -> ServiceResult<(User, bool)> {
        let expired = user.is_pro
            && user
                .pro_expires_at
                .map(|at| at <= Utc::now())
                .unwrap_or(false);

        if !expired {
            return Ok((user, false));
        }

        self.expire_pro(user.telegram_id).await?;
        info!(user = user.telegram_id, "PRO expired lazily on check");

        let fresh = fetch_user(&self.pool, user.telegram_id).await?;
        Ok((fresh, true))
    }

    pub async fn is_user_pro(&self, telegram_id: i64) -> ServiceResult<bool> {
        let user = fetch_user(&self.pool, telegram_id).await?;
        let (user, _) = self.refresh_pro_status(user).await?;
        Ok(user.is_pro)
    }

    async fn plan_row(&self, name: &str) -> ServiceResult<Plan> {
        let name = name.trim().to_uppercase();

        sqlx::query_as::<_, Plan>("SELECT * FROM plans WHERE name = ? AND is_active = 1")
            .bind(&name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(ServiceError::NotFound("plan"))
    }
}
